//! Agent record: one per owner identity.

use super::{padded_to_string, string_to_padded, AccountRecord, ByteReader, ByteWriter, SchemaError};
use crate::domain::fixed_point::{decode, decode_unsigned, Domain};
use crate::domain::Pubkey;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Width of the NUL-padded name buffer.
pub const AGENT_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Agent {
    pub owner: Pubkey,
    pub name: [u8; AGENT_NAME_LEN],
    /// Micro-USD, free collateral (margin of open positions is already taken out).
    pub collateral: u64,
    pub unrealized_pnl: i64,
    pub realized_pnl: i64,
    pub total_trades: u64,
    pub win_count: u64,
    /// Unix seconds.
    pub registered_at: i64,
    pub is_active: bool,
    pub bump: u8,
}

impl AccountRecord for Agent {
    const NAME: &'static str = "Agent";
    const LEN: usize = 8 + 32 + AGENT_NAME_LEN + 8 * 6 + 1 + 1;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, SchemaError> {
        Ok(Agent {
            owner: r.pubkey()?,
            name: r.array()?,
            collateral: r.u64()?,
            unrealized_pnl: r.i64()?,
            realized_pnl: r.i64()?,
            total_trades: r.u64()?,
            win_count: r.u64()?,
            registered_at: r.i64()?,
            is_active: r.bool()?,
            bump: r.u8()?,
        })
    }

    fn write_fields(&self, w: &mut ByteWriter) {
        w.put_pubkey(&self.owner);
        w.put_bytes(&self.name);
        w.put_u64(self.collateral);
        w.put_i64(self.unrealized_pnl);
        w.put_i64(self.realized_pnl);
        w.put_u64(self.total_trades);
        w.put_u64(self.win_count);
        w.put_i64(self.registered_at);
        w.put_bool(self.is_active);
        w.put_u8(self.bump);
    }
}

impl Agent {
    /// Name as NUL-padded bytes, or `None` if longer than the buffer.
    pub fn encode_name(name: &str) -> Option<[u8; AGENT_NAME_LEN]> {
        string_to_padded(name)
    }

    pub fn name(&self) -> String {
        padded_to_string(&self.name)
    }

    /// Winning trades as a percentage; 0 when no trade was made.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.win_count as f64 / self.total_trades as f64 * 100.0
    }

    pub fn to_info(&self, address: Pubkey) -> AgentInfo {
        AgentInfo {
            address,
            owner: self.owner,
            name: self.name(),
            collateral: decode_unsigned(Domain::Usd, self.collateral),
            unrealized_pnl: decode(Domain::Usd, self.unrealized_pnl),
            realized_pnl: decode(Domain::Usd, self.realized_pnl),
            total_trades: self.total_trades,
            win_count: self.win_count,
            win_rate: self.win_rate(),
            registered_at: DateTime::from_timestamp(self.registered_at, 0).unwrap_or_default(),
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub name: String,
    pub collateral: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_trades: u64,
    pub win_count: u64,
    pub win_rate: f64,
    pub registered_at: DateTime<Utc>,
    pub is_active: bool,
}
