//! Position record: one per (agent, market), zeroed rather than removed.

use super::{AccountRecord, ByteReader, ByteWriter, SchemaError};
use crate::domain::fixed_point::{decode, decode_unsigned, Domain};
use crate::domain::{MarketIndex, Pubkey, Side};
use crate::margin;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    /// Agent account (not the owner wallet).
    pub agent: Pubkey,
    pub market_index: u8,
    /// Base units scaled by 10^8; positive = long, negative = short, zero = flat.
    pub size: i64,
    pub entry_price: u64,
    pub liquidation_price: u64,
    pub margin: u64,
    pub unrealized_pnl: i64,
    pub opened_at: i64,
    pub updated_at: i64,
    pub bump: u8,
}

impl AccountRecord for Position {
    const NAME: &'static str = "Position";
    const LEN: usize = 8 + 32 + 1 + 8 * 7 + 1;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, SchemaError> {
        Ok(Position {
            agent: r.pubkey()?,
            market_index: r.u8()?,
            size: r.i64()?,
            entry_price: r.u64()?,
            liquidation_price: r.u64()?,
            margin: r.u64()?,
            unrealized_pnl: r.i64()?,
            opened_at: r.i64()?,
            updated_at: r.i64()?,
            bump: r.u8()?,
        })
    }

    fn write_fields(&self, w: &mut ByteWriter) {
        w.put_pubkey(&self.agent);
        w.put_u8(self.market_index);
        w.put_i64(self.size);
        w.put_u64(self.entry_price);
        w.put_u64(self.liquidation_price);
        w.put_u64(self.margin);
        w.put_i64(self.unrealized_pnl);
        w.put_i64(self.opened_at);
        w.put_i64(self.updated_at);
        w.put_u8(self.bump);
    }
}

impl Position {
    pub fn market(&self) -> MarketIndex {
        MarketIndex::from(self.market_index)
    }

    pub fn side(&self) -> Option<Side> {
        Side::from_signed_size(self.size)
    }

    pub fn is_open(&self) -> bool {
        self.size != 0
    }

    /// Enrich into a `PositionInfo`; `None` for a flat position.
    pub fn to_info(&self, address: Pubkey) -> Option<PositionInfo> {
        let side = self.side()?;
        let margin = decode_unsigned(Domain::Usd, self.margin);
        let unrealized_pnl = decode(Domain::Usd, self.unrealized_pnl);
        let notional = margin::notional(self.size, self.entry_price)
            .map(|n| decode_unsigned(Domain::Usd, n))
            .unwrap_or(f64::INFINITY);
        let pnl_percent = if margin > 0.0 {
            unrealized_pnl / margin * 100.0
        } else {
            0.0
        };
        let leverage = if margin > 0.0 { notional / margin } else { 0.0 };
        let market = self.market();

        Some(PositionInfo {
            address,
            agent: self.agent,
            market,
            market_symbol: market.symbol(),
            side,
            size: decode_unsigned(Domain::Size, self.size.unsigned_abs()),
            entry_price: decode_unsigned(Domain::Price, self.entry_price),
            liquidation_price: decode_unsigned(Domain::Price, self.liquidation_price),
            margin,
            unrealized_pnl,
            pnl_percent,
            notional,
            leverage,
            opened_at: DateTime::from_timestamp(self.opened_at, 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(self.updated_at, 0).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub address: Pubkey,
    pub agent: Pubkey,
    pub market: MarketIndex,
    pub market_symbol: String,
    pub side: Side,
    /// Absolute size in base units.
    pub size: f64,
    pub entry_price: f64,
    pub liquidation_price: f64,
    pub margin: f64,
    pub unrealized_pnl: f64,
    pub pnl_percent: f64,
    pub notional: f64,
    pub leverage: f64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
