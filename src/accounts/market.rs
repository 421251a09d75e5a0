//! Market configuration record.

use super::{padded_to_string, string_to_padded, AccountRecord, ByteReader, ByteWriter, SchemaError};
use crate::domain::fixed_point::{bps_to_percent, decode_unsigned, Domain};
use crate::domain::{MarketIndex, Pubkey};
use serde::Serialize;

pub const MARKET_SYMBOL_LEN: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Market {
    pub index: u8,
    pub symbol: [u8; MARKET_SYMBOL_LEN],
    pub oracle: Pubkey,
    /// Basis points (1000 = 10%).
    pub initial_margin_rate: u16,
    /// Basis points (500 = 5%).
    pub maintenance_margin_rate: u16,
    pub max_leverage: u8,
    /// Micro-USD notional.
    pub long_open_interest: u64,
    /// Micro-USD notional.
    pub short_open_interest: u64,
    pub is_active: bool,
    pub bump: u8,
}

impl AccountRecord for Market {
    const NAME: &'static str = "Market";
    const LEN: usize = 8 + 1 + MARKET_SYMBOL_LEN + 32 + 2 + 2 + 1 + 8 + 8 + 1 + 1;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, SchemaError> {
        Ok(Market {
            index: r.u8()?,
            symbol: r.array()?,
            oracle: r.pubkey()?,
            initial_margin_rate: r.u16()?,
            maintenance_margin_rate: r.u16()?,
            max_leverage: r.u8()?,
            long_open_interest: r.u64()?,
            short_open_interest: r.u64()?,
            is_active: r.bool()?,
            bump: r.u8()?,
        })
    }

    fn write_fields(&self, w: &mut ByteWriter) {
        w.put_u8(self.index);
        w.put_bytes(&self.symbol);
        w.put_pubkey(&self.oracle);
        w.put_u16(self.initial_margin_rate);
        w.put_u16(self.maintenance_margin_rate);
        w.put_u8(self.max_leverage);
        w.put_u64(self.long_open_interest);
        w.put_u64(self.short_open_interest);
        w.put_bool(self.is_active);
        w.put_u8(self.bump);
    }
}

impl Market {
    pub fn encode_symbol(symbol: &str) -> Option<[u8; MARKET_SYMBOL_LEN]> {
        string_to_padded(symbol)
    }

    pub fn symbol(&self) -> String {
        padded_to_string(&self.symbol)
    }

    pub fn to_info(&self, address: Pubkey) -> MarketInfo {
        let long_open_interest = decode_unsigned(Domain::Usd, self.long_open_interest);
        let short_open_interest = decode_unsigned(Domain::Usd, self.short_open_interest);
        MarketInfo {
            address,
            index: MarketIndex::from(self.index),
            symbol: self.symbol(),
            oracle: self.oracle,
            initial_margin_rate: bps_to_percent(self.initial_margin_rate),
            maintenance_margin_rate: bps_to_percent(self.maintenance_margin_rate),
            max_leverage: self.max_leverage,
            long_open_interest,
            short_open_interest,
            total_open_interest: long_open_interest + short_open_interest,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub address: Pubkey,
    pub index: MarketIndex,
    pub symbol: String,
    pub oracle: Pubkey,
    /// Percent.
    pub initial_margin_rate: f64,
    /// Percent.
    pub maintenance_margin_rate: f64,
    pub max_leverage: u8,
    pub long_open_interest: f64,
    pub short_open_interest: f64,
    pub total_open_interest: f64,
    pub is_active: bool,
}
