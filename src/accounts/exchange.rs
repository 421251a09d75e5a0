//! Exchange singleton record.

use super::{AccountRecord, ByteReader, ByteWriter, SchemaError};
use crate::domain::fixed_point::{bps_to_percent, decode_unsigned, Domain};
use crate::domain::Pubkey;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    pub authority: Pubkey,
    pub collateral_mint: Pubkey,
    pub vault: Pubkey,
    /// Fee rate in basis points (10 = 0.1%).
    pub fee_rate_bps: u16,
    pub total_agents: u64,
    /// Micro-USD.
    pub total_deposits: u64,
    /// Micro-USD.
    pub total_open_interest: u64,
    pub bump: u8,
}

impl AccountRecord for Exchange {
    const NAME: &'static str = "Exchange";
    const LEN: usize = 8 + 32 + 32 + 32 + 2 + 8 + 8 + 8 + 1;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, SchemaError> {
        Ok(Exchange {
            authority: r.pubkey()?,
            collateral_mint: r.pubkey()?,
            vault: r.pubkey()?,
            fee_rate_bps: r.u16()?,
            total_agents: r.u64()?,
            total_deposits: r.u64()?,
            total_open_interest: r.u64()?,
            bump: r.u8()?,
        })
    }

    fn write_fields(&self, w: &mut ByteWriter) {
        w.put_pubkey(&self.authority);
        w.put_pubkey(&self.collateral_mint);
        w.put_pubkey(&self.vault);
        w.put_u16(self.fee_rate_bps);
        w.put_u64(self.total_agents);
        w.put_u64(self.total_deposits);
        w.put_u64(self.total_open_interest);
        w.put_u8(self.bump);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub address: Pubkey,
    pub authority: Pubkey,
    pub collateral_mint: Pubkey,
    pub vault: Pubkey,
    pub fee_rate_bps: u16,
    pub fee_rate_percent: f64,
    pub total_agents: u64,
    pub total_deposits: f64,
    pub total_open_interest: f64,
}

impl Exchange {
    pub fn to_info(&self, address: Pubkey) -> ExchangeInfo {
        ExchangeInfo {
            address,
            authority: self.authority,
            collateral_mint: self.collateral_mint,
            vault: self.vault,
            fee_rate_bps: self.fee_rate_bps,
            fee_rate_percent: bps_to_percent(self.fee_rate_bps),
            total_agents: self.total_agents,
            total_deposits: decode_unsigned(Domain::Usd, self.total_deposits),
            total_open_interest: decode_unsigned(Domain::Usd, self.total_open_interest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Exchange {
        Exchange {
            authority: Pubkey::new([1; 32]),
            collateral_mint: Pubkey::new([2; 32]),
            vault: Pubkey::new([3; 32]),
            fee_rate_bps: 10,
            total_agents: 4,
            total_deposits: 2_500_000_000,
            total_open_interest: 0,
            bump: 254,
        }
    }

    #[test]
    fn test_exchange_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), 131);
        assert_eq!(&bytes[104..106], &10u16.to_le_bytes());
        assert_eq!(&bytes[114..122], &2_500_000_000u64.to_le_bytes());
        assert_eq!(bytes[130], 254);
        assert_eq!(Exchange::parse(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_exchange_info_percent() {
        let info = sample().to_info(Pubkey::default());
        assert_eq!(info.fee_rate_percent, 0.1);
        assert_eq!(info.total_deposits, 2500.0);
        assert_eq!(info.total_agents, 4);
    }

    #[test]
    fn test_exchange_rejects_truncated() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Exchange::parse(&bytes[..130]),
            Err(SchemaError::WrongLength {
                expected: 131,
                actual: 130,
                ..
            })
        ));
    }
}
