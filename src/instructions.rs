//! Exchange program instruction encoding.
//!
//! Instruction data is an 8-byte discriminator (`sha256("global:<name>")[..8]`)
//! followed by the arguments, little-endian, strings length-prefixed with a
//! u32. Account lists follow the order the program declares them in.

use crate::accounts::{ByteReader, ByteWriter};
use crate::domain::{MarketIndex, Pubkey};
use crate::ledger::{AccountMeta, Instruction};
use crate::pda::{
    AddressDeriver, DerivationError, RENT_SYSVAR_ID, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use sha2::{Digest, Sha256};

/// First eight bytes of `sha256("global:<name>")`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let hash = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// Decoded instruction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeInstruction {
    Initialize { fee_rate_bps: u16 },
    RegisterAgent { name: String },
    Deposit { amount: u64 },
    Withdraw { amount: u64 },
    OpenPosition { market_index: u8, size: i64, entry_price: u64 },
    ClosePosition { market_index: u8, exit_price: u64 },
    Liquidate { market_index: u8 },
    SettlePnl { market_index: u8 },
}

impl ExchangeInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeInstruction::Initialize { .. } => "initialize",
            ExchangeInstruction::RegisterAgent { .. } => "register_agent",
            ExchangeInstruction::Deposit { .. } => "deposit",
            ExchangeInstruction::Withdraw { .. } => "withdraw",
            ExchangeInstruction::OpenPosition { .. } => "open_position",
            ExchangeInstruction::ClosePosition { .. } => "close_position",
            ExchangeInstruction::Liquidate { .. } => "liquidate",
            ExchangeInstruction::SettlePnl { .. } => "settle_pnl",
        }
    }

    pub fn data(&self) -> Vec<u8> {
        let mut w = ByteWriter::default();
        w.put_bytes(&instruction_discriminator(self.name()));
        match self {
            ExchangeInstruction::Initialize { fee_rate_bps } => w.put_u16(*fee_rate_bps),
            ExchangeInstruction::RegisterAgent { name } => w.put_string(name),
            ExchangeInstruction::Deposit { amount } | ExchangeInstruction::Withdraw { amount } => {
                w.put_u64(*amount)
            }
            ExchangeInstruction::OpenPosition {
                market_index,
                size,
                entry_price,
            } => {
                w.put_u8(*market_index);
                w.put_i64(*size);
                w.put_u64(*entry_price);
            }
            ExchangeInstruction::ClosePosition {
                market_index,
                exit_price,
            } => {
                w.put_u8(*market_index);
                w.put_u64(*exit_price);
            }
            ExchangeInstruction::Liquidate { market_index }
            | ExchangeInstruction::SettlePnl { market_index } => w.put_u8(*market_index),
        }
        w.into_inner()
    }

    /// Decode instruction data; `None` for an unknown discriminator or
    /// trailing/missing bytes.
    pub fn unpack(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let (tag, rest) = data.split_at(8);
        let mut r = ByteReader::new("instruction", rest, 0);
        let ix = match tag {
            t if t == instruction_discriminator("initialize") => ExchangeInstruction::Initialize {
                fee_rate_bps: r.u16().ok()?,
            },
            t if t == instruction_discriminator("register_agent") => {
                let len = u32::from_le_bytes(r.array().ok()?) as usize;
                if rest.len() != 4 + len {
                    return None;
                }
                let name = String::from_utf8(rest[4..].to_vec()).ok()?;
                return Some(ExchangeInstruction::RegisterAgent { name });
            }
            t if t == instruction_discriminator("deposit") => ExchangeInstruction::Deposit {
                amount: r.u64().ok()?,
            },
            t if t == instruction_discriminator("withdraw") => ExchangeInstruction::Withdraw {
                amount: r.u64().ok()?,
            },
            t if t == instruction_discriminator("open_position") => {
                ExchangeInstruction::OpenPosition {
                    market_index: r.u8().ok()?,
                    size: r.i64().ok()?,
                    entry_price: r.u64().ok()?,
                }
            }
            t if t == instruction_discriminator("close_position") => {
                ExchangeInstruction::ClosePosition {
                    market_index: r.u8().ok()?,
                    exit_price: r.u64().ok()?,
                }
            }
            t if t == instruction_discriminator("liquidate") => ExchangeInstruction::Liquidate {
                market_index: r.u8().ok()?,
            },
            t if t == instruction_discriminator("settle_pnl") => ExchangeInstruction::SettlePnl {
                market_index: r.u8().ok()?,
            },
            _ => return None,
        };
        if r.offset() != rest.len() {
            return None;
        }
        Some(ix)
    }
}

fn build(deriver: &AddressDeriver, ix: ExchangeInstruction, accounts: Vec<AccountMeta>) -> Instruction {
    Instruction {
        program_id: deriver.program_id(),
        accounts,
        data: ix.data(),
    }
}

/// Create the exchange singleton and its collateral vault.
pub fn initialize(
    deriver: &AddressDeriver,
    authority: &Pubkey,
    collateral_mint: &Pubkey,
    fee_rate_bps: u16,
) -> Result<Instruction, DerivationError> {
    Ok(build(
        deriver,
        ExchangeInstruction::Initialize { fee_rate_bps },
        vec![
            AccountMeta::new(*authority, true),
            AccountMeta::new(deriver.exchange()?.address, false),
            AccountMeta::new_readonly(*collateral_mint, false),
            AccountMeta::new(deriver.vault()?.address, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(RENT_SYSVAR_ID, false),
        ],
    ))
}

pub fn register_agent(
    deriver: &AddressDeriver,
    owner: &Pubkey,
    name: &str,
) -> Result<Instruction, DerivationError> {
    Ok(build(
        deriver,
        ExchangeInstruction::RegisterAgent {
            name: name.to_string(),
        },
        vec![
            AccountMeta::new(*owner, true),
            AccountMeta::new(deriver.exchange()?.address, false),
            AccountMeta::new(deriver.agent(owner)?.address, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
    ))
}

pub fn deposit(
    deriver: &AddressDeriver,
    owner: &Pubkey,
    owner_token_account: &Pubkey,
    amount: u64,
) -> Result<Instruction, DerivationError> {
    Ok(build(
        deriver,
        ExchangeInstruction::Deposit { amount },
        vec![
            AccountMeta::new(*owner, true),
            AccountMeta::new(deriver.exchange()?.address, false),
            AccountMeta::new(deriver.agent(owner)?.address, false),
            AccountMeta::new(*owner_token_account, false),
            AccountMeta::new(deriver.vault()?.address, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
    ))
}

pub fn withdraw(
    deriver: &AddressDeriver,
    owner: &Pubkey,
    owner_token_account: &Pubkey,
    collateral_mint: &Pubkey,
    amount: u64,
) -> Result<Instruction, DerivationError> {
    Ok(build(
        deriver,
        ExchangeInstruction::Withdraw { amount },
        vec![
            AccountMeta::new(*owner, true),
            AccountMeta::new(deriver.exchange()?.address, false),
            AccountMeta::new(deriver.agent(owner)?.address, false),
            AccountMeta::new(*owner_token_account, false),
            AccountMeta::new(deriver.vault()?.address, false),
            AccountMeta::new_readonly(*collateral_mint, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
    ))
}

/// Open (or add to) `owner`'s position; signed by the exchange authority,
/// rent for a first-time position account is paid by `payer`.
pub fn open_position(
    deriver: &AddressDeriver,
    authority: &Pubkey,
    owner: &Pubkey,
    payer: &Pubkey,
    market: MarketIndex,
    size: i64,
    entry_price: u64,
) -> Result<Instruction, DerivationError> {
    let agent = deriver.agent(owner)?.address;
    Ok(build(
        deriver,
        ExchangeInstruction::OpenPosition {
            market_index: market.as_u8(),
            size,
            entry_price,
        },
        vec![
            AccountMeta::new_readonly(*authority, true),
            AccountMeta::new_readonly(deriver.exchange()?.address, false),
            AccountMeta::new(agent, false),
            AccountMeta::new(deriver.position(&agent, market)?.address, false),
            AccountMeta::new_readonly(deriver.market(market)?.address, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
    ))
}

pub fn close_position(
    deriver: &AddressDeriver,
    authority: &Pubkey,
    owner: &Pubkey,
    market: MarketIndex,
    exit_price: u64,
) -> Result<Instruction, DerivationError> {
    let agent = deriver.agent(owner)?.address;
    Ok(build(
        deriver,
        ExchangeInstruction::ClosePosition {
            market_index: market.as_u8(),
            exit_price,
        },
        vec![
            AccountMeta::new_readonly(*authority, true),
            AccountMeta::new_readonly(deriver.exchange()?.address, false),
            AccountMeta::new(agent, false),
            AccountMeta::new(deriver.position(&agent, market)?.address, false),
        ],
    ))
}

pub fn liquidate(
    deriver: &AddressDeriver,
    liquidator: &Pubkey,
    target_owner: &Pubkey,
    market: MarketIndex,
) -> Result<Instruction, DerivationError> {
    let agent = deriver.agent(target_owner)?.address;
    Ok(build(
        deriver,
        ExchangeInstruction::Liquidate {
            market_index: market.as_u8(),
        },
        vec![
            AccountMeta::new(*liquidator, true),
            AccountMeta::new(deriver.exchange()?.address, false),
            AccountMeta::new(agent, false),
            AccountMeta::new(deriver.position(&agent, market)?.address, false),
            AccountMeta::new(deriver.agent(liquidator)?.address, false),
        ],
    ))
}

pub fn settle_pnl(
    deriver: &AddressDeriver,
    owner: &Pubkey,
    market: MarketIndex,
) -> Result<Instruction, DerivationError> {
    let agent = deriver.agent(owner)?.address;
    Ok(build(
        deriver,
        ExchangeInstruction::SettlePnl {
            market_index: market.as_u8(),
        },
        vec![
            AccountMeta::new(*owner, true),
            AccountMeta::new(agent, false),
            AccountMeta::new(deriver.position(&agent, market)?.address, false),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deriver() -> AddressDeriver {
        AddressDeriver::new(Pubkey::new([11; 32]))
    }

    #[test]
    fn test_discriminators_match_deployed_program() {
        assert_eq!(
            instruction_discriminator("open_position"),
            [135, 128, 47, 77, 15, 152, 240, 49]
        );
        assert_eq!(
            instruction_discriminator("close_position"),
            [123, 134, 81, 0, 49, 68, 98, 98]
        );
        assert_eq!(
            instruction_discriminator("initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
    }

    #[test]
    fn test_open_position_data_layout() {
        let data = ExchangeInstruction::OpenPosition {
            market_index: 0,
            size: -50_000_000,
            entry_price: 67_420_000_000,
        }
        .data();
        assert_eq!(data.len(), 8 + 1 + 8 + 8);
        assert_eq!(&data[..8], &[135, 128, 47, 77, 15, 152, 240, 49]);
        assert_eq!(data[8], 0);
        assert_eq!(&data[9..17], &(-50_000_000i64).to_le_bytes());
        assert_eq!(&data[17..25], &67_420_000_000u64.to_le_bytes());
    }

    #[test]
    fn test_unpack_decodes_every_variant() {
        let all = vec![
            ExchangeInstruction::Initialize { fee_rate_bps: 10 },
            ExchangeInstruction::RegisterAgent {
                name: "Alpha".to_string(),
            },
            ExchangeInstruction::Deposit { amount: 1 },
            ExchangeInstruction::Withdraw { amount: 2 },
            ExchangeInstruction::OpenPosition {
                market_index: 2,
                size: 3,
                entry_price: 4,
            },
            ExchangeInstruction::ClosePosition {
                market_index: 1,
                exit_price: 5,
            },
            ExchangeInstruction::Liquidate { market_index: 0 },
            ExchangeInstruction::SettlePnl { market_index: 1 },
        ];
        for ix in all {
            assert_eq!(ExchangeInstruction::unpack(&ix.data()), Some(ix));
        }
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert_eq!(ExchangeInstruction::unpack(&[1, 2, 3]), None);
        assert_eq!(ExchangeInstruction::unpack(&[0; 16]), None);
        let mut data = ExchangeInstruction::Deposit { amount: 1 }.data();
        data.push(0);
        assert_eq!(ExchangeInstruction::unpack(&data), None);
    }

    #[test]
    fn test_open_position_accounts() {
        let d = deriver();
        let authority = Pubkey::new([1; 32]);
        let owner = Pubkey::new([2; 32]);
        let ix = open_position(&d, &authority, &owner, &authority, MarketIndex::Eth, 1, 1).unwrap();
        let agent = d.agent(&owner).unwrap().address;
        assert_eq!(ix.program_id, d.program_id());
        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(ix.accounts[0], AccountMeta::new_readonly(authority, true));
        assert_eq!(ix.accounts[2].pubkey, agent);
        assert_eq!(
            ix.accounts[3].pubkey,
            d.position(&agent, MarketIndex::Eth).unwrap().address
        );
        assert_eq!(ix.accounts[4].pubkey, d.market(MarketIndex::Eth).unwrap().address);
        assert!(ix.accounts[5].is_signer && ix.accounts[5].is_writable);
    }

    #[test]
    fn test_liquidate_targets_both_agents() {
        let d = deriver();
        let liquidator = Pubkey::new([1; 32]);
        let target = Pubkey::new([2; 32]);
        let ix = liquidate(&d, &liquidator, &target, MarketIndex::Btc).unwrap();
        assert_eq!(ix.accounts[2].pubkey, d.agent(&target).unwrap().address);
        assert_eq!(ix.accounts[4].pubkey, d.agent(&liquidator).unwrap().address);
    }
}
