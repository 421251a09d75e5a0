//! Deterministic account address derivation.
//!
//! Every record the exchange program owns lives at a program-derived address:
//! `sha256(seeds || bump || program_id || "ProgramDerivedAddress")`, searched
//! from bump 255 downwards until the hash is *not* a valid ed25519 point, so
//! no private key can ever exist for it.

use crate::domain::{MarketIndex, Pubkey};
use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

pub const MAX_SEED_LEN: usize = 32;
/// Includes the bump seed.
pub const MAX_SEEDS: usize = 16;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

pub const EXCHANGE_SEED: &[u8] = b"exchange";
pub const VAULT_SEED: &[u8] = b"vault";
pub const AGENT_SEED: &[u8] = b"agent";
pub const POSITION_SEED: &[u8] = b"position";
pub const MARKET_SEED: &[u8] = b"market";

pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0; 32]);

/// TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA
pub const TOKEN_PROGRAM_ID: Pubkey = Pubkey::new([
    6, 221, 246, 225, 215, 101, 161, 147, 217, 203, 225, 70, 206, 235, 121, 172, 28, 180, 133, 237,
    95, 91, 55, 145, 58, 140, 245, 133, 126, 255, 0, 169,
]);

/// ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = Pubkey::new([
    140, 151, 37, 143, 78, 36, 137, 241, 187, 61, 16, 41, 20, 142, 13, 131, 11, 90, 19, 153, 218,
    255, 16, 132, 4, 142, 123, 216, 219, 233, 248, 89,
]);

/// SysvarRent111111111111111111111111111111111
pub const RENT_SYSVAR_ID: Pubkey = Pubkey::new([
    6, 167, 213, 23, 25, 44, 92, 81, 33, 140, 201, 76, 61, 74, 241, 127, 88, 218, 238, 8, 155, 161,
    253, 68, 227, 219, 217, 138, 0, 0, 0, 0,
]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    #[error("seed {index} is {len} bytes, maximum is {MAX_SEED_LEN}")]
    SeedTooLong { index: usize, len: usize },
    #[error("{0} seeds given, maximum is {MAX_SEEDS} including the bump")]
    TooManySeeds(usize),
    #[error("no viable bump seed found")]
    BumpExhausted,
}

/// A derived address together with the bump that made it fall off the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

fn is_on_curve(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

/// Hash `seeds` (bump included) under `program_id`.
///
/// Returns `Ok(None)` when the hash lands on the curve and cannot be used.
pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<Option<Pubkey>, DerivationError> {
    if seeds.len() > MAX_SEEDS {
        return Err(DerivationError::TooManySeeds(seeds.len()));
    }
    if let Some((index, seed)) = seeds
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() > MAX_SEED_LEN)
    {
        return Err(DerivationError::SeedTooLong {
            index,
            len: seed.len(),
        });
    }

    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        Ok(None)
    } else {
        Ok(Some(Pubkey::new(hash)))
    }
}

/// Search bumps 255..=1 for the first off-curve address.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<DerivedAddress, DerivationError> {
    if seeds.len() >= MAX_SEEDS {
        return Err(DerivationError::TooManySeeds(seeds.len() + 1));
    }
    for bump in (1..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);
        if let Some(address) = create_program_address(&with_bump, program_id)? {
            return Ok(DerivedAddress { address, bump });
        }
    }
    Err(DerivationError::BumpExhausted)
}

/// Associated token account of `owner` for `mint`.
pub fn associated_token_address(
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<Pubkey, DerivationError> {
    find_program_address(
        &[
            owner.as_ref(),
            TOKEN_PROGRAM_ID.as_ref(),
            mint.as_ref(),
        ],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|d| d.address)
}

/// Addresses that exist independently of any agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreAddresses {
    pub exchange: DerivedAddress,
    pub vault: DerivedAddress,
    pub markets: Vec<(MarketIndex, DerivedAddress)>,
}

/// Derives the exchange program's record addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn derive(&self, seeds: &[&[u8]]) -> Result<DerivedAddress, DerivationError> {
        let derived = find_program_address(seeds, &self.program_id)?;
        debug!(
            "Derived {} (bump {}) from {} seeds",
            derived.address,
            derived.bump,
            seeds.len()
        );
        Ok(derived)
    }

    pub fn exchange(&self) -> Result<DerivedAddress, DerivationError> {
        self.derive(&[EXCHANGE_SEED])
    }

    pub fn vault(&self) -> Result<DerivedAddress, DerivationError> {
        self.derive(&[VAULT_SEED])
    }

    /// One agent per owner identity.
    pub fn agent(&self, owner: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        self.derive(&[AGENT_SEED, owner.as_ref()])
    }

    /// One position per (agent, market); `agent` is the agent *account*, not the owner.
    pub fn position(
        &self,
        agent: &Pubkey,
        market: MarketIndex,
    ) -> Result<DerivedAddress, DerivationError> {
        self.derive(&[POSITION_SEED, agent.as_ref(), &[market.as_u8()]])
    }

    pub fn market(&self, market: MarketIndex) -> Result<DerivedAddress, DerivationError> {
        self.derive(&[MARKET_SEED, &[market.as_u8()]])
    }

    pub fn position_for_owner(
        &self,
        owner: &Pubkey,
        market: MarketIndex,
    ) -> Result<DerivedAddress, DerivationError> {
        let agent = self.agent(owner)?;
        self.position(&agent.address, market)
    }

    /// Position addresses of `owner` across `markets`.
    pub fn all_positions(
        &self,
        owner: &Pubkey,
        markets: &[MarketIndex],
    ) -> Result<Vec<(MarketIndex, DerivedAddress)>, DerivationError> {
        let agent = self.agent(owner)?;
        markets
            .iter()
            .map(|m| self.position(&agent.address, *m).map(|p| (*m, p)))
            .collect()
    }

    pub fn core(&self, markets: &[MarketIndex]) -> Result<CoreAddresses, DerivationError> {
        let markets = markets
            .iter()
            .map(|m| self.market(*m).map(|d| (*m, d)))
            .collect::<Result<Vec<_>, DerivationError>>()?;
        Ok(CoreAddresses {
            exchange: self.exchange()?,
            vault: self.vault()?,
            markets,
        })
    }
}
