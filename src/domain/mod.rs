//! Domain types for the perpetual-futures exchange client.
//!
//! This module provides:
//! - Ledger identities and addresses (`Pubkey`) with base58 rendering
//! - The signing capability (`Keypair`)
//! - Tagged enums for markets and position sides
//! - The fixed-point codec between human-facing floats and wire integers

pub mod fixed_point;
pub mod keypair;
pub mod primitives;

pub use fixed_point::{CodecError, Domain};
pub use keypair::{Keypair, KeypairError};
pub use primitives::{MarketIndex, Pubkey, PubkeyParseError, Side, TxSignature};
