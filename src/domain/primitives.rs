//! Domain primitives: Pubkey, MarketIndex, Side, TxSignature.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 32-byte ledger identity or account address, rendered in base58.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pubkey(pub [u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubkeyParseError {
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

impl Pubkey {
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Pubkey(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build a key from a slice, failing unless it is exactly 32 bytes long.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, PubkeyParseError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PubkeyParseError::WrongLength(bytes.len()))?;
        Ok(Pubkey(arr))
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl FromStr for Pubkey {
    type Err = PubkeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| PubkeyParseError::Base58(e.to_string()))?;
        Self::try_from_slice(&bytes)
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Perpetual market slot on the exchange.
///
/// The initial deployment carries three markets; any other index is accepted
/// so that markets added later can still be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarketIndex {
    Btc,
    Eth,
    Sol,
    Other(u8),
}

impl MarketIndex {
    /// The three markets of the initial deployment, in index order.
    pub fn canonical() -> Vec<MarketIndex> {
        vec![MarketIndex::Btc, MarketIndex::Eth, MarketIndex::Sol]
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MarketIndex::Btc => 0,
            MarketIndex::Eth => 1,
            MarketIndex::Sol => 2,
            MarketIndex::Other(i) => *i,
        }
    }

    /// Display symbol, e.g. "BTC-PERP".
    pub fn symbol(&self) -> String {
        match self {
            MarketIndex::Btc => "BTC-PERP".to_string(),
            MarketIndex::Eth => "ETH-PERP".to_string(),
            MarketIndex::Sol => "SOL-PERP".to_string(),
            MarketIndex::Other(i) => format!("MARKET-{}-PERP", i),
        }
    }
}

impl From<u8> for MarketIndex {
    fn from(value: u8) -> Self {
        match value {
            0 => MarketIndex::Btc,
            1 => MarketIndex::Eth,
            2 => MarketIndex::Sol,
            other => MarketIndex::Other(other),
        }
    }
}

impl From<MarketIndex> for u8 {
    fn from(value: MarketIndex) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for MarketIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl Serialize for MarketIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for MarketIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MarketIndex::from(u8::deserialize(deserializer)?))
    }
}

/// Position side: Long or Short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Side encoded by a signed on-ledger size; `None` when flat.
    pub fn from_signed_size(size: i64) -> Option<Side> {
        match size {
            0 => None,
            s if s > 0 => Some(Side::Long),
            _ => Some(Side::Short),
        }
    }

    /// Get the signed multiplier for this side (+1 for Long, -1 for Short).
    pub fn sign(&self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Transaction identifier returned by the ledger (base58 signature).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSignature(pub String);

impl TxSignature {
    pub fn new(sig: String) -> Self {
        TxSignature(sig)
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        TxSignature(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
