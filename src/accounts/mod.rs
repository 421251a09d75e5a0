//! On-ledger record schemas and their enrichment into domain info objects.
//!
//! Every record starts with an 8-byte discriminator, the first eight bytes of
//! `sha256("account:<Name>")`, followed by its fields in declaration order,
//! little-endian, with no padding. Parsing fails closed: a wrong length, a
//! wrong discriminator or an out-of-range bool byte is a `SchemaError`, never a
//! partially populated record.

use crate::domain::Pubkey;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod agent;
pub mod exchange;
pub mod market;
pub mod position;

pub use agent::{Agent, AgentInfo, AGENT_NAME_LEN};
pub use exchange::{Exchange, ExchangeInfo};
pub use market::{Market, MarketInfo, MARKET_SYMBOL_LEN};
pub use position::{Position, PositionInfo};

pub const DISCRIMINATOR_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{record} account is {actual} bytes, expected {expected}")]
    WrongLength {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{record} discriminator mismatch: expected {expected}, found {actual}")]
    WrongDiscriminator {
        record: &'static str,
        expected: String,
        actual: String,
    },
    #[error("{record} has invalid bool byte {value} at offset {offset}")]
    InvalidBool {
        record: &'static str,
        offset: usize,
        value: u8,
    },
    #[error("{record} account {address} is owned by {owner}, not the exchange program")]
    WrongOwner {
        record: &'static str,
        address: Pubkey,
        owner: Pubkey,
    },
    #[error("{record} data ended at offset {offset}")]
    Truncated { record: &'static str, offset: usize },
}

/// First eight bytes of `sha256("account:<name>")`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    let hash = Sha256::digest(format!("account:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// A fixed-layout record owned by the exchange program.
pub trait AccountRecord: Sized {
    /// Record name the discriminator is derived from.
    const NAME: &'static str;
    /// Total size including the discriminator.
    const LEN: usize;

    fn read_fields(reader: &mut ByteReader<'_>) -> Result<Self, SchemaError>;

    fn write_fields(&self, writer: &mut ByteWriter);

    fn discriminator() -> [u8; 8] {
        account_discriminator(Self::NAME)
    }

    fn parse(data: &[u8]) -> Result<Self, SchemaError> {
        if data.len() != Self::LEN {
            return Err(SchemaError::WrongLength {
                record: Self::NAME,
                expected: Self::LEN,
                actual: data.len(),
            });
        }
        let expected = Self::discriminator();
        let actual = &data[..DISCRIMINATOR_LEN];
        if actual != expected {
            return Err(SchemaError::WrongDiscriminator {
                record: Self::NAME,
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        let mut reader = ByteReader::new(Self::NAME, data, DISCRIMINATOR_LEN);
        Self::read_fields(&mut reader)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(Self::LEN);
        writer.put_bytes(&Self::discriminator());
        self.write_fields(&mut writer);
        writer.into_inner()
    }
}

/// Little-endian cursor over record bytes.
pub struct ByteReader<'a> {
    record: &'static str,
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(record: &'static str, data: &'a [u8], offset: usize) -> Self {
        Self {
            record,
            data,
            offset,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], SchemaError> {
        let end = self.offset + N;
        let slice = self.data.get(self.offset..end).ok_or(SchemaError::Truncated {
            record: self.record,
            offset: self.offset,
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    pub fn pubkey(&mut self) -> Result<Pubkey, SchemaError> {
        self.array::<32>().map(Pubkey::new)
    }

    pub fn u8(&mut self) -> Result<u8, SchemaError> {
        self.array::<1>().map(|b| b[0])
    }

    pub fn u16(&mut self) -> Result<u16, SchemaError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, SchemaError> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn i64(&mut self) -> Result<i64, SchemaError> {
        self.array().map(i64::from_le_bytes)
    }

    pub fn bool(&mut self) -> Result<bool, SchemaError> {
        let offset = self.offset;
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(SchemaError::InvalidBool {
                record: self.record,
                offset,
                value,
            }),
        }
    }
}

/// Little-endian record and instruction-argument writer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_pubkey(&mut self, key: &Pubkey) {
        self.put_bytes(key.as_bytes());
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    /// Length-prefixed (u32) UTF-8 string.
    pub fn put_string(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.put_bytes(s.as_bytes());
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Bytes up to the first NUL, decoded lossily.
pub(crate) fn padded_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Copy `s` into a NUL-padded buffer; `None` when it does not fit.
pub(crate) fn string_to_padded<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = s.as_bytes();
    if bytes.len() > N {
        return None;
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_discriminators() {
        assert_eq!(
            account_discriminator("Exchange"),
            [30, 200, 220, 149, 3, 61, 104, 50]
        );
        assert_eq!(
            account_discriminator("Agent"),
            [47, 166, 112, 147, 155, 197, 86, 7]
        );
        assert_eq!(
            account_discriminator("Position"),
            [170, 188, 143, 228, 122, 64, 247, 208]
        );
        assert_eq!(
            account_discriminator("Market"),
            [219, 190, 213, 55, 0, 227, 198, 154]
        );
    }

    #[test]
    fn test_reader_truncation_and_bool() {
        let data = [1u8, 2, 0];
        let mut reader = ByteReader::new("Test", &data, 0);
        assert!(reader.bool().unwrap());
        assert_eq!(
            reader.bool(),
            Err(SchemaError::InvalidBool {
                record: "Test",
                offset: 1,
                value: 2
            })
        );
        assert!(!reader.bool().unwrap());
        assert_eq!(
            reader.u64(),
            Err(SchemaError::Truncated {
                record: "Test",
                offset: 3
            })
        );
    }

    #[test]
    fn test_padded_strings() {
        let padded: [u8; 8] = string_to_padded("BTC").unwrap();
        assert_eq!(padded, *b"BTC\0\0\0\0\0");
        assert_eq!(padded_to_string(&padded), "BTC");
        assert_eq!(padded_to_string(b"FULLNAME"), "FULLNAME");
        assert!(string_to_padded::<4>("TOOLONG").is_none());
    }

    #[test]
    fn test_writer_string_is_length_prefixed() {
        let mut w = ByteWriter::default();
        w.put_string("Alpha");
        assert_eq!(w.into_inner(), vec![5, 0, 0, 0, b'A', b'l', b'p', b'h', b'a']);
    }
}
