//! Exchange program failure codes.
//!
//! The program numbers its custom errors contiguously from 6000. Anything
//! outside that block is reported as `Unknown` with the raw code kept.

use serde::Serialize;
use thiserror::Error;

/// First custom error code emitted by the exchange program.
pub const ERROR_CODE_OFFSET: u32 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
pub enum ProgramError {
    #[error("Insufficient collateral for this operation")]
    InsufficientCollateral,
    #[error("Position size exceeds maximum allowed")]
    PositionTooLarge,
    #[error("Leverage exceeds maximum allowed")]
    LeverageTooHigh,
    #[error("Position is not liquidatable")]
    NotLiquidatable,
    #[error("Market is not active")]
    MarketNotActive,
    #[error("Agent is not active")]
    AgentNotActive,
    #[error("Invalid price")]
    InvalidPrice,
    #[error("Invalid size")]
    InvalidSize,
    #[error("No position to close")]
    NoPosition,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Math overflow")]
    MathOverflow,
    #[error("Invalid market index")]
    InvalidMarketIndex,
    #[error("Agent name too long")]
    NameTooLong,
    #[error("Withdrawal would leave insufficient margin")]
    InsufficientMargin,
    #[error("Unknown protocol error (code {0})")]
    Unknown(u32),
}

const KNOWN: [ProgramError; 14] = [
    ProgramError::InsufficientCollateral,
    ProgramError::PositionTooLarge,
    ProgramError::LeverageTooHigh,
    ProgramError::NotLiquidatable,
    ProgramError::MarketNotActive,
    ProgramError::AgentNotActive,
    ProgramError::InvalidPrice,
    ProgramError::InvalidSize,
    ProgramError::NoPosition,
    ProgramError::Unauthorized,
    ProgramError::MathOverflow,
    ProgramError::InvalidMarketIndex,
    ProgramError::NameTooLong,
    ProgramError::InsufficientMargin,
];

impl ProgramError {
    /// Map a raw custom error code to its domain error.
    pub fn from_code(code: u32) -> Self {
        code.checked_sub(ERROR_CODE_OFFSET)
            .and_then(|i| KNOWN.get(i as usize).copied())
            .unwrap_or(ProgramError::Unknown(code))
    }

    pub fn code(&self) -> u32 {
        match self {
            ProgramError::Unknown(code) => *code,
            known => {
                let position = KNOWN.iter().position(|k| k == known).unwrap_or_default();
                ERROR_CODE_OFFSET + position as u32
            }
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ProgramError::Unknown(_))
    }
}
