use crate::accounts::SchemaError;
use crate::config::ConfigError;
use crate::domain::{CodecError, KeypairError, Pubkey};
use crate::ledger::LedgerError;
use crate::pda::DerivationError;
use crate::program_error::ProgramError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Address derivation failed: {0}")]
    AddressDerivation(#[from] DerivationError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaError),
    #[error("Protocol error {code}: {0}", code = .0.code())]
    Protocol(#[from] ProgramError),
    #[error("Connectivity error: {0}")]
    Connectivity(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{kind} account {address} already exists")]
    AlreadyExists { kind: &'static str, address: Pubkey },
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    /// Sent but never seen at the requested commitment; it may still land.
    #[error("Transaction {signature} not confirmed in time, outcome unknown")]
    Unconfirmed { signature: String },
    #[error("Malformed ledger response: {0}")]
    InvalidResponse(String),
    #[error("Operation requires a signer but the client is read-only")]
    ReadOnly,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Keypair error: {0}")]
    Keypair(#[from] KeypairError),
}

impl ClientError {
    /// Only transport failures before anything reached the ledger may succeed
    /// on retry. `Unconfirmed` is not retryable: check the signature first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connectivity(_))
    }

    /// The exchange refused the operation on business grounds: either a
    /// program error, or an `AlreadyExists` pre-check that stood in for the
    /// ledger's own "account in use" rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::AlreadyExists { .. }
        )
    }

    /// The program error carried by a `Protocol` failure.
    pub fn program_error(&self) -> Option<ProgramError> {
        match self {
            ClientError::Protocol(e) => Some(*e),
            _ => None,
        }
    }
}

impl From<LedgerError> for ClientError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InstructionFailed { code, .. } => {
                ClientError::Protocol(ProgramError::from_code(code))
            }
            LedgerError::Rejected(msg) => ClientError::Rejected(msg),
            LedgerError::Rpc { code, message } => {
                ClientError::Rejected(format!("RPC error {}: {}", code, message))
            }
            LedgerError::ConfirmationTimeout(signature) => ClientError::Unconfirmed { signature },
            LedgerError::Parse(msg) => ClientError::InvalidResponse(msg),
            other @ (LedgerError::Network(_) | LedgerError::Http { .. } | LedgerError::RateLimited) => {
                ClientError::Connectivity(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_code_maps_to_protocol_error() {
        let err: ClientError = LedgerError::InstructionFailed { index: 0, code: 6000 }.into();
        assert_eq!(err.program_error(), Some(ProgramError::InsufficientCollateral));
        assert_eq!(
            err.to_string(),
            "Protocol error 6000: Insufficient collateral for this operation"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let err: ClientError = LedgerError::InstructionFailed { index: 0, code: 0 }.into();
        assert_eq!(err.program_error(), Some(ProgramError::Unknown(0)));
        let err: ClientError = LedgerError::InstructionFailed { index: 0, code: 6014 }.into();
        assert_eq!(err.program_error(), Some(ProgramError::Unknown(6014)));
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        let errors = [
            LedgerError::Network("reset".to_string()),
            LedgerError::RateLimited,
            LedgerError::Http {
                status: 502,
                message: "Server error".to_string(),
            },
        ];
        for e in errors {
            let err: ClientError = e.into();
            assert!(err.is_retryable(), "{} should be retryable", err);
        }
    }

    #[test]
    fn test_ambiguous_outcomes_are_not_retryable() {
        let err: ClientError = LedgerError::ConfirmationTimeout("5sig".to_string()).into();
        match &err {
            ClientError::Unconfirmed { signature } => assert_eq!(signature, "5sig"),
            other => panic!("Expected Unconfirmed, got {:?}", other),
        }
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("5sig"));

        let err: ClientError = LedgerError::Parse("expected string".to_string()).into();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_already_exists_counts_as_rejection() {
        let err = ClientError::AlreadyExists {
            kind: "Agent",
            address: Pubkey::default(),
        };
        assert!(err.is_rejection());
        assert!(!err.is_retryable());
        assert!(ClientError::Protocol(ProgramError::NoPosition).is_rejection());
        assert!(!ClientError::Connectivity("reset".to_string()).is_rejection());
        assert!(!ClientError::ReadOnly.is_rejection());
    }

    #[test]
    fn test_rejections_are_final() {
        let err: ClientError = LedgerError::Rejected("InsufficientFundsForFee".to_string()).into();
        assert!(matches!(err, ClientError::Rejected(_)));
        assert!(!err.is_retryable());
        assert!(!ClientError::ReadOnly.is_retryable());
    }
}
