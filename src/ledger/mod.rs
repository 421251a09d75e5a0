//! Ledger connection abstraction: fetch raw accounts, submit signed instructions.

use crate::domain::{Keypair, Pubkey, TxSignature};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod rpc;
pub mod transaction;

pub use mock::MockLedger;
pub use rpc::RpcLedger;

/// One account referenced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    /// Writable account.
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Raw account as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAccount {
    /// Program that owns (and alone may write) the account.
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// Error type for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Network error (connection refused, timeout, DNS failure)
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Rate limited")]
    RateLimited,
    /// JSON-RPC level error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// Malformed response body
    #[error("Parse error: {0}")]
    Parse(String),
    /// The program returned a custom error code from instruction `index`.
    #[error("Instruction {index} failed with custom error {code}")]
    InstructionFailed { index: u8, code: u32 },
    /// The transaction failed for a reason other than a custom program error.
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    #[error("Transaction {0} not confirmed before timeout")]
    ConfirmationTimeout(String),
}

impl LedgerError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Network(_) | LedgerError::RateLimited => true,
            LedgerError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Access to the external ledger.
///
/// Implementations own transport, retry and confirmation; callers see a single
/// request/response per call.
#[async_trait]
pub trait LedgerConnection: Send + Sync + fmt::Debug {
    /// Fetch one account; `None` when nothing is stored at `address`.
    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<LedgerAccount>, LedgerError>;

    /// Fetch several accounts, results in input order.
    async fn fetch_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<LedgerAccount>>, LedgerError> {
        let mut out = Vec::with_capacity(addresses.len());
        for address in addresses {
            out.push(self.fetch_account(address).await?);
        }
        Ok(out)
    }

    /// Sign `instruction` with `signers` and submit it as one atomic transaction.
    ///
    /// The first signer pays the fee. Returns once the transaction is confirmed.
    async fn submit(
        &self,
        instruction: Instruction,
        signers: &[&Keypair],
    ) -> Result<TxSignature, LedgerError>;
}
