pub mod accounts;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod instructions;
pub mod ledger;
pub mod margin;
pub mod pda;
pub mod program_error;

pub use accounts::{
    AccountRecord, Agent, AgentInfo, Exchange, ExchangeInfo, Market, MarketInfo, Position,
    PositionInfo, SchemaError,
};
pub use client::{Capability, OrderPreview, ProtocolClient};
pub use config::{Commitment, Config, ConfigError};
pub use domain::{CodecError, Domain, Keypair, KeypairError, MarketIndex, Pubkey, Side, TxSignature};
pub use error::ClientError;
pub use ledger::{LedgerAccount, LedgerConnection, LedgerError, MockLedger, RpcLedger};
pub use pda::{AddressDeriver, CoreAddresses, DerivationError, DerivedAddress};
pub use program_error::ProgramError;
