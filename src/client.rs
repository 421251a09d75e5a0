//! Protocol client: typed operations over the exchange program.
//!
//! Every write is one transaction built from derived addresses and encoded
//! arguments; every read fetches raw accounts and hands them to the account
//! model. Reads return `None` for absent accounts (and for flat positions)
//! instead of failing.

use crate::accounts::{
    AccountRecord, Agent, AgentInfo, Exchange, ExchangeInfo, Market, MarketInfo, Position,
    PositionInfo, SchemaError,
};
use crate::config::Config;
use crate::domain::fixed_point::{decode, decode_unsigned, encode, encode_unsigned, Domain};
use crate::domain::{Keypair, MarketIndex, Pubkey, Side, TxSignature};
use crate::error::ClientError;
use crate::instructions;
use crate::ledger::{Instruction, LedgerConnection, RpcLedger};
use crate::margin;
use crate::pda::{associated_token_address, AddressDeriver, CoreAddresses, DerivedAddress};
use crate::program_error::ProgramError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the client may do: sign transactions, or only read.
#[derive(Debug, Clone)]
pub enum Capability {
    Signer(Keypair),
    ReadOnly,
}

impl Capability {
    pub fn keypair(&self) -> Option<&Keypair> {
        match self {
            Capability::Signer(keypair) => Some(keypair),
            Capability::ReadOnly => None,
        }
    }
}

/// Cached identity of the signing wallet.
#[derive(Debug, Clone, Copy)]
struct Identity {
    owner: Pubkey,
    agent: DerivedAddress,
}

/// Margin figures for an order that has not been sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPreview {
    pub market: MarketIndex,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub notional: f64,
    pub required_margin: f64,
    pub liquidation_price: f64,
    pub leverage: f64,
    pub max_leverage: u8,
}

#[derive(Debug, Clone)]
pub struct ProtocolClient {
    ledger: Arc<dyn LedgerConnection>,
    deriver: AddressDeriver,
    capability: Capability,
    identity: Option<Identity>,
    markets: Vec<MarketIndex>,
}

impl ProtocolClient {
    pub fn new(
        ledger: Arc<dyn LedgerConnection>,
        program_id: Pubkey,
        capability: Capability,
    ) -> Result<Self, ClientError> {
        let deriver = AddressDeriver::new(program_id);
        let identity = match capability.keypair() {
            Some(keypair) => {
                let owner = keypair.pubkey();
                Some(Identity {
                    owner,
                    agent: deriver.agent(&owner)?,
                })
            }
            None => None,
        };
        Ok(Self {
            ledger,
            deriver,
            capability,
            identity,
            markets: MarketIndex::canonical(),
        })
    }

    /// JSON-RPC client configured from the environment; read-only when no
    /// keypair file is configured.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let capability = match config.load_keypair()? {
            Some(keypair) => Capability::Signer(keypair),
            None => Capability::ReadOnly,
        };
        let ledger = Arc::new(RpcLedger::from_config(config));
        Ok(Self::new(ledger, config.program_id, capability)?.with_markets(config.markets.clone()))
    }

    /// Markets iterated by `get_all_positions` and `get_all_markets`.
    pub fn with_markets(mut self, markets: Vec<MarketIndex>) -> Self {
        self.markets = markets;
        self
    }

    pub fn markets(&self) -> &[MarketIndex] {
        &self.markets
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn program_id(&self) -> Pubkey {
        self.deriver.program_id()
    }

    /// Wallet the client signs as; `None` when read-only.
    pub fn identity(&self) -> Option<Pubkey> {
        self.identity.map(|i| i.owner)
    }

    pub fn is_read_only(&self) -> bool {
        self.identity.is_none()
    }

    /// Agent account address of the signing wallet.
    pub fn agent_address(&self) -> Result<Pubkey, ClientError> {
        self.own_identity().map(|i| i.agent.address)
    }

    pub fn core_addresses(&self) -> Result<CoreAddresses, ClientError> {
        Ok(self.deriver.core(&self.markets)?)
    }

    fn own_identity(&self) -> Result<Identity, ClientError> {
        self.identity.ok_or(ClientError::ReadOnly)
    }

    fn signer(&self) -> Result<(&Keypair, Identity), ClientError> {
        match (self.capability.keypair(), self.identity) {
            (Some(keypair), Some(identity)) => Ok((keypair, identity)),
            _ => Err(ClientError::ReadOnly),
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        instruction: Instruction,
        signers: &[&Keypair],
    ) -> Result<TxSignature, ClientError> {
        debug!("Submitting {}", operation);
        match self.ledger.submit(instruction, signers).await {
            Ok(signature) => {
                info!("{} confirmed: {}", operation, signature);
                Ok(signature)
            }
            Err(e) => {
                warn!("{} failed: {}", operation, e);
                Err(e.into())
            }
        }
    }

    /// Fetch and parse one record; `None` when the account does not exist.
    async fn fetch_record<T: AccountRecord>(&self, address: &Pubkey) -> Result<Option<T>, ClientError> {
        debug!("Fetching {} account {}", T::NAME, address);
        let Some(account) = self.ledger.fetch_account(address).await? else {
            return Ok(None);
        };
        self.parse_owned(address, &account.owner, &account.data).map(Some)
    }

    fn parse_owned<T: AccountRecord>(
        &self,
        address: &Pubkey,
        owner: &Pubkey,
        data: &[u8],
    ) -> Result<T, ClientError> {
        if *owner != self.program_id() {
            return Err(SchemaError::WrongOwner {
                record: T::NAME,
                address: *address,
                owner: *owner,
            }
            .into());
        }
        Ok(T::parse(data)?)
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, ClientError> {
        Ok(self.ledger.fetch_account(address).await?.is_some())
    }

    async fn collateral_mint(&self) -> Result<Pubkey, ClientError> {
        self.get_exchange()
            .await?
            .map(|e| e.collateral_mint)
            .ok_or_else(|| ClientError::NotFound("exchange is not initialized".to_string()))
    }

    // ---- writes ----

    /// Create the exchange and its collateral vault. The signer becomes the
    /// exchange authority.
    pub async fn initialize(
        &self,
        collateral_mint: &Pubkey,
        fee_rate_bps: u16,
    ) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        let exchange = self.deriver.exchange()?.address;
        if self.account_exists(&exchange).await? {
            return Err(ClientError::AlreadyExists {
                kind: Exchange::NAME,
                address: exchange,
            });
        }
        let ix = instructions::initialize(&self.deriver, &identity.owner, collateral_mint, fee_rate_bps)?;
        self.send("initialize", ix, &[keypair]).await
    }

    /// Create the signer's agent. A second registration fails before sending
    /// with `AlreadyExists`, which `ClientError::is_rejection` groups with
    /// program errors.
    pub async fn register_agent(&self, name: &str) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        if Agent::encode_name(name).is_none() {
            return Err(ProgramError::NameTooLong.into());
        }
        if self.account_exists(&identity.agent.address).await? {
            return Err(ClientError::AlreadyExists {
                kind: Agent::NAME,
                address: identity.agent.address,
            });
        }
        let ix = instructions::register_agent(&self.deriver, &identity.owner, name)?;
        self.send("register_agent", ix, &[keypair]).await
    }

    /// Move `amount` USD of collateral from the signer's token account into the vault.
    pub async fn deposit(&self, amount: f64) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        let raw = encode_unsigned(Domain::Usd, amount)?;
        let mint = self.collateral_mint().await?;
        let token_account = associated_token_address(&identity.owner, &mint)?;
        let ix = instructions::deposit(&self.deriver, &identity.owner, &token_account, raw)?;
        self.send("deposit", ix, &[keypair]).await
    }

    pub async fn withdraw(&self, amount: f64) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        let raw = encode_unsigned(Domain::Usd, amount)?;
        let mint = self.collateral_mint().await?;
        let token_account = associated_token_address(&identity.owner, &mint)?;
        let ix = instructions::withdraw(&self.deriver, &identity.owner, &token_account, &mint, raw)?;
        self.send("withdraw", ix, &[keypair]).await
    }

    /// Open a position for the signer's own agent. `size` is signed: positive
    /// goes long, negative goes short.
    pub async fn open_position(
        &self,
        market: MarketIndex,
        size: f64,
        entry_price: f64,
    ) -> Result<TxSignature, ClientError> {
        let owner = self.own_identity()?.owner;
        self.open_position_for(&owner, market, size, entry_price, None)
            .await
    }

    /// Open a position on `owner`'s agent, signed by the exchange authority.
    /// Rent for a first-time position account is paid by `payer`, or by the
    /// signer when `None`.
    pub async fn open_position_for(
        &self,
        owner: &Pubkey,
        market: MarketIndex,
        size: f64,
        entry_price: f64,
        payer: Option<&Keypair>,
    ) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        let raw_size = encode(Domain::Size, size)?;
        if raw_size == 0 {
            return Err(ProgramError::InvalidSize.into());
        }
        let raw_price = encode_price(entry_price)?;

        let payer = payer.unwrap_or(keypair);
        let payer_key = payer.pubkey();
        let ix = instructions::open_position(
            &self.deriver,
            &identity.owner,
            owner,
            &payer_key,
            market,
            raw_size,
            raw_price,
        )?;
        info!(
            "Opening {} {} on {} at {} for {}",
            Side::from_signed_size(raw_size).map(|s| s.to_string()).unwrap_or_default(),
            size.abs(),
            market.symbol(),
            entry_price,
            owner
        );
        if payer_key == identity.owner {
            self.send("open_position", ix, &[keypair]).await
        } else {
            self.send("open_position", ix, &[payer, keypair]).await
        }
    }

    pub async fn close_position(
        &self,
        market: MarketIndex,
        exit_price: f64,
    ) -> Result<TxSignature, ClientError> {
        let owner = self.own_identity()?.owner;
        self.close_position_for(&owner, market, exit_price).await
    }

    /// Close `owner`'s position at `exit_price`, signed by the exchange authority.
    pub async fn close_position_for(
        &self,
        owner: &Pubkey,
        market: MarketIndex,
        exit_price: f64,
    ) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        let raw_price = encode_price(exit_price)?;
        let ix =
            instructions::close_position(&self.deriver, &identity.owner, owner, market, raw_price)?;
        self.send("close_position", ix, &[keypair]).await
    }

    /// Liquidate `target_owner`'s position; the signer must have an agent to
    /// receive the reward.
    pub async fn liquidate(
        &self,
        target_owner: &Pubkey,
        market: MarketIndex,
    ) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        if !self.account_exists(&identity.agent.address).await? {
            return Err(ClientError::NotFound(format!(
                "liquidator {} has no registered agent",
                identity.owner
            )));
        }
        let ix = instructions::liquidate(&self.deriver, &identity.owner, target_owner, market)?;
        self.send("liquidate", ix, &[keypair]).await
    }

    pub async fn settle_pnl(&self, market: MarketIndex) -> Result<TxSignature, ClientError> {
        let (keypair, identity) = self.signer()?;
        let ix = instructions::settle_pnl(&self.deriver, &identity.owner, market)?;
        self.send("settle_pnl", ix, &[keypair]).await
    }

    // ---- reads ----

    pub async fn get_exchange(&self) -> Result<Option<Exchange>, ClientError> {
        let address = self.deriver.exchange()?.address;
        self.fetch_record(&address).await
    }

    pub async fn get_exchange_info(&self) -> Result<Option<ExchangeInfo>, ClientError> {
        let address = self.deriver.exchange()?.address;
        Ok(self
            .fetch_record::<Exchange>(&address)
            .await?
            .map(|e| e.to_info(address)))
    }

    pub async fn get_agent(&self) -> Result<Option<Agent>, ClientError> {
        let owner = self.own_identity()?.owner;
        self.get_agent_for(&owner).await
    }

    pub async fn get_agent_for(&self, owner: &Pubkey) -> Result<Option<Agent>, ClientError> {
        let address = self.deriver.agent(owner)?.address;
        self.fetch_record(&address).await
    }

    pub async fn get_agent_info(&self) -> Result<Option<AgentInfo>, ClientError> {
        let owner = self.own_identity()?.owner;
        self.get_agent_info_for(&owner).await
    }

    pub async fn get_agent_info_for(&self, owner: &Pubkey) -> Result<Option<AgentInfo>, ClientError> {
        let address = self.deriver.agent(owner)?.address;
        Ok(self
            .fetch_record::<Agent>(&address)
            .await?
            .map(|a| a.to_info(address)))
    }

    pub async fn get_position(&self, market: MarketIndex) -> Result<Option<Position>, ClientError> {
        let owner = self.own_identity()?.owner;
        self.get_position_for(&owner, market).await
    }

    /// Raw position record, including a zeroed one.
    pub async fn get_position_for(
        &self,
        owner: &Pubkey,
        market: MarketIndex,
    ) -> Result<Option<Position>, ClientError> {
        let address = self.deriver.position_for_owner(owner, market)?.address;
        self.fetch_record(&address).await
    }

    pub async fn get_position_info(
        &self,
        market: MarketIndex,
    ) -> Result<Option<PositionInfo>, ClientError> {
        let owner = self.own_identity()?.owner;
        self.get_position_info_for(&owner, market).await
    }

    /// Open position of `owner` on `market`; `None` when absent or flat.
    pub async fn get_position_info_for(
        &self,
        owner: &Pubkey,
        market: MarketIndex,
    ) -> Result<Option<PositionInfo>, ClientError> {
        let address = self.deriver.position_for_owner(owner, market)?.address;
        Ok(self
            .fetch_record::<Position>(&address)
            .await?
            .and_then(|p| p.to_info(address)))
    }

    pub async fn get_all_positions(&self) -> Result<Vec<PositionInfo>, ClientError> {
        let owner = self.own_identity()?.owner;
        self.get_all_positions_for(&owner).await
    }

    /// Open positions of `owner` across the configured markets, in market order.
    pub async fn get_all_positions_for(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<PositionInfo>, ClientError> {
        let addresses: Vec<Pubkey> = self
            .deriver
            .all_positions(owner, &self.markets)?
            .into_iter()
            .map(|(_, d)| d.address)
            .collect();
        let accounts = self.ledger.fetch_accounts(&addresses).await?;

        let mut positions = Vec::new();
        for (address, account) in addresses.iter().zip(accounts) {
            let Some(account) = account else { continue };
            let position: Position = self.parse_owned(address, &account.owner, &account.data)?;
            positions.extend(position.to_info(*address));
        }
        Ok(positions)
    }

    pub async fn get_market(&self, market: MarketIndex) -> Result<Option<Market>, ClientError> {
        let address = self.deriver.market(market)?.address;
        self.fetch_record(&address).await
    }

    pub async fn get_market_info(
        &self,
        market: MarketIndex,
    ) -> Result<Option<MarketInfo>, ClientError> {
        let address = self.deriver.market(market)?.address;
        Ok(self
            .fetch_record::<Market>(&address)
            .await?
            .map(|m| m.to_info(address)))
    }

    /// Configured markets that exist on the ledger, in market order.
    pub async fn get_all_markets(&self) -> Result<Vec<MarketInfo>, ClientError> {
        let addresses: Vec<Pubkey> = self
            .deriver
            .core(&self.markets)?
            .markets
            .into_iter()
            .map(|(_, d)| d.address)
            .collect();
        let accounts = self.ledger.fetch_accounts(&addresses).await?;

        let mut markets = Vec::new();
        for (address, account) in addresses.iter().zip(accounts) {
            let Some(account) = account else { continue };
            let market: Market = self.parse_owned(address, &account.owner, &account.data)?;
            markets.push(market.to_info(*address));
        }
        Ok(markets)
    }

    /// Probe market indices upward from 0 and stop at the first one with no
    /// Market account.
    pub async fn discover_markets(&self) -> Result<Vec<MarketIndex>, ClientError> {
        let mut found = Vec::new();
        for index in 0..=u8::MAX {
            let market = MarketIndex::from(index);
            if self.get_market(market).await?.is_none() {
                break;
            }
            found.push(market);
        }
        debug!("Discovered {} markets", found.len());
        Ok(found)
    }

    /// Margin, leverage and liquidation price an order would get, from the
    /// market's current rates.
    pub async fn preview_open(
        &self,
        market: MarketIndex,
        size: f64,
        entry_price: f64,
    ) -> Result<OrderPreview, ClientError> {
        let raw_size = encode(Domain::Size, size)?;
        let side = Side::from_signed_size(raw_size).ok_or(ProgramError::InvalidSize)?;
        let raw_price = encode_price(entry_price)?;
        let record = self
            .get_market(market)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("market {}", market)))?;

        let notional = margin::notional(raw_size, raw_price)?;
        let required = margin::required_margin(raw_size, raw_price, record.initial_margin_rate)?;
        let liquidation_price = margin::estimate_liquidation_price(
            raw_price,
            side,
            record.maintenance_margin_rate,
        )?;
        let leverage = if required > 0 {
            notional as f64 / required as f64
        } else {
            0.0
        };

        Ok(OrderPreview {
            market,
            side,
            size: decode(Domain::Size, raw_size).abs(),
            entry_price: decode_unsigned(Domain::Price, raw_price),
            notional: decode_unsigned(Domain::Usd, notional),
            required_margin: decode_unsigned(Domain::Usd, required),
            liquidation_price: decode_unsigned(Domain::Price, liquidation_price),
            leverage,
            max_leverage: record.max_leverage,
        })
    }
}

/// Encode a strictly positive price.
fn encode_price(price: f64) -> Result<u64, ClientError> {
    if price.is_finite() && price <= 0.0 {
        return Err(ProgramError::InvalidPrice.into());
    }
    let raw = encode_unsigned(Domain::Price, price)?;
    if raw == 0 {
        return Err(ProgramError::InvalidPrice.into());
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;

    fn program() -> Pubkey {
        Pubkey::new([21; 32])
    }

    fn read_only() -> ProtocolClient {
        let ledger = Arc::new(MockLedger::new(program()));
        ProtocolClient::new(ledger, program(), Capability::ReadOnly).unwrap()
    }

    #[test]
    fn test_encode_price_rejects_non_positive() {
        assert!(matches!(
            encode_price(0.0),
            Err(ClientError::Protocol(ProgramError::InvalidPrice))
        ));
        assert!(matches!(
            encode_price(-5.0),
            Err(ClientError::Protocol(ProgramError::InvalidPrice))
        ));
        // Rounds to zero at 10^-6 resolution.
        assert!(matches!(
            encode_price(0.0000001),
            Err(ClientError::Protocol(ProgramError::InvalidPrice))
        ));
        assert!(matches!(encode_price(f64::NAN), Err(ClientError::Encoding(_))));
        assert_eq!(encode_price(67420.0).unwrap(), 67_420_000_000);
    }

    #[tokio::test]
    async fn test_read_only_writes_fail_fast() {
        let client = read_only();
        assert!(client.is_read_only());
        assert!(matches!(
            client.register_agent("Alpha").await,
            Err(ClientError::ReadOnly)
        ));
        assert!(matches!(client.deposit(1.0).await, Err(ClientError::ReadOnly)));
        assert!(matches!(
            client.get_agent_info().await,
            Err(ClientError::ReadOnly)
        ));
    }

    #[tokio::test]
    async fn test_read_only_reads_absent_accounts() {
        let client = read_only();
        let owner = Pubkey::new([5; 32]);
        assert!(client.get_exchange_info().await.unwrap().is_none());
        assert!(client.get_agent_info_for(&owner).await.unwrap().is_none());
        assert!(client
            .get_position_info_for(&owner, MarketIndex::Btc)
            .await
            .unwrap()
            .is_none());
        assert!(client.get_all_positions_for(&owner).await.unwrap().is_empty());
        assert!(client.get_all_markets().await.unwrap().is_empty());
        assert!(client.discover_markets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signer_identity_is_cached() {
        let keypair = Keypair::from_secret(&[8; 32]);
        let owner = keypair.pubkey();
        let ledger = Arc::new(MockLedger::new(program()));
        let client =
            ProtocolClient::new(ledger, program(), Capability::Signer(keypair)).unwrap();
        assert_eq!(client.identity(), Some(owner));
        assert_eq!(
            client.agent_address().unwrap(),
            client.deriver().agent(&owner).unwrap().address
        );
    }

    #[tokio::test]
    async fn test_name_too_long_never_reaches_ledger() {
        let ledger = Arc::new(MockLedger::new(program()));
        let client = ProtocolClient::new(
            ledger.clone(),
            program(),
            Capability::Signer(Keypair::from_secret(&[8; 32])),
        )
        .unwrap();
        let err = client.register_agent(&"x".repeat(33)).await.unwrap_err();
        assert_eq!(err.program_error(), Some(ProgramError::NameTooLong));
        assert_eq!(ledger.transaction_count(), 0);
    }
}
