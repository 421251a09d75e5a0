//! In-memory ledger that executes the exchange program for tests.
//!
//! Instructions run against a copy of the account table that replaces the
//! real one only when every check passes, so a failed transaction leaves no
//! trace. Token transfers are not simulated: deposits and withdrawals move
//! collateral on the Agent record only.

use super::transaction::Transaction;
use super::{Instruction, LedgerAccount, LedgerConnection, LedgerError};
use crate::accounts::{AccountRecord, Agent, Exchange, Market, Position};
use crate::domain::{Keypair, MarketIndex, Pubkey, Side, TxSignature};
use crate::instructions::ExchangeInstruction;
use crate::margin;
use crate::pda::{AddressDeriver, DerivationError, DerivedAddress, TOKEN_PROGRAM_ID};
use crate::program_error::ProgramError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// System program "account already in use".
const ACCOUNT_IN_USE: u32 = 0;
const CONSTRAINT_SEEDS: u32 = 2006;
const ACCOUNT_DISCRIMINATOR_MISMATCH: u32 = 3002;
const ACCOUNT_NOT_ENOUGH_KEYS: u32 = 3005;
const ACCOUNT_OWNED_BY_WRONG_PROGRAM: u32 = 3007;
const ACCOUNT_NOT_SIGNER: u32 = 3010;
const ACCOUNT_NOT_INITIALIZED: u32 = 3012;

/// Liquidation penalty as a percentage of position margin; half goes to the liquidator.
const LIQUIDATION_PENALTY_PERCENT: u64 = 5;

/// Rent-exempt balance given to every account the mock creates.
const ACCOUNT_LAMPORTS: u64 = 1_000_000;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Pubkey, LedgerAccount>,
    mark_prices: HashMap<u8, u64>,
    clock: i64,
    fail_next: Option<LedgerError>,
    transactions: u64,
}

/// Mock ledger hosting one exchange program deployment.
#[derive(Debug)]
pub struct MockLedger {
    deriver: AddressDeriver,
    state: Mutex<State>,
}

impl MockLedger {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            deriver: AddressDeriver::new(program_id),
            state: Mutex::new(State {
                clock: chrono::Utc::now().timestamp(),
                ..State::default()
            }),
        }
    }

    /// Seed BTC (50x), ETH (20x) and SOL (10x) markets.
    pub fn with_canonical_markets(self) -> Result<Self, DerivationError> {
        for (market, imr, mmr, max_leverage) in [
            (MarketIndex::Btc, 200, 100, 50),
            (MarketIndex::Eth, 500, 250, 20),
            (MarketIndex::Sol, 1000, 500, 10),
        ] {
            self.seed_market(Market {
                index: market.as_u8(),
                symbol: Market::encode_symbol(&market.symbol()).unwrap_or_default(),
                oracle: Pubkey::default(),
                initial_margin_rate: imr,
                maintenance_margin_rate: mmr,
                max_leverage,
                is_active: true,
                ..Market::default()
            })?;
        }
        Ok(self)
    }

    pub fn program_id(&self) -> Pubkey {
        self.deriver.program_id()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `market` at its derived address, overwriting any existing record.
    pub fn seed_market(&self, mut market: Market) -> Result<Pubkey, DerivationError> {
        let derived = self.deriver.market(MarketIndex::from(market.index))?;
        market.bump = derived.bump;
        self.set_account(derived.address, self.program_id(), market.to_bytes());
        Ok(derived.address)
    }

    /// Place raw bytes at `address`.
    pub fn set_account(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        self.state().accounts.insert(
            address,
            LedgerAccount {
                owner,
                lamports: ACCOUNT_LAMPORTS,
                data,
            },
        );
    }

    pub fn account(&self, address: &Pubkey) -> Option<LedgerAccount> {
        self.state().accounts.get(address).cloned()
    }

    /// Oracle price used by `liquidate` and `settle_pnl` for `market`.
    pub fn set_mark_price(&self, market: MarketIndex, price: u64) {
        self.state().mark_prices.insert(market.as_u8(), price);
    }

    /// Make the next call, read or write, fail with `err` without touching state.
    pub fn fail_next(&self, err: LedgerError) {
        self.state().fail_next = Some(err);
    }

    pub fn set_clock(&self, unix_timestamp: i64) {
        self.state().clock = unix_timestamp;
    }

    /// Number of transactions that landed.
    pub fn transaction_count(&self) -> u64 {
        self.state().transactions
    }
}

#[async_trait]
impl LedgerConnection for MockLedger {
    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<LedgerAccount>, LedgerError> {
        let mut state = self.state();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        Ok(state.accounts.get(address).cloned())
    }

    async fn submit(
        &self,
        instruction: Instruction,
        signers: &[&Keypair],
    ) -> Result<TxSignature, LedgerError> {
        let mut state = self.state();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        let blockhash: [u8; 32] = Sha256::digest(state.transactions.to_le_bytes()).into();
        let tx = Transaction::new_signed(&instruction, signers, blockhash)?;
        let signature = tx
            .signature()
            .ok_or_else(|| LedgerError::Rejected("transaction has no signatures".to_string()))?;
        if instruction.program_id != self.program_id() {
            return Err(LedgerError::Rejected(format!(
                "program {} is not deployed",
                instruction.program_id
            )));
        }
        let decoded = ExchangeInstruction::unpack(&instruction.data)
            .ok_or_else(|| custom(ACCOUNT_DISCRIMINATOR_MISMATCH))?;

        state.clock += 1;
        let mut exec = Execution {
            deriver: &self.deriver,
            accounts: state.accounts.clone(),
            ix: &instruction,
            clock: state.clock,
            mark_prices: &state.mark_prices,
        };
        exec.run(&decoded)?;
        let accounts = exec.accounts;

        state.accounts = accounts;
        state.transactions += 1;
        debug!("Mock ledger executed {} as {}", decoded.name(), signature);
        Ok(signature)
    }
}

fn custom(code: u32) -> LedgerError {
    LedgerError::InstructionFailed { index: 0, code }
}

impl From<ProgramError> for LedgerError {
    fn from(err: ProgramError) -> Self {
        custom(err.code())
    }
}

/// One instruction executing against a scratch copy of the account table.
struct Execution<'a> {
    deriver: &'a AddressDeriver,
    accounts: HashMap<Pubkey, LedgerAccount>,
    ix: &'a Instruction,
    clock: i64,
    mark_prices: &'a HashMap<u8, u64>,
}

impl Execution<'_> {
    fn key(&self, index: usize) -> Result<Pubkey, LedgerError> {
        self.ix
            .accounts
            .get(index)
            .map(|m| m.pubkey)
            .ok_or_else(|| custom(ACCOUNT_NOT_ENOUGH_KEYS))
    }

    fn signer(&self, index: usize) -> Result<Pubkey, LedgerError> {
        let meta = self
            .ix
            .accounts
            .get(index)
            .ok_or_else(|| custom(ACCOUNT_NOT_ENOUGH_KEYS))?;
        if !meta.is_signer {
            return Err(custom(ACCOUNT_NOT_SIGNER));
        }
        Ok(meta.pubkey)
    }

    fn derived(
        &self,
        actual: &Pubkey,
        expected: Result<DerivedAddress, DerivationError>,
    ) -> Result<u8, LedgerError> {
        match expected {
            Ok(d) if d.address == *actual => Ok(d.bump),
            _ => Err(custom(CONSTRAINT_SEEDS)),
        }
    }

    fn load<T: AccountRecord>(&self, address: &Pubkey) -> Result<T, LedgerError> {
        let account = self
            .accounts
            .get(address)
            .ok_or_else(|| custom(ACCOUNT_NOT_INITIALIZED))?;
        if account.owner != self.deriver.program_id() {
            return Err(custom(ACCOUNT_OWNED_BY_WRONG_PROGRAM));
        }
        T::parse(&account.data).map_err(|_| custom(ACCOUNT_DISCRIMINATOR_MISMATCH))
    }

    fn store<T: AccountRecord>(&mut self, address: Pubkey, record: &T) {
        self.accounts.insert(
            address,
            LedgerAccount {
                owner: self.deriver.program_id(),
                lamports: ACCOUNT_LAMPORTS,
                data: record.to_bytes(),
            },
        );
    }

    fn ensure_vacant(&self, address: &Pubkey) -> Result<(), LedgerError> {
        if self.accounts.contains_key(address) {
            return Err(custom(ACCOUNT_IN_USE));
        }
        Ok(())
    }

    /// Load an agent and check it sits at the address derived from its owner.
    fn load_agent(&self, address: &Pubkey) -> Result<Agent, LedgerError> {
        let agent: Agent = self.load(address)?;
        self.derived(address, self.deriver.agent(&agent.owner))?;
        Ok(agent)
    }

    fn load_position(
        &self,
        address: &Pubkey,
        agent: &Pubkey,
        market_index: u8,
    ) -> Result<Position, LedgerError> {
        self.derived(
            address,
            self.deriver.position(agent, MarketIndex::from(market_index)),
        )?;
        self.load(address)
    }

    fn authorize_exchange(&self, exchange: &Pubkey, authority: &Pubkey) -> Result<Exchange, LedgerError> {
        self.derived(exchange, self.deriver.exchange())?;
        let record: Exchange = self.load(exchange)?;
        if record.authority != *authority {
            return Err(ProgramError::Unauthorized.into());
        }
        Ok(record)
    }

    fn run(&mut self, ix: &ExchangeInstruction) -> Result<(), LedgerError> {
        match ix {
            ExchangeInstruction::Initialize { fee_rate_bps } => self.initialize(*fee_rate_bps),
            ExchangeInstruction::RegisterAgent { name } => self.register_agent(name),
            ExchangeInstruction::Deposit { amount } => self.deposit(*amount),
            ExchangeInstruction::Withdraw { amount } => self.withdraw(*amount),
            ExchangeInstruction::OpenPosition {
                market_index,
                size,
                entry_price,
            } => self.open_position(*market_index, *size, *entry_price),
            ExchangeInstruction::ClosePosition {
                market_index,
                exit_price,
            } => self.close_position(*market_index, *exit_price),
            ExchangeInstruction::Liquidate { market_index } => self.liquidate(*market_index),
            ExchangeInstruction::SettlePnl { market_index } => self.settle_pnl(*market_index),
        }
    }

    fn initialize(&mut self, fee_rate_bps: u16) -> Result<(), LedgerError> {
        let authority = self.signer(0)?;
        let exchange = self.key(1)?;
        let mint = self.key(2)?;
        let vault = self.key(3)?;
        let bump = self.derived(&exchange, self.deriver.exchange())?;
        self.derived(&vault, self.deriver.vault())?;
        self.ensure_vacant(&exchange)?;
        self.ensure_vacant(&vault)?;

        self.store(
            exchange,
            &Exchange {
                authority,
                collateral_mint: mint,
                vault,
                fee_rate_bps,
                bump,
                ..Exchange::default()
            },
        );
        self.accounts.insert(
            vault,
            LedgerAccount {
                owner: TOKEN_PROGRAM_ID,
                lamports: ACCOUNT_LAMPORTS,
                data: Vec::new(),
            },
        );
        Ok(())
    }

    fn register_agent(&mut self, name: &str) -> Result<(), LedgerError> {
        let owner = self.signer(0)?;
        let exchange_key = self.key(1)?;
        let agent_key = self.key(2)?;
        self.derived(&exchange_key, self.deriver.exchange())?;
        let bump = self.derived(&agent_key, self.deriver.agent(&owner))?;
        self.ensure_vacant(&agent_key)?;
        let mut exchange: Exchange = self.load(&exchange_key)?;
        let name = Agent::encode_name(name).ok_or(ProgramError::NameTooLong)?;

        self.store(
            agent_key,
            &Agent {
                owner,
                name,
                registered_at: self.clock,
                is_active: true,
                bump,
                ..Agent::default()
            },
        );
        exchange.total_agents += 1;
        self.store(exchange_key, &exchange);
        Ok(())
    }

    fn deposit(&mut self, amount: u64) -> Result<(), LedgerError> {
        let owner = self.signer(0)?;
        let exchange_key = self.key(1)?;
        let agent_key = self.key(2)?;
        self.derived(&exchange_key, self.deriver.exchange())?;
        let mut exchange: Exchange = self.load(&exchange_key)?;
        let mut agent = self.load_agent(&agent_key)?;
        if agent.owner != owner {
            return Err(ProgramError::Unauthorized.into());
        }
        if !agent.is_active {
            return Err(ProgramError::AgentNotActive.into());
        }

        agent.collateral = agent
            .collateral
            .checked_add(amount)
            .ok_or(ProgramError::MathOverflow)?;
        exchange.total_deposits = exchange
            .total_deposits
            .checked_add(amount)
            .ok_or(ProgramError::MathOverflow)?;
        self.store(agent_key, &agent);
        self.store(exchange_key, &exchange);
        Ok(())
    }

    fn withdraw(&mut self, amount: u64) -> Result<(), LedgerError> {
        let owner = self.signer(0)?;
        let exchange_key = self.key(1)?;
        let agent_key = self.key(2)?;
        let vault = self.key(4)?;
        self.derived(&exchange_key, self.deriver.exchange())?;
        let mut exchange: Exchange = self.load(&exchange_key)?;
        let mut agent = self.load_agent(&agent_key)?;
        if agent.owner != owner || vault != exchange.vault {
            return Err(ProgramError::Unauthorized.into());
        }
        if !agent.is_active {
            return Err(ProgramError::AgentNotActive.into());
        }
        if agent.collateral < amount {
            return Err(ProgramError::InsufficientCollateral.into());
        }

        agent.collateral -= amount;
        exchange.total_deposits = exchange.total_deposits.saturating_sub(amount);
        self.store(agent_key, &agent);
        self.store(exchange_key, &exchange);
        Ok(())
    }

    fn open_position(
        &mut self,
        market_index: u8,
        size: i64,
        entry_price: u64,
    ) -> Result<(), LedgerError> {
        let authority = self.signer(0)?;
        let exchange_key = self.key(1)?;
        let agent_key = self.key(2)?;
        let position_key = self.key(3)?;
        let market_key = self.key(4)?;
        self.signer(5)?;

        self.authorize_exchange(&exchange_key, &authority)?;
        let mut agent = self.load_agent(&agent_key)?;
        if !agent.is_active {
            return Err(ProgramError::AgentNotActive.into());
        }
        let position_bump = self.derived(
            &position_key,
            self.deriver.position(&agent_key, MarketIndex::from(market_index)),
        )?;
        let mut position = if self.accounts.contains_key(&position_key) {
            self.load(&position_key)?
        } else {
            Position::default()
        };
        self.derived(&market_key, self.deriver.market(MarketIndex::from(market_index)))?;
        let market: Market = self.load(&market_key)?;
        if !market.is_active {
            return Err(ProgramError::MarketNotActive.into());
        }
        if size == 0 {
            return Err(ProgramError::InvalidSize.into());
        }
        if entry_price == 0 {
            return Err(ProgramError::InvalidPrice.into());
        }

        let required = margin::required_margin(size, entry_price, market.initial_margin_rate)?;
        if agent.collateral < required {
            return Err(ProgramError::InsufficientCollateral.into());
        }

        if position.size == 0 {
            position = Position {
                agent: agent_key,
                market_index,
                size,
                entry_price,
                margin: required,
                opened_at: self.clock,
                bump: position_bump,
                ..Position::default()
            };
        } else {
            // Adding to an open position averages the entry price by size.
            let old_notional = position.size.unsigned_abs() as u128 * position.entry_price as u128;
            let new_notional = size.unsigned_abs() as u128 * entry_price as u128;
            let total = position
                .size
                .checked_add(size)
                .ok_or(ProgramError::MathOverflow)?;
            if total != 0 {
                let average = (old_notional + new_notional) / total.unsigned_abs() as u128;
                position.entry_price =
                    u64::try_from(average).map_err(|_| ProgramError::MathOverflow)?;
            }
            position.size = total;
            position.margin = position
                .margin
                .checked_add(required)
                .ok_or(ProgramError::MathOverflow)?;
        }
        let side = if position.size > 0 {
            Side::Long
        } else {
            Side::Short
        };
        position.liquidation_price = margin::estimate_liquidation_price(
            position.entry_price,
            side,
            market.maintenance_margin_rate,
        )?;
        position.updated_at = self.clock;
        agent.collateral -= required;

        self.store(position_key, &position);
        self.store(agent_key, &agent);
        Ok(())
    }

    fn close_position(&mut self, market_index: u8, exit_price: u64) -> Result<(), LedgerError> {
        let authority = self.signer(0)?;
        let exchange_key = self.key(1)?;
        let agent_key = self.key(2)?;
        let position_key = self.key(3)?;

        self.authorize_exchange(&exchange_key, &authority)?;
        let mut agent = self.load_agent(&agent_key)?;
        let mut position = self.load_position(&position_key, &agent_key, market_index)?;
        if position.size == 0 {
            return Err(ProgramError::NoPosition.into());
        }
        if exit_price == 0 {
            return Err(ProgramError::InvalidPrice.into());
        }

        let pnl = margin::realized_pnl(position.size, position.entry_price, exit_price)?;
        let total_return = if pnl >= 0 {
            position
                .margin
                .checked_add(pnl as u64)
                .ok_or(ProgramError::MathOverflow)?
        } else {
            position.margin.saturating_sub(pnl.unsigned_abs())
        };

        agent.collateral = agent
            .collateral
            .checked_add(total_return)
            .ok_or(ProgramError::MathOverflow)?;
        agent.realized_pnl = agent
            .realized_pnl
            .checked_add(pnl)
            .ok_or(ProgramError::MathOverflow)?;
        agent.total_trades += 1;
        if pnl > 0 {
            agent.win_count += 1;
        }
        reset(&mut position, self.clock);

        self.store(agent_key, &agent);
        self.store(position_key, &position);
        Ok(())
    }

    fn liquidate(&mut self, market_index: u8) -> Result<(), LedgerError> {
        let liquidator = self.signer(0)?;
        let exchange_key = self.key(1)?;
        let agent_key = self.key(2)?;
        let position_key = self.key(3)?;
        let liquidator_agent_key = self.key(4)?;

        self.derived(&exchange_key, self.deriver.exchange())?;
        self.load::<Exchange>(&exchange_key)?;
        let mut agent = self.load_agent(&agent_key)?;
        let mut position = self.load_position(&position_key, &agent_key, market_index)?;
        if position.size == 0 {
            return Err(ProgramError::NoPosition.into());
        }
        self.derived(&liquidator_agent_key, self.deriver.agent(&liquidator))?;
        self.load::<Agent>(&liquidator_agent_key)?;

        // Without a mark price nothing is liquidatable.
        let side = position.side().ok_or(ProgramError::NoPosition)?;
        let liquidatable = self
            .mark_prices
            .get(&market_index)
            .is_some_and(|mark| margin::is_liquidatable(side, *mark, position.liquidation_price));
        if !liquidatable {
            return Err(ProgramError::NotLiquidatable.into());
        }

        let penalty = position.margin * LIQUIDATION_PENALTY_PERCENT / 100;
        let reward = penalty / 2;
        agent.collateral = agent
            .collateral
            .checked_add(position.margin - penalty)
            .ok_or(ProgramError::MathOverflow)?;
        agent.total_trades += 1;
        reset(&mut position, self.clock);
        self.store(agent_key, &agent);
        self.store(position_key, &position);

        // Reload: the liquidator may be liquidating itself.
        let mut liquidator_agent: Agent = self.load(&liquidator_agent_key)?;
        liquidator_agent.collateral = liquidator_agent
            .collateral
            .checked_add(reward)
            .ok_or(ProgramError::MathOverflow)?;
        self.store(liquidator_agent_key, &liquidator_agent);
        Ok(())
    }

    fn settle_pnl(&mut self, market_index: u8) -> Result<(), LedgerError> {
        let owner = self.signer(0)?;
        let agent_key = self.key(1)?;
        let position_key = self.key(2)?;

        let mut agent = self.load_agent(&agent_key)?;
        if agent.owner != owner {
            return Err(ProgramError::Unauthorized.into());
        }
        let mut position = self.load_position(&position_key, &agent_key, market_index)?;

        let mark = self
            .mark_prices
            .get(&market_index)
            .copied()
            .unwrap_or(position.entry_price);
        let unrealized = if position.size != 0 {
            margin::realized_pnl(position.size, position.entry_price, mark)?
        } else {
            0
        };
        position.unrealized_pnl = unrealized;
        position.updated_at = self.clock;
        agent.unrealized_pnl = unrealized;

        self.store(position_key, &position);
        self.store(agent_key, &agent);
        Ok(())
    }
}

fn reset(position: &mut Position, clock: i64) {
    position.size = 0;
    position.entry_price = 0;
    position.margin = 0;
    position.liquidation_price = 0;
    position.unrealized_pnl = 0;
    position.updated_at = clock;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions;
    use crate::pda::associated_token_address;

    struct Fixture {
        ledger: MockLedger,
        deriver: AddressDeriver,
        admin: Keypair,
        trader: Keypair,
        mint: Pubkey,
    }

    async fn fixture() -> Fixture {
        let program = Pubkey::new([77; 32]);
        let ledger = MockLedger::new(program).with_canonical_markets().unwrap();
        let deriver = AddressDeriver::new(program);
        let admin = Keypair::from_secret(&[1; 32]);
        let trader = Keypair::from_secret(&[2; 32]);
        let mint = Pubkey::new([3; 32]);

        let ix = instructions::initialize(&deriver, &admin.pubkey(), &mint, 10).unwrap();
        ledger.submit(ix, &[&admin]).await.unwrap();
        let ix = instructions::register_agent(&deriver, &trader.pubkey(), "Alpha").unwrap();
        ledger.submit(ix, &[&trader]).await.unwrap();

        Fixture {
            ledger,
            deriver,
            admin,
            trader,
            mint,
        }
    }

    impl Fixture {
        fn agent(&self, owner: &Pubkey) -> Agent {
            let key = self.deriver.agent(owner).unwrap().address;
            Agent::parse(&self.ledger.account(&key).unwrap().data).unwrap()
        }

        fn position(&self, owner: &Pubkey, market: MarketIndex) -> Position {
            let key = self.deriver.position_for_owner(owner, market).unwrap().address;
            Position::parse(&self.ledger.account(&key).unwrap().data).unwrap()
        }

        async fn deposit(&self, owner: &Keypair, amount: u64) -> Result<TxSignature, LedgerError> {
            let ata = associated_token_address(&owner.pubkey(), &self.mint).unwrap();
            let ix = instructions::deposit(&self.deriver, &owner.pubkey(), &ata, amount).unwrap();
            self.ledger.submit(ix, &[owner]).await
        }

        async fn open(&self, owner: &Pubkey, size: i64, price: u64) -> Result<TxSignature, LedgerError> {
            let ix = instructions::open_position(
                &self.deriver,
                &self.admin.pubkey(),
                owner,
                &self.admin.pubkey(),
                MarketIndex::Btc,
                size,
                price,
            )
            .unwrap();
            self.ledger.submit(ix, &[&self.admin]).await
        }
    }

    #[tokio::test]
    async fn test_initialize_twice_fails_with_account_in_use() {
        let f = fixture().await;
        let ix = instructions::initialize(&f.deriver, &f.admin.pubkey(), &f.mint, 10).unwrap();
        assert_eq!(
            f.ledger.submit(ix, &[&f.admin]).await,
            Err(LedgerError::InstructionFailed { index: 0, code: 0 })
        );
        assert_eq!(f.ledger.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_open_locks_margin_and_sets_liquidation_price() {
        let f = fixture().await;
        let owner = f.trader.pubkey();
        f.deposit(&f.trader, 1_000_000_000).await.unwrap();
        f.open(&owner, 50_000_000, 67_420_000_000).await.unwrap();

        let agent = f.agent(&owner);
        assert_eq!(agent.collateral, 1_000_000_000 - 674_200_000);
        let position = f.position(&owner, MarketIndex::Btc);
        assert_eq!(position.size, 50_000_000);
        assert_eq!(position.margin, 674_200_000);
        assert_eq!(position.liquidation_price, 66_745_800_000);
    }

    #[tokio::test]
    async fn test_open_without_collateral_fails_atomically() {
        let f = fixture().await;
        let owner = f.trader.pubkey();
        let err = f.open(&owner, 50_000_000, 67_420_000_000).await.unwrap_err();
        assert_eq!(err, custom(ProgramError::InsufficientCollateral.code()));
        let key = f.deriver.position_for_owner(&owner, MarketIndex::Btc).unwrap().address;
        assert!(f.ledger.account(&key).is_none());
    }

    #[tokio::test]
    async fn test_open_requires_exchange_authority() {
        let f = fixture().await;
        f.deposit(&f.trader, 1_000_000_000).await.unwrap();
        let ix = instructions::open_position(
            &f.deriver,
            &f.trader.pubkey(),
            &f.trader.pubkey(),
            &f.trader.pubkey(),
            MarketIndex::Btc,
            1_000_000,
            67_420_000_000,
        )
        .unwrap();
        assert_eq!(
            f.ledger.submit(ix, &[&f.trader]).await,
            Err(custom(ProgramError::Unauthorized.code()))
        );
    }

    #[tokio::test]
    async fn test_reopen_averages_entry_price() {
        let f = fixture().await;
        let owner = f.trader.pubkey();
        f.deposit(&f.trader, 10_000_000_000).await.unwrap();
        f.open(&owner, 100_000_000, 60_000_000_000).await.unwrap();
        f.open(&owner, 100_000_000, 70_000_000_000).await.unwrap();

        let position = f.position(&owner, MarketIndex::Btc);
        assert_eq!(position.size, 200_000_000);
        assert_eq!(position.entry_price, 65_000_000_000);
        assert_eq!(position.margin, 1_200_000_000 + 1_400_000_000);
    }

    #[tokio::test]
    async fn test_liquidation_needs_mark_price_past_threshold() {
        let f = fixture().await;
        let owner = f.trader.pubkey();
        let keeper = Keypair::from_secret(&[4; 32]);
        let ix = instructions::register_agent(&f.deriver, &keeper.pubkey(), "Keeper").unwrap();
        f.ledger.submit(ix, &[&keeper]).await.unwrap();

        f.deposit(&f.trader, 1_000_000_000).await.unwrap();
        f.open(&owner, 50_000_000, 67_420_000_000).await.unwrap();

        let liquidate = || {
            instructions::liquidate(&f.deriver, &keeper.pubkey(), &owner, MarketIndex::Btc).unwrap()
        };
        assert_eq!(
            f.ledger.submit(liquidate(), &[&keeper]).await,
            Err(custom(ProgramError::NotLiquidatable.code()))
        );
        f.ledger.set_mark_price(MarketIndex::Btc, 67_000_000_000);
        assert!(f.ledger.submit(liquidate(), &[&keeper]).await.is_err());

        f.ledger.set_mark_price(MarketIndex::Btc, 66_000_000_000);
        f.ledger.submit(liquidate(), &[&keeper]).await.unwrap();

        // 5% of 674.2 margin is 33.71; the keeper earns half.
        assert_eq!(f.agent(&owner).collateral, 325_800_000 + 674_200_000 - 33_710_000);
        assert_eq!(f.agent(&keeper.pubkey()).collateral, 16_855_000);
        assert_eq!(f.position(&owner, MarketIndex::Btc).size, 0);
    }

    #[tokio::test]
    async fn test_settle_pnl_marks_to_oracle() {
        let f = fixture().await;
        let owner = f.trader.pubkey();
        f.deposit(&f.trader, 1_000_000_000).await.unwrap();
        f.open(&owner, -50_000_000, 67_420_000_000).await.unwrap();
        f.ledger.set_mark_price(MarketIndex::Btc, 67_220_000_000);

        let ix = instructions::settle_pnl(&f.deriver, &owner, MarketIndex::Btc).unwrap();
        f.ledger.submit(ix, &[&f.trader]).await.unwrap();
        assert_eq!(f.position(&owner, MarketIndex::Btc).unrealized_pnl, 100_000_000);
        assert_eq!(f.agent(&owner).unrealized_pnl, 100_000_000);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let f = fixture().await;
        f.ledger.fail_next(LedgerError::Network("down".to_string()));
        let key = f.deriver.exchange().unwrap().address;
        assert!(f.ledger.fetch_account(&key).await.is_err());
        assert!(f.ledger.fetch_account(&key).await.unwrap().is_some());
    }
}
