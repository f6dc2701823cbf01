//! In-memory stand-ins for the chain, the wallet and the clock.
//!
//! `FakeGateway` applies writes on submission and records every call by its
//! ABI name, so tests can assert both the resulting state and exactly which
//! remote calls an operation issued.

use crate::abi::RawStake;
use crate::address::Address;
use crate::amount::{parse_units, U256};
use crate::errors::RemoteCallError;
use crate::gateway::{Confirmation, ContractGateway, PendingTransaction};
use crate::orchestrator::{Clock, Orchestrator};
use crate::rpc::TxHash;
use crate::session::Session;
use crate::store::LockTerm;
use crate::wallet::Signer;
use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

pub const TOKEN: Address = Address::from_bytes([0x11; 20]);
pub const POOL: Address = Address::from_bytes([0x22; 20]);
pub const ADMIN: Address = Address::from_bytes([0xaa; 20]);
pub const USER: Address = Address::from_bytes([0xbb; 20]);

pub const DECIMALS: u8 = 18;
pub const START: u64 = 1_750_000_000;

/// Whole tokens to raw units at [`DECIMALS`].
pub fn tokens(amount: &str) -> U256 {
    parse_units(amount, DECIMALS).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    Immediate,
    /// Wait until [`FakeGateway::release`] is called.
    Held,
    Never,
    Revert,
}

pub struct FakeChain {
    /// Account the writes are sent from.
    pub sender: Address,
    pub pool_token: Address,
    pub owner: Address,
    pub balances: HashMap<Address, U256>,
    pub allowances: HashMap<(Address, Address), U256>,
    pub rates: [U256; 3],
    pub stakes: HashMap<Address, Vec<RawStake>>,
    pub now: u64,
    pub calls: Vec<String>,
    pub failing: HashSet<&'static str>,
    pub confirm: ConfirmMode,
    /// Read that blocks once until [`FakeGateway::release`].
    pub pause_at: Option<&'static str>,
    tx_count: u64,
}

pub struct FakeGateway {
    chain: Mutex<FakeChain>,
    release: Notify,
}

impl FakeGateway {
    pub fn new() -> Self {
        let balances = HashMap::from([(USER, tokens("1000")), (ADMIN, tokens("5000"))]);
        Self {
            chain: Mutex::new(FakeChain {
                sender: USER,
                pool_token: TOKEN,
                owner: ADMIN,
                balances,
                allowances: HashMap::new(),
                rates: [U256::from(5u64), U256::from(8u64), U256::from(12u64)],
                stakes: HashMap::new(),
                now: START,
                calls: Vec::new(),
                failing: HashSet::new(),
                confirm: ConfirmMode::Immediate,
                pause_at: None,
                tx_count: 0,
            }),
            release: Notify::new(),
        }
    }

    pub fn sent_from(sender: Address) -> Self {
        let gateway = Self::new();
        gateway.state().sender = sender;
        gateway
    }

    pub fn state(&self) -> MutexGuard<'_, FakeChain> {
        self.chain.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn fail(&self, call: &'static str) {
        self.state().failing.insert(call);
    }

    /// Let one held confirmation or paused read through.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn pause_at(&self, call: &'static str) {
        self.state().pause_at = Some(call);
    }

    async fn checkpoint(&self, call: &'static str) {
        let paused = {
            let mut chain = self.state();
            let paused = chain.pause_at == Some(call);
            if paused {
                chain.pause_at = None;
            }
            paused
        };
        if paused {
            self.release.notified().await;
        }
    }

    pub fn add_stake(&self, owner: Address, amount: U256, term: LockTerm, start_time: u64) {
        self.state().stakes.entry(owner).or_default().push(RawStake {
            amount,
            start_time,
            lock_type: term.wire(),
            claimed: false,
            reward: amount / U256::from(100u64),
            unlock_time: start_time + term.duration_secs(),
        });
    }

    fn record(&self, call: &'static str) -> Result<MutexGuard<'_, FakeChain>, RemoteCallError> {
        let mut chain = self.state();
        chain.calls.push(call.to_string());
        if chain.failing.contains(call) {
            return Err(RemoteCallError::new(call, "connection refused"));
        }
        Ok(chain)
    }
}

impl FakeChain {
    fn balance(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    fn submitted(&mut self, call: &'static str) -> PendingTransaction {
        self.tx_count += 1;
        PendingTransaction {
            call,
            hash: TxHash(format!("0x{:064x}", self.tx_count)),
        }
    }

    fn revert(call: &'static str, reason: &str) -> RemoteCallError {
        RemoteCallError::new(call, format!("execution reverted: {reason}"))
    }
}

#[async_trait]
impl ContractGateway for FakeGateway {
    fn token_address(&self) -> Address {
        TOKEN
    }

    fn staking_address(&self) -> Address {
        POOL
    }

    async fn token_name(&self) -> Result<String, RemoteCallError> {
        self.record("name").map(|_| "Stake Token".to_string())
    }

    async fn token_symbol(&self) -> Result<String, RemoteCallError> {
        self.record("symbol").map(|_| "STK".to_string())
    }

    async fn token_decimals(&self) -> Result<u8, RemoteCallError> {
        self.record("decimals").map(|_| DECIMALS)
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, RemoteCallError> {
        Ok(self.record("balanceOf")?.balance(owner))
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, RemoteCallError> {
        let chain = self.record("allowance")?;
        Ok(chain
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> Result<PendingTransaction, RemoteCallError> {
        let mut chain = self.record("approve")?;
        let sender = chain.sender;
        chain.allowances.insert((sender, spender), amount);
        Ok(chain.submitted("approve"))
    }

    async fn staking_token(&self) -> Result<Address, RemoteCallError> {
        Ok(self.record("token")?.pool_token)
    }

    async fn owner(&self) -> Result<Address, RemoteCallError> {
        Ok(self.record("owner")?.owner)
    }

    async fn reward_rate(&self, term: LockTerm) -> Result<U256, RemoteCallError> {
        Ok(self.record("rewardRates")?.rates[term.wire() as usize])
    }

    async fn stake(
        &self,
        amount: U256,
        term: LockTerm,
    ) -> Result<PendingTransaction, RemoteCallError> {
        let mut chain = self.record("stake")?;
        let sender = chain.sender;
        let allowance = chain
            .allowances
            .get(&(sender, POOL))
            .copied()
            .unwrap_or_default();
        if allowance < amount {
            return Err(FakeChain::revert("stake", "insufficient allowance"));
        }
        let balance = chain.balance(sender);
        if balance < amount {
            return Err(FakeChain::revert("stake", "insufficient balance"));
        }
        chain.balances.insert(sender, balance - amount);
        chain.allowances.insert((sender, POOL), allowance - amount);
        let now = chain.now;
        chain.stakes.entry(sender).or_default().push(RawStake {
            amount,
            start_time: now,
            lock_type: term.wire(),
            claimed: false,
            reward: U256::ZERO,
            unlock_time: now + term.duration_secs(),
        });
        Ok(chain.submitted("stake"))
    }

    async fn withdraw(&self, index: u64) -> Result<PendingTransaction, RemoteCallError> {
        let mut chain = self.record("withdraw")?;
        let sender = chain.sender;
        let payout = {
            let stake = chain
                .stakes
                .get_mut(&sender)
                .and_then(|s| s.get_mut(index as usize))
                .ok_or_else(|| FakeChain::revert("withdraw", "invalid index"))?;
            if stake.claimed {
                return Err(FakeChain::revert("withdraw", "already claimed"));
            }
            stake.claimed = true;
            stake.amount + stake.reward
        };
        let balance = chain.balance(sender);
        chain.balances.insert(sender, balance + payout);
        Ok(chain.submitted("withdraw"))
    }

    async fn deposit_reward(&self, amount: U256) -> Result<PendingTransaction, RemoteCallError> {
        let mut chain = self.record("depositReward")?;
        let sender = chain.sender;
        if sender != chain.owner {
            return Err(FakeChain::revert("depositReward", "caller is not the owner"));
        }
        let balance = chain.balance(sender);
        chain.balances.insert(sender, balance - amount);
        Ok(chain.submitted("depositReward"))
    }

    async fn stake_count(&self, user: Address) -> Result<u64, RemoteCallError> {
        drop(self.record("getStakeCount")?);
        self.checkpoint("getStakeCount").await;
        let chain = self.state();
        Ok(chain.stakes.get(&user).map_or(0, |s| s.len() as u64))
    }

    async fn get_stake(&self, user: Address, index: u64) -> Result<RawStake, RemoteCallError> {
        let chain = self.record("getStake")?;
        chain
            .stakes
            .get(&user)
            .and_then(|s| s.get(index as usize))
            .cloned()
            .ok_or_else(|| FakeChain::revert("getStake", "invalid index"))
    }

    async fn wait_for_confirmation(
        &self,
        pending: &PendingTransaction,
    ) -> Result<Confirmation, RemoteCallError> {
        let (mode, block) = {
            let chain = self.state();
            (chain.confirm, chain.tx_count)
        };
        match mode {
            ConfirmMode::Immediate => {}
            ConfirmMode::Held => self.release.notified().await,
            ConfirmMode::Never => std::future::pending::<()>().await,
            ConfirmMode::Revert => {
                return Err(RemoteCallError::new(
                    pending.call,
                    format!("transaction {} reverted", pending.hash),
                ))
            }
        }
        Ok(Confirmation {
            tx_hash: pending.hash.clone(),
            block_number: Some(100 + block),
        })
    }
}

/// Signer that only carries an address. Writes go through the fake gateway.
pub struct FakeSigner(Address);

impl FakeSigner {
    pub fn arc(address: Address) -> Arc<dyn Signer> {
        Arc::new(Self(address))
    }
}

#[async_trait]
impl Signer for FakeSigner {
    fn address(&self) -> Address {
        self.0
    }

    async fn send_transaction(&self, _to: Address, _data: Vec<u8>) -> Result<TxHash, RemoteCallError> {
        Err(RemoteCallError::new("eth_sendTransaction", "fake signer"))
    }
}

pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(now)))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Orchestrator for `who` over `gateway`, with the clock pinned at [`START`].
pub fn orchestrator(gateway: &Arc<FakeGateway>, who: Address) -> (Orchestrator, Arc<FixedClock>) {
    let clock = FixedClock::new(START);
    let gateway: Arc<dyn ContractGateway> = gateway.clone();
    let session = Session::new(who, who == ADMIN);
    let orchestrator = Orchestrator::new(gateway, session).with_clock(clock.clone());
    (orchestrator, clock)
}

/// A node's answer: a `result` value or an `(code, message)` error.
pub type Answer = Result<Value, (i64, String)>;

/// Minimal JSON-RPC node on a random local port.
pub async fn spawn_node(
    handler: impl Fn(&str, &Value) -> Answer + Send + Sync + 'static,
) -> String {
    let handler = Arc::new(handler);
    let app = Router::new().route(
        "/",
        post(move |Json(req): Json<Value>| {
            let handler = Arc::clone(&handler);
            async move {
                let method = req["method"].as_str().unwrap_or_default().to_string();
                Json(match handler(&method, &req["params"]) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": req["id"], "result": result}),
                    Err((code, message)) => json!({
                        "jsonrpc": "2.0",
                        "id": req["id"],
                        "error": {"code": code, "message": message}
                    }),
                })
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
