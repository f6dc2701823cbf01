//! User-facing staking operations and the routines that keep the
//! [`ViewState`] in step with the chain.
//!
//! Refreshes and mutations share one in-flight slot, so at most one of them
//! is reading or writing the snapshot at a time. Every mutating operation
//! follows the same shape: claim the slot, check its preconditions against the current snapshot
//! (no remote calls), submit, wait for finality, then re-read only the parts
//! of state the call could have changed. Snapshots are published through a
//! `watch` channel and always replaced whole, so a failed refresh leaves the
//! previous snapshot in place.

use crate::address::Address;
use crate::amount::{parse_positive_units, parse_units, TokenAmount, U256};
use crate::errors::{RemoteCallError, StakingError, ValidationError};
use crate::gateway::{Confirmation, ContractGateway, PendingTransaction};
use crate::rpc::TxHash;
use crate::session::Session;
use crate::store::{LockTerm, RewardRates, StakeRecord, TokenInfo, ViewState};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Whole tokens granted to the staking pool by [`Orchestrator::approve`].
pub const APPROVAL_CEILING: &str = "1000000";

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Source of "now" in Unix seconds, used for unlock checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

// ── Operations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Refresh,
    LoadStakes,
    Approve,
    Stake,
    Withdraw,
    DepositReward,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Refresh => "refresh",
            Self::LoadStakes => "load_stakes",
            Self::Approve => "approve",
            Self::Stake => "stake",
            Self::Withdraw => "withdraw",
            Self::DepositReward => "deposit_reward",
        })
    }
}

/// Whether a refresh or mutating operation currently holds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "operation", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    InFlight(Operation),
}

/// Result of a confirmed mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub operation: Operation,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

impl OperationOutcome {
    fn new(operation: Operation, confirmation: Confirmation) -> Self {
        Self {
            operation,
            tx_hash: confirmation.tx_hash,
            block_number: confirmation.block_number,
        }
    }
}

/// Holds the in-flight slot; returns the session to idle when dropped.
struct InFlight<'a> {
    slot: &'a Mutex<Option<Operation>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock(slot: &Mutex<Option<Operation>>) -> MutexGuard<'_, Option<Operation>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tag a read's failure with the refresh stage it belongs to.
async fn stage<T>(
    name: &'static str,
    read: impl Future<Output = Result<T, RemoteCallError>>,
) -> Result<T, StakingError> {
    read.await.map_err(StakingError::partial(name))
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Orchestrator {
    gateway: Arc<dyn ContractGateway>,
    session: Session,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ViewState>,
    in_flight: Mutex<Option<Operation>>,
    confirmation_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn ContractGateway>, session: Session) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            gateway,
            session,
            clock: Arc::new(SystemClock),
            state,
            in_flight: Mutex::new(None),
            confirmation_timeout: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound every confirmation wait. `None` waits indefinitely.
    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn phase(&self) -> Phase {
        match *lock(&self.in_flight) {
            Some(operation) => Phase::InFlight(operation),
            None => Phase::Idle,
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    // ── Synchronization ───────────────────────────────────────────────────

    /// Re-read everything and replace the snapshot in one step.
    ///
    /// Token metadata and reward rates are only fetched the first time. Any
    /// failing read fails the whole refresh and nothing is published.
    /// Rejected while another operation holds the session.
    pub async fn refresh_all(&self) -> Result<ViewState, StakingError> {
        let _in_flight = self.begin(Operation::Refresh)?;
        let user = self.session.address();
        let spender = self.gateway.staking_address();

        let token = stage("token info", self.token_info()).await?;
        let (balance, allowance, rates) = tokio::try_join!(
            stage("balance", self.gateway.balance_of(user)),
            stage("allowance", self.gateway.allowance(user, spender)),
            stage("reward rates", self.reward_rates()),
        )?;
        let stakes = stage("stake records", self.fetch_stakes(user, token.decimals)).await?;

        let next = ViewState {
            balance: Some(TokenAmount::new(balance, token.decimals)),
            allowance: Some(TokenAmount::new(allowance, token.decimals)),
            token: Some(token),
            reward_rates: Some(rates),
            stakes,
        };
        self.state.send_replace(next.clone());
        tracing::debug!(%user, stakes = next.stakes.len(), "State refreshed");
        Ok(next)
    }

    /// Re-read the stake list only. Fetches token metadata first if it has
    /// not been loaded yet.
    pub async fn load_stakes(&self) -> Result<Vec<StakeRecord>, StakingError> {
        let _in_flight = self.begin(Operation::LoadStakes)?;
        let user = self.session.address();
        let token = stage("token info", self.token_info()).await?;
        let stakes = stage("stake records", self.fetch_stakes(user, token.decimals)).await?;

        self.state.send_modify(|state| {
            state.token = Some(token);
            state.stakes = stakes.clone();
        });
        Ok(stakes)
    }

    async fn token_info(&self) -> Result<TokenInfo, RemoteCallError> {
        let cached = self.state.borrow().token.clone();
        if let Some(token) = cached {
            return Ok(token);
        }
        let (name, symbol, decimals) = tokio::try_join!(
            self.gateway.token_name(),
            self.gateway.token_symbol(),
            self.gateway.token_decimals(),
        )?;
        Ok(TokenInfo {
            name,
            symbol,
            decimals,
        })
    }

    async fn reward_rates(&self) -> Result<RewardRates, RemoteCallError> {
        let cached = self.state.borrow().reward_rates;
        if let Some(rates) = cached {
            return Ok(rates);
        }
        let (flexible, one_month, one_year) = tokio::try_join!(
            self.gateway.reward_rate(LockTerm::Flexible),
            self.gateway.reward_rate(LockTerm::OneMonth),
            self.gateway.reward_rate(LockTerm::OneYear),
        )?;
        Ok(RewardRates {
            flexible,
            one_month,
            one_year,
        })
    }

    /// `getStakeCount`, then every `getStake` concurrently. The first failure
    /// cancels the remaining reads.
    async fn fetch_stakes(
        &self,
        user: Address,
        decimals: u8,
    ) -> Result<Vec<StakeRecord>, RemoteCallError> {
        let count = self.gateway.stake_count(user).await?;

        let mut reads = JoinSet::new();
        for index in 0..count {
            let gateway = Arc::clone(&self.gateway);
            reads.spawn(async move { gateway.get_stake(user, index).await.map(|raw| (index, raw)) });
        }

        let mut stakes = Vec::new();
        while let Some(joined) = reads.join_next().await {
            let (index, raw) = match joined {
                Ok(read) => read?,
                Err(e) => return Err(RemoteCallError::new("getStake", e)),
            };
            stakes.push(StakeRecord::from_raw(index, raw, decimals)?);
        }
        stakes.sort_by_key(|s| s.index);
        Ok(stakes)
    }

    async fn resync_balance(&self, decimals: u8) -> Result<(), StakingError> {
        let user = self.session.address();
        let balance = stage("balance", self.gateway.balance_of(user)).await?;
        self.state.send_modify(|state| {
            state.balance = Some(TokenAmount::new(balance, decimals));
        });
        Ok(())
    }

    async fn resync_stakes_and_balance(&self, decimals: u8) -> Result<(), StakingError> {
        let user = self.session.address();
        let (stakes, balance) = tokio::try_join!(
            stage("stake records", self.fetch_stakes(user, decimals)),
            stage("balance", self.gateway.balance_of(user)),
        )?;
        self.state.send_modify(|state| {
            state.stakes = stakes;
            state.balance = Some(TokenAmount::new(balance, decimals));
        });
        Ok(())
    }

    // ── Mutating operations ───────────────────────────────────────────────

    /// Grant the staking pool [`APPROVAL_CEILING`] tokens, then re-read the
    /// allowance.
    pub async fn approve(&self) -> Result<OperationOutcome, StakingError> {
        let _in_flight = self.begin(Operation::Approve)?;
        let token = self.token_info().await?;
        let ceiling = parse_units(APPROVAL_CEILING, token.decimals).map_err(ValidationError::from)?;
        let spender = self.gateway.staking_address();

        let pending = self.gateway.approve(spender, ceiling).await?;
        let confirmation = self.confirm(Operation::Approve, &pending).await?;

        let user = self.session.address();
        let allowance = stage("allowance", self.gateway.allowance(user, spender)).await?;
        self.state.send_modify(|state| {
            state.allowance = Some(TokenAmount::new(allowance, token.decimals));
            state.token = Some(token);
        });
        Ok(OperationOutcome::new(Operation::Approve, confirmation))
    }

    /// Stake `amount` (decimal string) under `term`.
    pub async fn stake(&self, amount: &str, term: LockTerm) -> Result<OperationOutcome, StakingError> {
        let _in_flight = self.begin(Operation::Stake)?;
        let snapshot = self.snapshot();
        let decimals = snapshot
            .decimals()
            .ok_or(ValidationError::TokenInfoUnavailable)?;
        let raw = parse_positive_units(amount, decimals).map_err(ValidationError::from)?;
        if !snapshot.is_approved() {
            return Err(ValidationError::NotApproved.into());
        }

        tracing::info!(amount, %term, "Staking");
        let pending = self.gateway.stake(raw, term).await?;
        let confirmation = self.confirm(Operation::Stake, &pending).await?;

        self.resync_stakes_and_balance(decimals).await?;
        Ok(OperationOutcome::new(Operation::Stake, confirmation))
    }

    /// Withdraw principal plus reward of the stake at `index`.
    pub async fn withdraw(&self, index: u64) -> Result<OperationOutcome, StakingError> {
        let _in_flight = self.begin(Operation::Withdraw)?;
        let snapshot = self.snapshot();
        let decimals = snapshot
            .decimals()
            .ok_or(ValidationError::TokenInfoUnavailable)?;
        let record = snapshot
            .stake(index)
            .ok_or(ValidationError::StakeNotFound(index))?;
        if record.claimed {
            return Err(ValidationError::AlreadyClaimed(index).into());
        }
        let now = self.now();
        if !record.is_withdrawable(now) {
            let remaining = record
                .remaining(now)
                .map(|r| r.to_string())
                .unwrap_or_default();
            return Err(ValidationError::StillLocked { index, remaining }.into());
        }

        tracing::info!(index, "Withdrawing stake");
        let pending = self.gateway.withdraw(index).await?;
        let confirmation = self.confirm(Operation::Withdraw, &pending).await?;

        self.resync_stakes_and_balance(decimals).await?;
        Ok(OperationOutcome::new(Operation::Withdraw, confirmation))
    }

    /// Top up the pool's reward reserve. Owner only.
    pub async fn deposit_reward(&self, amount: &str) -> Result<OperationOutcome, StakingError> {
        let _in_flight = self.begin(Operation::DepositReward)?;
        if !self.session.is_admin() {
            return Err(ValidationError::NotAdmin.into());
        }
        let snapshot = self.snapshot();
        if !snapshot.is_approved() {
            return Err(ValidationError::NotApproved.into());
        }
        let decimals = snapshot
            .decimals()
            .ok_or(ValidationError::TokenInfoUnavailable)?;
        let raw = parse_positive_units(amount, decimals).map_err(ValidationError::from)?;

        tracing::info!(amount, "Depositing reward");
        let pending = self.gateway.deposit_reward(raw).await?;
        let confirmation = self.confirm(Operation::DepositReward, &pending).await?;

        self.resync_balance(decimals).await?;
        Ok(OperationOutcome::new(Operation::DepositReward, confirmation))
    }

    fn begin(&self, operation: Operation) -> Result<InFlight<'_>, ValidationError> {
        let mut slot = lock(&self.in_flight);
        if let Some(current) = *slot {
            tracing::debug!(%operation, %current, "Rejected: operation in flight");
            return Err(ValidationError::OperationInFlight(current.to_string()));
        }
        *slot = Some(operation);
        Ok(InFlight {
            slot: &self.in_flight,
        })
    }

    async fn confirm(
        &self,
        operation: Operation,
        pending: &PendingTransaction,
    ) -> Result<Confirmation, StakingError> {
        let wait = self.gateway.wait_for_confirmation(pending);
        let result = match self.confirmation_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(%operation, tx_hash = %pending.hash, ?limit, "Confirmation timed out");
                    return Err(StakingError::ConfirmationTimeout {
                        tx_hash: pending.hash.to_string(),
                    });
                }
            },
            None => wait.await,
        };

        match result {
            Ok(confirmation) => {
                tracing::info!(%operation, tx_hash = %confirmation.tx_hash, "Operation confirmed");
                Ok(confirmation)
            }
            Err(e) => {
                tracing::warn!(%operation, tx_hash = %pending.hash, error = %e, "Operation failed");
                Err(e.into())
            }
        }
    }
}

/// Total principal across the records that are still active.
pub fn staked_total(stakes: &[StakeRecord]) -> U256 {
    stakes
        .iter()
        .filter(|s| !s.claimed)
        .fold(U256::ZERO, |acc, s| acc + s.principal.raw)
}
