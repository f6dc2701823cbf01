//! The client's snapshot of on-chain state and the display rules derived
//! from it.
//!
//! Nothing in here talks to the network. The orchestrator builds a
//! [`ViewState`] from gateway reads and publishes it; readers only ever see
//! whole snapshots.

use crate::abi::RawStake;
use crate::amount::{serialize_u256, TokenAmount, U256};
use crate::errors::{RemoteCallError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECS_PER_HOUR: u64 = 60 * 60;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

// ── Lock terms ────────────────────────────────────────────────────────────────

/// Commitment period of a stake. Wire encoding is the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTerm {
    Flexible = 0,
    OneMonth = 1,
    OneYear = 2,
}

impl LockTerm {
    pub const ALL: [LockTerm; 3] = [LockTerm::Flexible, LockTerm::OneMonth, LockTerm::OneYear];

    pub fn wire(self) -> u8 {
        self as u8
    }

    /// Seconds between `startTime` and `unlockTime` for this term.
    pub fn duration_secs(self) -> u64 {
        match self {
            Self::Flexible => 0,
            Self::OneMonth => 30 * SECS_PER_DAY,
            Self::OneYear => 365 * SECS_PER_DAY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Flexible => "Flexible",
            Self::OneMonth => "1 Month",
            Self::OneYear => "1 Year",
        }
    }
}

impl TryFrom<u8> for LockTerm {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Flexible),
            1 => Ok(Self::OneMonth),
            2 => Ok(Self::OneYear),
            other => Err(ValidationError::InvalidLockTerm(other)),
        }
    }
}

impl FromStr for LockTerm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flexible" | "flex" | "0" => Ok(Self::Flexible),
            "one_month" | "one-month" | "1m" | "1" => Ok(Self::OneMonth),
            "one_year" | "one-year" | "1y" | "2" => Ok(Self::OneYear),
            other => Err(format!(
                "unknown lock term `{other}` (expected flexible, one-month or one-year)"
            )),
        }
    }
}

impl fmt::Display for LockTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Token and rates ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Per-term reward rate, exactly as the contract reports it (percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardRates {
    #[serde(serialize_with = "serialize_u256")]
    pub flexible: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub one_month: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub one_year: U256,
}

impl RewardRates {
    pub fn get(&self, term: LockTerm) -> U256 {
        match term {
            LockTerm::Flexible => self.flexible,
            LockTerm::OneMonth => self.one_month,
            LockTerm::OneYear => self.one_year,
        }
    }
}

// ── Stake records ─────────────────────────────────────────────────────────────

/// Time left until a locked stake opens, truncated to the largest whole unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTime {
    Days(u64),
    Hours(u64),
}

impl RemainingTime {
    pub fn from_secs(secs: u64) -> Self {
        if secs >= SECS_PER_DAY {
            Self::Days(secs / SECS_PER_DAY)
        } else {
            Self::Hours(secs / SECS_PER_HOUR)
        }
    }
}

impl fmt::Display for RemainingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(n) => write!(f, "{n} day(s) remaining"),
            Self::Hours(n) => write!(f, "{n} hour(s) remaining"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakeRecord {
    pub index: u64,
    pub principal: TokenAmount,
    pub start_time: u64,
    pub lock_term: LockTerm,
    pub claimed: bool,
    pub current_reward: TokenAmount,
    /// Derived from `start_time` and the term; meaningless for `Flexible`.
    pub unlock_time: u64,
}

impl StakeRecord {
    /// Build a record from a raw `getStake` tuple.
    ///
    /// The unlock time is derived locally from the term. The reward is taken
    /// as reported; it is never recomputed here.
    pub fn from_raw(index: u64, raw: RawStake, decimals: u8) -> Result<Self, RemoteCallError> {
        let lock_term = LockTerm::try_from(raw.lock_type).map_err(|_| {
            RemoteCallError::new(
                "getStake",
                format!("stake {index} has unknown lock type {}", raw.lock_type),
            )
        })?;
        let unlock_time = raw.start_time.saturating_add(lock_term.duration_secs());
        if lock_term != LockTerm::Flexible && raw.unlock_time != 0 && raw.unlock_time != unlock_time
        {
            tracing::warn!(
                index,
                reported = raw.unlock_time,
                derived = unlock_time,
                "Contract unlock time disagrees with lock term; using derived value"
            );
        }

        Ok(Self {
            index,
            principal: TokenAmount::new(raw.amount, decimals),
            start_time: raw.start_time,
            lock_term,
            claimed: raw.claimed,
            current_reward: TokenAmount::new(raw.reward, decimals),
            unlock_time,
        })
    }

    pub fn is_withdrawable(&self, now: u64) -> bool {
        !self.claimed && (self.lock_term == LockTerm::Flexible || now >= self.unlock_time)
    }

    /// `None` when there is nothing to count down: claimed, flexible, or
    /// already unlocked.
    pub fn remaining(&self, now: u64) -> Option<RemainingTime> {
        if self.claimed || self.lock_term == LockTerm::Flexible || now >= self.unlock_time {
            return None;
        }
        Some(RemainingTime::from_secs(self.unlock_time - now))
    }

    pub fn status_label(&self) -> &'static str {
        if self.claimed {
            "Withdrawn"
        } else {
            "Active"
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Everything the client knows about the chain for the session address.
///
/// Fields are `None` until first loaded. `token` and `reward_rates` are
/// static for the session and kept across refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub token: Option<TokenInfo>,
    pub balance: Option<TokenAmount>,
    pub allowance: Option<TokenAmount>,
    pub reward_rates: Option<RewardRates>,
    pub stakes: Vec<StakeRecord>,
}

impl ViewState {
    pub fn decimals(&self) -> Option<u8> {
        self.token.as_ref().map(|t| t.decimals)
    }

    pub fn is_approved(&self) -> bool {
        self.allowance.map_or(false, |a| !a.is_zero())
    }

    pub fn stake(&self, index: u64) -> Option<&StakeRecord> {
        self.stakes.iter().find(|s| s.index == index)
    }

    pub fn withdrawable(&self, now: u64) -> impl Iterator<Item = &StakeRecord> {
        self.stakes.iter().filter(move |s| s.is_withdrawable(now))
    }
}
