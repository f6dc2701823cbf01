//! Solidity interfaces of the token and the staking pool.
//!
//! `sol!` generates a `…Call` struct (with `SELECTOR` and `abi_encode`) and a
//! `…Return` struct for every function. This module adds the conversions
//! from the pool's return tuples into client types.

use crate::amount::U256;
use alloy_sol_types::{sol, SolCall};
use thiserror::Error;

sol! {
    /// ERC-20 subset used by the client.
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    /// Fixed-rate staking pool. `lockType`: 0 flexible, 1 one month, 2 one year.
    interface IStakingPool {
        function token() external view returns (address);
        function owner() external view returns (address);
        function rewardRates(uint8 lockType) external view returns (uint256);
        function stake(uint256 amount, uint8 lockType) external;
        function withdraw(uint256 index) external;
        function depositReward(uint256 amount) external;
        function getStakeCount(address user) external view returns (uint256);
        function getStake(address user, uint256 index) external view returns (
            uint256 amount,
            uint256 startTime,
            uint8 lockType,
            bool claimed,
            uint256 reward,
            uint256 unlockTime
        );
    }
}

#[derive(Error, Debug)]
pub enum AbiError {
    #[error(transparent)]
    Decode(#[from] alloy_sol_types::Error),

    #[error("value of `{field}` does not fit in 64 bits")]
    Overflow { field: &'static str },
}

/// Function name of `C`, e.g. `"balanceOf"`.
pub fn call_name<C: SolCall>() -> &'static str {
    C::SIGNATURE
        .split_once('(')
        .map_or(C::SIGNATURE, |(name, _)| name)
}

/// Decode the return data of `C`, rejecting non-canonical encodings.
pub fn decode_returns<C: SolCall>(data: &[u8]) -> Result<C::Return, AbiError> {
    Ok(C::abi_decode_returns(data, true)?)
}

pub fn narrow_u64(value: U256, field: &'static str) -> Result<u64, AbiError> {
    u64::try_from(value).map_err(|_| AbiError::Overflow { field })
}

/// `getStake` return tuple with timestamps narrowed to `u64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStake {
    pub amount: U256,
    pub start_time: u64,
    pub lock_type: u8,
    pub claimed: bool,
    pub reward: U256,
    pub unlock_time: u64,
}

impl TryFrom<IStakingPool::getStakeReturn> for RawStake {
    type Error = AbiError;

    fn try_from(ret: IStakingPool::getStakeReturn) -> Result<Self, Self::Error> {
        Ok(Self {
            amount: ret.amount,
            start_time: narrow_u64(ret.startTime, "startTime")?,
            lock_type: ret.lockType,
            claimed: ret.claimed,
            reward: ret.reward,
            unlock_time: narrow_u64(ret.unlockTime, "unlockTime")?,
        })
    }
}
