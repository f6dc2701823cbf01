use crate::abi::{self, RawStake, IStakingPool, IERC20};
use crate::address::Address;
use crate::amount::U256;
use crate::errors::RemoteCallError;
use crate::rpc::{RpcClient, TxHash};
use crate::store::LockTerm;
use crate::wallet::Signer;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A submitted transaction that is not yet final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub call: &'static str,
    pub hash: TxHash,
}

/// A transaction the network has recorded successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Typed access to the token and staking pool contracts.
///
/// Reads return parsed values. Writes return a [`PendingTransaction`] that
/// must be passed to [`ContractGateway::wait_for_confirmation`] before any
/// of its effects are read back.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    fn token_address(&self) -> Address;
    fn staking_address(&self) -> Address;

    // Token
    async fn token_name(&self) -> Result<String, RemoteCallError>;
    async fn token_symbol(&self) -> Result<String, RemoteCallError>;
    async fn token_decimals(&self) -> Result<u8, RemoteCallError>;
    async fn balance_of(&self, owner: Address) -> Result<U256, RemoteCallError>;
    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, RemoteCallError>;
    async fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> Result<PendingTransaction, RemoteCallError>;

    // Staking pool
    async fn staking_token(&self) -> Result<Address, RemoteCallError>;
    async fn owner(&self) -> Result<Address, RemoteCallError>;
    async fn reward_rate(&self, term: LockTerm) -> Result<U256, RemoteCallError>;
    async fn stake(&self, amount: U256, term: LockTerm)
        -> Result<PendingTransaction, RemoteCallError>;
    async fn withdraw(&self, index: u64) -> Result<PendingTransaction, RemoteCallError>;
    async fn deposit_reward(&self, amount: U256) -> Result<PendingTransaction, RemoteCallError>;
    async fn stake_count(&self, user: Address) -> Result<u64, RemoteCallError>;
    async fn get_stake(&self, user: Address, index: u64) -> Result<RawStake, RemoteCallError>;

    /// Block until the transaction is final. A reverted transaction is an
    /// error even though it was mined.
    async fn wait_for_confirmation(
        &self,
        pending: &PendingTransaction,
    ) -> Result<Confirmation, RemoteCallError>;
}

/// [`ContractGateway`] over JSON-RPC: `eth_call` for reads, the session
/// signer for writes, receipt polling for finality.
pub struct RpcGateway {
    rpc: Arc<RpcClient>,
    signer: Arc<dyn Signer>,
    token: Address,
    staking: Address,
    poll_interval: Duration,
}

impl RpcGateway {
    pub fn new(
        rpc: Arc<RpcClient>,
        signer: Arc<dyn Signer>,
        token: Address,
        staking: Address,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rpc,
            signer,
            token,
            staking,
            poll_interval,
        }
    }

    async fn read<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, RemoteCallError> {
        let name = abi::call_name::<C>();
        let data = self
            .rpc
            .eth_call(to, &call.abi_encode())
            .await
            .map_err(|e| e.into_remote(name))?;
        abi::decode_returns::<C>(&data)
            .map_err(|e| RemoteCallError::new(name, format!("malformed return data: {e}")))
    }

    async fn submit<C: SolCall>(&self, to: Address, call: C) -> Result<PendingTransaction, RemoteCallError> {
        let call_name = abi::call_name::<C>();
        let hash = self
            .signer
            .send_transaction(to, call.abi_encode())
            .await
            .map_err(|e| RemoteCallError::new(call_name, e.reason))?;
        tracing::info!(call = call_name, tx_hash = %hash, "Transaction submitted");
        Ok(PendingTransaction {
            call: call_name,
            hash,
        })
    }
}

#[async_trait]
impl ContractGateway for RpcGateway {
    fn token_address(&self) -> Address {
        self.token
    }

    fn staking_address(&self) -> Address {
        self.staking
    }

    async fn token_name(&self) -> Result<String, RemoteCallError> {
        Ok(self.read(self.token, IERC20::nameCall {}).await?._0)
    }

    async fn token_symbol(&self) -> Result<String, RemoteCallError> {
        Ok(self.read(self.token, IERC20::symbolCall {}).await?._0)
    }

    async fn token_decimals(&self) -> Result<u8, RemoteCallError> {
        Ok(self.read(self.token, IERC20::decimalsCall {}).await?._0)
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, RemoteCallError> {
        let call = IERC20::balanceOfCall {
            owner: owner.into(),
        };
        Ok(self.read(self.token, call).await?._0)
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, RemoteCallError> {
        let call = IERC20::allowanceCall {
            owner: owner.into(),
            spender: spender.into(),
        };
        Ok(self.read(self.token, call).await?._0)
    }

    async fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> Result<PendingTransaction, RemoteCallError> {
        let call = IERC20::approveCall {
            spender: spender.into(),
            amount,
        };
        self.submit(self.token, call).await
    }

    async fn staking_token(&self) -> Result<Address, RemoteCallError> {
        let ret = self.read(self.staking, IStakingPool::tokenCall {}).await?;
        Ok(ret._0.into())
    }

    async fn owner(&self) -> Result<Address, RemoteCallError> {
        let ret = self.read(self.staking, IStakingPool::ownerCall {}).await?;
        Ok(ret._0.into())
    }

    async fn reward_rate(&self, term: LockTerm) -> Result<U256, RemoteCallError> {
        let call = IStakingPool::rewardRatesCall {
            lockType: term.wire(),
        };
        Ok(self.read(self.staking, call).await?._0)
    }

    async fn stake(
        &self,
        amount: U256,
        term: LockTerm,
    ) -> Result<PendingTransaction, RemoteCallError> {
        let call = IStakingPool::stakeCall {
            amount,
            lockType: term.wire(),
        };
        self.submit(self.staking, call).await
    }

    async fn withdraw(&self, index: u64) -> Result<PendingTransaction, RemoteCallError> {
        let call = IStakingPool::withdrawCall {
            index: U256::from(index),
        };
        self.submit(self.staking, call).await
    }

    async fn deposit_reward(&self, amount: U256) -> Result<PendingTransaction, RemoteCallError> {
        self.submit(self.staking, IStakingPool::depositRewardCall { amount })
            .await
    }

    async fn stake_count(&self, user: Address) -> Result<u64, RemoteCallError> {
        let call = IStakingPool::getStakeCountCall { user: user.into() };
        let count = self.read(self.staking, call).await?._0;
        abi::narrow_u64(count, "stake count")
            .map_err(|e| RemoteCallError::new("getStakeCount", format!("malformed return data: {e}")))
    }

    async fn get_stake(&self, user: Address, index: u64) -> Result<RawStake, RemoteCallError> {
        let call = IStakingPool::getStakeCall {
            user: user.into(),
            index: U256::from(index),
        };
        let ret = self.read(self.staking, call).await?;
        RawStake::try_from(ret)
            .map_err(|e| RemoteCallError::new("getStake", format!("malformed return data: {e}")))
    }

    async fn wait_for_confirmation(
        &self,
        pending: &PendingTransaction,
    ) -> Result<Confirmation, RemoteCallError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let receipt = self
                .rpc
                .transaction_receipt(&pending.hash)
                .await
                .map_err(|e| e.into_remote(pending.call))?;

            let Some(receipt) = receipt else {
                tracing::debug!(tx_hash = %pending.hash, "Transaction still pending");
                continue;
            };

            if !receipt.succeeded() {
                return Err(RemoteCallError::new(
                    pending.call,
                    format!("transaction {} reverted", pending.hash),
                ));
            }

            let confirmation = Confirmation {
                tx_hash: receipt.transaction_hash.clone(),
                block_number: receipt.block(),
            };
            tracing::info!(
                call = pending.call,
                tx_hash = %confirmation.tx_hash,
                block = ?confirmation.block_number,
                "Transaction confirmed"
            );
            return Ok(confirmation);
        }
    }
}
