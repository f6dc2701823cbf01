use crate::address::Address;
use crate::errors::RemoteCallError;
use crate::rpc::{RpcClient, TxHash};
use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A signing capability bound to one address.
///
/// The orchestrator never sees keys: it hands over calldata and gets back a
/// transaction hash it can wait on.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    async fn send_transaction(&self, to: Address, data: Vec<u8>) -> Result<TxHash, RemoteCallError>;
}

/// Source of accounts and signers (a browser wallet, a node, a keystore).
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteCallError>;

    async fn get_signer(&self) -> Result<Arc<dyn Signer>, RemoteCallError>;
}

/// Wallet backed by accounts the JSON-RPC node manages and unlocks itself,
/// e.g. a local development node.
pub struct NodeWallet {
    rpc: Arc<RpcClient>,
    account_index: usize,
}

impl NodeWallet {
    pub fn new(rpc: Arc<RpcClient>, account_index: usize) -> Self {
        Self { rpc, account_index }
    }
}

#[async_trait]
impl WalletProvider for NodeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteCallError> {
        match self.rpc.accounts(true).await {
            Ok(accounts) => Ok(accounts),
            Err(e) if e.is_method_not_found() => {
                tracing::debug!("eth_requestAccounts unsupported, falling back to eth_accounts");
                self.rpc
                    .accounts(false)
                    .await
                    .map_err(|e| e.into_remote("eth_accounts"))
            }
            Err(e) => Err(e.into_remote("eth_requestAccounts")),
        }
    }

    async fn get_signer(&self) -> Result<Arc<dyn Signer>, RemoteCallError> {
        let accounts = self.request_accounts().await?;
        let address = accounts.get(self.account_index).copied().ok_or_else(|| {
            RemoteCallError::new(
                "eth_requestAccounts",
                format!(
                    "wallet exposed {} account(s), account index {} is out of range",
                    accounts.len(),
                    self.account_index
                ),
            )
        })?;
        tracing::info!(%address, "Wallet account selected");
        Ok(Arc::new(NodeSigner {
            rpc: Arc::clone(&self.rpc),
            address,
        }))
    }
}

/// Sends transactions with `eth_sendTransaction` from a node-managed account.
pub struct NodeSigner {
    rpc: Arc<RpcClient>,
    address: Address,
}

#[async_trait]
impl Signer for NodeSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, to: Address, data: Vec<u8>) -> Result<TxHash, RemoteCallError> {
        self.rpc
            .send_transaction(self.address, to, &data)
            .await
            .map_err(|e| e.into_remote("eth_sendTransaction"))
    }
}

/// A secp256k1 private key read from configuration.
///
/// Accepts 64 hex characters with or without a `0x` prefix. Debug output
/// shows only the derived address.
#[derive(Clone)]
pub struct LocalKey(PrivateKeySigner);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidLocalKey;

impl LocalKey {
    pub fn address(&self) -> Address {
        self.0.address().into()
    }
}

impl FromStr for LocalKey {
    type Err = InvalidLocalKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|_| InvalidLocalKey)?;
        if bytes.len() != 32 {
            return Err(InvalidLocalKey);
        }
        PrivateKeySigner::from_slice(&bytes)
            .map(Self)
            .map_err(|_| InvalidLocalKey)
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalKey").field(&self.address()).finish()
    }
}

/// Wallet holding its own key. Transactions are signed locally and
/// broadcast with `eth_sendRawTransaction`.
pub struct LocalKeyWallet {
    rpc: Arc<RpcClient>,
    key: LocalKey,
}

impl LocalKeyWallet {
    pub fn new(rpc: Arc<RpcClient>, key: LocalKey) -> Self {
        Self { rpc, key }
    }
}

#[async_trait]
impl WalletProvider for LocalKeyWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteCallError> {
        Ok(vec![self.key.address()])
    }

    async fn get_signer(&self) -> Result<Arc<dyn Signer>, RemoteCallError> {
        let chain_id = self
            .rpc
            .chain_id()
            .await
            .map_err(|e| e.into_remote("eth_chainId"))?;
        let address = self.key.address();
        tracing::info!(%address, chain_id, "Local key loaded");
        Ok(Arc::new(LocalKeySigner {
            rpc: Arc::clone(&self.rpc),
            key: self.key.0.clone(),
            address,
            chain_id,
        }))
    }
}

/// Signs EIP-155 legacy transactions for one chain.
pub struct LocalKeySigner {
    rpc: Arc<RpcClient>,
    key: PrivateKeySigner,
    address: Address,
    chain_id: u64,
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, to: Address, data: Vec<u8>) -> Result<TxHash, RemoteCallError> {
        let (nonce, gas_price, gas_limit) = tokio::try_join!(
            self.rpc.transaction_count(self.address),
            self.rpc.gas_price(),
            self.rpc.estimate_gas(self.address, to, &data),
        )
        .map_err(|e| e.into_remote("eth_sendRawTransaction"))?;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: gas_price.into(),
            gas_limit,
            to: TxKind::Call(to.into()),
            value: U256::ZERO,
            input: data.into(),
        };
        let signature = self
            .key
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| RemoteCallError::new("eth_sendRawTransaction", e))?;
        let raw = TxEnvelope::from(tx.into_signed(signature)).encoded_2718();

        tracing::debug!(nonce, gas_limit, "Broadcasting signed transaction");
        self.rpc
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| e.into_remote("eth_sendRawTransaction"))
    }
}
