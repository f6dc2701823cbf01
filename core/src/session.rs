use crate::address::Address;
use crate::errors::{ConfigurationError, StakingError};
use crate::gateway::ContractGateway;
use crate::wallet::Signer;

/// The logged-in identity: the signing address and its admin flag.
///
/// `is_admin` is decided once at login and never re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    address: Address,
    is_admin: bool,
}

impl Session {
    pub fn new(address: Address, is_admin: bool) -> Self {
        Self { address, is_admin }
    }

    /// Log in: read the pool's owner and bound token, derive the admin flag,
    /// and refuse a pool that is wired to a different token than configured.
    pub async fn establish(
        signer: &dyn Signer,
        gateway: &dyn ContractGateway,
    ) -> Result<Self, StakingError> {
        let (owner, pool_token) = tokio::try_join!(gateway.owner(), gateway.staking_token())?;

        let configured = gateway.token_address();
        if pool_token != configured {
            return Err(ConfigurationError::TokenMismatch {
                configured: configured.to_string(),
                actual: pool_token.to_string(),
            }
            .into());
        }

        let address = signer.address();
        let is_admin = address == owner;
        tracing::info!(%address, %owner, is_admin, "Session established");
        Ok(Self::new(address, is_admin))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, FakeSigner, ADMIN, USER};

    #[tokio::test]
    async fn test_owner_session_is_admin() {
        let gateway = FakeGateway::new();
        let session = Session::establish(&*FakeSigner::arc(ADMIN), &gateway)
            .await
            .unwrap();
        assert!(session.is_admin());
        assert_eq!(session.address(), ADMIN);
    }

    #[tokio::test]
    async fn test_other_session_is_not_admin() {
        let gateway = FakeGateway::new();
        let session = Session::establish(&*FakeSigner::arc(USER), &gateway)
            .await
            .unwrap();
        assert!(!session.is_admin());
    }

    #[tokio::test]
    async fn test_pool_bound_to_other_token_is_refused() {
        let gateway = FakeGateway::new();
        gateway.state().pool_token = USER;
        let err = Session::establish(&*FakeSigner::arc(USER), &gateway)
            .await
            .unwrap_err();
        match err {
            StakingError::Configuration(e) => assert_eq!(e.key(), Some("token_contract")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }
}
