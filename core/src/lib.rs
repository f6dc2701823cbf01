//! Client for a fixed-rate token staking pool.
//!
//! The [`Orchestrator`] is the entry point: it owns the session, keeps a
//! [`ViewState`] snapshot of the token and staking contracts, and runs the
//! approve / stake / withdraw / deposit-reward operations against a
//! [`ContractGateway`].

pub mod abi;
pub mod address;
pub mod amount;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod orchestrator;
pub mod rpc;
pub mod rpc_provider;
pub mod server;
pub mod session;
pub mod store;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use address::Address;
pub use amount::{TokenAmount, U256};
pub use errors::{ConfigurationError, RemoteCallError, StakingError, ValidationError};
pub use gateway::{ContractGateway, RpcGateway};
pub use orchestrator::{Operation, OperationOutcome, Orchestrator, Phase};
pub use session::Session;
pub use store::{LockTerm, StakeRecord, ViewState};
