//! Local HTTP API for the presentation layer.

use crate::amount::format_units;
use crate::errors::StakingError;
use crate::orchestrator::{staked_total, Operation, OperationOutcome, Orchestrator, Phase};
use crate::store::{LockTerm, StakeRecord, ViewState};
use axum::{
    extract::{Json, Path},
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

// ── Request / response bodies ─────────────────────────────────────────────────

#[derive(Deserialize, ToSchema)]
pub struct StakeRequest {
    /// Decimal token amount.
    #[schema(example = "250.5")]
    pub amount: String,
    /// 0 = flexible, 1 = one month, 2 = one year.
    #[schema(example = 1)]
    pub lock_term: u8,
}

#[derive(Deserialize, ToSchema)]
pub struct DepositRewardRequest {
    #[schema(example = "1000")]
    pub amount: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenView {
    #[schema(example = "Stake Token")]
    pub name: String,
    #[schema(example = "STK")]
    pub symbol: String,
    #[schema(example = 18)]
    pub decimals: u8,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RewardRateView {
    #[schema(example = 1)]
    pub lock_term: u8,
    #[schema(example = "1 Month")]
    pub label: String,
    /// Percentage as reported by the staking pool.
    #[schema(example = "8")]
    pub rate: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StakeView {
    pub index: u64,
    #[schema(example = "250.5")]
    pub principal: String,
    #[schema(example = "1.25")]
    pub current_reward: String,
    #[schema(example = 1)]
    pub lock_term: u8,
    #[schema(example = "1 Month")]
    pub lock_label: String,
    pub start_time: u64,
    /// Absent for flexible stakes.
    pub unlock_time: Option<u64>,
    pub claimed: bool,
    #[schema(example = "Active")]
    pub status: String,
    pub withdrawable: bool,
    #[schema(example = "29 day(s) remaining")]
    pub remaining: Option<String>,
}

impl StakeView {
    fn new(record: &StakeRecord, now: u64) -> Self {
        Self {
            index: record.index,
            principal: record.principal.to_string(),
            current_reward: record.current_reward.to_string(),
            lock_term: record.lock_term.wire(),
            lock_label: record.lock_term.label().to_string(),
            start_time: record.start_time,
            unlock_time: (record.lock_term != LockTerm::Flexible).then_some(record.unlock_time),
            claimed: record.claimed,
            status: record.status_label().to_string(),
            withdrawable: record.is_withdrawable(now),
            remaining: record.remaining(now).map(|r| r.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StateResponse {
    #[schema(example = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266")]
    pub address: String,
    pub is_admin: bool,
    /// `idle` or the name of the operation in flight.
    #[schema(example = "idle")]
    pub phase: String,
    pub token: Option<TokenView>,
    #[schema(example = "1000")]
    pub balance: Option<String>,
    #[schema(example = "1000000")]
    pub allowance: Option<String>,
    pub approved: bool,
    pub reward_rates: Vec<RewardRateView>,
    #[schema(example = "250.5")]
    pub total_staked: Option<String>,
    pub stakes: Vec<StakeView>,
}

impl StateResponse {
    fn new(orchestrator: &Orchestrator, state: &ViewState) -> Self {
        let now = orchestrator.now();
        let session = orchestrator.session();
        let phase = match orchestrator.phase() {
            Phase::Idle => "idle".to_string(),
            Phase::InFlight(operation) => operation.to_string(),
        };
        let reward_rates = state
            .reward_rates
            .map(|rates| {
                LockTerm::ALL
                    .iter()
                    .map(|term| RewardRateView {
                        lock_term: term.wire(),
                        label: term.label().to_string(),
                        rate: rates.get(*term).to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            address: session.address().to_string(),
            is_admin: session.is_admin(),
            phase,
            token: state.token.as_ref().map(|t| TokenView {
                name: t.name.clone(),
                symbol: t.symbol.clone(),
                decimals: t.decimals,
            }),
            balance: state.balance.map(|b| b.to_string()),
            allowance: state.allowance.map(|a| a.to_string()),
            approved: state.is_approved(),
            reward_rates,
            total_staked: state
                .decimals()
                .map(|d| format_units(staked_total(&state.stakes), d)),
            stakes: state.stakes.iter().map(|s| StakeView::new(s, now)).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OperationResponse {
    #[schema(example = "stake")]
    pub operation: String,
    #[schema(example = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060")]
    pub tx_hash: String,
    pub block_number: Option<u64>,
    #[schema(example = "Staking successful")]
    pub message: String,
    pub state: StateResponse,
}

fn success_message(operation: Operation) -> &'static str {
    match operation {
        Operation::Approve => "Approval successful",
        Operation::Stake => "Staking successful",
        Operation::Withdraw => "Withdrawal successful",
        Operation::DepositReward => "Reward deposit successful",
        Operation::Refresh => "State refreshed",
        Operation::LoadStakes => "Stakes reloaded",
    }
}

fn operation_response(orchestrator: &Orchestrator, outcome: OperationOutcome) -> OperationResponse {
    OperationResponse {
        operation: outcome.operation.to_string(),
        tx_hash: outcome.tx_hash.to_string(),
        block_number: outcome.block_number,
        message: success_message(outcome.operation).to_string(),
        state: StateResponse::new(orchestrator, &orchestrator.snapshot()),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "OK"
}

#[utoipa::path(
    get,
    path = "/state",
    responses((status = 200, description = "Current snapshot", body = StateResponse)),
    tag = "State"
)]
pub async fn get_state(Extension(orch): Extension<Arc<Orchestrator>>) -> Json<StateResponse> {
    Json(StateResponse::new(&orch, &orch.snapshot()))
}

#[utoipa::path(
    post,
    path = "/refresh",
    responses(
        (status = 200, description = "All state re-read from the chain", body = StateResponse),
        (status = 502, description = "A read failed; previous state retained")
    ),
    tag = "State"
)]
pub async fn refresh(
    Extension(orch): Extension<Arc<Orchestrator>>,
) -> Result<Json<StateResponse>, StakingError> {
    let state = orch.refresh_all().await?;
    Ok(Json(StateResponse::new(&orch, &state)))
}

#[utoipa::path(
    post,
    path = "/stakes/reload",
    responses(
        (status = 200, description = "Stake records re-read", body = StateResponse),
        (status = 502, description = "A read failed; previous state retained")
    ),
    tag = "State"
)]
pub async fn reload_stakes(
    Extension(orch): Extension<Arc<Orchestrator>>,
) -> Result<Json<StateResponse>, StakingError> {
    orch.load_stakes().await?;
    Ok(Json(StateResponse::new(&orch, &orch.snapshot())))
}

#[utoipa::path(
    post,
    path = "/approve",
    responses(
        (status = 200, description = "Staking pool approved", body = OperationResponse),
        (status = 409, description = "Another operation is in flight"),
        (status = 502, description = "Transaction failed"),
        (status = 504, description = "Confirmation timed out")
    ),
    tag = "Operations"
)]
pub async fn approve(
    Extension(orch): Extension<Arc<Orchestrator>>,
) -> Result<Json<OperationResponse>, StakingError> {
    let outcome = orch.approve().await?;
    Ok(Json(operation_response(&orch, outcome)))
}

#[utoipa::path(
    post,
    path = "/stake",
    request_body = StakeRequest,
    responses(
        (status = 200, description = "Stake confirmed", body = OperationResponse),
        (status = 400, description = "Invalid amount, lock term, or missing approval"),
        (status = 409, description = "Another operation is in flight"),
        (status = 502, description = "Transaction failed"),
        (status = 504, description = "Confirmation timed out")
    ),
    tag = "Operations"
)]
pub async fn stake(
    Extension(orch): Extension<Arc<Orchestrator>>,
    Json(payload): Json<StakeRequest>,
) -> Result<Json<OperationResponse>, StakingError> {
    let term = LockTerm::try_from(payload.lock_term)?;
    let outcome = orch.stake(&payload.amount, term).await?;
    Ok(Json(operation_response(&orch, outcome)))
}

#[utoipa::path(
    post,
    path = "/withdraw/{index}",
    params(("index" = u64, Path, description = "Stake record index")),
    responses(
        (status = 200, description = "Withdrawal confirmed", body = OperationResponse),
        (status = 400, description = "Unknown, claimed or still locked stake"),
        (status = 409, description = "Another operation is in flight"),
        (status = 502, description = "Transaction failed"),
        (status = 504, description = "Confirmation timed out")
    ),
    tag = "Operations"
)]
pub async fn withdraw(
    Extension(orch): Extension<Arc<Orchestrator>>,
    Path(index): Path<u64>,
) -> Result<Json<OperationResponse>, StakingError> {
    let outcome = orch.withdraw(index).await?;
    Ok(Json(operation_response(&orch, outcome)))
}

#[utoipa::path(
    post,
    path = "/deposit-reward",
    request_body = DepositRewardRequest,
    responses(
        (status = 200, description = "Reward deposit confirmed", body = OperationResponse),
        (status = 400, description = "Not the owner, not approved, or invalid amount"),
        (status = 409, description = "Another operation is in flight"),
        (status = 502, description = "Transaction failed"),
        (status = 504, description = "Confirmation timed out")
    ),
    tag = "Operations"
)]
pub async fn deposit_reward(
    Extension(orch): Extension<Arc<Orchestrator>>,
    Json(payload): Json<DepositRewardRequest>,
) -> Result<Json<OperationResponse>, StakingError> {
    let outcome = orch.deposit_reward(&payload.amount).await?;
    Ok(Json(operation_response(&orch, outcome)))
}

#[derive(OpenApi)]
#[openapi(
    paths(get_state, refresh, reload_stakes, approve, stake, withdraw, deposit_reward),
    components(schemas(
        StakeRequest, DepositRewardRequest,
        StateResponse, TokenView, RewardRateView, StakeView, OperationResponse
    )),
    tags(
        (name = "State", description = "Snapshot of token, balances and stake records"),
        (name = "Operations", description = "Approve, stake, withdraw and reward deposit")
    ),
    info(
        title = "Staking Client API",
        version = "0.1.0",
        description = "Local API over a fixed-rate token staking pool"
    )
)]
pub struct ApiDoc;

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/state", get(get_state))
        .route("/refresh", post(refresh))
        .route("/stakes/reload", post(reload_stakes))
        .route("/approve", post(approve))
        .route("/stake", post(stake))
        .route("/withdraw/:index", post(withdraw))
        .route("/deposit-reward", post(deposit_reward))
        .layer(Extension(orchestrator))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
