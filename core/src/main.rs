use staking_client_core::config::{load_config, ClientConfig};
use staking_client_core::rpc::RpcClient;
use staking_client_core::rpc_provider::EndpointRegistry;
use staking_client_core::server;
use staking_client_core::wallet::{LocalKeyWallet, NodeWallet, WalletProvider};
use staking_client_core::{
    LockTerm, OperationOutcome, Orchestrator, RpcGateway, Session, StakingError, TokenAmount,
    ViewState,
};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: staking-client-core [status | approve | stake <amount> <flexible|one-month|one-year> | withdraw <index> | deposit-reward <amount> | serve]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Approve,
    Stake { amount: String, term: LockTerm },
    Withdraw(u64),
    DepositReward(String),
    Serve,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            [] | ["serve"] => Ok(Self::Serve),
            ["status"] => Ok(Self::Status),
            ["approve"] => Ok(Self::Approve),
            ["stake", amount, term] => Ok(Self::Stake {
                amount: amount.to_string(),
                term: term.parse()?,
            }),
            ["withdraw", index] => index
                .parse()
                .map(Self::Withdraw)
                .map_err(|_| format!("`{index}` is not a stake index")),
            ["deposit-reward", amount] => Ok(Self::DepositReward(amount.to_string())),
            _ => Err(USAGE.to_string()),
        }
    }
}

async fn connect(config: &ClientConfig) -> Result<Orchestrator, StakingError> {
    let registry = EndpointRegistry::new(config.rpc_endpoints.clone());
    registry.spawn_health_checks(config.health_check_interval);
    let rpc = Arc::new(RpcClient::new(registry, config.request_timeout));

    let wallet: Box<dyn WalletProvider> = match &config.private_key {
        Some(key) => Box::new(LocalKeyWallet::new(Arc::clone(&rpc), key.clone())),
        None => Box::new(NodeWallet::new(Arc::clone(&rpc), config.account_index)),
    };
    let signer = wallet.get_signer().await?;

    let gateway = Arc::new(RpcGateway::new(
        rpc,
        Arc::clone(&signer),
        config.token_contract,
        config.staking_contract,
        config.poll_interval,
    ));
    let session = Session::establish(signer.as_ref(), gateway.as_ref()).await?;

    Ok(Orchestrator::new(gateway, session).with_confirmation_timeout(config.confirmation_timeout))
}

fn amount_text(amount: Option<TokenAmount>, state: &ViewState) -> String {
    let symbol = state.token.as_ref().map_or("", |t| t.symbol.as_str());
    match amount {
        Some(amount) => format!("{amount} {symbol}").trim_end().to_string(),
        None => "-".to_string(),
    }
}

fn print_status(orchestrator: &Orchestrator) {
    let state = orchestrator.snapshot();
    let session = orchestrator.session();
    let now = orchestrator.now();

    let role = if session.is_admin() { " (owner)" } else { "" };
    println!("Account   {}{role}", session.address());
    if let Some(token) = &state.token {
        println!("Token     {} ({}), {} decimals", token.name, token.symbol, token.decimals);
    }
    println!("Balance   {}", amount_text(state.balance, &state));
    println!(
        "Approved  {} ({})",
        if state.is_approved() { "yes" } else { "no" },
        amount_text(state.allowance, &state)
    );
    if let Some(rates) = &state.reward_rates {
        let rates: Vec<String> = LockTerm::ALL
            .iter()
            .map(|term| format!("{} {}%", term.label(), rates.get(*term)))
            .collect();
        println!("Rates     {}", rates.join(" | "));
    }

    if state.stakes.is_empty() {
        println!("No stakes");
        return;
    }
    println!("Stakes");
    for record in &state.stakes {
        let remaining = match record.remaining(now) {
            Some(remaining) => remaining.to_string(),
            None if record.is_withdrawable(now) => "withdrawable".to_string(),
            None => String::new(),
        };
        println!(
            "  #{:<3} {:>16}  {:<8}  {:<9}  reward {}  {}",
            record.index,
            amount_text(Some(record.principal), &state),
            record.lock_term.label(),
            record.status_label(),
            amount_text(Some(record.current_reward), &state),
            remaining
        );
    }
}

fn print_outcome(outcome: &OperationOutcome) {
    match outcome.block_number {
        Some(block) => println!("{} confirmed: {} (block {block})", outcome.operation, outcome.tx_hash),
        None => println!("{} confirmed: {}", outcome.operation, outcome.tx_hash),
    }
}

async fn run(orchestrator: &Orchestrator, command: Command) -> Result<(), StakingError> {
    let outcome = match command {
        Command::Status | Command::Serve => None,
        Command::Approve => Some(orchestrator.approve().await?),
        Command::Stake { amount, term } => Some(orchestrator.stake(&amount, term).await?),
        Command::Withdraw(index) => Some(orchestrator.withdraw(index).await?),
        Command::DepositReward(amount) => Some(orchestrator.deposit_reward(&amount).await?),
    };
    if let Some(outcome) = &outcome {
        print_outcome(outcome);
    }
    print_status(orchestrator);
    Ok(())
}

async fn serve(orchestrator: Arc<Orchestrator>, port: u16) {
    let app = server::router(orchestrator);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on http://{}", bind_addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

#[tokio::main]
async fn main() -> ExitCode {
    // -------------------------------
    // Initialize Tracing / Logging
    // -------------------------------
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    // -------------------------------
    // Load configuration
    // -------------------------------
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(key = ?e.key(), "Refusing to start: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        token = %config.token_contract,
        staking = %config.staking_contract,
        endpoints = config.rpc_endpoints.len(),
        "Staking client starting"
    );

    // -------------------------------
    // Login
    // -------------------------------
    let orchestrator = match connect(&config).await {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            tracing::error!(error = %e, "Login failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = orchestrator.refresh_all().await {
        tracing::error!(error = %e, "Initial refresh failed");
        if command != Command::Serve {
            return ExitCode::FAILURE;
        }
    }

    match command {
        Command::Serve => {
            serve(orchestrator, config.server_port).await;
            ExitCode::SUCCESS
        }
        command => match run(&orchestrator, command).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, kind = e.error_type(), "Operation failed");
                ExitCode::FAILURE
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Command::parse(&args)
    }

    #[test]
    fn test_default_is_serve() {
        assert_eq!(parse(&[]), Ok(Command::Serve));
        assert_eq!(parse(&["serve"]), Ok(Command::Serve));
    }

    #[test]
    fn test_parse_operations() {
        assert_eq!(
            parse(&["stake", "12.5", "one-year"]),
            Ok(Command::Stake {
                amount: "12.5".to_string(),
                term: LockTerm::OneYear
            })
        );
        assert_eq!(parse(&["withdraw", "3"]), Ok(Command::Withdraw(3)));
        assert_eq!(
            parse(&["deposit-reward", "100"]),
            Ok(Command::DepositReward("100".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["withdraw", "x"]).unwrap_err().contains("not a stake index"));
        assert!(parse(&["stake", "1", "forever"]).unwrap_err().contains("unknown lock term"));
        assert_eq!(parse(&["unstake"]), Err(USAGE.to_string()));
    }
}
