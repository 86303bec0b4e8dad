use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod chat;
mod cli;
mod config;
mod db;
mod handlers;
mod metrics;
mod models;
mod repository;
#[cfg(test)]
mod test_helpers;

use crate::chat::ConnectionRegistry;
use crate::config::{CampusConfig, FileConfig, ServerConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "campus-chat")]
#[command(about = "Real-time chat server for the campus marketplace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.campus_chat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground
    Server(ServerArgs),

    /// Chat with another user from the terminal
    Chat(ChatArgs),

    /// Print the conversation between two users
    History(HistoryArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Your user id
    user: String,

    /// User id to send messages to
    peer: String,

    /// Server base URL
    #[arg(long, default_value = cli::DEFAULT_SERVER_URL)]
    url: String,
}

#[derive(Parser)]
struct HistoryArgs {
    user1: String,
    user2: String,

    /// Server base URL
    #[arg(long, default_value = cli::DEFAULT_SERVER_URL)]
    url: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Server runtime configuration
    pub server_config: Arc<ServerConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<ChatRepository>,
    /// Live chat channels keyed by user id
    pub registry: Arc<ConnectionRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let config = CampusConfig::new(cli.data_dir)?;
            run_server(args, config).await
        }
        Commands::Chat(args) => cli::chat_command(&args.url, &args.user, &args.peer).await,
        Commands::History(args) => {
            cli::history_command(&args.url, &args.user1, &args.user2).await
        }
    }
}

async fn run_server(args: ServerArgs, config: CampusConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "campus_chat=debug,tower_http=debug,info"
    } else {
        "campus_chat=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting campus chat server");

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all stored chat messages and users!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    info!("Config file: {}", config.config_toml_path().display());
    let mut file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Failed to load configuration")?;
    if let Some(host) = args.host {
        file_config.server.host = host;
    }
    if let Some(port) = args.port {
        file_config.server.port = port;
    }
    let server_config = Arc::new(ServerConfig::from_file(&file_config));
    info!(
        "Server config: send_queue_capacity={}, db_max_connections={}",
        server_config.chat.send_queue_capacity, server_config.db_max_connections
    );

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config, &server_config).await?);
    let repository = Arc::new(ChatRepository::new(db.pool.clone()));

    let app_state = AppState {
        server_config: server_config.clone(),
        metrics: Arc::new(ServerMetrics::new()),
        db: db.clone(),
        repository,
        registry: Arc::new(ConnectionRegistry::new()),
    };

    let registry_for_shutdown = app_state.registry.clone();
    let app = app_router(app_state);

    let addr = server_config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Campus chat listening on http://{}", actual_addr);
    info!("");
    info!("Endpoints:");
    info!("  GET    /ws/:user_id          - Chat channel for a user");
    info!("  GET    /api/chat/history     - Conversation between user1 and user2");
    info!("  GET    /api/chat/online      - Users with an open channel");
    info!("  GET    /api/users/:id        - User directory entry");
    info!("  GET    /health               - Service health");

    // Create shutdown signal handler
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let shutdown_signal = close_channels_on(ctrl_c, registry_for_shutdown);

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Closing database...");
    db.pool.close().await;

    info!("Shutdown complete");
    server_result
}

/// Wait for `signal`, then cancel every open chat channel so graceful
/// shutdown is not held open by live sockets.
async fn close_channels_on<F>(signal: F, registry: Arc<ConnectionRegistry>)
where
    F: std::future::Future<Output = ()>,
{
    signal.await;
    info!("Received shutdown signal, cleaning up...");
    let closed = registry.close_all().await;
    info!("Closed {} chat channels", closed);
}

/// All HTTP and WebSocket routes, with tracing and CORS layers applied.
pub(crate) fn app_router(state: AppState) -> Router {
    Router::new()
        // Chat
        .route("/ws/{user_id}", get(handlers::chat_websocket_handler))
        .route("/api/chat/history", get(handlers::chat_history_handler))
        .route(
            "/api/chat/messages/{id}",
            get(handlers::get_chat_message_handler),
        )
        .route("/api/chat/online", get(handlers::online_users_handler))
        .route(
            "/api/chat/online/{user_id}",
            get(handlers::user_presence_handler),
        )
        // User directory
        .route(
            "/api/users/{id}",
            get(handlers::get_user_handler).put(handlers::put_user_handler),
        )
        // Admin endpoints
        .route("/api/admin/stats", get(handlers::get_database_stats))
        .route("/api/admin/clear", post(handlers::clear_all_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
