use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod cli;
mod config;
mod db;
mod handlers;
mod metrics;
mod models;
mod repository;
mod store;
mod sweeper;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::AuthState;
use crate::config::{
    AuthConfig, ChatterConfig, FanoutConfig, FileConfig, HistoryConfig, Profile,
};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;
use crate::store::MessageStore;
use crate::ws::{GlobalMode, RoomMode, TenantMode};

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
#[command(name = "chatter")]
#[command(about = "Multi-tenant WebSocket chat fan-out server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.chatter)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground
    Server(ServerArgs),

    /// Open a chat endpoint and relay stdin/stdout
    Connect(ConnectArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port for the web server (overrides config; 0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Configuration preset
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[derive(Parser)]
struct ConnectArgs {
    /// Which endpoint to open
    #[arg(value_enum)]
    endpoint: cli::connect::ChatEndpoint,

    /// Server base URL (default: ws://<configured host>:<configured port>)
    #[arg(long)]
    url: Option<String>,

    /// User to present in the identity header (servers behind an auth proxy)
    #[arg(long = "as")]
    user: Option<String>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Identity configuration
    pub auth_config: Arc<AuthConfig>,
    pub fanout_config: Arc<FanoutConfig>,
    pub history_config: Arc<HistoryConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<ChatRepository>,
    pub tenant: Arc<TenantMode>,
    pub room: Arc<RoomMode>,
    pub global: Arc<GlobalMode>,
}

impl AppState {
    pub(crate) fn new(file_config: &FileConfig, db: Arc<Database>) -> Self {
        let metrics = Arc::new(ServerMetrics::new());
        let fanout_config = FanoutConfig::from_file(&file_config.fanout);
        let repository = Arc::new(ChatRepository::new(db.pool.clone()));
        let store: Arc<dyn MessageStore> = repository.clone();
        let capacity = fanout_config.topic_capacity;

        Self {
            auth_config: Arc::new(AuthConfig::from_file(&file_config.auth)),
            history_config: Arc::new(HistoryConfig::from_file(&file_config.history)),
            tenant: Arc::new(TenantMode::new(store.clone(), metrics.clone(), capacity)),
            room: Arc::new(RoomMode::new(store, metrics.clone(), capacity)),
            global: Arc::new(GlobalMode::new(metrics.clone(), capacity)),
            fanout_config: Arc::new(fanout_config),
            metrics,
            db,
            repository,
        }
    }
}

/// All routes, with auth and tracing layers applied.
pub(crate) fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        // Chat endpoints
        .route("/chat", get(handlers::tenant_websocket_handler))
        .route("/room", get(handlers::room_websocket_handler))
        .route("/global", get(handlers::global_websocket_handler))
        // Stored history
        .route(
            "/api/companies/{code}/messages",
            get(handlers::company_history_handler),
        )
        .route(
            "/api/rooms/{id}/messages",
            get(handlers::room_history_handler),
        )
        // Observability
        .route("/api/topics", get(handlers::list_topics_handler))
        .route("/api/admin/stats", get(handlers::get_database_stats))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler));

    // Apply auth middleware if enabled
    if state.auth_config.enabled {
        let auth_state = AuthState {
            auth_config: state.auth_config.clone(),
        };
        app = app.layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ));
    }

    app.layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            init_tracing(args.debug);
            let config = ChatterConfig::new(cli.data_dir)?;
            run_server(args, config).await
        }
        Commands::Connect(args) => {
            let config = ChatterConfig::new(cli.data_dir)?;
            cli::connect_command(&config, args.endpoint, args.url, args.user).await
        }
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "chatter=debug,tower_http=debug,info"
    } else {
        "chatter=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

async fn run_server(args: ServerArgs, config: ChatterConfig) -> Result<()> {
    info!("Starting Chatter");

    let file_config: FileConfig = config::load_config(&config.data_dir, args.profile.as_ref())
        .extract()
        .context("Invalid configuration")?;

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all stored chat history!");
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

    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);

    let app_state = AppState::new(&file_config, db);

    info!(
        "Fan-out config: topic_capacity={}, sweep_interval={:?}",
        app_state.fanout_config.topic_capacity, app_state.fanout_config.sweep_interval
    );
    if app_state.auth_config.enabled {
        info!(
            "Identity header REQUIRED on /chat and /api ({})",
            app_state.auth_config.identity_header
        );
    } else {
        info!("Authentication disabled (set CHATTER_AUTH__ENABLED=true to enable)");
    }

    let shutdown = CancellationToken::new();
    let sweeper = app_state.fanout_config.sweep_interval.map(|every| {
        sweeper::spawn_topic_sweeper(
            app_state.tenant.clone(),
            app_state.room.clone(),
            every,
            shutdown.clone(),
        )
    });

    let app = build_router(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args
        .port
        .or(file_config.server.port)
        .unwrap_or(config::DEFAULT_PORT);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Chatter listening on http://{}", actual_addr);
    info!("");
    info!("WebSocket endpoints:");
    info!("  ws://{}/chat    - Company chat", actual_addr);
    info!("  ws://{}/room    - Room chat (CREATE/JOIN/CHAT)", actual_addr);
    info!("  ws://{}/global  - Global broadcast", actual_addr);

    // Create shutdown signal handler
    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    shutdown.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            warn!("Topic sweeper did not stop cleanly: {}", e);
        }
    }

    info!("Shutdown complete");
    server_result
}
