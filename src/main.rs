use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use retos::agenda::HttpAgendaClient;
use retos::config::Config;
use retos::db::{create_pool, init_db, AppState};
use retos::handlers;
use retos::notify::EmailNotifier;
use retos::outbox;

#[derive(Parser, Debug)]
#[command(name = "retos")]
#[command(about = "Entitlement and payment reconciliation service for the 21 Retos program")]
struct Cli {
    /// Run one outbox sweep over pending Agenda grants and exit
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retos=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let agenda = Arc::new(HttpAgendaClient::new(&config));
    let notifier = Arc::new(EmailNotifier::new(
        config.resend_api_key.clone(),
        config.email_from.clone(),
    ));

    let state = AppState {
        db: db_pool,
        config: Arc::new(config),
        agenda,
        notifier,
    };

    if cli.sweep_once {
        let stats = outbox::sweep(
            &state,
            state.config.agenda_grant_max_tries,
            state.config.agenda_grant_batch_size,
        )
        .await
        .expect("Sweep failed");
        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "One-shot sweep complete"
        );
        return;
    }

    let app = handlers::router(state.config.rate_limit_grant_rpm)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = state.config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Retos server listening on {}", addr);

    // Use into_make_service_with_connect_info to enable IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
