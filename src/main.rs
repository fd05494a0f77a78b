use std::sync::Arc;
use tracing::info;

use talky::account::AccountService;
use talky::api::{self, AppState};
use talky::bus::EventBus;
use talky::config::Config;
use talky::friend::FriendService;
use talky::session::ChatService;
use talky::socket::SocketHub;
use talky::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Talky server starting...");

    let config = Config::from_env();

    if config.google_client_id.is_some() && config.google_client_secret.is_some() {
        info!("Google OAuth credentials configured");
    } else {
        info!("No Google OAuth credentials found, credentials login only.");
    }

    info!("Initializing store at {}", config.database_path.display());
    let store = Store::new(&config.database_path).await?;
    store.init().await?;

    // The event bus ties store mutations to the delivery transports
    let bus = Arc::new(EventBus::new());

    // One socket hub for the whole process, injected into handlers
    let hub = Arc::new(SocketHub::new());

    let state = Arc::new(AppState {
        accounts: AccountService::new(store.clone(), config.secret_key.clone()),
        friends: FriendService::new(store.clone(), bus.clone()),
        chats: ChatService::new(store, bus.clone()),
        bus,
        hub,
    });

    let app = api::router(state);

    info!("Listening on {} (public URL {})", config.bind_addr, config.public_url);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
