use std::path::PathBuf;

/// Runtime configuration, read from the environment (a `.env` file is loaded
/// in `main` before this runs).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Public base URL clients use for the socket and stream connections.
    pub public_url: String,
    /// Secret used to salt password digests.
    pub secret_key: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        let database_path = std::env::var("TALKY_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home_dir).join(".talky").join("talky.db"));

        Self {
            bind_addr: std::env::var("TALKY_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            database_path,
            public_url: std::env::var("PUBLIC_SITE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            secret_key: std::env::var("SESSION_SECRET").unwrap_or_else(|_| "talky-dev".into()),
            google_client_id: std::env::var("GOOGLE_CLIENT_ID").ok(),
            google_client_secret: std::env::var("GOOGLE_CLIENT_SECRET").ok(),
        }
    }
}
