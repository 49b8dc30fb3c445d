use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// JSON `GatewayConfig` with the static provider list. Optional.
    pub providers_file: Option<PathBuf>,
    /// Persisted providers, activation flags and credentials.
    pub state_file: PathBuf,
    /// Base64 32-byte key sealing the state file.
    pub secret_key: Option<String>,
    /// Overrides the default per-call timeout when set.
    pub request_timeout: Option<Duration>,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let listen_addr = std::env::var("GATEWAY_LISTEN_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8088)));
        let providers_file = std::env::var("GATEWAY_PROVIDERS_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let state_file = std::env::var("GATEWAY_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./gateway-state.json"));
        let secret_key = std::env::var("GATEWAY_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let request_timeout = std::env::var("GATEWAY_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis);
        let log_format =
            std::env::var("GATEWAY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
        Self {
            listen_addr,
            providers_file,
            state_file,
            secret_key,
            request_timeout,
            log_format,
        }
    }
}
