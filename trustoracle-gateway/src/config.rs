//! Gateway configuration.
//!
//! Environment-driven, enumerated once at start-up. Mirroring is
//! enabled only when every chain variable is present; otherwise the
//! gateway runs local-only with all functional paths intact.

use std::path::PathBuf;
use std::time::Duration;

use trustoracle_core::ChainSettings;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Device WebSocket listen address.
    pub ws_addr: String,
    /// Management HTTP listen address.
    pub http_addr: String,
    pub db_path: PathBuf,
    pub chain: Option<ChainSettings>,
    pub chain_call_timeout: Duration,
    /// Close a session after this long without any inbound frame.
    pub session_idle_timeout: Duration,
    /// Inbound frame size cap; payloads carry at most 30 sample triples.
    pub max_frame_bytes: usize,
    /// Per-session outbound queue depth; a full queue drops the session.
    pub outbound_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_addr: "0.0.0.0:8080".to_string(),
            http_addr: "127.0.0.1:3000".to_string(),
            db_path: PathBuf::from("oracle.db"),
            chain: None,
            chain_call_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(90),
            max_frame_bytes: 8 * 1024,
            outbound_queue: 32,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("ORACLE_WS_ADDR") {
            config.ws_addr = addr;
        }
        if let Ok(addr) = std::env::var("ORACLE_HTTP_ADDR") {
            config.http_addr = addr;
        }
        if let Ok(path) = std::env::var("ORACLE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(secs) = std::env::var("CHAIN_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.chain_call_timeout = Duration::from_secs(secs);
        }

        config.chain = Self::chain_from_env(config.chain_call_timeout);
        config
    }

    fn chain_from_env(call_timeout: Duration) -> Option<ChainSettings> {
        let required = [
            "CHAIN_RPC_URL",
            "CHAIN_NETWORK",
            "CHAIN_PACKAGE_ID",
            "CHAIN_REGISTRY_ID",
            "CHAIN_SIGNING_KEY",
        ];
        let mut values = Vec::with_capacity(required.len());
        for name in required {
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => values.push(value),
                _ => {
                    tracing::info!(missing = name, "chain mirroring disabled, running local-only");
                    return None;
                }
            }
        }

        let mut it = values.into_iter();
        Some(ChainSettings {
            rpc_url: it.next().unwrap(),
            network: it.next().unwrap(),
            package_id: it.next().unwrap(),
            registry_id: it.next().unwrap(),
            signing_key_b64: it.next().unwrap(),
            call_timeout,
        })
    }
}
