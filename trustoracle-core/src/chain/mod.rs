//! Narrow adapter over the external transaction ledger.
//!
//! Upper layers see opaque handles and digests plus a retryability
//! classifier; the concrete transport and the server-side signing key
//! live entirely inside the adapter.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpChainGateway;
pub use mock::MockChainGateway;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Chain transport error: {0}")]
    Transport(String),

    #[error("Chain call timed out")]
    Timeout,

    #[error("Chain endpoint returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Chain rejected the transaction: {0}")]
    Rejected(String),

    #[error("Malformed chain response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Rejected(_) | Self::InvalidResponse(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Chain-side identity and endpoint settings. All of them must be
/// present for mirroring to be enabled at all.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub rpc_url: String,
    pub network: String,
    pub package_id: String,
    pub registry_id: String,
    /// Base64-encoded 32-byte Ed25519 seed used to author transactions.
    pub signing_key_b64: String,
    pub call_timeout: std::time::Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRegistration {
    pub chain_device_id: String,
    pub tx_digest: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_digest: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetCreation {
    pub chain_pet_id: String,
    pub tx_digest: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub food_gained: i64,
    pub energy_gained: i64,
    pub new_food: i64,
    pub new_energy: i64,
    pub tx_digest: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOutcome {
    pub evolved: bool,
    pub new_level: Option<u8>,
    pub tx_digest: String,
}

/// Authoritative on-chain pet counters. Bounded statuses always come
/// back; the rest may be absent depending on contract version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PetSnapshot {
    pub happiness: i64,
    pub hunger: i64,
    pub health: i64,
    pub food: Option<i64>,
    pub energy: Option<i64>,
    pub level: Option<i64>,
    pub experience: Option<i64>,
}

/// Typed operations the gateway performs against the ledger.
///
/// Every call is synchronous from the caller's view but may block on
/// network I/O; callers invoke each one under a deadline. Errors are
/// opaque apart from [`ChainError::is_retryable`].
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn register_device(&self, device_id: &str, public_key: &[u8]) -> Result<ChainRegistration>;

    async fn submit_step_data(
        &self,
        chain_device_id: &str,
        total_steps: u64,
        timestamps: &[i64],
        signatures: &[Vec<u8>],
    ) -> Result<TxReceipt>;

    async fn create_pet(&self, name: &str, device_id: &str, color: &str) -> Result<PetCreation>;

    async fn claim_resources(&self, chain_pet_id: &str, steps: u32) -> Result<ClaimOutcome>;

    async fn feed_pet(&self, chain_pet_id: &str) -> Result<FeedOutcome>;

    async fn play_with_pet(&self, chain_pet_id: &str) -> Result<TxReceipt>;

    async fn get_pet(&self, chain_pet_id: &str) -> Result<Option<PetSnapshot>>;

    /// Gas balance of the authoring account, as a decimal string.
    async fn get_balance(&self) -> Result<String>;
}
