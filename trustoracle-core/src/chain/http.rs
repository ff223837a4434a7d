//! HTTP implementation of the chain gateway.
//!
//! Talks to the chain RPC relay over signed JSON requests. The
//! authoring key is decoded once at startup and never leaves this
//! module.

use ed25519_dalek::{Signer, SigningKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::{
    ChainError, ChainGateway, ChainRegistration, ChainSettings, ClaimOutcome, FeedOutcome,
    PetCreation, PetSnapshot, Result, TxReceipt,
};

const AUTH_SCHEME: &str = "TrustOracle-Ed25519";

pub struct HttpChainGateway {
    client: reqwest::Client,
    base_url: String,
    network: String,
    package_id: String,
    registry_id: String,
    signing_key: SigningKey,
    sender: String,
}

impl HttpChainGateway {
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        use base64::Engine;

        let mut seed = base64::engine::general_purpose::STANDARD
            .decode(&settings.signing_key_b64)
            .map_err(|e| ChainError::Transport(format!("invalid signing key encoding: {}", e)))?;
        if seed.len() != 32 {
            seed.zeroize();
            return Err(ChainError::Transport(
                "signing key must decode to 32 bytes".to_string(),
            ));
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&seed);
        seed.zeroize();
        let signing_key = SigningKey::from_bytes(&key_bytes);
        key_bytes.zeroize();

        let client = reqwest::Client::builder()
            .timeout(settings.call_timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let sender = hex::encode(signing_key.verifying_key().to_bytes());

        Ok(Self {
            client,
            base_url: settings.rpc_url.trim_end_matches('/').to_string(),
            network: settings.network.clone(),
            package_id: settings.package_id.clone(),
            registry_id: settings.registry_id.clone(),
            signing_key,
            sender,
        })
    }

    /// Authorization value for one request:
    /// `TrustOracle-Ed25519 <sender>:<timestamp>:<nonce>:<hex(sig)>`
    /// where the signature covers `{path}\n{timestamp}\n{nonce}\n{sha256(body)}`.
    fn auth_header(&self, path: &str, body: &[u8]) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = uuid::Uuid::new_v4().to_string();
        let body_hash = hex::encode(Sha256::digest(body));
        let message = format!("{}\n{}\n{}\n{}", path, timestamp, nonce, body_hash);
        let signature = self.signing_key.sign(message.as_bytes());
        format!(
            "{} {}:{}:{}:{}",
            AUTH_SCHEME,
            self.sender,
            timestamp,
            nonce,
            hex::encode(signature.to_bytes())
        )
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| ChainError::Transport(format!("request encoding: {}", e)))?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header(path, &body_bytes))
            .header("Content-Type", "application/json")
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Timeout
                } else {
                    ChainError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ChainError::Http {
                status: status.as_u16(),
                message: text.chars().take(256).collect(),
            });
        }

        match serde_json::from_str::<T>(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                #[derive(Deserialize)]
                struct ErrorEnvelope {
                    error: String,
                }
                match serde_json::from_str::<ErrorEnvelope>(&text) {
                    Ok(envelope) => Err(ChainError::Rejected(envelope.error)),
                    Err(e) => Err(ChainError::InvalidResponse(e.to_string())),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ChainGateway for HttpChainGateway {
    async fn register_device(&self, device_id: &str, public_key: &[u8]) -> Result<ChainRegistration> {
        self.call(
            "/v1/device/register",
            json!({
                "network": self.network,
                "packageId": self.package_id,
                "registryId": self.registry_id,
                "deviceId": device_id,
                "publicKey": format!("0x{}", hex::encode(public_key)),
            }),
        )
        .await
    }

    async fn submit_step_data(
        &self,
        chain_device_id: &str,
        total_steps: u64,
        timestamps: &[i64],
        signatures: &[Vec<u8>],
    ) -> Result<TxReceipt> {
        let signatures: Vec<String> = signatures
            .iter()
            .map(|sig| format!("0x{}", hex::encode(sig)))
            .collect();
        self.call(
            "/v1/steps/submit",
            json!({
                "network": self.network,
                "packageId": self.package_id,
                "deviceObjectId": chain_device_id,
                "totalSteps": total_steps,
                "timestamps": timestamps,
                "signatures": signatures,
            }),
        )
        .await
    }

    async fn create_pet(&self, name: &str, device_id: &str, color: &str) -> Result<PetCreation> {
        self.call(
            "/v1/pet/create",
            json!({
                "network": self.network,
                "packageId": self.package_id,
                "registryId": self.registry_id,
                "name": name,
                "deviceId": device_id,
                "color": color,
            }),
        )
        .await
    }

    async fn claim_resources(&self, chain_pet_id: &str, steps: u32) -> Result<ClaimOutcome> {
        self.call(
            "/v1/pet/claim",
            json!({
                "network": self.network,
                "packageId": self.package_id,
                "petObjectId": chain_pet_id,
                "steps": steps,
            }),
        )
        .await
    }

    async fn feed_pet(&self, chain_pet_id: &str) -> Result<FeedOutcome> {
        self.call(
            "/v1/pet/feed",
            json!({
                "network": self.network,
                "packageId": self.package_id,
                "petObjectId": chain_pet_id,
            }),
        )
        .await
    }

    async fn play_with_pet(&self, chain_pet_id: &str) -> Result<TxReceipt> {
        self.call(
            "/v1/pet/play",
            json!({
                "network": self.network,
                "packageId": self.package_id,
                "petObjectId": chain_pet_id,
            }),
        )
        .await
    }

    async fn get_pet(&self, chain_pet_id: &str) -> Result<Option<PetSnapshot>> {
        #[derive(Deserialize)]
        struct PetEnvelope {
            pet: Option<PetSnapshot>,
        }
        let envelope: PetEnvelope = self
            .call(
                "/v1/pet/get",
                json!({
                    "network": self.network,
                    "petObjectId": chain_pet_id,
                }),
            )
            .await?;
        Ok(envelope.pet)
    }

    async fn get_balance(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct BalanceEnvelope {
            balance: String,
        }
        let envelope: BalanceEnvelope = self
            .call("/v1/balance", json!({ "network": self.network }))
            .await?;
        Ok(envelope.balance)
    }
}
