//! Derived-state orchestration.
//!
//! Every operation is local-first: the deterministic rule commits to
//! the store, the device gets its response, and the chain is mirrored
//! best-effort. Responses gate on the mirror under the configured
//! deadline; a mirror that outlives the deadline finishes in a
//! detached task and its snapshot lands on the next read. Successful
//! chain responses authoritatively overwrite the bounded fields.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use trustoracle_core::pet::{claim_gains, CLAIM_MIN_STEPS};
use trustoracle_core::store::models::PetUpdate;
use trustoracle_core::{ChainGateway, PetState, Store};

use crate::error::GatewayError;
use crate::messages::ChainStatus;

const DEFAULT_PET_NAME: &str = "Pet";
const DEFAULT_PET_COLOR: &str = "blue";

#[derive(Clone)]
pub struct PetOrchestrator {
    store: Store,
    chain: Option<Arc<dyn ChainGateway>>,
    call_timeout: Duration,
}

#[derive(Debug)]
pub struct ClaimResult {
    pub pet: PetState,
    pub food_gained: i64,
    pub energy_gained: i64,
    pub chain: Option<ChainStatus>,
}

#[derive(Debug)]
pub struct FeedResult {
    pub pet: PetState,
    pub evolved: bool,
    pub chain: Option<ChainStatus>,
}

impl PetOrchestrator {
    pub fn new(store: Store, chain: Option<Arc<dyn ChainGateway>>, call_timeout: Duration) -> Self {
        Self {
            store,
            chain,
            call_timeout,
        }
    }

    /// Fetch (or create) the pet, creating its on-chain twin on first
    /// access when mirroring is configured.
    pub async fn get_pet(
        &self,
        device_id: &str,
    ) -> Result<(PetState, Option<ChainStatus>), GatewayError> {
        let now = chrono::Utc::now().timestamp();
        let mut pet = self.store.get_or_create_pet(device_id, DEFAULT_PET_NAME, now)?;

        let mut chain_status = None;
        if let Some(chain) = &self.chain {
            if pet.chain_pet_id.is_none() {
                let chain = Arc::clone(chain);
                let store = self.store.clone();
                let device = device_id.to_string();
                let name = pet.pet_name.clone();
                let color = pet
                    .color
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PET_COLOR.to_string());

                let status = self
                    .mirror(async move {
                        let creation = chain
                            .create_pet(&name, &device, &color)
                            .await
                            .map_err(|e| e.to_string())?;
                        store
                            .set_chain_pet_id(&device, &creation.chain_pet_id)
                            .map_err(|e| e.to_string())?;
                        Ok(Some(creation.tx_digest))
                    })
                    .await;
                if status.success {
                    pet = self.refreshed(device_id, pet)?;
                }
                chain_status = Some(status);
            }
        }

        Ok((pet, chain_status))
    }

    /// Persist a device-pushed stat sync. Not mirrored; the chain
    /// learns about steps through the batch submitter.
    pub fn update(&self, device_id: &str, update: &PetUpdate) -> Result<PetState, GatewayError> {
        let now = chrono::Utc::now().timestamp();
        Ok(self.store.update_pet(device_id, update, now)?)
    }

    pub async fn claim(&self, device_id: &str, steps: i64) -> Result<ClaimResult, GatewayError> {
        if steps < CLAIM_MIN_STEPS as i64 {
            return Err(GatewayError::Validation(format!(
                "claiming resources requires at least {} steps",
                CLAIM_MIN_STEPS
            )));
        }
        let steps = u32::try_from(steps)
            .map_err(|_| GatewayError::Validation("steps out of range".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let (food_gained, energy_gained) = claim_gains(steps);
        let mut pet = self
            .store
            .add_resources(device_id, food_gained, energy_gained, now)?;

        let mut chain_status = None;
        if let (Some(chain), Some(handle)) = (&self.chain, pet.chain_pet_id.clone()) {
            let chain = Arc::clone(chain);
            let store = self.store.clone();
            let device = device_id.to_string();

            let status = self
                .mirror(async move {
                    let outcome = chain
                        .claim_resources(&handle, steps)
                        .await
                        .map_err(|e| e.to_string())?;
                    let update = PetUpdate {
                        food: Some(outcome.new_food),
                        energy: Some(outcome.new_energy),
                        ..Default::default()
                    };
                    store
                        .update_pet(&device, &update, now)
                        .map_err(|e| e.to_string())?;
                    Ok(Some(outcome.tx_digest))
                })
                .await;
            if status.success {
                pet = self.refreshed(device_id, pet)?;
            }
            chain_status = Some(status);
        }

        Ok(ClaimResult {
            pet,
            food_gained,
            energy_gained,
            chain: chain_status,
        })
    }

    pub async fn feed(&self, device_id: &str) -> Result<FeedResult, GatewayError> {
        let now = chrono::Utc::now().timestamp();
        let (mut pet, evolved) = self.store.consume_and_apply_feed(device_id, now)?;

        let mut chain_status = None;
        if let (Some(chain), Some(handle)) = (&self.chain, pet.chain_pet_id.clone()) {
            let chain = Arc::clone(chain);
            let store = self.store.clone();
            let device = device_id.to_string();

            let status = self
                .mirror(async move {
                    let outcome = chain.feed_pet(&handle).await.map_err(|e| e.to_string())?;
                    if let Some(snapshot) =
                        chain.get_pet(&handle).await.map_err(|e| e.to_string())?
                    {
                        store
                            .adopt_chain_snapshot(&device, &snapshot)
                            .map_err(|e| e.to_string())?;
                    }
                    Ok(Some(outcome.tx_digest))
                })
                .await;
            if status.success {
                pet = self.refreshed(device_id, pet)?;
            }
            chain_status = Some(status);
        }

        Ok(FeedResult {
            pet,
            evolved,
            chain: chain_status,
        })
    }

    pub async fn play(
        &self,
        device_id: &str,
    ) -> Result<(PetState, Option<ChainStatus>), GatewayError> {
        let now = chrono::Utc::now().timestamp();
        let mut pet = self.store.consume_and_apply_play(device_id, now)?;

        let mut chain_status = None;
        if let (Some(chain), Some(handle)) = (&self.chain, pet.chain_pet_id.clone()) {
            let chain = Arc::clone(chain);
            let store = self.store.clone();
            let device = device_id.to_string();

            let status = self
                .mirror(async move {
                    let receipt = chain
                        .play_with_pet(&handle)
                        .await
                        .map_err(|e| e.to_string())?;
                    if let Some(snapshot) =
                        chain.get_pet(&handle).await.map_err(|e| e.to_string())?
                    {
                        store
                            .adopt_chain_snapshot(&device, &snapshot)
                            .map_err(|e| e.to_string())?;
                    }
                    Ok(Some(receipt.tx_digest))
                })
                .await;
            if status.success {
                pet = self.refreshed(device_id, pet)?;
            }
            chain_status = Some(status);
        }

        Ok((pet, chain_status))
    }

    /// Run a mirror task to completion or past the deadline. The task
    /// owns its store/chain handles, so on timeout it keeps running
    /// detached and its writes land before the next read.
    async fn mirror<F>(&self, fut: F) -> ChainStatus
    where
        F: Future<Output = Result<Option<String>, String>> + Send + 'static,
    {
        let task = tokio::spawn(fut);
        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(Ok(digest))) => ChainStatus::ok(digest),
            Ok(Ok(Err(error))) => {
                tracing::warn!(%error, "chain mirror failed, local state kept");
                ChainStatus::failed(error)
            }
            Ok(Err(join_error)) => {
                tracing::warn!(%join_error, "chain mirror task failed");
                ChainStatus::failed("chain mirror task failed")
            }
            Err(_) => {
                tracing::warn!("chain mirror exceeded deadline, continuing in background");
                ChainStatus::failed("chain call timed out")
            }
        }
    }

    fn refreshed(&self, device_id: &str, fallback: PetState) -> Result<PetState, GatewayError> {
        Ok(self.store.find_pet(device_id)?.unwrap_or(fallback))
    }
}
