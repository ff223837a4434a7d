//! Scriptable in-memory chain gateway for tests.
//!
//! Records every call and hands out deterministic handles and digests.
//! Individual devices or pets can be scripted to fail so failure
//! isolation paths are exercisable without a network.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{
    ChainError, ChainGateway, ChainRegistration, ClaimOutcome, FeedOutcome, PetCreation,
    PetSnapshot, Result, TxReceipt,
};
use crate::pet::claim_gains;

/// One recorded `submit_step_data` call.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub chain_device_id: String,
    pub total_steps: u64,
    pub timestamps: Vec<i64>,
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    tx_counter: u64,
    fail_devices: HashSet<String>,
    fail_pets: HashSet<String>,
    fail_everything: bool,
    submissions: Vec<RecordedSubmission>,
    pets: HashMap<String, PetSnapshot>,
    registered: Vec<String>,
}

#[derive(Default)]
pub struct MockChainGateway {
    state: Mutex<MockState>,
}

impl MockChainGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `submit_step_data` fail for the given chain device handle.
    pub fn fail_submissions_for(&self, chain_device_id: &str) {
        self.lock().fail_devices.insert(chain_device_id.to_string());
    }

    /// Make every pet operation fail for the given pet handle.
    pub fn fail_pet_ops_for(&self, chain_pet_id: &str) {
        self.lock().fail_pets.insert(chain_pet_id.to_string());
    }

    /// Make every call fail with a transport error.
    pub fn fail_everything(&self) {
        self.lock().fail_everything = true;
    }

    /// Pre-seed the snapshot `get_pet` returns for a handle.
    pub fn set_pet_snapshot(&self, chain_pet_id: &str, snapshot: PetSnapshot) {
        self.lock().pets.insert(chain_pet_id.to_string(), snapshot);
    }

    pub fn recorded_submissions(&self) -> Vec<RecordedSubmission> {
        self.lock().submissions.clone()
    }

    pub fn registered_devices(&self) -> Vec<String> {
        self.lock().registered.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    fn next_digest(state: &mut MockState) -> String {
        state.tx_counter += 1;
        format!("0xtx{:04}", state.tx_counter)
    }

    fn check_all(state: &MockState) -> Result<()> {
        if state.fail_everything {
            return Err(ChainError::Transport("mock transport down".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainGateway for MockChainGateway {
    async fn register_device(&self, device_id: &str, _public_key: &[u8]) -> Result<ChainRegistration> {
        let mut state = self.lock();
        Self::check_all(&state)?;
        state.registered.push(device_id.to_string());
        let tx_digest = Self::next_digest(&mut state);
        Ok(ChainRegistration {
            chain_device_id: format!("0xdev-{}", device_id),
            tx_digest,
        })
    }

    async fn submit_step_data(
        &self,
        chain_device_id: &str,
        total_steps: u64,
        timestamps: &[i64],
        signatures: &[Vec<u8>],
    ) -> Result<TxReceipt> {
        let mut state = self.lock();
        Self::check_all(&state)?;
        if state.fail_devices.contains(chain_device_id) {
            return Err(ChainError::Rejected(format!(
                "scripted failure for {}",
                chain_device_id
            )));
        }
        state.submissions.push(RecordedSubmission {
            chain_device_id: chain_device_id.to_string(),
            total_steps,
            timestamps: timestamps.to_vec(),
            signatures: signatures.to_vec(),
        });
        let tx_digest = Self::next_digest(&mut state);
        Ok(TxReceipt { tx_digest })
    }

    async fn create_pet(&self, _name: &str, device_id: &str, _color: &str) -> Result<PetCreation> {
        let mut state = self.lock();
        Self::check_all(&state)?;
        let tx_digest = Self::next_digest(&mut state);
        Ok(PetCreation {
            chain_pet_id: format!("0xpet-{}", device_id),
            tx_digest,
        })
    }

    async fn claim_resources(&self, chain_pet_id: &str, steps: u32) -> Result<ClaimOutcome> {
        let mut state = self.lock();
        Self::check_all(&state)?;
        if state.fail_pets.contains(chain_pet_id) {
            return Err(ChainError::Rejected("scripted pet failure".to_string()));
        }
        let (food_gained, energy_gained) = claim_gains(steps);
        let tx_digest = Self::next_digest(&mut state);
        let snapshot = state.pets.entry(chain_pet_id.to_string()).or_default();
        snapshot.food = Some(snapshot.food.unwrap_or(0) + food_gained);
        snapshot.energy = Some(snapshot.energy.unwrap_or(0) + energy_gained);
        Ok(ClaimOutcome {
            food_gained,
            energy_gained,
            new_food: snapshot.food.unwrap_or(0),
            new_energy: snapshot.energy.unwrap_or(0),
            tx_digest,
        })
    }

    async fn feed_pet(&self, chain_pet_id: &str) -> Result<FeedOutcome> {
        let mut state = self.lock();
        Self::check_all(&state)?;
        if state.fail_pets.contains(chain_pet_id) {
            return Err(ChainError::Rejected("scripted pet failure".to_string()));
        }
        let tx_digest = Self::next_digest(&mut state);
        Ok(FeedOutcome {
            evolved: false,
            new_level: None,
            tx_digest,
        })
    }

    async fn play_with_pet(&self, chain_pet_id: &str) -> Result<TxReceipt> {
        let mut state = self.lock();
        Self::check_all(&state)?;
        if state.fail_pets.contains(chain_pet_id) {
            return Err(ChainError::Rejected("scripted pet failure".to_string()));
        }
        let tx_digest = Self::next_digest(&mut state);
        Ok(TxReceipt { tx_digest })
    }

    async fn get_pet(&self, chain_pet_id: &str) -> Result<Option<PetSnapshot>> {
        let state = self.lock();
        Self::check_all(&state)?;
        Ok(state.pets.get(chain_pet_id).cloned())
    }

    async fn get_balance(&self) -> Result<String> {
        let state = self.lock();
        Self::check_all(&state)?;
        Ok("1000000000".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_submissions_with_deterministic_digests() {
        let mock = MockChainGateway::new();
        let receipt = mock
            .submit_step_data("0xdev-d1", 150, &[1, 2, 3], &[vec![0u8; 64]])
            .await
            .unwrap();
        assert_eq!(receipt.tx_digest, "0xtx0001");

        let calls = mock.recorded_submissions();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].total_steps, 150);
        assert_eq!(calls[0].timestamps, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn scripted_device_failure() {
        let mock = MockChainGateway::new();
        mock.fail_submissions_for("0xdev-bad");
        let err = mock
            .submit_step_data("0xdev-bad", 10, &[], &[])
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(mock.recorded_submissions().is_empty());
    }

    #[tokio::test]
    async fn claim_tracks_running_totals() {
        let mock = MockChainGateway::new();
        let first = mock.claim_resources("0xpet-d1", 300).await.unwrap();
        assert_eq!(first.food_gained, 3);
        assert_eq!(first.energy_gained, 4);
        let second = mock.claim_resources("0xpet-d1", 300).await.unwrap();
        assert_eq!(second.new_food, 6);
        assert_eq!(second.new_energy, 8);
    }
}
