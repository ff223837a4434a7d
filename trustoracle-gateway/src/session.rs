//! Per-connection session state machine.
//!
//! One session handles one device over one WebSocket. Messages are
//! processed in arrival order and answered in the order produced; a
//! failing handler yields an error frame and keeps the session open.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trustoracle_core::store::DeviceStatus;
use trustoracle_core::{verify_step_signature, ChainGateway, Store};

use crate::config::GatewayConfig;
use crate::connections::{ConnectionMap, SessionHandle};
use crate::error::GatewayError;
use crate::messages::{
    check_temporal, parse_prefixed_hex, validate_device_id, ChainStatus, Inbound, Outbound,
    PetView, StepDataFrame,
};
use crate::pets::PetOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered,
    Authenticated,
}

/// Shared dependencies handed to every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Store,
    pub chain: Option<Arc<dyn ChainGateway>>,
    pub connections: ConnectionMap,
    pub config: Arc<GatewayConfig>,
}

pub struct Session {
    deps: SessionDeps,
    pets: PetOrchestrator,
    remote: String,
    state: SessionState,
    device_id: Option<String>,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    seq: u64,
}

impl Session {
    pub fn new(
        deps: SessionDeps,
        remote: String,
        outbound: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
        seq: u64,
    ) -> Self {
        let pets = PetOrchestrator::new(
            deps.store.clone(),
            deps.chain.clone(),
            deps.config.chain_call_timeout,
        );
        Self {
            deps,
            pets,
            remote,
            state: SessionState::Connected,
            device_id: None,
            outbound,
            cancel,
            seq,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn welcome() -> Outbound {
        Outbound::Welcome {
            message: "Trust Oracle gateway ready".to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Process one inbound text frame and produce the response frame.
    pub async fn handle_text(&mut self, text: &str) -> Outbound {
        if text.len() > self.deps.config.max_frame_bytes {
            return Outbound::error(
                GatewayError::Validation("frame exceeds size limit".to_string()).to_string(),
            );
        }

        let message: Inbound = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(remote = %self.remote, error = %e, "rejected malformed frame");
                return Outbound::error(
                    GatewayError::Validation("unrecognized or malformed message".to_string())
                        .to_string(),
                );
            }
        };

        let is_pet_op = message.is_pet_op();
        let type_name = message.type_name();
        match self.dispatch(message).await {
            Ok(frame) => frame,
            Err(error) => {
                tracing::debug!(
                    remote = %self.remote,
                    msg_type = type_name,
                    %error,
                    "handler rejected message"
                );
                failure_frame(type_name, is_pet_op, &error)
            }
        }
    }

    async fn dispatch(&mut self, message: Inbound) -> Result<Outbound, GatewayError> {
        self.check_state(&message)?;
        match message {
            Inbound::Register {
                device_id,
                public_key,
            } => self.handle_register(device_id, public_key).await,
            Inbound::Authenticate { device_id } => self.handle_authenticate(device_id).await,
            Inbound::Ping => Ok(Outbound::Pong {
                timestamp: chrono::Utc::now().timestamp_millis(),
            }),
            Inbound::StepData(frame) => self.handle_step_data(frame).await,
            Inbound::GetPet { device_id } => {
                self.require_session_device(&device_id)?;
                let (pet, chain) = self.pets.get_pet(&device_id).await?;
                Ok(Outbound::PetData {
                    success: true,
                    pet: PetView::from(&pet),
                    chain,
                })
            }
            Inbound::UpdatePet(frame) => {
                self.require_session_device(&frame.device_id)?;
                self.pets.update(&frame.device_id, &frame.as_update())?;
                Ok(Outbound::PetUpdated { success: true })
            }
            Inbound::ClaimResources { device_id, steps } => {
                self.require_session_device(&device_id)?;
                let result = self.pets.claim(&device_id, steps).await?;
                Ok(Outbound::ResourcesClaimed {
                    success: true,
                    food_gained: result.food_gained,
                    energy_gained: result.energy_gained,
                    food: result.pet.food,
                    energy: result.pet.energy,
                    chain: result.chain,
                })
            }
            Inbound::FeedPet { device_id } => {
                self.require_session_device(&device_id)?;
                let result = self.pets.feed(&device_id).await?;
                Ok(Outbound::PetFed {
                    success: true,
                    food: result.pet.food,
                    hunger: result.pet.hunger,
                    happiness: result.pet.happiness,
                    experience: result.pet.experience,
                    level: result.pet.level,
                    evolved: result.evolved,
                    chain: result.chain,
                })
            }
            Inbound::PlayWithPet { device_id } => {
                self.require_session_device(&device_id)?;
                let (pet, chain) = self.pets.play(&device_id).await?;
                Ok(Outbound::PetPlayed {
                    success: true,
                    energy: pet.energy,
                    happiness: pet.happiness,
                    health: pet.health,
                    experience: pet.experience,
                    chain,
                })
            }
        }
    }

    /// The per-state accept table. Rejection keeps the session open.
    fn check_state(&self, message: &Inbound) -> Result<(), GatewayError> {
        let allowed = match message {
            Inbound::Register { .. } | Inbound::Ping => true,
            Inbound::Authenticate { .. } => self.state != SessionState::Connected,
            _ => self.state == SessionState::Authenticated,
        };
        if allowed {
            Ok(())
        } else {
            Err(GatewayError::State(format!(
                "{} requires {}",
                message.type_name(),
                match message {
                    Inbound::Authenticate { .. } => "registration",
                    _ => "authentication",
                }
            )))
        }
    }

    async fn handle_register(
        &mut self,
        device_id: String,
        public_key: String,
    ) -> Result<Outbound, GatewayError> {
        validate_device_id(&device_id)?;
        let key = parse_prefixed_hex(&public_key, 32, "publicKey")?;

        let device = self.deps.store.register_device(&device_id, &key)?;
        if self.state == SessionState::Connected {
            self.state = SessionState::Registered;
        }
        tracing::info!(device_id = %device_id, remote = %self.remote, "device registered");

        // On-chain registration is best-effort: a chain failure never
        // fails the registration itself.
        let mut tx_digest = None;
        let mut chain_status = None;
        if let Some(chain) = &self.deps.chain {
            if device.chain_device_id.is_none() {
                chain_status = Some(
                    self.register_on_chain(Arc::clone(chain), &device_id, &key, &mut tx_digest)
                        .await,
                );
            }
        }

        Ok(Outbound::RegisterResponse {
            success: true,
            device_id: Some(device_id),
            tx_digest,
            chain: chain_status,
            error: None,
        })
    }

    async fn register_on_chain(
        &self,
        chain: Arc<dyn ChainGateway>,
        device_id: &str,
        public_key: &[u8],
        tx_digest: &mut Option<String>,
    ) -> ChainStatus {
        let call = chain.register_device(device_id, public_key);
        match tokio::time::timeout(self.deps.config.chain_call_timeout, call).await {
            Ok(Ok(registration)) => {
                if let Err(e) = self
                    .deps
                    .store
                    .set_chain_device_id(device_id, &registration.chain_device_id)
                {
                    tracing::warn!(device_id, error = %e, "failed to persist chain device handle");
                    return ChainStatus::failed(e.to_string());
                }
                *tx_digest = Some(registration.tx_digest.clone());
                ChainStatus::ok(registration.tx_digest)
            }
            Ok(Err(e)) => {
                tracing::warn!(device_id, error = %e, retryable = e.is_retryable(),
                    "on-chain device registration failed");
                ChainStatus::failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(device_id, "on-chain device registration timed out");
                ChainStatus::failed("chain call timed out")
            }
        }
    }

    async fn handle_authenticate(&mut self, device_id: String) -> Result<Outbound, GatewayError> {
        validate_device_id(&device_id)?;
        self.deps
            .store
            .get_device(&device_id)?
            .ok_or_else(|| GatewayError::UnknownDevice(device_id.clone()))?;

        self.device_id = Some(device_id.clone());
        self.state = SessionState::Authenticated;
        self.deps
            .connections
            .register(
                &device_id,
                SessionHandle {
                    sender: self.outbound.clone(),
                    cancel: self.cancel.clone(),
                    seq: self.seq,
                },
            )
            .await;
        tracing::info!(device_id = %device_id, remote = %self.remote, "device authenticated");

        Ok(Outbound::AuthResponse {
            success: true,
            device_id: Some(device_id),
            error: None,
        })
    }

    async fn handle_step_data(&mut self, frame: StepDataFrame) -> Result<Outbound, GatewayError> {
        self.require_session_device(&frame.device_id)?;
        let (payload, signature) = frame.validate()?;
        check_temporal(payload.timestamp as i64, chrono::Utc::now().timestamp_millis())?;

        let device = self
            .deps
            .store
            .get_device(&payload.device_id)?
            .ok_or_else(|| GatewayError::UnknownDevice(payload.device_id.clone()))?;
        if device.status == DeviceStatus::Suspended {
            return Err(GatewayError::Validation("device is suspended".to_string()));
        }

        if !verify_step_signature(&payload, &signature, &device.public_key) {
            return Err(GatewayError::Signature);
        }

        let data_id = self
            .deps
            .store
            .store_submission(&payload.device_id, &payload, &signature)?;
        tracing::debug!(
            device_id = %payload.device_id,
            data_id,
            steps = payload.step_count,
            "verified submission stored"
        );

        Ok(Outbound::StepDataResponse {
            success: true,
            data_id: Some(data_id),
            step_count: Some(payload.step_count),
            verified: Some(true),
            error: None,
        })
    }

    fn require_session_device(&self, device_id: &str) -> Result<(), GatewayError> {
        match &self.device_id {
            Some(bound) if bound == device_id => Ok(()),
            _ => Err(GatewayError::Validation(
                "deviceId does not match the authenticated session".to_string(),
            )),
        }
    }

    /// Remove this session's binding on close.
    pub async fn close(&self) {
        if let Some(device_id) = &self.device_id {
            self.deps.connections.remove(device_id, self.seq).await;
            tracing::debug!(device_id = %device_id, remote = %self.remote, "session closed");
        }
    }
}

/// Map a handler error onto the failure frame the message type calls
/// for. State violations always use the generic error frame.
fn failure_frame(type_name: &str, is_pet_op: bool, error: &GatewayError) -> Outbound {
    if matches!(error, GatewayError::State(_)) {
        return Outbound::error(error.to_string());
    }
    if is_pet_op {
        return Outbound::pet_error(error.to_string());
    }
    match type_name {
        "register" => Outbound::RegisterResponse {
            success: false,
            device_id: None,
            tx_digest: None,
            chain: None,
            error: Some(error.to_string()),
        },
        "authenticate" => Outbound::AuthResponse {
            success: false,
            device_id: None,
            error: Some(error.to_string()),
        },
        "step_data" => Outbound::StepDataResponse {
            success: false,
            data_id: None,
            step_count: None,
            verified: None,
            error: Some(error.to_string()),
        },
        _ => Outbound::error(error.to_string()),
    }
}
