//! Typed wire frames.
//!
//! Text frames carry UTF-8 JSON objects whose `type` field selects the
//! variant, so the accepted surface is reviewable in one place. Field
//! names follow the device firmware exactly; every bound is enforced
//! here before anything touches the store.

use serde::{Deserialize, Serialize};

use trustoracle_core::store::models::PetUpdate;
use trustoracle_core::{PetState, StepPayload};

use crate::error::GatewayError;

/// Maximum accepted age of a device timestamp.
pub const MAX_TIMESTAMP_AGE_MS: i64 = 7 * 24 * 3_600 * 1_000;
/// Tolerated clock skew into the future.
pub const MAX_TIMESTAMP_SKEW_MS: i64 = 5 * 60 * 1_000;

pub const MAX_STEP_COUNT: i64 = 100_000;
pub const MAX_ACC_SAMPLES: usize = 30;
pub const MAX_DEVICE_ID_LEN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    #[serde(rename = "authenticate")]
    Authenticate {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "step_data")]
    StepData(StepDataFrame),
    #[serde(rename = "getPet")]
    GetPet {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    #[serde(rename = "updatePet")]
    UpdatePet(PetUpdateFrame),
    #[serde(rename = "claimResources")]
    ClaimResources {
        #[serde(rename = "deviceId")]
        device_id: String,
        steps: i64,
    },
    #[serde(rename = "feedPet")]
    FeedPet {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    #[serde(rename = "playWithPet")]
    PlayWithPet {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

impl Inbound {
    /// Pet operations report failures as `pet_error` frames.
    pub fn is_pet_op(&self) -> bool {
        matches!(
            self,
            Self::GetPet { .. }
                | Self::UpdatePet(_)
                | Self::ClaimResources { .. }
                | Self::FeedPet { .. }
                | Self::PlayWithPet { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Authenticate { .. } => "authenticate",
            Self::Ping => "ping",
            Self::StepData(_) => "step_data",
            Self::GetPet { .. } => "getPet",
            Self::UpdatePet(_) => "updatePet",
            Self::ClaimResources { .. } => "claimResources",
            Self::FeedPet { .. } => "feedPet",
            Self::PlayWithPet { .. } => "playWithPet",
        }
    }
}

/// A signed step submission as it arrives on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDataFrame {
    pub device_id: String,
    pub step_count: i64,
    pub timestamp: i64,
    pub firmware_version: i64,
    pub battery_percent: i64,
    pub raw_acc_samples: Vec<[f32; 3]>,
    /// `0x`-prefixed lowercase hex of the 64-byte detached signature.
    pub signature: String,
}

impl StepDataFrame {
    /// Enforce every scalar bound and hex shape, yielding the canonical
    /// payload and the decoded signature bytes.
    pub fn validate(&self) -> Result<(StepPayload, Vec<u8>), GatewayError> {
        validate_device_id(&self.device_id)?;
        if self.step_count < 1 || self.step_count > MAX_STEP_COUNT {
            return Err(GatewayError::Validation(format!(
                "stepCount must be between 1 and {}",
                MAX_STEP_COUNT
            )));
        }
        if self.timestamp <= 0 {
            return Err(GatewayError::Validation(
                "timestamp must be positive milliseconds".to_string(),
            ));
        }
        if !(0..=100).contains(&self.battery_percent) {
            return Err(GatewayError::Validation(
                "batteryPercent must be between 0 and 100".to_string(),
            ));
        }
        if self.firmware_version < 0 || self.firmware_version > u32::MAX as i64 {
            return Err(GatewayError::Validation(
                "firmwareVersion out of range".to_string(),
            ));
        }
        if self.raw_acc_samples.len() > MAX_ACC_SAMPLES {
            return Err(GatewayError::Validation(format!(
                "rawAccSamples carries more than {} samples",
                MAX_ACC_SAMPLES
            )));
        }
        let signature = parse_prefixed_hex(&self.signature, 64, "signature")?;

        let payload = StepPayload {
            device_id: self.device_id.clone(),
            step_count: self.step_count as u32,
            timestamp: self.timestamp as u64,
            firmware_version: self.firmware_version as u32,
            battery_percent: self.battery_percent as u8,
            raw_acc_samples: self.raw_acc_samples.clone(),
        };
        Ok((payload, signature))
    }
}

/// Device-pushed pet stat sync; every field optional.
#[derive(Debug, Clone, Deserialize)]
pub struct PetUpdateFrame {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub happiness: Option<i64>,
    pub hunger: Option<i64>,
    pub health: Option<i64>,
    pub experience: Option<i64>,
    pub total_steps_fed: Option<i64>,
    pub level: Option<i64>,
    pub food: Option<i64>,
    pub energy: Option<i64>,
}

impl PetUpdateFrame {
    pub fn as_update(&self) -> PetUpdate {
        PetUpdate {
            happiness: self.happiness,
            hunger: self.hunger,
            health: self.health,
            experience: self.experience,
            total_steps_fed: self.total_steps_fed,
            level: self.level,
            food: self.food,
            energy: self.energy,
        }
    }
}

pub fn validate_device_id(device_id: &str) -> Result<(), GatewayError> {
    if device_id.is_empty() || device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(GatewayError::Validation(format!(
            "deviceId must be 1..={} characters",
            MAX_DEVICE_ID_LEN
        )));
    }
    Ok(())
}

/// Decode a `0x`-prefixed lowercase hex field of exactly `bytes` bytes.
pub fn parse_prefixed_hex(value: &str, bytes: usize, field: &str) -> Result<Vec<u8>, GatewayError> {
    let hex_part = value
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::Validation(format!("{} must be 0x-prefixed hex", field)))?;
    if hex_part.len() != bytes * 2 {
        return Err(GatewayError::Validation(format!(
            "{} must be {} hex characters",
            field,
            bytes * 2
        )));
    }
    if hex_part
        .chars()
        .any(|c| !c.is_ascii_hexdigit() || c.is_ascii_uppercase())
    {
        return Err(GatewayError::Validation(format!(
            "{} contains malformed hex",
            field
        )));
    }
    hex::decode(hex_part)
        .map_err(|_| GatewayError::Validation(format!("{} contains malformed hex", field)))
}

/// Reject device timestamps older than 7 days or more than 5 minutes
/// in the future, both measured against the server clock.
pub fn check_temporal(timestamp_ms: i64, now_ms: i64) -> Result<(), GatewayError> {
    if timestamp_ms < now_ms - MAX_TIMESTAMP_AGE_MS {
        return Err(GatewayError::Temporal("older than 7 days".to_string()));
    }
    if timestamp_ms > now_ms + MAX_TIMESTAMP_SKEW_MS {
        return Err(GatewayError::Temporal(
            "more than 5 minutes in the future".to_string(),
        ));
    }
    Ok(())
}

/// Chain side-effect status attached to responses that mirror to the
/// ledger; failures surface here as warnings, never as hard errors.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub success: bool,
    #[serde(rename = "txDigest", skip_serializing_if = "Option::is_none")]
    pub tx_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChainStatus {
    pub fn ok(tx_digest: impl Into<Option<String>>) -> Self {
        Self {
            success: true,
            tx_digest: tx_digest.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_digest: None,
            error: Some(error.into()),
        }
    }
}

/// Wire projection of a pet row.
#[derive(Debug, Clone, Serialize)]
pub struct PetView {
    pub pet_name: String,
    pub device_id: String,
    pub level: u8,
    pub experience: i64,
    pub total_steps_fed: i64,
    pub happiness: u8,
    pub hunger: u8,
    pub health: u8,
    pub food: i64,
    pub energy: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_object_id: Option<String>,
    pub on_chain: bool,
}

impl From<&PetState> for PetView {
    fn from(pet: &PetState) -> Self {
        Self {
            pet_name: pet.pet_name.clone(),
            device_id: pet.device_id.clone(),
            level: pet.level,
            experience: pet.experience,
            total_steps_fed: pet.total_steps_fed,
            happiness: pet.happiness,
            hunger: pet.hunger,
            health: pet.health,
            food: pet.food,
            energy: pet.energy,
            pet_object_id: pet.chain_pet_id.clone(),
            on_chain: pet.chain_pet_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "welcome")]
    Welcome { message: String, timestamp: i64 },

    #[serde(rename = "register_response")]
    RegisterResponse {
        success: bool,
        #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(rename = "txDigest", skip_serializing_if = "Option::is_none")]
        tx_digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<ChainStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "auth_response")]
    AuthResponse {
        success: bool,
        #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "step_data_response")]
    StepDataResponse {
        success: bool,
        #[serde(rename = "dataId", skip_serializing_if = "Option::is_none")]
        data_id: Option<i64>,
        #[serde(rename = "stepCount", skip_serializing_if = "Option::is_none")]
        step_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verified: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    #[serde(rename = "pet_data")]
    PetData {
        success: bool,
        pet: PetView,
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<ChainStatus>,
    },

    #[serde(rename = "pet_updated")]
    PetUpdated { success: bool },

    #[serde(rename = "resources_claimed")]
    ResourcesClaimed {
        success: bool,
        #[serde(rename = "foodGained")]
        food_gained: i64,
        #[serde(rename = "energyGained")]
        energy_gained: i64,
        food: i64,
        energy: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<ChainStatus>,
    },

    #[serde(rename = "pet_fed")]
    PetFed {
        success: bool,
        food: i64,
        hunger: u8,
        happiness: u8,
        experience: i64,
        level: u8,
        evolved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<ChainStatus>,
    },

    #[serde(rename = "pet_played")]
    PetPlayed {
        success: bool,
        energy: i64,
        happiness: u8,
        health: u8,
        experience: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<ChainStatus>,
    },

    #[serde(rename = "pet_error")]
    PetError { success: bool, error: String },

    #[serde(rename = "error")]
    Error { success: bool, error: String },
}

impl Outbound {
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            success: false,
            error: error.into(),
        }
    }

    pub fn pet_error(error: impl Into<String>) -> Self {
        Self::PetError {
            success: false,
            error: error.into(),
        }
    }
}
