//! Persisted model types.

use serde::{Deserialize, Serialize};

/// A registered hardware witness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    /// 32-byte Ed25519 public key, unique across devices.
    pub public_key: Vec<u8>,
    pub registered_at: i64,
    pub last_seen: i64,
    pub total_steps: i64,
    pub total_submissions: i64,
    pub status: DeviceStatus,
    /// Opaque handle assigned by the chain after on-chain registration.
    pub chain_device_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Suspended,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => Self::Suspended,
            _ => Self::Active,
        }
    }
}

/// A verified activity batch awaiting (or past) chain submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub device_id: String,
    pub step_count: u32,
    /// Device-supplied wall clock, milliseconds.
    pub timestamp: i64,
    pub firmware_version: u32,
    pub battery_percent: u8,
    pub raw_acc_samples: Vec<[f32; 3]>,
    pub signature: Vec<u8>,
    pub verified: bool,
    pub received_at: i64,
    pub submitted: bool,
    pub tx_digest: Option<String>,
}

/// Per-device derived pet state mirroring on-chain counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetState {
    pub id: i64,
    pub device_id: String,
    pub pet_name: String,
    pub level: u8,
    pub experience: i64,
    pub total_steps_fed: i64,
    pub happiness: u8,
    pub hunger: u8,
    pub health: u8,
    pub food: i64,
    pub energy: i64,
    pub created_at: i64,
    pub last_fed: i64,
    pub last_played: i64,
    pub color: Option<String>,
    /// Opaque handle of the on-chain pet object, once created.
    pub chain_pet_id: Option<String>,
}

/// Optional field set for a device-pushed pet sync. Every value is
/// clamped into its bound before persistence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PetUpdate {
    pub happiness: Option<i64>,
    pub hunger: Option<i64>,
    pub health: Option<i64>,
    pub experience: Option<i64>,
    pub total_steps_fed: Option<i64>,
    pub level: Option<i64>,
    pub food: Option<i64>,
    pub energy: Option<i64>,
}
