//! Trust Oracle Core Library
//!
//! Core functionality for the hardware-witness telemetry gateway: the
//! canonical signing form, Ed25519 submission verification, the durable
//! store (devices, submissions, pets), the chain gateway adapter and the
//! scheduled batch submitter.

pub mod batch;
pub mod canonical;
pub mod chain;
pub mod pet;
pub mod store;
pub mod verify;

pub use batch::{run_batch, BatchDeviceOutcome, BatchSummary};
pub use canonical::{canonical_json, StepPayload};
pub use chain::{ChainError, ChainGateway, ChainSettings, PetSnapshot};
pub use store::{Device, PetState, Store, StoreError, SubmissionRecord};
pub use verify::{canonical_digest, verify_step_signature};
