//! Scheduled batch submitter.
//!
//! Scans the pending set, aggregates per device in receive order,
//! submits one chain transaction per device and marks the drained
//! records. One failing device never prevents the others from
//! succeeding in the same run; records whose chain call failed stay
//! pending for the next run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::chain::{ChainError, ChainGateway};
use crate::store::{Store, StoreError, SubmissionRecord};

#[derive(Debug, Clone, Serialize)]
pub struct BatchDeviceOutcome {
    pub device_id: String,
    pub records: usize,
    pub total_steps: u64,
    pub success: bool,
    pub tx_digest: Option<String>,
    pub error: Option<String>,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: i64,
    pub pending_records: usize,
    pub submitted_records: usize,
    pub devices: Vec<BatchDeviceOutcome>,
}

impl BatchSummary {
    fn empty(started_at: i64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            pending_records: 0,
            submitted_records: 0,
            devices: Vec::new(),
        }
    }
}

/// Run one batch pass. Re-running never double-submits: marked records
/// are excluded by the pending scan, and marking is a single commit.
pub async fn run_batch(
    store: &Store,
    chain: &dyn ChainGateway,
    call_timeout: Duration,
) -> Result<BatchSummary, StoreError> {
    let started_at = chrono::Utc::now().timestamp();
    let pending = store.list_pending(None)?;
    if pending.is_empty() {
        return Ok(BatchSummary::empty(started_at));
    }

    let mut summary = BatchSummary::empty(started_at);
    summary.pending_records = pending.len();

    // Receive-time order within each device is preserved by the scan
    // order; ordering across devices is not part of the contract.
    let mut by_device: BTreeMap<String, Vec<SubmissionRecord>> = BTreeMap::new();
    for record in pending {
        by_device.entry(record.device_id.clone()).or_default().push(record);
    }

    tracing::info!(
        run_id = %summary.run_id,
        devices = by_device.len(),
        records = summary.pending_records,
        "starting batch submission"
    );

    for (device_id, records) in by_device {
        let outcome = submit_device(store, chain, call_timeout, &device_id, &records).await;
        if outcome.success {
            summary.submitted_records += outcome.records;
        } else {
            tracing::warn!(
                run_id = %summary.run_id,
                device_id = %device_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "batch submission failed for device"
            );
        }
        summary.devices.push(outcome);
    }

    tracing::info!(
        run_id = %summary.run_id,
        submitted = summary.submitted_records,
        pending = summary.pending_records,
        "batch submission finished"
    );
    Ok(summary)
}

async fn submit_device(
    store: &Store,
    chain: &dyn ChainGateway,
    call_timeout: Duration,
    device_id: &str,
    records: &[SubmissionRecord],
) -> BatchDeviceOutcome {
    let total_steps: u64 = records.iter().map(|r| r.step_count as u64).sum();
    let mut outcome = BatchDeviceOutcome {
        device_id: device_id.to_string(),
        records: records.len(),
        total_steps,
        success: false,
        tx_digest: None,
        error: None,
        retryable: false,
    };

    let chain_device_id = match store.get_device(device_id) {
        Ok(Some(device)) => match device.chain_device_id {
            Some(handle) => handle,
            None => {
                outcome.error = Some("device has no chain handle".to_string());
                outcome.retryable = true;
                return outcome;
            }
        },
        Ok(None) => {
            outcome.error = Some("device no longer exists".to_string());
            return outcome;
        }
        Err(e) => {
            outcome.error = Some(e.to_string());
            outcome.retryable = true;
            return outcome;
        }
    };

    let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
    let signatures: Vec<Vec<u8>> = records.iter().map(|r| r.signature.clone()).collect();

    let call = chain.submit_step_data(&chain_device_id, total_steps, &timestamps, &signatures);
    let receipt = match tokio::time::timeout(call_timeout, call).await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(e)) => {
            outcome.retryable = e.is_retryable();
            outcome.error = Some(e.to_string());
            return outcome;
        }
        Err(_) => {
            let e = ChainError::Timeout;
            outcome.retryable = e.is_retryable();
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };

    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    match store.mark_submitted(&ids, &receipt.tx_digest) {
        Ok(()) => {
            outcome.success = true;
            outcome.tx_digest = Some(receipt.tx_digest);
        }
        Err(e) => {
            // The chain accepted the transaction but marking failed; the
            // records stay pending and will be resubmitted next run
            // (accepted at-least-once-toward-chain behavior).
            outcome.error = Some(format!("marking failed after chain success: {}", e));
            outcome.retryable = true;
        }
    }
    outcome
}
