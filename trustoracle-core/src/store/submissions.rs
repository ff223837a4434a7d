//! Submission records: append, pending scan, at-most-once marking.

use rusqlite::{params, Row};

use crate::canonical::StepPayload;

use super::models::SubmissionRecord;
use super::{Result, Store, StoreError};

impl Store {
    /// Atomically insert a verified submission, bump the owning
    /// device's cumulative step count and refresh `last_seen`.
    ///
    /// Returns the new record id. Rejects an unknown device and a
    /// duplicate (device id, device timestamp) pair.
    pub fn store_submission(
        &self,
        device_id: &str,
        payload: &StepPayload,
        signature: &[u8],
    ) -> Result<i64> {
        let mut conn = self.conn()?;
        let now = Self::now();
        let tx = conn.transaction()?;

        let known: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE device_id = ?1)",
            params![device_id],
            |row| row.get(0),
        )?;
        if !known {
            return Err(StoreError::UnknownDevice(device_id.to_string()));
        }

        let duplicate: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM submissions WHERE device_id = ?1 AND timestamp = ?2)",
            params![device_id, payload.timestamp as i64],
            |row| row.get(0),
        )?;
        if duplicate {
            return Err(StoreError::DuplicateSubmission);
        }

        let samples = serde_json::to_string(&payload.raw_acc_samples)
            .map_err(|e| StoreError::Internal(format!("sample encoding: {}", e)))?;

        tx.execute(
            "INSERT INTO submissions (device_id, step_count, timestamp, firmware_version,
                                      battery_percent, raw_acc_samples, signature, verified,
                                      received_at, submitted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, 0)",
            params![
                device_id,
                payload.step_count,
                payload.timestamp as i64,
                payload.firmware_version,
                payload.battery_percent,
                samples,
                signature,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE devices SET total_steps = total_steps + ?1, last_seen = ?2
             WHERE device_id = ?3",
            params![payload.step_count, now, device_id],
        )?;

        tx.commit()?;
        Ok(id)
    }

    /// Verified-but-unsubmitted records, receive-time ascending.
    pub fn list_pending(&self, device_id: Option<&str>) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn()?;
        let sql = "SELECT id, device_id, step_count, timestamp, firmware_version,
                          battery_percent, raw_acc_samples, signature, verified,
                          received_at, submitted, tx_digest
                   FROM submissions
                   WHERE verified = 1 AND submitted = 0 AND (?1 IS NULL OR device_id = ?1)
                   ORDER BY received_at ASC, id ASC";
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params![device_id], submission_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Flip `submitted` and attach the transaction digest on all listed
    /// records, and bump `total_submissions` once per affected device.
    /// Single commit: every listed id flips or none does.
    pub fn mark_submitted(&self, ids: &[i64], tx_digest: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for id in ids {
            let updated = tx.execute(
                "UPDATE submissions SET submitted = 1, tx_digest = ?1
                 WHERE id = ?2 AND verified = 1 AND submitted = 0",
                params![tx_digest, id],
            )?;
            if updated != 1 {
                return Err(StoreError::UnknownSubmission(*id));
            }
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "UPDATE devices SET total_submissions = total_submissions + 1
             WHERE device_id IN (SELECT DISTINCT device_id FROM submissions WHERE id IN ({}))",
            placeholders
        );
        tx.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;

        tx.commit()?;
        Ok(())
    }

    /// Recent submissions for one device, newest first.
    pub fn list_for_device(&self, device_id: &str, limit: usize) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, device_id, step_count, timestamp, firmware_version,
                    battery_percent, raw_acc_samples, signature, verified,
                    received_at, submitted, tx_digest
             FROM submissions WHERE device_id = ?1
             ORDER BY received_at DESC, id DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![device_id, limit as i64], submission_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_pending(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM submissions WHERE verified = 1 AND submitted = 0",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn count_submissions(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM submissions", [], |row| row.get(0))?)
    }
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<SubmissionRecord> {
    let samples_json: String = row.get(6)?;
    let raw_acc_samples = serde_json::from_str(&samples_json).unwrap_or_default();
    Ok(SubmissionRecord {
        id: row.get(0)?,
        device_id: row.get(1)?,
        step_count: row.get(2)?,
        timestamp: row.get(3)?,
        firmware_version: row.get(4)?,
        battery_percent: row.get(5)?,
        raw_acc_samples,
        signature: row.get(7)?,
        verified: row.get(8)?,
        received_at: row.get(9)?,
        submitted: row.get(10)?,
        tx_digest: row.get(11)?,
    })
}
