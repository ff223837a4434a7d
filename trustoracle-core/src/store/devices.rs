//! Device registry operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{Device, DeviceStatus};
use super::{Result, Store, StoreError};

impl Store {
    /// Register a device, idempotently.
    ///
    /// Re-registration with the same key refreshes `last_seen` and
    /// returns the existing record. A known device id presenting a
    /// different key, or a key already bound to another device id, is
    /// rejected.
    pub fn register_device(&self, device_id: &str, public_key: &[u8]) -> Result<Device> {
        let conn = self.conn()?;
        let now = Self::now();

        if let Some(existing) = query_device(&conn, device_id)? {
            if existing.public_key != public_key {
                return Err(StoreError::PublicKeyMismatch);
            }
            conn.execute(
                "UPDATE devices SET last_seen = ?1 WHERE device_id = ?2",
                params![now, device_id],
            )?;
            return Ok(Device {
                last_seen: now,
                ..existing
            });
        }

        let key_taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE public_key = ?1)",
            params![public_key],
            |row| row.get(0),
        )?;
        if key_taken {
            return Err(StoreError::PublicKeyInUse);
        }

        conn.execute(
            "INSERT INTO devices (device_id, public_key, registered_at, last_seen)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_id, public_key, now, now],
        )?;

        query_device(&conn, device_id)?.ok_or_else(|| {
            StoreError::Internal(format!("device {} vanished after insert", device_id))
        })
    }

    /// Read-only device lookup; the submission hot path.
    pub fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let conn = self.conn()?;
        query_device(&conn, device_id)
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, public_key, registered_at, last_seen, total_steps,
                    total_submissions, status, chain_device_id
             FROM devices ORDER BY registered_at ASC",
        )?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    /// Record the handle the chain assigned to this device.
    pub fn set_chain_device_id(&self, device_id: &str, chain_device_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE devices SET chain_device_id = ?1 WHERE device_id = ?2",
            params![chain_device_id, device_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownDevice(device_id.to_string()));
        }
        Ok(())
    }

    pub fn count_devices(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?)
    }
}

fn query_device(conn: &Connection, device_id: &str) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            "SELECT device_id, public_key, registered_at, last_seen, total_steps,
                    total_submissions, status, chain_device_id
             FROM devices WHERE device_id = ?1",
            params![device_id],
            device_from_row,
        )
        .optional()?;
    Ok(device)
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let status: String = row.get(6)?;
    Ok(Device {
        device_id: row.get(0)?,
        public_key: row.get(1)?,
        registered_at: row.get(2)?,
        last_seen: row.get(3)?,
        total_steps: row.get(4)?,
        total_submissions: row.get(5)?,
        status: DeviceStatus::parse(&status),
        chain_device_id: row.get(7)?,
    })
}
