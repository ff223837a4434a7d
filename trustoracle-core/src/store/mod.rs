//! SQLite-backed durable store.
//!
//! Single-writer storage fronting the `devices` and `submissions`
//! tables plus `pets`. Every state transition commits before the
//! response frame that reports it is enqueued; connections are
//! ephemeral and forgotten on restart while these tables resume
//! unchanged.

mod devices;
pub mod models;
mod pets;
mod submissions;

pub use models::{Device, DeviceStatus, PetState, PetUpdate, SubmissionRecord};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device id is already registered with a different public key")]
    PublicKeyMismatch,

    #[error("Public key is already registered to another device")]
    PublicKeyInUse,

    #[error("Duplicate submission for this device and timestamp")]
    DuplicateSubmission,

    #[error("Submission {0} does not exist or is already submitted")]
    UnknownSubmission(i64),

    #[error("No food available")]
    NoFood,

    #[error("No energy available")]
    NoEnergy,

    #[error("Internal store error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Thread-safe handle to the gateway database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY,
                public_key BLOB NOT NULL UNIQUE,
                registered_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                total_steps INTEGER NOT NULL DEFAULT 0,
                total_submissions INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                chain_device_id TEXT
            );

            CREATE TABLE IF NOT EXISTS submissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                step_count INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                firmware_version INTEGER NOT NULL,
                battery_percent INTEGER NOT NULL,
                raw_acc_samples TEXT NOT NULL,
                signature BLOB NOT NULL,
                verified INTEGER NOT NULL DEFAULT 1,
                received_at INTEGER NOT NULL,
                submitted INTEGER NOT NULL DEFAULT 0,
                tx_digest TEXT,
                UNIQUE (device_id, timestamp),
                FOREIGN KEY (device_id) REFERENCES devices(device_id)
            );

            CREATE TABLE IF NOT EXISTS pets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL UNIQUE,
                pet_name TEXT NOT NULL,
                level INTEGER NOT NULL DEFAULT 0,
                experience INTEGER NOT NULL DEFAULT 0,
                total_steps_fed INTEGER NOT NULL DEFAULT 0,
                happiness INTEGER NOT NULL DEFAULT 50,
                hunger INTEGER NOT NULL DEFAULT 50,
                health INTEGER NOT NULL DEFAULT 100,
                food INTEGER NOT NULL DEFAULT 5,
                energy INTEGER NOT NULL DEFAULT 5,
                created_at INTEGER NOT NULL,
                last_fed INTEGER NOT NULL,
                last_played INTEGER NOT NULL,
                color TEXT,
                chain_pet_id TEXT,
                FOREIGN KEY (device_id) REFERENCES devices(device_id)
            );

            CREATE INDEX IF NOT EXISTS idx_submissions_pending
                ON submissions(submitted, verified);
            CREATE INDEX IF NOT EXISTS idx_submissions_device
                ON submissions(device_id);",
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("Lock error: {}", e)))
    }

    pub(crate) fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}
