use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::migrations;
use crate::models::{BlockTier, Settings};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored JSON for key {key}: {source}")]
    InvalidJson {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create data directory: {0}")]
    DataDir(#[from] std::io::Error),
}

/// Database connection wrapper.
///
/// The wrapped `rusqlite::Connection` is `Send` but not `Sync`; the
/// daemon keeps its `Store` on the engine task and the CLI opens its
/// own connection, so no external synchronization is needed.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the store at the given path, creating file and schema as
    /// needed. `None` uses the default path under the user data dir.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection opening, or
    /// schema initialization fails.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        migrations::init_schema(&conn)?;

        log::info!("store initialized at {}", path.display());
        Ok(Self { conn })
    }

    /// Default database path under the user's local data directory.
    fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("tabwarden");
        path.push("tabwarden.db");
        path
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// Local date string of the last ledger reset, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn last_reset_date(&self) -> Result<Option<String>, StoreError> {
        self.get_meta("last_reset_date")
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_last_reset_date(&self, date: &str) -> Result<(), StoreError> {
        self.set_meta("last_reset_date", date)
    }

    /// Load the full hostname → milliseconds map for the current day.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_usage(&self) -> Result<HashMap<String, u64>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT hostname, ms FROM daily_usage")?;
        let rows = stmt.query_map([], |row| {
            let hostname: String = row.get(0)?;
            let ms: i64 = row.get(1)?;
            Ok((hostname, ms.max(0) as u64))
        })?;

        let mut usage = HashMap::new();
        for row in rows {
            let (hostname, ms) = row?;
            usage.insert(hostname, ms);
        }
        Ok(usage)
    }

    /// Write through the authoritative accumulated total for one
    /// hostname. Overwrites any previous value, so a write that failed
    /// earlier converges on the next successful one.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_usage(&self, hostname: &str, ms: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO daily_usage (hostname, ms) VALUES (?1, ?2)
             ON CONFLICT(hostname) DO UPDATE SET ms = ?2",
            params![hostname, i64::try_from(ms).unwrap_or(i64::MAX)],
        )?;
        Ok(())
    }

    /// Remove every usage row. Blocklists and settings are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_usage(&self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM daily_usage", [])?;
        Ok(())
    }

    /// Ordered pattern list for the given tier. Missing key reads as
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored JSON is not a
    /// string array.
    pub fn block_patterns(&self, tier: BlockTier) -> Result<Vec<String>, StoreError> {
        match self.get_meta(tier.meta_key())? {
            Some(json) => {
                serde_json::from_str(&json).map_err(|source| StoreError::InvalidJson {
                    key: tier.meta_key(),
                    source,
                })
            }
            None => Ok(Vec::new()),
        }
    }

    /// Replace the pattern list for the given tier, preserving order.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn set_block_patterns(
        &self,
        tier: BlockTier,
        patterns: &[String],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(patterns).map_err(|source| StoreError::InvalidJson {
            key: tier.meta_key(),
            source,
        })?;
        self.set_meta(tier.meta_key(), &json)
    }

    /// Opaque key for the negotiation UI. The daemon never reads this;
    /// it exists so the CLI can play the settings collaborator.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn api_key(&self) -> Result<Option<String>, StoreError> {
        self.get_meta("api_key")
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_api_key(&self, key: &str) -> Result<(), StoreError> {
        self.set_meta("api_key", key)
    }

    /// Daemon settings; defaults if never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored JSON is
    /// malformed.
    pub fn settings(&self) -> Result<Settings, StoreError> {
        match self.get_meta("settings")? {
            Some(json) => {
                serde_json::from_str(&json).map_err(|source| StoreError::InvalidJson {
                    key: "settings",
                    source,
                })
            }
            None => Ok(Settings::default()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let json = serde_json::to_string(settings).map_err(|source| StoreError::InvalidJson {
            key: "settings",
            source,
        })?;
        self.set_meta("settings", &json)
    }
}
