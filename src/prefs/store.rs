//! Persistenz der Volume-Einstellungen
//!
//! SQLite-Datenbank für Gain-Overrides und das Deafen-Flag. Einfacher
//! Key-Value-Store; die Einstellungen überleben Call-Sessions und
//! App-Neustarts.

use parking_lot::Mutex;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),
}

// ============================================================================
// PREFERENCES STORE
// ============================================================================

/// SQLite-Store für Volume-Einstellungen (thread-safe durch Mutex)
pub struct PreferencesStore {
    conn: Mutex<Connection>,
}

impl PreferencesStore {
    /// Öffnet oder erstellt die Datenbank im App-Datenverzeichnis
    pub fn open() -> Result<Self, StoreError> {
        let db_path = Self::database_path()?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening preferences store at {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// In-Memory Store für Tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Ermittelt den Pfad zur Datenbank-Datei
    fn database_path() -> Result<PathBuf, StoreError> {
        let proj_dirs = directories::ProjectDirs::from("com", "ripple", "ripple-voice")
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("voice-prefs.db");
        Ok(path)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS volume_overrides (
                user_id TEXT PRIMARY KEY,
                gain REAL NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(())
    }

    /// Lädt alle Overrides und das Deafen-Flag
    pub fn load(&self) -> Result<(Vec<(String, f32)>, bool), StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, gain FROM volume_overrides
            "#,
        )?;
        let overrides = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32)))?
            .collect::<SqliteResult<Vec<(String, f32)>>>()?;

        let deafened = conn
            .query_row(
                r#"SELECT value FROM settings WHERE key = 'deafened'"#,
                [],
                |row| row.get::<_, String>(0),
            )
            .map(|v| v == "1")
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(other),
            })?;

        Ok((overrides, deafened))
    }

    /// Speichert oder löscht einen Gain-Override
    pub fn save_volume(&self, user_id: &str, gain: Option<f32>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        match gain {
            Some(gain) => {
                conn.execute(
                    r#"
                    INSERT INTO volume_overrides (user_id, gain)
                    VALUES (?1, ?2)
                    ON CONFLICT(user_id) DO UPDATE SET
                        gain = excluded.gain,
                        updated_at = datetime('now')
                    "#,
                    params![user_id, gain as f64],
                )?;
            }
            None => {
                conn.execute(
                    r#"
                    DELETE FROM volume_overrides
                    WHERE user_id = ?1
                    "#,
                    params![user_id],
                )?;
            }
        }
        Ok(())
    }

    /// Speichert das Deafen-Flag
    pub fn save_deafened(&self, deafened: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO settings (key, value)
            VALUES ('deafened', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![if deafened { "1" } else { "0" }],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
