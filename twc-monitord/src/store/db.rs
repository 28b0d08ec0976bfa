use std::path::Path;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::types::{VitalRecord, Vitals};
use super::StoreError;

pub struct StoreDb {
    conn: Connection,
}

impl StoreDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS device_address (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                ip       TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vitals (
                id          INTEGER PRIMARY KEY,
                ip          TEXT NOT NULL,
                vital       TEXT NOT NULL,
                captured_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_vitals_captured_at ON vitals(captured_at);
            "#,
        )?;

        Ok(Self { conn })
    }

    /// The most recently saved device address. Older rows are superseded.
    pub fn get_address(&self) -> Result<String, StoreError> {
        let ip: Option<String> = self
            .conn
            .query_row(
                "SELECT ip FROM device_address ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match ip {
            Some(ip) if !ip.is_empty() => Ok(ip),
            _ => Err(StoreError::NotFound),
        }
    }

    pub fn save_address(&self, ip: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO device_address (ip, saved_at) VALUES (?1, ?2)",
            params![ip, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Append one vitals sample. Samples are never updated or deleted.
    pub fn record_sample(
        &self,
        ip: &str,
        vitals: &Vitals,
        captured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let vital_json = serde_json::to_string(vitals)?;

        self.conn.execute(
            "INSERT INTO vitals (ip, vital, captured_at) VALUES (?1, ?2, ?3)",
            params![ip, vital_json, captured_at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// All samples captured strictly after `since`, oldest first
    pub fn query_samples(&self, since: DateTime<Utc>) -> Result<Vec<VitalRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT captured_at, vital FROM vitals
             WHERE captured_at > ?1
             ORDER BY captured_at, id",
        )?;

        let rows = stmt
            .query_map([since.timestamp_millis()], |row| {
                let captured_at: i64 = row.get(0)?;
                let vital: String = row.get(1)?;
                Ok((captured_at, vital))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(captured_at, vital)| -> Result<VitalRecord, StoreError> {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(captured_at)
                    .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, captured_at))?;
                let vital = serde_json::from_str(&vital)?;
                Ok(VitalRecord { timestamp, vital })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_vitals;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_address_roundtrip() {
        let db = StoreDb::open(":memory:").unwrap();

        db.save_address("192.168.1.40").unwrap();
        assert_eq!(db.get_address().unwrap(), "192.168.1.40");
    }

    #[test]
    fn test_missing_address_is_not_found() {
        let db = StoreDb::open(":memory:").unwrap();
        assert!(matches!(db.get_address(), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_newer_address_supersedes_older() {
        let db = StoreDb::open(":memory:").unwrap();

        db.save_address("192.168.1.40").unwrap();
        db.save_address("192.168.1.41").unwrap();
        // Saving a duplicate value is allowed
        db.save_address("192.168.1.41").unwrap();

        assert_eq!(db.get_address().unwrap(), "192.168.1.41");
    }

    #[test]
    fn test_query_empty_store() {
        let db = StoreDb::open(":memory:").unwrap();
        let samples = db.query_samples(at(0)).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_query_returns_samples_after_cutoff_in_order() {
        let db = StoreDb::open(":memory:").unwrap();

        for (secs, session) in [(100, 1), (200, 2), (300, 3)] {
            let mut vitals = sample_vitals();
            vitals.session_secs = session;
            db.record_sample("192.168.1.40", &vitals, at(secs)).unwrap();
        }

        let samples = db.query_samples(at(150)).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, at(200));
        assert_eq!(samples[0].vital.session_secs, 2);
        assert_eq!(samples[1].timestamp, at(300));
        assert_eq!(samples[1].vital.session_secs, 3);
    }

    #[test]
    fn test_query_cutoff_is_exclusive() {
        let db = StoreDb::open(":memory:").unwrap();
        let times: Vec<i64> = (1..=10).map(|i| i * 10).collect();

        for &secs in &times {
            db.record_sample("192.168.1.40", &sample_vitals(), at(secs)).unwrap();
        }

        for cutoff in [0, 10, 15, 50, 100, 200] {
            let expected: Vec<_> = times.iter().filter(|&&t| t > cutoff).map(|&t| at(t)).collect();
            let got: Vec<_> = db
                .query_samples(at(cutoff))
                .unwrap()
                .into_iter()
                .map(|r| r.timestamp)
                .collect();
            assert_eq!(got, expected, "cutoff {}", cutoff);
        }
    }

    #[test]
    fn test_duplicate_samples_are_kept() {
        let db = StoreDb::open(":memory:").unwrap();
        let vitals = sample_vitals();

        db.record_sample("192.168.1.40", &vitals, at(100)).unwrap();
        db.record_sample("192.168.1.40", &vitals, at(100)).unwrap();

        assert_eq!(db.query_samples(at(0)).unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_file_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("twc.db");

        {
            let db = StoreDb::open(&path).unwrap();
            db.save_address("10.0.0.7").unwrap();
            db.record_sample("10.0.0.7", &sample_vitals(), at(500)).unwrap();
        }

        let db = StoreDb::open(&path).unwrap();
        assert_eq!(db.get_address().unwrap(), "10.0.0.7");
        assert_eq!(db.query_samples(at(0)).unwrap().len(), 1);
    }
}
