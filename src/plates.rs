//! Plate recognition and authorization.
//!
//! Neither OCR nor a real plate database exists yet. Both sit behind traits
//! (`PlateRecognizer`, `PlateDatabase`) so a production backend can replace
//! the fixture stand-ins without touching the control loop.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::camera::Capture;
use crate::error::{LookupError, RecognitionError};

/// Plate text reported when nothing better is known about an image.
pub const UNKNOWN_PLATE: &str = "Unknown Plate";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlateRecord {
    pub image: String,
    pub plate: String,
}

impl PlateRecord {
    pub fn new(image: impl Into<String>, plate: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            plate: plate.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    records: Vec<PlateRecord>,
    /// Defaults to every plate in `records`.
    known: Option<Vec<String>>,
}

/// Static image→plate table plus the known-plate set.
#[derive(Clone, Debug)]
pub struct PlateFixtures {
    records: Vec<PlateRecord>,
    known: HashSet<String>,
}

impl PlateFixtures {
    pub fn new(records: Vec<PlateRecord>, known: Vec<String>) -> Self {
        Self {
            records,
            known: known.into_iter().collect(),
        }
    }

    /// The four sample cars shipped with the dashboard, all authorized.
    pub fn builtin() -> Self {
        let records = vec![
            PlateRecord::new("/images/test_license_plate1.jpg", "VHK-1164"),
            PlateRecord::new("/images/Cars118.png", "JA62 UAR"),
            PlateRecord::new("/images/normal.jpg", "R96-0YR"),
            PlateRecord::new("/images/Cars1.png", "PG-MN112"),
        ];
        let known = records.iter().map(|r| r.plate.clone()).collect();
        Self::new(records, known)
    }

    /// Load `{"records": [{"image", "plate"}], "known": [...]}`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read fixtures {}: {}", path.display(), e))?;
        let file: FixtureFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid fixtures {}: {}", path.display(), e))?;
        let known = file
            .known
            .unwrap_or_else(|| file.records.iter().map(|r| r.plate.clone()).collect());
        Ok(Self::new(file.records, known))
    }

    pub fn records(&self) -> &[PlateRecord] {
        &self.records
    }

    pub fn plate_for_image(&self, image: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.image == image)
            .map(|r| r.plate.as_str())
    }

    pub fn is_known(&self, plate: &str) -> bool {
        self.known.contains(plate)
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&PlateRecord> {
        self.records.choose(rng)
    }
}

impl Default for PlateFixtures {
    fn default() -> Self {
        Self::builtin()
    }
}

pub trait PlateRecognizer: Send {
    /// Read the plate in a captured image.
    fn recognize(&mut self, capture: &Capture) -> Result<String, RecognitionError>;
}

pub trait PlateDatabase: Send {
    /// Is `plate` authorized to enter?
    fn is_known(&mut self, plate: &str) -> Result<bool, LookupError>;
}

/// Recognizer backed by the fixture table.
///
/// Resolution order: fixture keyed by image path, then the camera's plate
/// hint, then `UNKNOWN_PLATE`.
pub struct FixtureRecognizer {
    fixtures: Arc<PlateFixtures>,
    delay: Duration,
}

impl FixtureRecognizer {
    pub fn new(fixtures: Arc<PlateFixtures>, delay: Duration) -> Self {
        Self { fixtures, delay }
    }
}

impl PlateRecognizer for FixtureRecognizer {
    fn recognize(&mut self, capture: &Capture) -> Result<String, RecognitionError> {
        log::info!("processing image: {}", capture.image_path);
        std::thread::sleep(self.delay);
        let plate = self
            .fixtures
            .plate_for_image(&capture.image_path)
            .or(capture.plate_hint.as_deref())
            .unwrap_or(UNKNOWN_PLATE);
        Ok(plate.to_string())
    }
}

/// Database backed by the fixture known-plate set, with an artificial
/// round-trip delay.
pub struct FixtureDatabase {
    fixtures: Arc<PlateFixtures>,
    delay: Duration,
}

impl FixtureDatabase {
    pub fn new(fixtures: Arc<PlateFixtures>, delay: Duration) -> Self {
        Self { fixtures, delay }
    }
}

impl PlateDatabase for FixtureDatabase {
    fn is_known(&mut self, plate: &str) -> Result<bool, LookupError> {
        log::info!("checking database for license plate: {}", plate);
        std::thread::sleep(self.delay);
        Ok(self.fixtures.is_known(plate))
    }
}

/// Known plates in a local SQLite table.
pub struct SqlitePlateDatabase {
    conn: Connection,
}

impl SqlitePlateDatabase {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS known_plates (
              plate TEXT PRIMARY KEY NOT NULL,
              added_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn add_plate(&mut self, plate: &str) -> Result<()> {
        let added_at = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT OR IGNORE INTO known_plates(plate, added_at) VALUES (?1, ?2)",
            params![plate, added_at],
        )?;
        Ok(())
    }

    /// Seed the table with the fixture known set, once.
    ///
    /// Only an empty table is seeded, so plates removed from an existing
    /// database stay removed across restarts. Returns how many were added.
    pub fn seed_if_empty(&mut self, fixtures: &PlateFixtures) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM known_plates", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }
        let mut added = 0;
        for record in fixtures.records() {
            if fixtures.is_known(&record.plate) && !self.lookup(&record.plate)? {
                self.add_plate(&record.plate)?;
                added += 1;
            }
        }
        Ok(added)
    }

    fn lookup(&self, plate: &str) -> Result<bool, rusqlite::Error> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM known_plates WHERE plate = ?1",
                params![plate],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl PlateDatabase for SqlitePlateDatabase {
    fn is_known(&mut self, plate: &str) -> Result<bool, LookupError> {
        Ok(self.lookup(plate)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(image: &str, hint: Option<&str>) -> Capture {
        Capture {
            image_path: image.to_string(),
            plate_hint: hint.map(str::to_string),
        }
    }

    #[test]
    fn recognizer_prefers_fixture_then_hint() {
        let fixtures = Arc::new(PlateFixtures::new(
            vec![PlateRecord::new("car_X.jpg", "ABC-123")],
            vec!["ABC-123".to_string()],
        ));
        let mut recognizer = FixtureRecognizer::new(fixtures, Duration::ZERO);

        let by_path = recognizer.recognize(&capture("car_X.jpg", Some("OTHER"))).unwrap();
        assert_eq!(by_path, "ABC-123");

        let by_hint = recognizer.recognize(&capture("car_Y.jpg", Some("XYZ-1"))).unwrap();
        assert_eq!(by_hint, "XYZ-1");

        let unknown = recognizer.recognize(&capture("car_Z.jpg", None)).unwrap();
        assert_eq!(unknown, UNKNOWN_PLATE);
    }

    #[test]
    fn fixture_database_checks_known_set() {
        let fixtures = Arc::new(PlateFixtures::new(
            vec![
                PlateRecord::new("a.jpg", "ABC-123"),
                PlateRecord::new("b.jpg", "ZZZ-999"),
            ],
            vec!["ABC-123".to_string()],
        ));
        let mut db = FixtureDatabase::new(fixtures, Duration::ZERO);
        assert!(db.is_known("ABC-123").unwrap());
        assert!(!db.is_known("ZZZ-999").unwrap());
        assert!(!db.is_known(UNKNOWN_PLATE).unwrap());
    }

    #[test]
    fn builtin_fixtures_are_all_known() {
        let fixtures = PlateFixtures::builtin();
        assert_eq!(fixtures.records().len(), 4);
        assert!(fixtures.records().iter().all(|r| fixtures.is_known(&r.plate)));
        assert_eq!(
            fixtures.plate_for_image("/images/Cars118.png"),
            Some("JA62 UAR")
        );
    }

    #[test]
    fn fixtures_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        std::fs::write(
            &path,
            r#"{
                "records": [
                    {"image": "/images/a.jpg", "plate": "AAA-111"},
                    {"image": "/images/b.jpg", "plate": "BBB-222"}
                ],
                "known": ["BBB-222"]
            }"#,
        )
        .unwrap();

        let fixtures = PlateFixtures::from_file(&path).unwrap();
        assert_eq!(fixtures.plate_for_image("/images/a.jpg"), Some("AAA-111"));
        assert!(!fixtures.is_known("AAA-111"));
        assert!(fixtures.is_known("BBB-222"));
    }

    #[test]
    fn sqlite_database_tracks_plates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.db");
        let mut db = SqlitePlateDatabase::open(path.to_str().unwrap()).unwrap();

        assert_eq!(db.seed_if_empty(&PlateFixtures::builtin()).unwrap(), 4);
        assert!(db.is_known("VHK-1164").unwrap());
        assert!(!db.is_known("ZZZ-999").unwrap());

        db.add_plate("ZZZ-999").unwrap();
        db.add_plate("ZZZ-999").unwrap();
        assert!(db.is_known("ZZZ-999").unwrap());
    }

    #[test]
    fn removed_plates_stay_removed_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.db");
        let path = path.to_str().unwrap();

        let mut db = SqlitePlateDatabase::open(path).unwrap();
        assert_eq!(db.seed_if_empty(&PlateFixtures::builtin()).unwrap(), 4);
        // operator revokes a plate out of band
        db.conn
            .execute("DELETE FROM known_plates WHERE plate = 'VHK-1164'", [])
            .unwrap();
        drop(db);

        let mut db = SqlitePlateDatabase::open(path).unwrap();
        assert_eq!(db.seed_if_empty(&PlateFixtures::builtin()).unwrap(), 0);
        assert!(!db.is_known("VHK-1164").unwrap());
        assert!(db.is_known("JA62 UAR").unwrap());
    }
}
