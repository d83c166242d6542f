use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex).
///
/// Every learner update is a single atomic upsert statement with the new
/// values computed server-side, so concurrent writers cannot lose updates
/// to the same key.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent).
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Predictions ──────────────────────────────────────────────────────────

    /// Insert a new recommendation record; returns its row id.
    pub fn insert_prediction(&self, pred: &Prediction) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO predictions (
                category, features, odds, raw_confidence, confidence,
                stake_percent, expected_value, outcome, session, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                pred.category,
                pred.features_json,
                pred.odds,
                pred.raw_confidence,
                pred.confidence,
                pred.stake_percent,
                pred.expected_value,
                pred.outcome,
                pred.session,
                pred.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Set the outcome of a pending prediction. The guard on the current
    /// outcome makes settlement a one-shot operation.
    pub fn settle_prediction(&self, id: i64, outcome: Outcome) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE predictions SET outcome=?1, settled_at=?2
             WHERE id=?3 AND outcome='pending'",
            params![outcome.as_str(), Utc::now(), id],
        )?;
        Ok(changed == 1)
    }

    pub fn get_prediction(&self, id: i64) -> Result<Option<Prediction>> {
        let conn = self.conn.lock().unwrap();
        let pred = conn
            .query_row(
                "SELECT id, category, features, odds, raw_confidence, confidence,
                        stake_percent, expected_value, outcome, session,
                        created_at, settled_at
                 FROM predictions WHERE id=?1",
                params![id],
                map_prediction,
            )
            .optional()?;
        Ok(pred)
    }

    /// Deduplication maintenance: drop pending predictions that duplicate an
    /// earlier row with the same category, features and odds. Returns the
    /// number of rows removed.
    pub fn dedupe_predictions(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM predictions
             WHERE outcome='pending' AND id NOT IN (
                SELECT MIN(id) FROM predictions WHERE outcome='pending'
                GROUP BY category, features, odds
             )",
            [],
        )?;
        Ok(removed)
    }

    /// Settled win/loss sample count for a category (pushes excluded).
    pub fn labeled_sample_count(&self, category: BetCategory) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions
             WHERE category=?1 AND outcome IN ('win','loss')",
            params![category.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn pending_sample_count(&self, category: BetCategory) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE category=?1 AND outcome='pending'",
            params![category.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// All labeled samples for a category, oldest first.
    pub fn load_training_samples(&self, category: BetCategory) -> Result<Vec<TrainingSample>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT features, outcome FROM predictions
             WHERE category=?1 AND outcome IN ('win','loss')
             ORDER BY settled_at ASC",
        )?;
        let samples = stmt
            .query_map(params![category.as_str()], map_training_sample)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    /// The most recently settled labeled samples, newest first.
    pub fn recent_training_samples(
        &self,
        category: BetCategory,
        limit: i64,
    ) -> Result<Vec<TrainingSample>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT features, outcome FROM predictions
             WHERE category=?1 AND outcome IN ('win','loss')
             ORDER BY settled_at DESC LIMIT ?2",
        )?;
        let samples = stmt
            .query_map(params![category.as_str(), limit], map_training_sample)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    // ── Calibration records ──────────────────────────────────────────────────

    /// Atomic increment of one (category, band) record. The factor is
    /// recomputed server-side as win_rate / band_midpoint and stored
    /// unclamped.
    pub fn record_calibration_outcome(
        &self,
        category: BetCategory,
        band: &str,
        won: bool,
        band_midpoint: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO calibration_records
                (category, band, predicted_count, actual_wins, calibration_factor)
             VALUES (?1, ?2, 1, ?3, (?3 * 1.0) / ?4)
             ON CONFLICT(category, band) DO UPDATE SET
                predicted_count = predicted_count + 1,
                actual_wins = actual_wins + ?3,
                calibration_factor =
                    ((actual_wins + ?3) * 1.0 / (predicted_count + 1)) / ?4",
            params![category.as_str(), band, won as i64, band_midpoint],
        )?;
        Ok(())
    }

    pub fn get_calibration(
        &self,
        category: BetCategory,
        band: &str,
    ) -> Result<Option<CalibrationRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT category, band, predicted_count, actual_wins, calibration_factor
                 FROM calibration_records WHERE category=?1 AND band=?2",
                params![category.as_str(), band],
                map_calibration,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_calibrations(&self, category: BetCategory) -> Result<Vec<CalibrationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category, band, predicted_count, actual_wins, calibration_factor
             FROM calibration_records WHERE category=?1 ORDER BY band",
        )?;
        let records = stmt
            .query_map(params![category.as_str()], map_calibration)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ── Pattern records ──────────────────────────────────────────────────────

    pub fn record_pattern_outcome(&self, pattern: &str, won: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pattern_records (pattern, wins, losses) VALUES (?1, ?2, ?3)
             ON CONFLICT(pattern) DO UPDATE SET
                wins = wins + ?2,
                losses = losses + ?3",
            params![pattern, won as i64, !won as i64],
        )?;
        Ok(())
    }

    pub fn get_pattern(&self, pattern: &str) -> Result<Option<PatternRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT pattern, wins, losses FROM pattern_records WHERE pattern=?1",
                params![pattern],
                map_pattern,
            )
            .optional()?;
        Ok(record)
    }

    /// Patterns with at least `min_total` observations, ordered by win rate.
    pub fn list_patterns_by_win_rate(
        &self,
        min_total: i64,
        descending: bool,
        limit: i64,
    ) -> Result<Vec<PatternRecord>> {
        let conn = self.conn.lock().unwrap();
        let order = if descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT pattern, wins, losses FROM pattern_records
             WHERE wins + losses >= ?1
             ORDER BY CAST(wins AS REAL) / (wins + losses) {order} LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![min_total, limit], map_pattern)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ── Condition records ────────────────────────────────────────────────────

    /// Atomic increment of one (category, condition) record. The running
    /// mean of confidence-when-failed and the suggested adjustment
    /// (clamped to [-20, 10]) are both recomputed server-side.
    pub fn record_condition_outcome(
        &self,
        category: BetCategory,
        condition: &str,
        won: bool,
        confidence_at_time: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO condition_records
                (category, condition, total, wins, losses,
                 avg_confidence_when_failed, suggested_adjustment)
             VALUES (?1, ?2, 1, ?3, ?4, ?5 * ?4,
                     MAX(-20, MIN(10, CAST(ROUND((?3 - 0.5) * 30.0) AS INTEGER))))
             ON CONFLICT(category, condition) DO UPDATE SET
                total = total + 1,
                wins = wins + ?3,
                losses = losses + ?4,
                avg_confidence_when_failed = CASE WHEN ?4 = 1
                    THEN (avg_confidence_when_failed * losses + ?5) / (losses + 1)
                    ELSE avg_confidence_when_failed END,
                suggested_adjustment = MAX(-20, MIN(10, CAST(ROUND(
                    ((wins + ?3) * 1.0 / (total + 1) - 0.5) * 30.0) AS INTEGER)))",
            params![
                category.as_str(),
                condition,
                won as i64,
                !won as i64,
                confidence_at_time as f64,
            ],
        )?;
        Ok(())
    }

    pub fn get_condition(
        &self,
        category: BetCategory,
        condition: &str,
    ) -> Result<Option<ConditionRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT category, condition, total, wins, losses,
                        avg_confidence_when_failed, suggested_adjustment
                 FROM condition_records WHERE category=?1 AND condition=?2",
                params![category.as_str(), condition],
                map_condition,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_conditions(&self, category: BetCategory) -> Result<Vec<ConditionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category, condition, total, wins, losses,
                    avg_confidence_when_failed, suggested_adjustment
             FROM condition_records WHERE category=?1
             ORDER BY suggested_adjustment ASC",
        )?;
        let records = stmt
            .query_map(params![category.as_str()], map_condition)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ── ROI records ──────────────────────────────────────────────────────────

    /// Atomic update of one (category, condition-key) profitability record.
    /// `returned` is the realized return for this bet (stake × odds on a
    /// win, zero on a loss).
    pub fn record_roi_outcome(
        &self,
        category: BetCategory,
        condition_key: &str,
        won: bool,
        stake: f64,
        returned: f64,
        odds: f64,
        ev: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO roi_records
                (category, condition_key, total_bets, wins, losses,
                 total_staked, total_returned, roi_percent, avg_odds, avg_ev)
             VALUES (?1, ?2, 1, ?3, 1 - ?3, ?4, ?5,
                     CASE WHEN ?4 > 0 THEN (?5 - ?4) / ?4 * 100.0 ELSE 0.0 END,
                     ?6, ?7)
             ON CONFLICT(category, condition_key) DO UPDATE SET
                total_bets = total_bets + 1,
                wins = wins + ?3,
                losses = losses + (1 - ?3),
                total_staked = total_staked + ?4,
                total_returned = total_returned + ?5,
                roi_percent = CASE WHEN total_staked + ?4 > 0
                    THEN (total_returned + ?5 - total_staked - ?4)
                         / (total_staked + ?4) * 100.0
                    ELSE 0.0 END,
                avg_odds = (avg_odds * total_bets + ?6) / (total_bets + 1),
                avg_ev = (avg_ev * total_bets + ?7) / (total_bets + 1)",
            params![
                category.as_str(),
                condition_key,
                won as i64,
                stake,
                returned,
                odds,
                ev,
            ],
        )?;
        Ok(())
    }

    pub fn get_roi(
        &self,
        category: BetCategory,
        condition_key: &str,
    ) -> Result<Option<RoiRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT category, condition_key, total_bets, wins, losses,
                        total_staked, total_returned, roi_percent, avg_odds, avg_ev
                 FROM roi_records WHERE category=?1 AND condition_key=?2",
                params![category.as_str(), condition_key],
                map_roi,
            )
            .optional()?;
        Ok(record)
    }

    // ── Ensemble models ──────────────────────────────────────────────────────

    /// Replace the stored artifact for (model_name, category) wholesale.
    pub fn upsert_ensemble_model(&self, record: &EnsembleModelRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ensemble_models
                (model_name, category, artifact, accuracy, precision_score,
                 recall, f1, feature_importances, sample_count, trained_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(model_name, category) DO UPDATE SET
                artifact = excluded.artifact,
                accuracy = excluded.accuracy,
                precision_score = excluded.precision_score,
                recall = excluded.recall,
                f1 = excluded.f1,
                feature_importances = excluded.feature_importances,
                sample_count = excluded.sample_count,
                trained_at = excluded.trained_at",
            params![
                record.model_name,
                record.category,
                record.artifact_json,
                record.accuracy,
                record.precision,
                record.recall,
                record.f1,
                record.feature_importances_json,
                record.sample_count,
                record.trained_at,
            ],
        )?;
        Ok(())
    }

    pub fn load_ensemble_models(
        &self,
        category: BetCategory,
    ) -> Result<Vec<EnsembleModelRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT model_name, category, artifact, accuracy, precision_score,
                    recall, f1, feature_importances, sample_count, trained_at
             FROM ensemble_models WHERE category=?1 ORDER BY model_name",
        )?;
        let records = stmt
            .query_map(params![category.as_str()], map_ensemble_model)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        id: row.get(0)?,
        category: row.get(1)?,
        features_json: row.get(2)?,
        odds: row.get(3)?,
        raw_confidence: row.get(4)?,
        confidence: row.get(5)?,
        stake_percent: row.get(6)?,
        expected_value: row.get(7)?,
        outcome: row.get(8)?,
        session: row.get(9)?,
        created_at: row.get(10)?,
        settled_at: row.get(11)?,
    })
}

fn map_training_sample(row: &rusqlite::Row) -> rusqlite::Result<TrainingSample> {
    let outcome: String = row.get(1)?;
    Ok(TrainingSample {
        features_json: row.get(0)?,
        won: outcome == "win",
    })
}

fn map_calibration(row: &rusqlite::Row) -> rusqlite::Result<CalibrationRecord> {
    Ok(CalibrationRecord {
        category: row.get(0)?,
        band: row.get(1)?,
        predicted_count: row.get(2)?,
        actual_wins: row.get(3)?,
        calibration_factor: row.get(4)?,
    })
}

fn map_pattern(row: &rusqlite::Row) -> rusqlite::Result<PatternRecord> {
    Ok(PatternRecord {
        pattern: row.get(0)?,
        wins: row.get(1)?,
        losses: row.get(2)?,
    })
}

fn map_condition(row: &rusqlite::Row) -> rusqlite::Result<ConditionRecord> {
    Ok(ConditionRecord {
        category: row.get(0)?,
        condition: row.get(1)?,
        total: row.get(2)?,
        wins: row.get(3)?,
        losses: row.get(4)?,
        avg_confidence_when_failed: row.get(5)?,
        suggested_adjustment: row.get(6)?,
    })
}

fn map_roi(row: &rusqlite::Row) -> rusqlite::Result<RoiRecord> {
    Ok(RoiRecord {
        category: row.get(0)?,
        condition_key: row.get(1)?,
        total_bets: row.get(2)?,
        wins: row.get(3)?,
        losses: row.get(4)?,
        total_staked: row.get(5)?,
        total_returned: row.get(6)?,
        roi_percent: row.get(7)?,
        avg_odds: row.get(8)?,
        avg_ev: row.get(9)?,
    })
}

fn map_ensemble_model(row: &rusqlite::Row) -> rusqlite::Result<EnsembleModelRecord> {
    Ok(EnsembleModelRecord {
        model_name: row.get(0)?,
        category: row.get(1)?,
        artifact_json: row.get(2)?,
        accuracy: row.get(3)?,
        precision: row.get(4)?,
        recall: row.get(5)?,
        f1: row.get(6)?,
        feature_importances_json: row.get(7)?,
        sample_count: row.get(8)?,
        trained_at: row.get(9)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS predictions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    category        TEXT    NOT NULL,
    features        TEXT    NOT NULL,
    odds            REAL    NOT NULL,
    raw_confidence  INTEGER NOT NULL,
    confidence      INTEGER NOT NULL,
    stake_percent   REAL    NOT NULL,
    expected_value  REAL    NOT NULL,
    outcome         TEXT    NOT NULL DEFAULT 'pending',
    session         TEXT    NOT NULL DEFAULT 'system',
    created_at      TEXT    NOT NULL,
    settled_at      TEXT
);

CREATE TABLE IF NOT EXISTS calibration_records (
    category           TEXT    NOT NULL,
    band               TEXT    NOT NULL,
    predicted_count    INTEGER NOT NULL DEFAULT 0,
    actual_wins        INTEGER NOT NULL DEFAULT 0,
    calibration_factor REAL    NOT NULL DEFAULT 1.0,
    PRIMARY KEY (category, band)
);

CREATE TABLE IF NOT EXISTS pattern_records (
    pattern TEXT    PRIMARY KEY,
    wins    INTEGER NOT NULL DEFAULT 0,
    losses  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS condition_records (
    category                   TEXT    NOT NULL,
    condition                  TEXT    NOT NULL,
    total                      INTEGER NOT NULL DEFAULT 0,
    wins                       INTEGER NOT NULL DEFAULT 0,
    losses                     INTEGER NOT NULL DEFAULT 0,
    avg_confidence_when_failed REAL    NOT NULL DEFAULT 0.0,
    suggested_adjustment       INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (category, condition)
);

CREATE TABLE IF NOT EXISTS roi_records (
    category       TEXT    NOT NULL,
    condition_key  TEXT    NOT NULL,
    total_bets     INTEGER NOT NULL DEFAULT 0,
    wins           INTEGER NOT NULL DEFAULT 0,
    losses         INTEGER NOT NULL DEFAULT 0,
    total_staked   REAL    NOT NULL DEFAULT 0.0,
    total_returned REAL    NOT NULL DEFAULT 0.0,
    roi_percent    REAL    NOT NULL DEFAULT 0.0,
    avg_odds       REAL    NOT NULL DEFAULT 0.0,
    avg_ev         REAL    NOT NULL DEFAULT 0.0,
    PRIMARY KEY (category, condition_key)
);

CREATE TABLE IF NOT EXISTS ensemble_models (
    model_name          TEXT    NOT NULL,
    category            TEXT    NOT NULL,
    artifact            TEXT    NOT NULL,
    accuracy            REAL    NOT NULL,
    precision_score     REAL    NOT NULL,
    recall              REAL    NOT NULL,
    f1                  REAL    NOT NULL,
    feature_importances TEXT    NOT NULL DEFAULT '[]',
    sample_count        INTEGER NOT NULL,
    trained_at          TEXT    NOT NULL,
    PRIMARY KEY (model_name, category)
);

CREATE INDEX IF NOT EXISTS idx_predictions_category_outcome
    ON predictions(category, outcome);
CREATE INDEX IF NOT EXISTS idx_predictions_settled
    ON predictions(settled_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn calibration_upsert_recomputes_factor_server_side() {
        let db = db();
        // 20 predictions in the 70-79 band, 11 wins.
        for i in 0..20 {
            db.record_calibration_outcome(BetCategory::HomeWin, "70-79", i < 11, 0.75)
                .unwrap();
        }
        let record = db
            .get_calibration(BetCategory::HomeWin, "70-79")
            .unwrap()
            .unwrap();
        assert_eq!(record.predicted_count, 20);
        assert_eq!(record.actual_wins, 11);
        assert_relative_eq!(record.calibration_factor, (11.0 / 20.0) / 0.75, epsilon = 1e-9);
    }

    #[test]
    fn zero_win_band_stores_zero_factor() {
        let db = db();
        for _ in 0..12 {
            db.record_calibration_outcome(BetCategory::Draw, "80-100", false, 0.85)
                .unwrap();
        }
        let record = db
            .get_calibration(BetCategory::Draw, "80-100")
            .unwrap()
            .unwrap();
        assert_relative_eq!(record.calibration_factor, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn condition_upsert_tracks_running_failure_confidence() {
        let db = db();
        db.record_condition_outcome(BetCategory::AwayWin, "home_many_injuries", false, 80)
            .unwrap();
        db.record_condition_outcome(BetCategory::AwayWin, "home_many_injuries", false, 60)
            .unwrap();
        db.record_condition_outcome(BetCategory::AwayWin, "home_many_injuries", true, 75)
            .unwrap();
        let record = db
            .get_condition(BetCategory::AwayWin, "home_many_injuries")
            .unwrap()
            .unwrap();
        assert_eq!(record.total, 3);
        assert_eq!(record.wins, 1);
        assert_eq!(record.losses, 2);
        // Mean of the two losing confidences only.
        assert_relative_eq!(record.avg_confidence_when_failed, 70.0, epsilon = 1e-9);
    }

    #[test]
    fn condition_adjustment_matches_formula_and_caps() {
        let db = db();
        // 20 observations, 6 wins: (0.3 - 0.5) * 30 = -6.
        for i in 0..20 {
            db.record_condition_outcome(BetCategory::HomeWin, "poor_home_form", i < 6, 70)
                .unwrap();
        }
        let record = db
            .get_condition(BetCategory::HomeWin, "poor_home_form")
            .unwrap()
            .unwrap();
        assert_eq!(record.suggested_adjustment, -6);

        // All wins: raw +15 is capped at +10.
        for _ in 0..10 {
            db.record_condition_outcome(BetCategory::HomeWin, "strong_home_form", true, 70)
                .unwrap();
        }
        let capped = db
            .get_condition(BetCategory::HomeWin, "strong_home_form")
            .unwrap()
            .unwrap();
        assert_eq!(capped.suggested_adjustment, 10);
    }

    #[test]
    fn roi_upsert_accumulates_staked_and_returned() {
        let db = db();
        db.record_roi_outcome(BetCategory::TotalsOver, "overall", true, 10.0, 21.0, 2.1, 5.0)
            .unwrap();
        db.record_roi_outcome(BetCategory::TotalsOver, "overall", false, 10.0, 0.0, 1.9, 3.0)
            .unwrap();
        let record = db
            .get_roi(BetCategory::TotalsOver, "overall")
            .unwrap()
            .unwrap();
        assert_eq!(record.total_bets, 2);
        assert_eq!(record.wins, 1);
        assert_relative_eq!(record.total_staked, 20.0, epsilon = 1e-9);
        assert_relative_eq!(record.total_returned, 21.0, epsilon = 1e-9);
        assert_relative_eq!(record.roi_percent, 5.0, epsilon = 1e-9);
        assert_relative_eq!(record.avg_odds, 2.0, epsilon = 1e-9);
        assert_relative_eq!(record.avg_ev, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn settle_prediction_is_one_shot() {
        let db = db();
        let id = db
            .insert_prediction(&Prediction {
                id: None,
                category: "home_win".into(),
                features_json: "{}".into(),
                odds: 1.9,
                raw_confidence: 70,
                confidence: 68,
                stake_percent: 2.0,
                expected_value: 29.2,
                outcome: "pending".into(),
                session: "system".into(),
                created_at: Utc::now(),
                settled_at: None,
            })
            .unwrap();
        assert!(db.settle_prediction(id, Outcome::Win).unwrap());
        assert!(!db.settle_prediction(id, Outcome::Loss).unwrap());
        let pred = db.get_prediction(id).unwrap().unwrap();
        assert_eq!(pred.outcome, "win");
    }

    #[test]
    fn dedupe_keeps_earliest_pending_duplicate() {
        let db = db();
        let make = |odds: f64| Prediction {
            id: None,
            category: "btts".into(),
            features_json: "{\"h2h_matches\":4.0}".into(),
            odds,
            raw_confidence: 65,
            confidence: 65,
            stake_percent: 1.0,
            expected_value: 10.0,
            outcome: "pending".into(),
            session: "system".into(),
            created_at: Utc::now(),
            settled_at: None,
        };
        let first = db.insert_prediction(&make(1.8)).unwrap();
        db.insert_prediction(&make(1.8)).unwrap();
        db.insert_prediction(&make(2.2)).unwrap();
        let removed = db.dedupe_predictions().unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_prediction(first).unwrap().is_some());
    }
}
