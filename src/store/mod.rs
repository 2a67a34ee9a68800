pub mod migrations;

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::plan::{PlanRecord, PlanStatus};
use crate::store::migrations::BASE_MIGRATION;

const RECORD_COLUMNS: &str = r#"
id, patient_id, created_at, updated_at, status, health_json, original_plan_json,
meals_json, flags_json, triggered_rules_json, allowed_food_count, checkpoint,
catalog_digest, reviewed_by, reviewer_comment, reviewed_at, approved_for_retraining,
retraining_notes, used_for_retraining, partially_usable
"#;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanSummary {
    pub id: i64,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub status: PlanStatus,
    pub approved_for_retraining: bool,
    pub used_for_retraining: bool,
    pub checkpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrainingRunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub base_checkpoint: String,
    pub version: u32,
    pub epochs_completed: u32,
    pub best_checkpoint: Option<String>,
    pub best_validation_loss: Option<f64>,
    pub plans_consumed: usize,
    pub dropped_occurrences: usize,
    pub cancelled: bool,
}

pub struct PlanStore {
    conn: Connection,
}

impl PlanStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    /// Stores a new plan and writes the assigned id back into `record`.
    pub fn insert_plan(&self, record: &mut PlanRecord) -> Result<i64> {
        self.conn.execute(
            r#"
INSERT INTO diet_plans(
    patient_id, created_at, updated_at, status, health_json, original_plan_json,
    meals_json, flags_json, triggered_rules_json, allowed_food_count, checkpoint,
    catalog_digest, reviewed_by, reviewer_comment, reviewed_at, approved_for_retraining,
    retraining_notes, used_for_retraining, partially_usable
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
"#,
            params![
                record.patient_id,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.status.as_str(),
                serde_json::to_string(&record.health_snapshot)?,
                serde_json::to_string(&record.original_plan)?,
                serde_json::to_string(&record.meals)?,
                serde_json::to_string(&record.suggestion_flags)?,
                serde_json::to_string(&record.triggered_rules)?,
                record.allowed_food_count as i64,
                record.checkpoint,
                record.catalog_digest,
                record.reviewed_by,
                record.reviewer_comment,
                record.reviewed_at.map(|t| t.to_rfc3339()),
                record.approved_for_retraining,
                record.retraining_notes,
                record.used_for_retraining,
                record.partially_usable,
            ],
        )?;
        record.id = self.conn.last_insert_rowid();
        Ok(record.id)
    }

    pub fn get_plan(&self, id: i64) -> Result<Option<PlanRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM diet_plans WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_row(params![id], row_to_raw_record)
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Persists review state and edited meals. The original plan and the
    /// `used_for_retraining` flag are never rewritten here.
    pub fn update_plan(&self, record: &PlanRecord) -> Result<()> {
        self.conn.execute(
            r#"
UPDATE diet_plans SET
    updated_at = ?2,
    status = ?3,
    meals_json = ?4,
    reviewed_by = ?5,
    reviewer_comment = ?6,
    reviewed_at = ?7,
    approved_for_retraining = ?8,
    retraining_notes = ?9
WHERE id = ?1
"#,
            params![
                record.id,
                record.updated_at.to_rfc3339(),
                record.status.as_str(),
                serde_json::to_string(&record.meals)?,
                record.reviewed_by,
                record.reviewer_comment,
                record.reviewed_at.map(|t| t.to_rfc3339()),
                record.approved_for_retraining,
                record.retraining_notes,
            ],
        )?;
        Ok(())
    }

    pub fn list_plans(&self, status: Option<PlanStatus>, limit: usize) -> Result<Vec<PlanSummary>> {
        let sql = r#"
SELECT id, patient_id, created_at, status, approved_for_retraining, used_for_retraining, checkpoint
FROM diet_plans
WHERE (?1 IS NULL OR status = ?1)
ORDER BY id DESC
LIMIT ?2
"#;
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit as i64],
                |row| {
                    let status_raw: String = row.get(3)?;
                    Ok(PlanSummary {
                        id: row.get(0)?,
                        patient_id: row.get(1)?,
                        created_at: parse_time(&row.get::<_, String>(2)?),
                        status: status_raw.parse().unwrap_or_default(),
                        approved_for_retraining: row.get(4)?,
                        used_for_retraining: row.get(5)?,
                        checkpoint: row.get(6)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Approved, flagged plans no retraining run has consumed yet.
    pub fn retraining_corpus(&self) -> Result<Vec<PlanRecord>> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM diet_plans
WHERE status = 'approved' AND approved_for_retraining = 1 AND used_for_retraining = 0
ORDER BY id ASC"#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], row_to_raw_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    pub fn record_run(&self, run: &RetrainingRunRecord) -> Result<i64> {
        self.conn.execute(
            r#"
INSERT INTO retraining_runs(
    started_at, finished_at, base_checkpoint, version, epochs_completed, best_checkpoint,
    best_validation_loss, plans_consumed, dropped_occurrences, cancelled
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
            params![
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.base_checkpoint,
                run.version,
                run.epochs_completed,
                run.best_checkpoint,
                run.best_validation_loss,
                run.plans_consumed as i64,
                run.dropped_occurrences as i64,
                run.cancelled,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RetrainingRunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT id, started_at, finished_at, base_checkpoint, version, epochs_completed,
       best_checkpoint, best_validation_loss, plans_consumed, dropped_occurrences, cancelled
FROM retraining_runs
ORDER BY id DESC
LIMIT ?1
"#,
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RetrainingRunRecord {
                    id: row.get(0)?,
                    started_at: parse_time(&row.get::<_, String>(1)?),
                    finished_at: parse_time(&row.get::<_, String>(2)?),
                    base_checkpoint: row.get(3)?,
                    version: row.get(4)?,
                    epochs_completed: row.get(5)?,
                    best_checkpoint: row.get(6)?,
                    best_validation_loss: row.get(7)?,
                    plans_consumed: row.get::<_, i64>(8)? as usize,
                    dropped_occurrences: row.get::<_, i64>(9)? as usize,
                    cancelled: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Marks plans as consumed by `run_id` in one transaction. A plan already consumed
    /// by any run is left alone. Returns how many plans were newly marked.
    pub fn mark_used(&self, plan_ids: &[i64], run_id: i64) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut marked = 0;
        for plan_id in plan_ids {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO plan_retraining_usage(plan_id, run_id, used_at) VALUES (?1, ?2, ?3)",
                params![plan_id, run_id, now],
            )?;
            if inserted == 1 {
                tx.execute(
                    "UPDATE diet_plans SET used_for_retraining = 1, updated_at = ?2 WHERE id = ?1",
                    params![plan_id, now],
                )?;
                marked += 1;
            }
        }
        tx.commit()?;
        Ok(marked)
    }

    pub fn mark_partially_usable(&self, plan_ids: &[i64]) -> Result<()> {
        for plan_id in plan_ids {
            self.conn.execute(
                "UPDATE diet_plans SET partially_usable = 1 WHERE id = ?1",
                params![plan_id],
            )?;
        }
        Ok(())
    }

    pub fn usage_run(&self, plan_id: i64) -> Result<Option<i64>> {
        let run = self
            .conn
            .query_row(
                "SELECT run_id FROM plan_retraining_usage WHERE plan_id = ?1",
                params![plan_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(run)
    }
}

/// Column values as stored. JSON columns are decoded by [`RawRecord::into_record`].
struct RawRecord {
    id: i64,
    patient_id: String,
    created_at: String,
    updated_at: String,
    status: String,
    health_json: String,
    original_plan_json: String,
    meals_json: String,
    flags_json: String,
    triggered_rules_json: String,
    allowed_food_count: i64,
    checkpoint: Option<String>,
    catalog_digest: String,
    reviewed_by: Option<String>,
    reviewer_comment: Option<String>,
    reviewed_at: Option<String>,
    approved_for_retraining: bool,
    retraining_notes: Option<String>,
    used_for_retraining: bool,
    partially_usable: bool,
}

impl RawRecord {
    fn into_record(self) -> Result<PlanRecord> {
        Ok(PlanRecord {
            id: self.id,
            patient_id: self.patient_id,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            status: self.status.parse().unwrap_or_default(),
            health_snapshot: serde_json::from_str(&self.health_json)?,
            original_plan: serde_json::from_str(&self.original_plan_json)?,
            meals: serde_json::from_str(&self.meals_json)?,
            suggestion_flags: serde_json::from_str(&self.flags_json)?,
            triggered_rules: serde_json::from_str(&self.triggered_rules_json)?,
            allowed_food_count: self.allowed_food_count as usize,
            checkpoint: self.checkpoint,
            catalog_digest: self.catalog_digest,
            reviewed_by: self.reviewed_by,
            reviewer_comment: self.reviewer_comment,
            reviewed_at: self.reviewed_at.as_deref().map(parse_time),
            approved_for_retraining: self.approved_for_retraining,
            retraining_notes: self.retraining_notes,
            used_for_retraining: self.used_for_retraining,
            partially_usable: self.partially_usable,
        })
    }
}

fn row_to_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        status: row.get(4)?,
        health_json: row.get(5)?,
        original_plan_json: row.get(6)?,
        meals_json: row.get(7)?,
        flags_json: row.get(8)?,
        triggered_rules_json: row.get(9)?,
        allowed_food_count: row.get(10)?,
        checkpoint: row.get(11)?,
        catalog_digest: row.get(12)?,
        reviewed_by: row.get(13)?,
        reviewer_comment: row.get(14)?,
        reviewed_at: row.get(15)?,
        approved_for_retraining: row.get(16)?,
        retraining_notes: row.get(17)?,
        used_for_retraining: row.get(18)?,
        partially_usable: row.get(19)?,
    })
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{FoodCatalog, FoodItem};
    use crate::health::HealthVector;
    use crate::model::Vocabulary;
    use crate::plan::{assemble, NutritionalTargets, ReviewAction, SelectionTier, PLAN_CELLS};
    use crate::rules::RuleOutcome;

    pub(crate) fn sample_record(patient: &str) -> PlanRecord {
        let items = (0..12)
            .map(|i| FoodItem::new(format!("Food {i:02}")))
            .collect::<Vec<_>>();
        let catalog = FoodCatalog::with_all_columns(items);
        let vocab = Vocabulary::from_food_names(catalog.names());
        let sequence = (0..PLAN_CELLS)
            .map(|i| (3 + (i % 12) as u32, SelectionTier::Sampled))
            .collect::<Vec<_>>();
        let plan = assemble(&sequence, &vocab, &catalog, NutritionalTargets::default())
            .expect("assemble");
        let outcome = RuleOutcome {
            allowed: (0..12).collect(),
            allowed_names: Vec::new(),
            suggestion_flags: Default::default(),
            triggered_rules: vec!["diabetes".to_string()],
            skipped_rules: Vec::new(),
            allergy_tokens: Vec::new(),
            catalog_size: 12,
        };
        PlanRecord::new_pending(
            patient,
            HealthVector {
                age: 50.0,
                ..HealthVector::default()
            },
            plan,
            &outcome,
            Some("diet_model_v1_epoch_03.json".to_string()),
            catalog.digest(),
        )
    }

    fn run_record() -> RetrainingRunRecord {
        RetrainingRunRecord {
            id: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            base_checkpoint: "diet_model_v1_epoch_03.json".to_string(),
            version: 2,
            epochs_completed: 2,
            best_checkpoint: Some("diet_model_v2_epoch_02.json".to_string()),
            best_validation_loss: Some(3.2),
            plans_consumed: 1,
            dropped_occurrences: 0,
            cancelled: false,
        }
    }

    #[test]
    fn round_trips_plan_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PlanStore::open(&dir.path().join("plans.db")).expect("open");
        let mut record = sample_record("p-1");
        let id = store.insert_plan(&mut record).expect("insert");
        assert_eq!(record.id, id);
        let loaded = store.get_plan(id).expect("get").expect("present");
        assert_eq!(loaded.meals, record.meals);
        assert_eq!(loaded.health_snapshot.age, 50.0);
        assert_eq!(loaded.triggered_rules, vec!["diabetes".to_string()]);
        assert!(store.get_plan(999).expect("get").is_none());
    }

    #[test]
    fn corpus_holds_only_approved_flagged_unused_plans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PlanStore::open(&dir.path().join("plans.db")).expect("open");

        let mut flagged = sample_record("p-1");
        store.insert_plan(&mut flagged).expect("insert");
        flagged.review(ReviewAction::Approve, None, None).expect("approve");
        flagged.flag_for_retraining(true, None).expect("flag");
        store.update_plan(&flagged).expect("update");

        let mut approved_only = sample_record("p-2");
        store.insert_plan(&mut approved_only).expect("insert");
        approved_only.review(ReviewAction::Approve, None, None).expect("approve");
        store.update_plan(&approved_only).expect("update");

        let mut pending = sample_record("p-3");
        store.insert_plan(&mut pending).expect("insert");

        let corpus = store.retraining_corpus().expect("corpus");
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].id, flagged.id);

        let pending_list = store
            .list_plans(Some(PlanStatus::Pending), 10)
            .expect("list");
        assert_eq!(pending_list.len(), 1);
        assert_eq!(store.list_plans(None, 10).expect("list").len(), 3);
    }

    #[test]
    fn marking_used_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PlanStore::open(&dir.path().join("plans.db")).expect("open");
        let mut record = sample_record("p-1");
        store.insert_plan(&mut record).expect("insert");
        record.review(ReviewAction::Approve, None, None).expect("approve");
        record.flag_for_retraining(true, None).expect("flag");
        store.update_plan(&record).expect("update");

        let run_id = store.record_run(&run_record()).expect("run");
        assert_eq!(store.mark_used(&[record.id], run_id).expect("mark"), 1);
        assert_eq!(store.mark_used(&[record.id], run_id).expect("mark"), 0);
        assert_eq!(store.usage_run(record.id).expect("usage"), Some(run_id));
        assert!(store.retraining_corpus().expect("corpus").is_empty());

        // an edit written after consumption does not clear the flag
        store.update_plan(&record).expect("update");
        let loaded = store.get_plan(record.id).expect("get").expect("present");
        assert!(loaded.used_for_retraining);
        assert_eq!(store.list_runs(5).expect("runs")[0].version, 2);
    }
}
