pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS diet_plans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    health_json TEXT NOT NULL,
    original_plan_json TEXT NOT NULL,
    meals_json TEXT NOT NULL,
    flags_json TEXT NOT NULL,
    triggered_rules_json TEXT NOT NULL,
    allowed_food_count INTEGER NOT NULL,
    checkpoint TEXT,
    catalog_digest TEXT NOT NULL,
    reviewed_by TEXT,
    reviewer_comment TEXT,
    reviewed_at TEXT,
    approved_for_retraining INTEGER NOT NULL DEFAULT 0,
    retraining_notes TEXT,
    used_for_retraining INTEGER NOT NULL DEFAULT 0,
    partially_usable INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_diet_plans_retraining
    ON diet_plans(status, approved_for_retraining, used_for_retraining);
CREATE INDEX IF NOT EXISTS idx_diet_plans_patient
    ON diet_plans(patient_id, created_at DESC);

CREATE TABLE IF NOT EXISTS retraining_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    base_checkpoint TEXT NOT NULL,
    version INTEGER NOT NULL,
    epochs_completed INTEGER NOT NULL,
    best_checkpoint TEXT,
    best_validation_loss REAL,
    plans_consumed INTEGER NOT NULL,
    dropped_occurrences INTEGER NOT NULL,
    cancelled INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS plan_retraining_usage (
    plan_id INTEGER PRIMARY KEY REFERENCES diet_plans(id),
    run_id INTEGER NOT NULL REFERENCES retraining_runs(id),
    used_at TEXT NOT NULL
);
"#;
