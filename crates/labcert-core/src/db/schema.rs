//! SQLite schema definition.

/// Schema version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Complete database schema for the lab workflow.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Requesters
-- ============================================================================

CREATE TABLE IF NOT EXISTS requesters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    address TEXT,
    contact TEXT,
    national_id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- ============================================================================
-- Staff (identity lives with the auth service; this is the role directory)
-- ============================================================================

CREATE TABLE IF NOT EXISTS staff (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS staff_roles (
    staff_id INTEGER NOT NULL REFERENCES staff(id),
    role TEXT NOT NULL CHECK (role IN ('data_entry', 'evaluator', 'validator')),
    PRIMARY KEY (staff_id, role)
);

-- ============================================================================
-- Samples
-- ============================================================================

CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    sample_type TEXT NOT NULL CHECK (sample_type IN ('water', 'food', 'alcoholic_beverage')),
    transport_conditions TEXT,
    origin TEXT,
    received_at TEXT NOT NULL,
    requester_id INTEGER NOT NULL REFERENCES requesters(id),
    state TEXT NOT NULL DEFAULT 'received'
        CHECK (state IN ('received', 'in_analysis', 'awaiting_validation', 'validated')),
    retired INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_state ON samples(state, retired);
CREATE INDEX IF NOT EXISTS idx_samples_requester ON samples(requester_id);

-- Only a sample still in 'received' may be retired
CREATE TRIGGER IF NOT EXISTS samples_retire_guard BEFORE UPDATE OF retired ON samples
WHEN new.retired = 1 AND (old.state <> 'received' OR old.retired = 1)
BEGIN
    SELECT RAISE(ABORT, 'Only received samples can be retired');
END;

-- Forward-only counters for lab codes, one per prefix
CREATE TABLE IF NOT EXISTS code_sequences (
    prefix TEXT PRIMARY KEY,
    last_value INTEGER NOT NULL DEFAULT 0
);

-- ============================================================================
-- Assignment log (append-only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS sample_assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sample_id INTEGER NOT NULL REFERENCES samples(id),
    evaluator_id INTEGER NOT NULL REFERENCES staff(id),
    comment TEXT,
    assigned_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignments_sample ON sample_assignments(sample_id, id);

CREATE TRIGGER IF NOT EXISTS sample_assignments_no_update BEFORE UPDATE ON sample_assignments
BEGIN
    SELECT RAISE(ABORT, 'Assignment log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS sample_assignments_no_delete BEFORE DELETE ON sample_assignments
BEGIN
    SELECT RAISE(ABORT, 'Assignment log is append-only');
END;

-- ============================================================================
-- Parameters and norms
-- ============================================================================

CREATE TABLE IF NOT EXISTS parameters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    sample_type TEXT NOT NULL CHECK (sample_type IN ('water', 'food', 'alcoholic_beverage')),
    unit TEXT
);

CREATE INDEX IF NOT EXISTS idx_parameters_type ON parameters(sample_type);

CREATE TABLE IF NOT EXISTS norms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT,
    source TEXT,
    sample_type TEXT
);

-- One norm per parameter
CREATE TABLE IF NOT EXISTS parameter_norms (
    parameter_id INTEGER PRIMARY KEY REFERENCES parameters(id),
    norm_id INTEGER NOT NULL REFERENCES norms(id),
    operator TEXT,
    lower_bound REAL,
    upper_bound REAL
);

-- Explicit per-sample parameter list; when empty the sample type decides
CREATE TABLE IF NOT EXISTS sample_parameters (
    sample_id INTEGER NOT NULL REFERENCES samples(id),
    parameter_id INTEGER NOT NULL REFERENCES parameters(id),
    PRIMARY KEY (sample_id, parameter_id)
);

-- ============================================================================
-- Test results (append-only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sample_id INTEGER NOT NULL REFERENCES samples(id),
    parameter_id INTEGER NOT NULL REFERENCES parameters(id),
    result TEXT NOT NULL,
    within_norm INTEGER NOT NULL,
    evaluator_id INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_sample_param ON test_results(sample_id, parameter_id, id);

CREATE TRIGGER IF NOT EXISTS test_results_no_update BEFORE UPDATE ON test_results
BEGIN
    SELECT RAISE(ABORT, 'Test results are immutable');
END;

-- ============================================================================
-- Reports
-- ============================================================================

CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sample_id INTEGER NOT NULL REFERENCES samples(id),
    version INTEGER NOT NULL CHECK (version >= 1),
    state TEXT NOT NULL DEFAULT 'created' CHECK (state IN ('created', 'validated', 'returned')),
    evaluator_id INTEGER NOT NULL,
    fit_for_consumption INTEGER,
    storage_path TEXT,
    created_at TEXT NOT NULL,
    reviewed_by INTEGER,
    reviewed_at TEXT,
    review_comment TEXT,
    UNIQUE (sample_id, version)
);

-- Binary artifact, last write wins per report
CREATE TABLE IF NOT EXISTS report_files (
    report_id INTEGER PRIMARY KEY REFERENCES reports(id),
    filename TEXT NOT NULL,
    content BLOB NOT NULL,
    sha256 TEXT NOT NULL,
    stored_at TEXT NOT NULL
);
"#;
