//! Database schema constants for the PostgreSQL storage backend.

/// SQL schema for creating the experiences table.
pub const CREATE_EXPERIENCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS experiences (
    id UUID PRIMARY KEY,
    title VARCHAR(255) NOT NULL,
    description TEXT NOT NULL,
    tags JSONB NOT NULL,
    devices JSONB NOT NULL,
    mr_ready BOOLEAN NOT NULL,
    default_quality VARCHAR(16) NOT NULL,
    default_interpolation VARCHAR(16) NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    status VARCHAR(16) NOT NULL,
    manifest_url VARCHAR(1024) NOT NULL,
    poster_url VARCHAR(1024) NOT NULL,
    trailer_url VARCHAR(1024) NOT NULL,
    release_notes TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the jobs table.
///
/// Per-stage progress and the event log are stored as JSONB documents; the
/// worker is the single writer for a job so row-level upserts are sufficient.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    experience_id UUID NOT NULL REFERENCES experiences(id),
    experience_title VARCHAR(255) NOT NULL,
    status VARCHAR(32) NOT NULL,
    current_stage VARCHAR(32) NOT NULL,
    stage_progress JSONB NOT NULL,
    logs JSONB NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    finished_at TIMESTAMPTZ,
    eta VARCHAR(64)
)
"#;

/// Index statements, one command per entry.
///
/// The migration runner executes each statement as a prepared statement, and
/// PostgreSQL rejects prepared statements containing more than one command,
/// so these must not be concatenated.
pub const CREATE_INDEXES: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS idx_jobs_experience_id ON jobs(experience_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_started_at ON jobs(started_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_experiences_status ON experiences(status)",
    "CREATE INDEX IF NOT EXISTS idx_experiences_created_at ON experiences(created_at DESC)",
];

/// Returns all schema statements in creation order, one command each.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![CREATE_EXPERIENCES_TABLE, CREATE_JOBS_TABLE];
    statements.extend(CREATE_INDEXES);
    statements
}
