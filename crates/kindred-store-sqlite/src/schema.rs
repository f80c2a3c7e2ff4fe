//! SQL schema for the Kindred SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Identity provider accounts.
CREATE TABLE IF NOT EXISTS accounts (
    subject_id      TEXT PRIMARY KEY,
    email           TEXT NOT NULL UNIQUE,   -- trimmed and lowercased
    password_hash   TEXT NOT NULL,          -- argon2 PHC string
    created_at      TEXT NOT NULL,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    locked_until    TEXT                    -- RFC 3339 or NULL
);

-- Directory profiles. List-valued columns hold compact JSON arrays.
CREATE TABLE IF NOT EXISTS profiles (
    subject_id     TEXT PRIMARY KEY,
    role           TEXT NOT NULL DEFAULT 'USER',
    status         TEXT NOT NULL DEFAULT 'ACTIVE',
    tenant_id      TEXT,
    display_name   TEXT NOT NULL,
    demographics   TEXT NOT NULL DEFAULT '{}',
    photos         TEXT NOT NULL DEFAULT '[]',
    blocked_ids    TEXT NOT NULL DEFAULT '[]',
    liked_ids      TEXT NOT NULL DEFAULT '[]',
    joined_at      TEXT NOT NULL,
    last_active_at TEXT
);

-- Reports are append-only from the client side; only moderation changes
-- their status.
CREATE TABLE IF NOT EXISTS reports (
    report_id           TEXT PRIMARY KEY,
    reporter_id         TEXT NOT NULL,
    target_id           TEXT NOT NULL,
    target_display_name TEXT NOT NULL,
    reason              TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'PENDING',
    tenant_id           TEXT NOT NULL,
    CHECK (reporter_id != target_id)
);

CREATE INDEX IF NOT EXISTS reports_reporter_idx ON reports(reporter_id);
CREATE INDEX IF NOT EXISTS reports_target_idx   ON reports(target_id);
CREATE INDEX IF NOT EXISTS profiles_tenant_idx  ON profiles(tenant_id);

PRAGMA user_version = 1;
";
