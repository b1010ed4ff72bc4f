//! The concrete Postgres schema this adapter assumes (§6). Exposed as a
//! plain SQL string rather than a migration framework: running it is the
//! caller's responsibility (via `sqlx::migrate!` or a plain
//! `pool.execute(MIGRATION)` at startup), since migrations are out of
//! scope for the core.

pub const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS capstan_jobs (
    id              BIGSERIAL PRIMARY KEY,
    state           TEXT NOT NULL DEFAULT 'available'
                        CHECK (state IN ('scheduled', 'available', 'executing', 'retryable', 'completed', 'discarded', 'cancelled')),
    queue           TEXT NOT NULL,
    worker          TEXT NOT NULL,
    args            JSONB NOT NULL DEFAULT '{}',
    meta            JSONB NOT NULL DEFAULT '{}',
    tags            TEXT[] NOT NULL DEFAULT '{}',
    attempt         INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL DEFAULT 20,
    priority        INTEGER NOT NULL DEFAULT 0,
    errors          JSONB NOT NULL DEFAULT '[]',
    attempted_by    TEXT[] NOT NULL DEFAULT '{}',
    inserted_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    scheduled_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    attempted_at    TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ,
    cancelled_at    TIMESTAMPTZ,
    discarded_at    TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_capstan_jobs_claim
    ON capstan_jobs (queue, priority, scheduled_at, id)
    WHERE state = 'available';

CREATE INDEX IF NOT EXISTS idx_capstan_jobs_stage
    ON capstan_jobs (scheduled_at)
    WHERE state IN ('scheduled', 'retryable');

CREATE TABLE IF NOT EXISTS capstan_peers (
    name        TEXT PRIMARY KEY,
    node        TEXT NOT NULL,
    started_at  TIMESTAMPTZ NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL
);
"#;
