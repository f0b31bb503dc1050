use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

// Migration files are compiled into the binary so deployments never
// depend on a source checkout being present next to the executable.
// Ordering follows the numeric prefix.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_connectors.sql", include_str!("sql/001_connectors.sql")),
    ("002_raw_events.sql", include_str!("sql/002_raw_events.sql")),
    (
        "003_canonical_events.sql",
        include_str!("sql/003_canonical_events.sql"),
    ),
    ("004_cv_events.sql", include_str!("sql/004_cv_events.sql")),
    (
        "005_cv_frame_analysis.sql",
        include_str!("sql/005_cv_frame_analysis.sql"),
    ),
    (
        "006_cv_risk_evidence.sql",
        include_str!("sql/006_cv_risk_evidence.sql"),
    ),
    (
        "007_cv_video_summaries.sql",
        include_str!("sql/007_cv_video_summaries.sql"),
    ),
    ("008_risk_scores.sql", include_str!("sql/008_risk_scores.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        info!("Applied migration: {}", name);
    }
    Ok(())
}
