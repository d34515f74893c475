use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::crag::CragOutcome;
use crate::models::{LogEntry, LogQuery, LogResponse};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// Postgres audit trail of pipeline runs.
pub struct RunLogger {
    pool: PgPool,
}

impl LogEntry {
    pub fn from_outcome(outcome: &CragOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: outcome.query.clone(),
            domain: outcome.domain.as_str().to_string(),
            verdict: outcome.verdict.as_ref().map(|v| v.to_string()),
            knowledge_source: outcome.knowledge_source.map(|s| s.to_string()),
            confidence: outcome.confidence.as_str().to_string(),
            context: outcome.context.clone(),
            answer: outcome.answer.clone(),
        }
    }
}

impl RunLogger {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn log_run(&self, entry: &LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crag_runs
            (id, timestamp, query, domain, verdict, knowledge_source, confidence, context, answer)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.timestamp)
        .bind(&entry.query)
        .bind(&entry.domain)
        .bind(&entry.verdict)
        .bind(&entry.knowledge_source)
        .bind(&entry.confidence)
        .bind(&entry.context)
        .bind(&entry.answer)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn query_runs(&self, query: &LogQuery) -> Result<LogResponse> {
        let (limit, offset) = page_bounds(query);

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM crag_runs");
        push_filters(&mut select, query);
        select
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let logs = select
            .build_query_as::<LogEntry>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM crag_runs");
        push_filters(&mut count, query);
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        Ok(LogResponse {
            logs,
            total: total.0,
        })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crag_runs (
                id UUID PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                query TEXT NOT NULL,
                domain TEXT NOT NULL,
                verdict TEXT,
                knowledge_source TEXT,
                confidence TEXT NOT NULL,
                context TEXT,
                answer TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_crag_runs_timestamp ON crag_runs(timestamp DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn page_bounds(query: &LogQuery) -> (i64, i64) {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    (limit, offset)
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &LogQuery) {
    builder.push(" WHERE 1=1");

    if let Some(start) = query.start_date {
        builder.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = query.end_date {
        builder.push(" AND timestamp <= ").push_bind(end);
    }
    if let Some(term) = query.search_term.as_deref().filter(|t| !t.trim().is_empty()) {
        let pattern = format!("%{}%", term.trim());
        builder
            .push(" AND (query ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR answer ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}
