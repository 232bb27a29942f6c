use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ArchivedCaseStudy, Invocation, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::pipeline::CaseStudyDocument;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database for tests.
    ///
    /// Each connection to `:memory:` is a separate database, so the pool is
    /// pinned to one connection.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        let input = serde_json::to_string(&invocation.input)?;
        let output = invocation
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO invocations (id, session_id, tool_name, input, output, phase, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.session_id)
        .bind(&invocation.tool_name)
        .bind(&input)
        .bind(&output)
        .bind(&invocation.phase)
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(tool = %invocation.tool_name, success = invocation.success, "Invocation logged");
        Ok(())
    }

    async fn archive_case_study(
        &self,
        document: &CaseStudyDocument,
        session_id: Option<&str>,
    ) -> StorageResult<ArchivedCaseStudy> {
        let archived = ArchivedCaseStudy::from_document(document, session_id);

        sqlx::query(
            r#"
            INSERT INTO case_studies (id, session_id, title, client, industry, style, revision, incomplete_evidence, body_markdown, created_at, archived_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                body_markdown = excluded.body_markdown,
                incomplete_evidence = excluded.incomplete_evidence,
                archived_at = excluded.archived_at
            "#,
        )
        .bind(&archived.id)
        .bind(&archived.session_id)
        .bind(&archived.title)
        .bind(&archived.client)
        .bind(&archived.industry)
        .bind(&archived.style)
        .bind(i64::from(archived.revision))
        .bind(archived.incomplete_evidence)
        .bind(&archived.body_markdown)
        .bind(archived.created_at.to_rfc3339())
        .bind(archived.archived_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(id = %archived.id, title = %archived.title, revision = archived.revision, "Case study archived");
        Ok(archived)
    }

    async fn get_archived_case_study(&self, id: &str) -> StorageResult<ArchivedCaseStudy> {
        let row: Option<CaseStudyRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, title, client, industry, style, revision, incomplete_evidence, body_markdown, created_at, archived_at
            FROM case_studies
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| StorageError::CaseStudyNotFound { id: id.to_string() })
    }

    async fn list_archived_case_studies(&self, limit: u32) -> StorageResult<Vec<ArchivedCaseStudy>> {
        let rows: Vec<CaseStudyRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, title, client, industry, style, revision, incomplete_evidence, body_markdown, created_at, archived_at
            FROM case_studies
            ORDER BY archived_at DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct CaseStudyRow {
    id: String,
    session_id: Option<String>,
    title: String,
    client: String,
    industry: String,
    style: String,
    revision: i64,
    incomplete_evidence: bool,
    body_markdown: String,
    created_at: String,
    archived_at: String,
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<CaseStudyRow> for ArchivedCaseStudy {
    fn from(row: CaseStudyRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            title: row.title,
            client: row.client,
            industry: row.industry,
            style: row.style,
            revision: u32::try_from(row.revision).unwrap_or(1),
            incomplete_evidence: row.incomplete_evidence,
            body_markdown: row.body_markdown,
            created_at: parse_timestamp(&row.created_at),
            archived_at: parse_timestamp(&row.archived_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CampaignBrief, StyleOption};
    use serde_json::json;

    fn document(title: &str) -> CaseStudyDocument {
        let brief = CampaignBrief::new(title, "Acme", "brief");
        CaseStudyDocument::new(&brief, &StyleOption::default_structured(), "## Overview\nBody")
    }

    #[tokio::test]
    async fn test_log_invocation() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let invocation = Invocation::new("case_study_submit_brief", json!({"project_title": "X"}))
            .with_session("s1")
            .failure("Invalid project_title: must not be empty", 3);

        storage.log_invocation(&invocation).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM invocations WHERE success = 0")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_archive_and_get() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let doc = document("Launch");

        let archived = storage.archive_case_study(&doc, Some("s1")).await.unwrap();
        let fetched = storage.get_archived_case_study(&doc.id).await.unwrap();

        assert_eq!(fetched.id, archived.id);
        assert_eq!(fetched.title, "Launch");
        assert_eq!(fetched.body_markdown, "## Overview\nBody");
        assert_eq!(fetched.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_rearchive_replaces() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut doc = document("Launch");
        storage.archive_case_study(&doc, None).await.unwrap();

        doc.body_markdown = "## Overview\nEdited".to_string();
        storage.archive_case_study(&doc, None).await.unwrap();

        let all = storage.list_archived_case_studies(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body_markdown, "## Overview\nEdited");
    }

    #[tokio::test]
    async fn test_get_missing_case_study() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let err = storage.get_archived_case_study("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::CaseStudyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        for title in ["A", "B", "C"] {
            storage.archive_case_study(&document(title), None).await.unwrap();
        }

        assert_eq!(storage.list_archived_case_studies(2).await.unwrap().len(), 2);
        assert_eq!(storage.list_archived_case_studies(10).await.unwrap().len(), 3);
    }
}
