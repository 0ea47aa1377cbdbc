//! SQLite-backed case and rule stores.
//!
//! One connection per operation, opened inside `spawn_blocking`. Rule writes
//! after insert are guarded by the `version` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tokio::task;
use uuid::Uuid;

use super::{Case, CaseStore, GuidanceRule, RuleState, RuleStore};
use crate::agent::{AgentError, AgentResult, TaskType};

#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    db_path: PathBuf,
}

fn encode_embedding(embedding: &[f32]) -> AgentResult<Vec<u8>> {
    bincode::serialize(embedding).map_err(AgentError::storage)
}

fn decode_embedding(blob: &[u8]) -> rusqlite::Result<Vec<f32>> {
    bincode::deserialize(blob)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Blob, e))
}

fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_time(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

const CASE_COLUMNS: &str =
    "id, situation_summary, task_type, action_taken, outcome_summary, embedding, created_at, source_consultation";

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<Case> {
    let task_type: String = row.get(2)?;
    let blob: Vec<u8> = row.get(5)?;
    Ok(Case {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        situation_summary: row.get(1)?,
        task_type: TaskType::from_label(&task_type).unwrap_or(TaskType::General),
        action_taken: row.get(3)?,
        outcome_summary: row.get(4)?,
        embedding: decode_embedding(&blob)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        source_consultation: parse_uuid(&row.get::<_, String>(7)?)?,
    })
}

const RULE_COLUMNS: &str =
    "id, principle, category, embedding, confidence, success_count, failure_count, state, version, created_at";

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<GuidanceRule> {
    let blob: Vec<u8> = row.get(3)?;
    let state: String = row.get(7)?;
    Ok(GuidanceRule {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        principle: row.get(1)?,
        category: row.get(2)?,
        embedding: decode_embedding(&blob)?,
        confidence: row.get(4)?,
        success_count: row.get(5)?,
        failure_count: row.get(6)?,
        state: RuleState::parse(&state),
        version: row.get::<_, i64>(8)? as u64,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl SqliteKnowledgeStore {
    pub async fn new(db_path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone)?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS cases (
                    id TEXT PRIMARY KEY,
                    situation_summary TEXT NOT NULL,
                    task_type TEXT NOT NULL,
                    action_taken TEXT NOT NULL,
                    outcome_summary TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    created_at TEXT NOT NULL,
                    source_consultation TEXT NOT NULL,
                    seq INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_cases_task_type ON cases(task_type);
                CREATE INDEX IF NOT EXISTS idx_cases_source ON cases(source_consultation);

                CREATE TABLE IF NOT EXISTS rules (
                    id TEXT PRIMARY KEY,
                    principle TEXT NOT NULL,
                    category TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    confidence REAL NOT NULL,
                    success_count INTEGER NOT NULL DEFAULT 0,
                    failure_count INTEGER NOT NULL DEFAULT 0,
                    state TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_rules_state ON rules(state);
                "#,
            )?;
            Ok::<_, AgentError>(())
        })
        .await??;

        Ok(Self { db_path: path })
    }

    async fn query<T, F>(&self, f: F) -> AgentResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> AgentResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl CaseStore for SqliteKnowledgeStore {
    async fn insert(&self, case: Case) -> AgentResult<()> {
        let blob = encode_embedding(&case.embedding)?;
        self.query(move |conn| {
            let result = conn.execute(
                "INSERT INTO cases (id, situation_summary, task_type, action_taken, outcome_summary, embedding, created_at, source_consultation, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, (SELECT COALESCE(MAX(seq), 0) + 1 FROM cases))",
                params![
                    case.id.to_string(),
                    &case.situation_summary,
                    case.task_type.as_str(),
                    &case.action_taken,
                    &case.outcome_summary,
                    &blob,
                    case.created_at.to_rfc3339(),
                    case.source_consultation.to_string(),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(AgentError::DuplicateId { kind: "case", id: case.id.to_string() })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get(&self, id: Uuid) -> AgentResult<Option<Case>> {
        self.query(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM cases WHERE id = ?1", CASE_COLUMNS),
                    params![id.to_string()],
                    case_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_by_consultation(&self, consultation: Uuid) -> AgentResult<Option<Case>> {
        self.query(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM cases WHERE source_consultation = ?1 ORDER BY seq LIMIT 1", CASE_COLUMNS),
                    params![consultation.to_string()],
                    case_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn all(&self) -> AgentResult<Vec<Case>> {
        self.query(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM cases ORDER BY seq ASC", CASE_COLUMNS))?;
            let rows = stmt.query_map([], case_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn count(&self) -> AgentResult<usize> {
        self.query(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM cases", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }
}

#[async_trait]
impl RuleStore for SqliteKnowledgeStore {
    async fn insert(&self, rule: GuidanceRule) -> AgentResult<()> {
        let blob = encode_embedding(&rule.embedding)?;
        self.query(move |conn| {
            let result = conn.execute(
                "INSERT INTO rules (id, principle, category, embedding, confidence, success_count, failure_count, state, version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    rule.id.to_string(),
                    &rule.principle,
                    &rule.category,
                    &blob,
                    rule.confidence,
                    rule.success_count,
                    rule.failure_count,
                    rule.state.as_str(),
                    rule.version as i64,
                    rule.created_at.to_rfc3339(),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(AgentError::DuplicateId { kind: "rule", id: rule.id.to_string() })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get(&self, id: Uuid) -> AgentResult<Option<GuidanceRule>> {
        self.query(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM rules WHERE id = ?1", RULE_COLUMNS),
                    params![id.to_string()],
                    rule_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn all(&self) -> AgentResult<Vec<GuidanceRule>> {
        self.query(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM rules ORDER BY rowid ASC", RULE_COLUMNS))?;
            let rows = stmt.query_map([], rule_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn compare_and_swap(&self, next: &GuidanceRule, expected_version: u64) -> AgentResult<bool> {
        let rule = next.clone();
        self.query(move |conn| {
            let changed = conn.execute(
                "UPDATE rules
                 SET principle = ?1, category = ?2, confidence = ?3, success_count = ?4,
                     failure_count = ?5, state = ?6, version = version + 1
                 WHERE id = ?7 AND version = ?8",
                params![
                    &rule.principle,
                    &rule.category,
                    rule.confidence,
                    rule.success_count,
                    rule.failure_count,
                    rule.state.as_str(),
                    rule.id.to_string(),
                    expected_version as i64,
                ],
            )?;
            if changed == 1 {
                return Ok(true);
            }

            let exists: Option<i64> = conn
                .query_row("SELECT version FROM rules WHERE id = ?1", params![rule.id.to_string()], |row| row.get(0))
                .optional()?;
            match exists {
                Some(_) => Ok(false),
                None => Err(AgentError::NotFound { kind: "rule", id: rule.id.to_string() }),
            }
        })
        .await
    }
}
