//! PostgreSQL-backed tuple store
//!
//! Every statement below is a fixed, parameterized query. Optional filter
//! fields are bound as nullable parameters; identifiers coming from callers
//! are never spliced into SQL text.

use crate::{
    error::{RebacError, Result},
    models::*,
    repository::{validate_batch, TupleStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, info};

const FIND_BY_OBJECT: &str = r#"
    SELECT object_namespace, object_key, relation,
           subject_namespace, subject_key, subject_relation,
           valid_from, valid_to, last_edited_by
    FROM relation_tuples
    WHERE object_namespace = $1
      AND object_key = $2
      AND relation = $3
      AND (valid_from IS NULL OR valid_from <= $4)
      AND (valid_to IS NULL OR valid_to > $4)
    ORDER BY id
"#;

const FIND_BY_RELATION_ANY: &str = r#"
    SELECT object_namespace, object_key, relation,
           subject_namespace, subject_key, subject_relation,
           valid_from, valid_to, last_edited_by
    FROM relation_tuples
    WHERE object_namespace = $1
      AND relation = $2
      AND (valid_from IS NULL OR valid_from <= $3)
      AND (valid_to IS NULL OR valid_to > $3)
    ORDER BY id
"#;

const FIND_BY_RELATION_CONCRETE: &str = r#"
    SELECT object_namespace, object_key, relation,
           subject_namespace, subject_key, subject_relation,
           valid_from, valid_to, last_edited_by
    FROM relation_tuples
    WHERE object_namespace = $1
      AND relation = $2
      AND subject_namespace = $3
      AND subject_key = $4
      AND subject_relation IS NULL
      AND (valid_from IS NULL OR valid_from <= $5)
      AND (valid_to IS NULL OR valid_to > $5)
    ORDER BY id
"#;

const FIND_BY_RELATION_USERSETS: &str = r#"
    SELECT object_namespace, object_key, relation,
           subject_namespace, subject_key, subject_relation,
           valid_from, valid_to, last_edited_by
    FROM relation_tuples
    WHERE object_namespace = $1
      AND relation = $2
      AND subject_relation IS NOT NULL
      AND (valid_from IS NULL OR valid_from <= $3)
      AND (valid_to IS NULL OR valid_to > $3)
    ORDER BY id
"#;

const READ_FILTERED: &str = r#"
    SELECT object_namespace, object_key, relation,
           subject_namespace, subject_key, subject_relation,
           valid_from, valid_to, last_edited_by
    FROM relation_tuples
    WHERE ($1::text IS NULL OR object_namespace = $1)
      AND ($2::bigint IS NULL OR object_key = $2)
      AND ($3::text IS NULL OR relation = $3)
      AND ($4::text IS NULL OR subject_namespace = $4)
      AND ($5::bigint IS NULL OR subject_key = $5)
      AND ($6::text = 'any'
           OR ($6::text = 'concrete' AND subject_relation IS NULL)
           OR ($6::text = 'is' AND subject_relation = $7))
    ORDER BY id
"#;

const INSERT_TUPLE: &str = r#"
    INSERT INTO relation_tuples (
        object_namespace, object_key, relation,
        subject_namespace, subject_key, subject_relation,
        valid_from, valid_to, last_edited_by
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT DO NOTHING
"#;

const DELETE_FILTERED: &str = r#"
    DELETE FROM relation_tuples
    WHERE ($1::text IS NULL OR object_namespace = $1)
      AND ($2::bigint IS NULL OR object_key = $2)
      AND ($3::text IS NULL OR relation = $3)
      AND ($4::text IS NULL OR subject_namespace = $4)
      AND ($5::bigint IS NULL OR subject_key = $5)
      AND ($6::text = 'any'
           OR ($6::text = 'concrete' AND subject_relation IS NULL)
           OR ($6::text = 'is' AND subject_relation = $7))
"#;

/// Rows whose window starts exactly at the close time; closing them would
/// leave an empty window, so they are removed instead.
const CLOSE_DELETE_STARTING: &str = r#"
    DELETE FROM relation_tuples
    WHERE ($1::text IS NULL OR object_namespace = $1)
      AND ($2::bigint IS NULL OR object_key = $2)
      AND ($3::text IS NULL OR relation = $3)
      AND ($4::text IS NULL OR subject_namespace = $4)
      AND ($5::bigint IS NULL OR subject_key = $5)
      AND ($6::text = 'any'
           OR ($6::text = 'concrete' AND subject_relation IS NULL)
           OR ($6::text = 'is' AND subject_relation = $7))
      AND valid_from = $8
      AND (valid_to IS NULL OR valid_to > $8)
"#;

const CLOSE_FILTERED: &str = r#"
    UPDATE relation_tuples
    SET valid_to = $8
    WHERE ($1::text IS NULL OR object_namespace = $1)
      AND ($2::bigint IS NULL OR object_key = $2)
      AND ($3::text IS NULL OR relation = $3)
      AND ($4::text IS NULL OR subject_namespace = $4)
      AND ($5::bigint IS NULL OR subject_key = $5)
      AND ($6::text = 'any'
           OR ($6::text = 'concrete' AND subject_relation IS NULL)
           OR ($6::text = 'is' AND subject_relation = $7))
      AND (valid_from IS NULL OR valid_from < $8)
      AND (valid_to IS NULL OR valid_to > $8)
"#;

#[derive(Debug, FromRow)]
struct TupleRow {
    object_namespace: String,
    object_key: i64,
    relation: String,
    subject_namespace: String,
    subject_key: i64,
    subject_relation: Option<String>,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    last_edited_by: i64,
}

impl TryFrom<TupleRow> for RelationTuple {
    type Error = RebacError;

    fn try_from(row: TupleRow) -> Result<Self> {
        let corrupt = |e: RebacError| RebacError::CorruptTuple(e.to_string());

        let object = EntityRef::new(
            Namespace::try_from(row.object_namespace).map_err(corrupt)?,
            row.object_key,
        );
        let subject_entity = EntityRef::new(
            Namespace::try_from(row.subject_namespace).map_err(corrupt)?,
            row.subject_key,
        );
        let subject_relation = row
            .subject_relation
            .map(Relation::try_from)
            .transpose()
            .map_err(corrupt)?;

        Ok(RelationTuple {
            object,
            relation: Relation::try_from(row.relation).map_err(corrupt)?,
            subject: Subject::from_parts(subject_entity, subject_relation),
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            last_edited_by: row.last_edited_by,
        })
    }
}

/// Owned bind values for the shared filter clause ($1..$7).
struct FilterParams {
    object_namespace: Option<String>,
    object_key: Option<i64>,
    relation: Option<String>,
    subject_namespace: Option<String>,
    subject_key: Option<i64>,
    subject_relation_mode: &'static str,
    subject_relation: Option<String>,
}

impl From<&TupleFilter> for FilterParams {
    fn from(filter: &TupleFilter) -> Self {
        let (mode, relation) = match &filter.subject_relation {
            RelationMatch::Any => ("any", None),
            RelationMatch::Concrete => ("concrete", None),
            RelationMatch::Is(relation) => ("is", Some(relation.to_string())),
        };
        Self {
            object_namespace: filter.object_namespace.as_ref().map(ToString::to_string),
            object_key: filter.object_key,
            relation: filter.relation.as_ref().map(ToString::to_string),
            subject_namespace: filter.subject_namespace.as_ref().map(ToString::to_string),
            subject_key: filter.subject_key,
            subject_relation_mode: mode,
            subject_relation: relation,
        }
    }
}

/// Serialization failures and deadlocks are reported as write conflicts so
/// callers can decide whether to retry. Constraint violations are rejected
/// input and never retryable.
fn store_error(context: &str, error: sqlx::Error) -> RebacError {
    if let sqlx::Error::Database(db) = &error {
        let code = db.code();
        if matches!(code.as_deref(), Some("40001") | Some("40P01")) {
            return RebacError::ConcurrentWriteConflict(format!("{}: {}", context, error));
        }
        // Class 23: integrity constraint violation
        if code.as_deref().map_or(false, |code| code.starts_with("23")) {
            return RebacError::InvalidTuple(format!("{}: {}", context, error));
        }
    }
    RebacError::TupleStoreUnavailable(format!("{}: {}", context, error))
}

fn into_tuples(rows: Vec<TupleRow>) -> Result<Vec<RelationTuple>> {
    rows.into_iter().map(RelationTuple::try_from).collect()
}

/// PostgreSQL-backed tuple store
#[derive(Clone)]
pub struct PostgresTupleStore {
    pool: PgPool,
}

impl PostgresTupleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_connection_string(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| store_error("Failed to connect", e))?;

        info!("Tuple store connection pool created");
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RebacError::TupleStoreUnavailable(format!("Migration failed: {}", e)))?;
        info!("Tuple store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TupleStore for PostgresTupleStore {
    async fn find_by_object(
        &self,
        object: &EntityRef,
        relation: &Relation,
        at: DateTime<Utc>,
    ) -> Result<Vec<RelationTuple>> {
        let rows = sqlx::query_as::<_, TupleRow>(FIND_BY_OBJECT)
            .bind(object.namespace.as_str())
            .bind(object.key)
            .bind(relation.as_str())
            .bind(at)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to read tuples by object", e))?;

        into_tuples(rows)
    }

    async fn find_by_relation(
        &self,
        namespace: &Namespace,
        relation: &Relation,
        subject: &SubjectMatch,
        at: DateTime<Utc>,
    ) -> Result<Vec<RelationTuple>> {
        let query = match subject {
            SubjectMatch::Any => sqlx::query_as::<_, TupleRow>(FIND_BY_RELATION_ANY)
                .bind(namespace.as_str())
                .bind(relation.as_str())
                .bind(at),
            SubjectMatch::Concrete(entity) => sqlx::query_as::<_, TupleRow>(FIND_BY_RELATION_CONCRETE)
                .bind(namespace.as_str())
                .bind(relation.as_str())
                .bind(entity.namespace.as_str())
                .bind(entity.key)
                .bind(at),
            SubjectMatch::Usersets => sqlx::query_as::<_, TupleRow>(FIND_BY_RELATION_USERSETS)
                .bind(namespace.as_str())
                .bind(relation.as_str())
                .bind(at),
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to read tuples by relation", e))?;

        into_tuples(rows)
    }

    async fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationTuple>> {
        let params = FilterParams::from(filter);
        let rows = sqlx::query_as::<_, TupleRow>(READ_FILTERED)
            .bind(params.object_namespace)
            .bind(params.object_key)
            .bind(params.relation)
            .bind(params.subject_namespace)
            .bind(params.subject_key)
            .bind(params.subject_relation_mode)
            .bind(params.subject_relation)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to read tuples", e))?;

        debug!("Read {} tuples", rows.len());
        into_tuples(rows)
    }

    async fn write(&self, batch: WriteBatch) -> Result<WriteSummary> {
        validate_batch(&batch)?;
        debug!("Applying write batch of {} ops", batch.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to start transaction", e))?;

        let mut summary = WriteSummary::default();
        for op in batch.ops {
            match op {
                WriteOp::Insert(tuple) => {
                    let subject = tuple.subject.entity();
                    let result = sqlx::query(INSERT_TUPLE)
                        .bind(tuple.object.namespace.as_str())
                        .bind(tuple.object.key)
                        .bind(tuple.relation.as_str())
                        .bind(subject.namespace.as_str())
                        .bind(subject.key)
                        .bind(tuple.subject.relation().map(Relation::as_str))
                        .bind(tuple.valid_from)
                        .bind(tuple.valid_to)
                        .bind(tuple.last_edited_by)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| store_error("Failed to insert tuple", e))?;
                    summary.inserted += result.rows_affected();
                }
                WriteOp::Delete(filter) => {
                    let params = FilterParams::from(&filter);
                    let result = sqlx::query(DELETE_FILTERED)
                        .bind(params.object_namespace)
                        .bind(params.object_key)
                        .bind(params.relation)
                        .bind(params.subject_namespace)
                        .bind(params.subject_key)
                        .bind(params.subject_relation_mode)
                        .bind(params.subject_relation)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| store_error("Failed to delete tuples", e))?;
                    summary.deleted += result.rows_affected();
                }
                WriteOp::Close { filter, at } => {
                    let params = FilterParams::from(&filter);
                    let removed = sqlx::query(CLOSE_DELETE_STARTING)
                        .bind(params.object_namespace.clone())
                        .bind(params.object_key)
                        .bind(params.relation.clone())
                        .bind(params.subject_namespace.clone())
                        .bind(params.subject_key)
                        .bind(params.subject_relation_mode)
                        .bind(params.subject_relation.clone())
                        .bind(at)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| store_error("Failed to close tuples", e))?;
                    summary.closed += removed.rows_affected();

                    let result = sqlx::query(CLOSE_FILTERED)
                        .bind(params.object_namespace)
                        .bind(params.object_key)
                        .bind(params.relation)
                        .bind(params.subject_namespace)
                        .bind(params.subject_key)
                        .bind(params.subject_relation_mode)
                        .bind(params.subject_relation)
                        .bind(at)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| store_error("Failed to close tuples", e))?;
                    summary.closed += result.rows_affected();
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit transaction", e))?;

        info!(
            inserted = summary.inserted,
            deleted = summary.deleted,
            closed = summary.closed,
            "Write batch committed"
        );
        Ok(summary)
    }
}
