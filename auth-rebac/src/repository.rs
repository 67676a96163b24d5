use crate::{
    error::{RebacError, Result},
    models::*,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub mod postgres;

pub use postgres::PostgresTupleStore;

/// Storage interface for relation tuples.
///
/// `find_*` methods are index lookups returning only tuples active at `at`.
/// `write` applies a batch atomically: every op or none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Forward lookup keyed by (object namespace, object key, relation).
    async fn find_by_object(
        &self,
        object: &EntityRef,
        relation: &Relation,
        at: DateTime<Utc>,
    ) -> Result<Vec<RelationTuple>>;

    /// Reverse lookup keyed by (object namespace, relation), narrowed by subject.
    async fn find_by_relation(
        &self,
        namespace: &Namespace,
        relation: &Relation,
        subject: &SubjectMatch,
        at: DateTime<Utc>,
    ) -> Result<Vec<RelationTuple>>;

    /// Every stored tuple matching `filter`, active or not.
    async fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationTuple>>;

    async fn write(&self, batch: WriteBatch) -> Result<WriteSummary>;

    async fn insert(&self, tuple: RelationTuple) -> Result<WriteSummary> {
        self.write(WriteBatch::new().insert(tuple)).await
    }

    async fn delete(&self, filter: TupleFilter) -> Result<u64> {
        let summary = self.write(WriteBatch::new().delete(filter)).await?;
        Ok(summary.deleted)
    }
}

/// Rejects ops that can never be applied, before anything is written.
pub(crate) fn validate_batch(batch: &WriteBatch) -> Result<()> {
    for op in &batch.ops {
        if let WriteOp::Insert(tuple) = op {
            if let (Some(from), Some(to)) = (tuple.valid_from, tuple.valid_to) {
                if from >= to {
                    return Err(RebacError::InvalidTuple(format!(
                        "{}: valid_from must precede valid_to",
                        tuple
                    )));
                }
            }
        }
    }
    Ok(())
}

type ObjectIndexKey = (Namespace, i64, Relation);
type RelationIndexKey = (Namespace, Relation);

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    tuples: HashMap<u64, RelationTuple>,
    by_object: HashMap<ObjectIndexKey, BTreeSet<u64>>,
    by_relation: HashMap<RelationIndexKey, BTreeSet<u64>>,
}

impl Tables {
    fn insert(&mut self, tuple: RelationTuple) -> bool {
        let object_key = (
            tuple.object.namespace.clone(),
            tuple.object.key,
            tuple.relation.clone(),
        );
        let duplicate = self.by_object.get(&object_key).map_or(false, |ids| {
            ids.iter()
                .filter_map(|id| self.tuples.get(id))
                .any(|existing| existing.same_identity_and_window(&tuple))
        });
        if duplicate {
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.by_object.entry(object_key).or_default().insert(id);
        self.by_relation
            .entry((tuple.object.namespace.clone(), tuple.relation.clone()))
            .or_default()
            .insert(id);
        self.tuples.insert(id, tuple);
        true
    }

    fn matching_ids(&self, filter: &TupleFilter) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .tuples
            .iter()
            .filter(|(_, tuple)| filter.matches(tuple))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn remove(&mut self, id: u64) {
        let Some(tuple) = self.tuples.remove(&id) else {
            return;
        };
        let object_key = (tuple.object.namespace.clone(), tuple.object.key, tuple.relation.clone());
        if let Some(ids) = self.by_object.get_mut(&object_key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_object.remove(&object_key);
            }
        }
        let relation_key = (tuple.object.namespace, tuple.relation);
        if let Some(ids) = self.by_relation.get_mut(&relation_key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_relation.remove(&relation_key);
            }
        }
    }

    fn active<'a>(
        &'a self,
        ids: Option<&'a BTreeSet<u64>>,
        at: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a RelationTuple> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.tuples.get(id))
            .filter(move |tuple| tuple.is_active_at(at))
    }
}

/// In-memory tuple store for tests, development and embedding.
///
/// A whole batch is applied under one write lock, so readers observe either
/// all of a batch or none of it.
#[derive(Debug, Default)]
pub struct InMemoryTupleStore {
    tables: RwLock<Tables>,
}

impl InMemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TupleStore for InMemoryTupleStore {
    async fn find_by_object(
        &self,
        object: &EntityRef,
        relation: &Relation,
        at: DateTime<Utc>,
    ) -> Result<Vec<RelationTuple>> {
        let tables = self.tables.read();
        let key = (object.namespace.clone(), object.key, relation.clone());
        Ok(tables.active(tables.by_object.get(&key), at).cloned().collect())
    }

    async fn find_by_relation(
        &self,
        namespace: &Namespace,
        relation: &Relation,
        subject: &SubjectMatch,
        at: DateTime<Utc>,
    ) -> Result<Vec<RelationTuple>> {
        let tables = self.tables.read();
        let key = (namespace.clone(), relation.clone());
        Ok(tables
            .active(tables.by_relation.get(&key), at)
            .filter(|tuple| match (subject, &tuple.subject) {
                (SubjectMatch::Any, _) => true,
                (SubjectMatch::Concrete(wanted), Subject::Concrete(entity)) => wanted == entity,
                (SubjectMatch::Usersets, Subject::Userset(_)) => true,
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationTuple>> {
        let tables = self.tables.read();
        Ok(tables
            .matching_ids(filter)
            .into_iter()
            .filter_map(|id| tables.tuples.get(&id).cloned())
            .collect())
    }

    async fn write(&self, batch: WriteBatch) -> Result<WriteSummary> {
        validate_batch(&batch)?;

        let mut summary = WriteSummary::default();
        let mut tables = self.tables.write();
        for op in batch.ops {
            match op {
                WriteOp::Insert(tuple) => {
                    if tables.insert(tuple) {
                        summary.inserted += 1;
                    }
                }
                WriteOp::Delete(filter) => {
                    for id in tables.matching_ids(&filter) {
                        tables.remove(id);
                        summary.deleted += 1;
                    }
                }
                WriteOp::Close { filter, at } => {
                    for id in tables.matching_ids(&filter) {
                        let Some(tuple) = tables.tuples.get_mut(&id) else {
                            continue;
                        };
                        if !tuple.is_active_at(at) {
                            continue;
                        }
                        // Closing at its own start would leave an empty window.
                        if tuple.valid_from == Some(at) {
                            tables.remove(id);
                        } else {
                            tuple.valid_to = Some(at);
                        }
                        summary.closed += 1;
                    }
                }
            }
        }

        debug!(
            inserted = summary.inserted,
            deleted = summary.deleted,
            closed = summary.closed,
            "Applied in-memory write batch"
        );
        Ok(summary)
    }
}
