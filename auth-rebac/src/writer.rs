use crate::{
    error::{RebacError, Result},
    models::*,
    repository::TupleStore,
    schema::Schema,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// A relationship to be written, before it becomes a stored tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub object: EntityRef,
    pub relation: Relation,
    pub subject: Subject,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub editor: i64,
}

impl NewRelationship {
    pub fn new(object: EntityRef, relation: Relation, subject: impl Into<Subject>, editor: i64) -> Self {
        Self {
            object,
            relation,
            subject: subject.into(),
            valid_from: None,
            valid_to: None,
            editor,
        }
    }

    pub fn valid_between(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    fn into_tuple(self) -> RelationTuple {
        RelationTuple::new(self.object, self.relation, self.subject, self.editor)
            .with_validity(self.valid_from, self.valid_to)
    }
}

/// Validates and commits relationship mutations. Every public method issues
/// exactly one atomic store write.
pub struct RelationshipWriter {
    store: Arc<dyn TupleStore>,
    schema: Option<Arc<Schema>>,
}

impl RelationshipWriter {
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        Self {
            store,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    fn validate(&self, tuple: &RelationTuple) -> Result<()> {
        if let Subject::Userset(userset) = &tuple.subject {
            if userset.entity == tuple.object && userset.relation == tuple.relation {
                return Err(RebacError::InvalidTuple(format!(
                    "{}: userset refers to itself",
                    tuple
                )));
            }
        }
        if let (Some(from), Some(to)) = (tuple.valid_from, tuple.valid_to) {
            if from >= to {
                return Err(RebacError::InvalidTuple(format!(
                    "{}: valid_from must precede valid_to",
                    tuple
                )));
            }
        }
        if let Some(schema) = &self.schema {
            schema.validate_tuple(tuple)?;
        }
        Ok(())
    }

    /// Grant `relation` on `object` to `subject`, or to the `subject#subject_relation`
    /// userset when a subject relation is given.
    pub async fn add_relationship(
        &self,
        object: EntityRef,
        relation: Relation,
        subject: EntityRef,
        subject_relation: Option<Relation>,
        editor: i64,
    ) -> Result<WriteSummary> {
        let subject = Subject::from_parts(subject, subject_relation);
        self.add_relationships(vec![NewRelationship::new(object, relation, subject, editor)])
            .await
    }

    /// All relationships are validated before any is written; the batch
    /// commits all-or-nothing.
    #[instrument(skip(self, relationships), fields(count = relationships.len()))]
    pub async fn add_relationships(&self, relationships: Vec<NewRelationship>) -> Result<WriteSummary> {
        let mut batch = WriteBatch::new();
        for relationship in relationships {
            let tuple = relationship.into_tuple();
            self.validate(&tuple)?;
            batch = batch.insert(tuple);
        }
        if batch.is_empty() {
            return Ok(WriteSummary::default());
        }

        let summary = self.store.write(batch).await?;
        info!(inserted = summary.inserted, "Relationships written");
        Ok(summary)
    }

    /// Initial grants for a newly created object: the creator becomes viewer
    /// and owner, and members of each organization become viewers.
    pub async fn grant_on_create(
        &self,
        object: &EntityRef,
        creator: &EntityRef,
        organizations: &[EntityRef],
        editor: i64,
    ) -> Result<WriteSummary> {
        let mut relationships = vec![
            NewRelationship::new(object.clone(), Relation::viewer(), creator.clone(), editor),
            NewRelationship::new(object.clone(), Relation::owner(), creator.clone(), editor),
        ];
        relationships.extend(organizations.iter().map(|organization| {
            NewRelationship::new(
                object.clone(),
                Relation::viewer(),
                organization.userset(Relation::member()),
                editor,
            )
        }));
        self.add_relationships(relationships).await
    }

    /// Delete every stored row with this identity, whatever its window.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn revoke_relationship(&self, key: &TupleKey) -> Result<u64> {
        let deleted = self.store.delete(TupleFilter::for_key(key)).await?;
        info!(deleted, "Relationship revoked");
        Ok(deleted)
    }

    /// End the validity of active rows with this identity at `at`. The rows
    /// stay readable as history.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn expire_relationship(&self, key: &TupleKey, at: DateTime<Utc>) -> Result<u64> {
        let summary = self
            .store
            .write(WriteBatch::new().close(TupleFilter::for_key(key), at))
            .await?;
        info!(closed = summary.closed, "Relationship expired");
        Ok(summary.closed)
    }

    /// Remove every tuple naming `entity` as object or as subject, in one
    /// batch. Returns the number of rows removed.
    #[instrument(skip(self, entity), fields(entity = %entity))]
    pub async fn remove_all_relationships_for_object(&self, entity: &EntityRef) -> Result<u64> {
        let batch = WriteBatch::new()
            .delete(TupleFilter::for_object(entity))
            .delete(TupleFilter::for_subject_entity(entity));
        let summary = self.store.write(batch).await?;
        info!(deleted = summary.deleted, "Relationships removed");
        Ok(summary.deleted)
    }
}
