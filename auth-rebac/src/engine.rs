use crate::{
    cancel::CancellationSignal,
    check::{CheckRequest, UsersetResolver},
    config::ResolverConfig,
    error::Result,
    expand::{ExpandNode, SubjectExpander},
    gateway::{AuthorizationGateway, Decision},
    list::{ListObjectsRequest, ObjectLister},
    models::*,
    repository::TupleStore,
    schema::Schema,
    writer::{NewRelationship, RelationshipWriter},
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Relationship-based authorization engine
pub struct RebacEngine {
    /// Storage for relation tuples
    store: Arc<dyn TupleStore>,

    /// Optional relation registry; `None` accepts any relation name
    schema: Option<Arc<Schema>>,

    config: ResolverConfig,

    resolver: Arc<UsersetResolver>,
    expander: SubjectExpander,
    lister: ObjectLister,
    writer: RelationshipWriter,
    gateway: AuthorizationGateway,
}

impl RebacEngine {
    /// Create an engine over `store` with default limits and no schema
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        Self::assemble(store, ResolverConfig::default(), None)
    }

    fn assemble(
        store: Arc<dyn TupleStore>,
        config: ResolverConfig,
        schema: Option<Arc<Schema>>,
    ) -> Self {
        let mut resolver = UsersetResolver::new(store.clone(), config.clone());
        let mut writer = RelationshipWriter::new(store.clone());
        if let Some(schema) = &schema {
            resolver = resolver.with_schema(schema.clone());
            writer = writer.with_schema(schema.clone());
        }
        let resolver = Arc::new(resolver);

        Self {
            expander: SubjectExpander::new(resolver.clone()),
            lister: ObjectLister::new(resolver.clone()),
            gateway: AuthorizationGateway::new(resolver.clone()),
            resolver,
            writer,
            store,
            schema,
            config,
        }
    }

    /// Replace resolution limits
    pub fn with_config(self, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(self.store, config, self.schema))
    }

    /// Enforce `schema` on writes and resolve undefined relations as empty
    pub fn with_schema(self, schema: Schema) -> Result<Self> {
        schema.validate()?;
        info!(namespaces = schema.namespaces.len(), "Schema installed");
        Ok(Self::assemble(self.store, self.config, Some(Arc::new(schema))))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.clone()
    }

    pub fn gateway(&self) -> &AuthorizationGateway {
        &self.gateway
    }

    pub fn writer(&self) -> &RelationshipWriter {
        &self.writer
    }

    // =============================================================================
    // Queries
    // =============================================================================

    pub async fn check(&self, request: &CheckRequest, cancel: &CancellationSignal) -> Result<bool> {
        self.resolver.check(request, cancel).await
    }

    pub async fn authorize(
        &self,
        request: &CheckRequest,
        cancel: &CancellationSignal,
    ) -> Result<Decision> {
        self.gateway.authorize(request, cancel).await
    }

    pub async fn list_objects(
        &self,
        request: &ListObjectsRequest,
        cancel: &CancellationSignal,
    ) -> Result<BTreeSet<i64>> {
        self.lister.list_objects(request, cancel).await
    }

    pub async fn expand(
        &self,
        object: &EntityRef,
        relation: &Relation,
        cancel: &CancellationSignal,
    ) -> Result<ExpandNode> {
        self.expander.expand(object, relation, cancel).await
    }

    pub async fn list_subjects(
        &self,
        object: &EntityRef,
        relation: &Relation,
        cancel: &CancellationSignal,
    ) -> Result<BTreeSet<EntityRef>> {
        self.expander.list_subjects(object, relation, cancel).await
    }

    // =============================================================================
    // Tuple Management
    // =============================================================================

    pub async fn write_relationship(&self, relationship: NewRelationship) -> Result<WriteSummary> {
        self.writer.add_relationships(vec![relationship]).await
    }

    /// Atomic batch write
    pub async fn write_relationships(&self, relationships: Vec<NewRelationship>) -> Result<WriteSummary> {
        self.writer.add_relationships(relationships).await
    }

    pub async fn grant_on_create(
        &self,
        object: &EntityRef,
        creator: &EntityRef,
        organizations: &[EntityRef],
        editor: i64,
    ) -> Result<WriteSummary> {
        self.writer
            .grant_on_create(object, creator, organizations, editor)
            .await
    }

    pub async fn delete_relationship(&self, key: &TupleKey) -> Result<u64> {
        self.writer.revoke_relationship(key).await
    }

    pub async fn expire_relationship(&self, key: &TupleKey, at: DateTime<Utc>) -> Result<u64> {
        self.writer.expire_relationship(key, at).await
    }

    pub async fn remove_all_relationships_for_object(&self, entity: &EntityRef) -> Result<u64> {
        self.writer.remove_all_relationships_for_object(entity).await
    }

    /// Read stored tuples matching a filter, including inactive ones
    pub async fn read_tuples(&self, filter: &TupleFilter) -> Result<Vec<RelationTuple>> {
        self.store.read(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RebacError;
    use crate::repository::InMemoryTupleStore;

    #[tokio::test]
    async fn test_basic_check() {
        let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()));
        let cancel = CancellationSignal::new();
        let request = CheckRequest::new(EntityRef::user_task(1), Relation::owner(), EntityRef::user(1));

        // Initially no permission
        assert!(!engine.check(&request, &cancel).await.unwrap());

        engine
            .write_relationship(NewRelationship::new(
                EntityRef::user_task(1),
                Relation::owner(),
                EntityRef::user(1),
                1,
            ))
            .await
            .unwrap();

        assert!(engine.check(&request, &cancel).await.unwrap());
        assert_eq!(engine.authorize(&request, &cancel).await.unwrap(), Decision::Allow);
    }

    #[tokio::test]
    async fn test_schema_applies_to_writes() {
        let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()))
            .with_schema(Schema::task_schema())
            .unwrap();

        let err = engine
            .write_relationship(NewRelationship::new(
                EntityRef::user_task(1),
                Relation::new("approver").unwrap(),
                EntityRef::user(1),
                1,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RebacError::InvalidRelationReference { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()));
        let err = engine
            .with_config(ResolverConfig::default().with_max_depth(0))
            .err()
            .unwrap();
        assert!(matches!(err, RebacError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_read_tuples_includes_history() {
        let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()));
        let key = TupleKey {
            object: EntityRef::user_task(1),
            relation: Relation::viewer(),
            subject: EntityRef::user(1).into(),
        };
        engine
            .write_relationship(NewRelationship::new(
                key.object.clone(),
                key.relation.clone(),
                key.subject.clone(),
                1,
            ))
            .await
            .unwrap();
        engine.expire_relationship(&key, Utc::now()).await.unwrap();

        let tuples = engine
            .read_tuples(&TupleFilter::for_key(&key))
            .await
            .unwrap();
        assert_eq!(tuples.len(), 1);
        assert!(tuples[0].valid_to.is_some());
    }
}
