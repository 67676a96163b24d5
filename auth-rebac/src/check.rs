use crate::{
    cancel::CancellationSignal,
    config::ResolverConfig,
    context::ResolutionContext,
    error::{RebacError, Result},
    models::*,
    repository::TupleStore,
    schema::Schema,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// "Does `subject` have `relation` on `object`?"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRequest {
    pub object: EntityRef,
    pub relation: Relation,
    pub subject: EntityRef,
}

impl CheckRequest {
    pub fn new(object: EntityRef, relation: Relation, subject: EntityRef) -> Self {
        Self {
            object,
            relation,
            subject,
        }
    }
}

/// Resolves Check queries by breadth-first expansion of usersets:
/// - Direct tuples naming the subject prove membership immediately
/// - Userset tuples enqueue `(namespace, key, relation)` for expansion
/// - Each userset node is expanded at most once per invocation
/// - Expansion stops at `max_depth` hops and fails closed
pub struct UsersetResolver {
    store: Arc<dyn TupleStore>,
    config: ResolverConfig,
    schema: Option<Arc<Schema>>,
}

impl UsersetResolver {
    pub fn new(store: Arc<dyn TupleStore>, config: ResolverConfig) -> Self {
        Self {
            store,
            config,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn TupleStore {
        self.store.as_ref()
    }

    /// Whether `relation` can hold members in `namespace`. Always true without
    /// a schema.
    pub(crate) fn relation_known(&self, namespace: &Namespace, relation: &Relation) -> bool {
        self.schema
            .as_ref()
            .map_or(true, |schema| schema.has_relation(namespace, relation))
    }

    /// Check if `request.subject` has `request.relation` on `request.object`.
    ///
    /// Returns `Err(ResolutionDepthExceeded)` when no path proves membership
    /// and the depth bound cut off at least one branch.
    #[instrument(skip(self, cancel), fields(object = %request.object, relation = %request.relation, subject = %request.subject))]
    pub async fn check(&self, request: &CheckRequest, cancel: &CancellationSignal) -> Result<bool> {
        let mut ctx = ResolutionContext::new(&self.config, cancel);
        let root = request.object.userset(request.relation.clone());
        let resolution = self.resolve(&root, &request.subject, &mut ctx);

        let allowed = tokio::time::timeout(self.config.timeout(), resolution)
            .await
            .map_err(|_| RebacError::DeadlineExceeded {
                timeout_ms: self.config.timeout_ms,
            })??;

        debug!(allowed, "Check completed");
        Ok(allowed)
    }

    /// Membership of `subject` in `root`, sharing `ctx` with the caller.
    pub(crate) async fn resolve(
        &self,
        root: &Userset,
        subject: &EntityRef,
        ctx: &mut ResolutionContext,
    ) -> Result<bool> {
        self.resolve_from(root, 0, subject, ctx).await
    }

    /// Like [`resolve`](Self::resolve) with `root` already `start_depth` hops
    /// below the queried object.
    pub(crate) async fn resolve_from(
        &self,
        root: &Userset,
        start_depth: u32,
        subject: &EntityRef,
        ctx: &mut ResolutionContext,
    ) -> Result<bool> {
        if !self.relation_known(&root.entity.namespace, &root.relation) {
            debug!(userset = %root, "Relation not defined in schema; empty membership");
            return Ok(false);
        }

        let mut visited: HashSet<Userset> = HashSet::new();
        let mut frontier: VecDeque<(Userset, u32)> = VecDeque::new();
        let mut depth_cut = false;

        visited.insert(root.clone());
        frontier.push_back((root.clone(), start_depth));

        while let Some((node, depth)) = frontier.pop_front() {
            let tuples = ctx
                .find_by_object(self.store(), &node.entity, &node.relation)
                .await?;

            for tuple in tuples {
                match tuple.subject {
                    Subject::Concrete(ref entity) if entity == subject => {
                        debug!(via = %node, depth, "Direct tuple found");
                        return Ok(true);
                    }
                    Subject::Concrete(_) => {}
                    Subject::Userset(userset) => {
                        if !self.relation_known(&userset.entity.namespace, &userset.relation) {
                            debug!(userset = %userset, "Relation not defined in schema; skipped");
                            continue;
                        }
                        if visited.contains(&userset) {
                            continue;
                        }
                        if depth + 1 >= ctx.max_depth {
                            depth_cut = true;
                            continue;
                        }
                        visited.insert(userset.clone());
                        frontier.push_back((userset, depth + 1));
                    }
                }
            }
        }

        if depth_cut {
            warn!(root = %root, subject = %subject, max_depth = ctx.max_depth, "Resolution depth exceeded");
            return Err(RebacError::ResolutionDepthExceeded {
                max_depth: ctx.max_depth,
            });
        }
        Ok(false)
    }
}
