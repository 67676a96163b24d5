use crate::{
    cancel::CancellationSignal,
    check::UsersetResolver,
    context::ResolutionContext,
    error::{RebacError, Result},
    models::*,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// "Which objects in `namespace` does `subject` have `relation` on?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObjectsRequest {
    pub namespace: Namespace,
    pub relation: Relation,
    pub subject: EntityRef,
}

impl ListObjectsRequest {
    pub fn new(namespace: Namespace, relation: Relation, subject: EntityRef) -> Self {
        Self {
            namespace,
            relation,
            subject,
        }
    }
}

/// Reverse expansion from a subject to the object keys it can reach.
///
/// Only tuples of the requested `(namespace, relation)` are scanned, never
/// the full object table. Direct grants are emitted as found; userset grants
/// are confirmed with the resolver, once per distinct userset.
pub struct ObjectLister {
    resolver: Arc<UsersetResolver>,
}

impl ObjectLister {
    pub fn new(resolver: Arc<UsersetResolver>) -> Self {
        Self { resolver }
    }

    #[instrument(skip(self, cancel), fields(namespace = %request.namespace, relation = %request.relation, subject = %request.subject))]
    pub async fn list_objects(
        &self,
        request: &ListObjectsRequest,
        cancel: &CancellationSignal,
    ) -> Result<BTreeSet<i64>> {
        let config = self.resolver.config();
        let mut ctx = ResolutionContext::new(config, cancel);

        let keys = tokio::time::timeout(config.timeout(), self.collect(request, &mut ctx))
            .await
            .map_err(|_| RebacError::DeadlineExceeded {
                timeout_ms: config.timeout_ms,
            })??;

        debug!(count = keys.len(), "ListObjects completed");
        Ok(keys)
    }

    async fn collect(
        &self,
        request: &ListObjectsRequest,
        ctx: &mut ResolutionContext,
    ) -> Result<BTreeSet<i64>> {
        let mut keys = BTreeSet::new();
        if !self
            .resolver
            .relation_known(&request.namespace, &request.relation)
        {
            return Ok(keys);
        }

        let direct = ctx
            .find_by_relation(
                self.resolver.store(),
                &request.namespace,
                &request.relation,
                &SubjectMatch::Concrete(request.subject.clone()),
            )
            .await?;
        keys.extend(direct.iter().map(|tuple| tuple.object.key));

        let indirect = ctx
            .find_by_relation(
                self.resolver.store(),
                &request.namespace,
                &request.relation,
                &SubjectMatch::Usersets,
            )
            .await?;

        let mut memo: HashMap<Userset, bool> = HashMap::new();
        for tuple in indirect {
            if keys.contains(&tuple.object.key) {
                continue;
            }
            let Subject::Userset(userset) = tuple.subject else {
                continue;
            };

            let member = match memo.get(&userset) {
                Some(member) => *member,
                None => {
                    let member = self.is_member(&userset, &request.subject, ctx).await?;
                    memo.insert(userset, member);
                    member
                }
            };
            if member {
                keys.insert(tuple.object.key);
            }
        }

        Ok(keys)
    }

    /// Membership in a userset found one hop below the object. Depth cut-offs
    /// exclude the candidate; every other failure aborts the listing.
    async fn is_member(
        &self,
        userset: &Userset,
        subject: &EntityRef,
        ctx: &mut ResolutionContext,
    ) -> Result<bool> {
        if ctx.max_depth <= 1 {
            warn!(userset = %userset, max_depth = ctx.max_depth, "Candidate excluded: resolution depth exceeded");
            return Ok(false);
        }
        match self.resolver.resolve_from(userset, 1, subject, ctx).await {
            Ok(member) => Ok(member),
            Err(RebacError::ResolutionDepthExceeded { max_depth }) => {
                warn!(userset = %userset, max_depth, "Candidate excluded: resolution depth exceeded");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
