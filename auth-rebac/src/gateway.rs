use crate::{
    cancel::CancellationSignal,
    check::{CheckRequest, UsersetResolver},
    error::{RebacError, Result},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Entry point for domain services guarding a protected entity.
///
/// Resource bounds fail closed as [`Decision::Deny`]. Store failures,
/// cancellation and deadlines are returned to the caller.
pub struct AuthorizationGateway {
    resolver: Arc<UsersetResolver>,
}

impl AuthorizationGateway {
    pub fn new(resolver: Arc<UsersetResolver>) -> Self {
        Self { resolver }
    }

    pub async fn authorize(
        &self,
        request: &CheckRequest,
        cancel: &CancellationSignal,
    ) -> Result<Decision> {
        match self.resolver.check(request, cancel).await {
            Ok(allowed) => {
                let decision = Decision::from(allowed);
                debug!(?decision, object = %request.object, relation = %request.relation, subject = %request.subject, "Authorization decided");
                Ok(decision)
            }
            Err(err @ (RebacError::ResolutionDepthExceeded { .. } | RebacError::ResourceLimitExceeded { .. })) => {
                warn!(
                    error = %err,
                    object = %request.object,
                    relation = %request.relation,
                    subject = %request.subject,
                    "Authorization denied: resolution bound reached"
                );
                Ok(Decision::Deny)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::models::*;
    use crate::repository::{InMemoryTupleStore, MockTupleStore, TupleStore};

    fn gateway(store: Arc<dyn TupleStore>, config: ResolverConfig) -> AuthorizationGateway {
        AuthorizationGateway::new(Arc::new(UsersetResolver::new(store, config)))
    }

    #[tokio::test]
    async fn test_allow_and_deny() {
        let store = Arc::new(InMemoryTupleStore::new());
        store
            .insert(RelationTuple::new(
                EntityRef::user_task(1),
                Relation::owner(),
                EntityRef::user(7).into(),
                1,
            ))
            .await
            .unwrap();

        let gateway = gateway(store, ResolverConfig::default());
        let cancel = CancellationSignal::new();

        let owner = CheckRequest::new(EntityRef::user_task(1), Relation::owner(), EntityRef::user(7));
        assert_eq!(gateway.authorize(&owner, &cancel).await.unwrap(), Decision::Allow);

        let stranger = CheckRequest::new(EntityRef::user_task(1), Relation::owner(), EntityRef::user(8));
        assert_eq!(gateway.authorize(&stranger, &cancel).await.unwrap(), Decision::Deny);
    }

    #[tokio::test]
    async fn test_depth_exceeded_denies() {
        let store = Arc::new(InMemoryTupleStore::new());
        for i in 0..4 {
            store
                .insert(RelationTuple::new(
                    EntityRef::team(i),
                    Relation::member(),
                    EntityRef::team(i + 1).userset(Relation::member()).into(),
                    1,
                ))
                .await
                .unwrap();
        }
        store
            .insert(RelationTuple::new(EntityRef::team(4), Relation::member(), EntityRef::user(7).into(), 1))
            .await
            .unwrap();

        let gateway = gateway(store, ResolverConfig::default().with_max_depth(2));
        let request = CheckRequest::new(EntityRef::team(0), Relation::member(), EntityRef::user(7));
        let decision = gateway.authorize(&request, &CancellationSignal::new()).await.unwrap();
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_deny() {
        let mut store = MockTupleStore::new();
        store
            .expect_find_by_object()
            .returning(|_, _, _| Err(RebacError::TupleStoreUnavailable("pool closed".to_string())));

        let gateway = gateway(Arc::new(store), ResolverConfig::default());
        let request = CheckRequest::new(EntityRef::user_task(1), Relation::viewer(), EntityRef::user(7));
        let err = gateway
            .authorize(&request, &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let gateway = gateway(Arc::new(InMemoryTupleStore::new()), ResolverConfig::default());
        let cancel = CancellationSignal::new();
        cancel.cancel();

        let request = CheckRequest::new(EntityRef::user_task(1), Relation::viewer(), EntityRef::user(7));
        let err = gateway.authorize(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, RebacError::Cancelled));
    }
}
