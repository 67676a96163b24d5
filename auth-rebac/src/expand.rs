use crate::{
    cancel::CancellationSignal,
    check::UsersetResolver,
    context::ResolutionContext,
    error::{RebacError, Result},
    models::*,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Node of an expanded userset tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ExpandNode {
    /// A concrete subject holding the relation.
    Leaf { subject: EntityRef },
    /// A userset and everything it expands to.
    Userset { userset: Userset, children: Vec<ExpandNode> },
    /// The userset is already being expanded further up this path.
    Cycle { userset: Userset },
    /// The depth bound stopped expansion here.
    Truncated { userset: Userset },
}

/// Subject expander finds all subjects with a given relation to an object
pub struct SubjectExpander {
    resolver: Arc<UsersetResolver>,
}

impl SubjectExpander {
    pub fn new(resolver: Arc<UsersetResolver>) -> Self {
        Self { resolver }
    }

    /// Expand the tree of usersets and subjects holding `relation` on `object`.
    pub async fn expand(
        &self,
        object: &EntityRef,
        relation: &Relation,
        cancel: &CancellationSignal,
    ) -> Result<ExpandNode> {
        let config = self.resolver.config();
        let mut ctx = ResolutionContext::new(config, cancel);
        let mut path = HashSet::new();
        let root = object.userset(relation.clone());

        tokio::time::timeout(config.timeout(), self.expand_node(root, 0, &mut path, &mut ctx))
            .await
            .map_err(|_| RebacError::DeadlineExceeded {
                timeout_ms: config.timeout_ms,
            })?
    }

    fn expand_node<'a>(
        &'a self,
        userset: Userset,
        depth: u32,
        path: &'a mut HashSet<Userset>,
        ctx: &'a mut ResolutionContext,
    ) -> BoxFuture<'a, Result<ExpandNode>> {
        Box::pin(async move {
            if depth >= ctx.max_depth {
                return Ok(ExpandNode::Truncated { userset });
            }
            if path.contains(&userset) {
                return Ok(ExpandNode::Cycle { userset });
            }
            if !self
                .resolver
                .relation_known(&userset.entity.namespace, &userset.relation)
            {
                return Ok(ExpandNode::Userset {
                    userset,
                    children: Vec::new(),
                });
            }

            debug!(userset = %userset, depth, "Expanding");
            let tuples = ctx
                .find_by_object(self.resolver.store(), &userset.entity, &userset.relation)
                .await?;

            path.insert(userset.clone());
            let mut children = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                match tuple.subject {
                    Subject::Concrete(subject) => children.push(ExpandNode::Leaf { subject }),
                    Subject::Userset(child) => {
                        children.push(self.expand_node(child, depth + 1, path, ctx).await?);
                    }
                }
            }
            path.remove(&userset);

            Ok(ExpandNode::Userset { userset, children })
        })
    }

    /// List all concrete subjects (flattened) holding `relation` on `object`.
    pub async fn list_subjects(
        &self,
        object: &EntityRef,
        relation: &Relation,
        cancel: &CancellationSignal,
    ) -> Result<BTreeSet<EntityRef>> {
        let tree = self.expand(object, relation, cancel).await?;
        let mut subjects = BTreeSet::new();
        Self::collect_leaves(&tree, &mut subjects);
        Ok(subjects)
    }

    fn collect_leaves(node: &ExpandNode, subjects: &mut BTreeSet<EntityRef>) {
        match node {
            ExpandNode::Leaf { subject } => {
                subjects.insert(subject.clone());
            }
            ExpandNode::Userset { children, .. } => {
                for child in children {
                    Self::collect_leaves(child, subjects);
                }
            }
            ExpandNode::Cycle { .. } | ExpandNode::Truncated { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::repository::{InMemoryTupleStore, TupleStore};

    async fn seed(store: &InMemoryTupleStore) {
        let tuples = [
            (EntityRef::user_task(1), Relation::viewer(), Subject::from(EntityRef::user(1))),
            (
                EntityRef::user_task(1),
                Relation::viewer(),
                EntityRef::team(5).userset(Relation::member()).into(),
            ),
            (EntityRef::team(5), Relation::member(), EntityRef::user(2).into()),
            (EntityRef::team(5), Relation::member(), EntityRef::user(3).into()),
        ];
        for (object, relation, subject) in tuples {
            store
                .insert(RelationTuple::new(object, relation, subject, 1))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_expand_subjects() {
        let store = Arc::new(InMemoryTupleStore::new());
        seed(&store).await;
        let resolver = Arc::new(UsersetResolver::new(store, ResolverConfig::default()));
        let expander = SubjectExpander::new(resolver);

        let subjects = expander
            .list_subjects(&EntityRef::user_task(1), &Relation::viewer(), &CancellationSignal::new())
            .await
            .unwrap();
        let expected: BTreeSet<_> = [EntityRef::user(1), EntityRef::user(2), EntityRef::user(3)]
            .into_iter()
            .collect();
        assert_eq!(subjects, expected);
    }

    #[tokio::test]
    async fn test_expand_marks_cycles() {
        let store = Arc::new(InMemoryTupleStore::new());
        let a = EntityRef::team(1).userset(Relation::member());
        let b = EntityRef::team(2).userset(Relation::member());
        store
            .insert(RelationTuple::new(a.entity.clone(), Relation::member(), b.clone().into(), 1))
            .await
            .unwrap();
        store
            .insert(RelationTuple::new(b.entity.clone(), Relation::member(), a.clone().into(), 1))
            .await
            .unwrap();

        let resolver = Arc::new(UsersetResolver::new(store, ResolverConfig::default()));
        let tree = SubjectExpander::new(resolver)
            .expand(&a.entity, &Relation::member(), &CancellationSignal::new())
            .await
            .unwrap();

        let expected = ExpandNode::Userset {
            userset: a.clone(),
            children: vec![ExpandNode::Userset {
                userset: b,
                children: vec![ExpandNode::Cycle { userset: a }],
            }],
        };
        assert_eq!(tree, expected);
    }
}
