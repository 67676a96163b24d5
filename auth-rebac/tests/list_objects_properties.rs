//! Property tests: ListObjects agrees with Check
//!
//! For random tuple graphs over a handful of teams, tasks and users,
//! `list_objects(ns, relation, user)` must equal the set of keys `k` for which
//! `check(ns:k, relation, user)` returns true, under any depth bound.

use auth_rebac::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const KEYS: i64 = 5;
const USERS: i64 = 3;

/// (object namespace, object key, subject kind, subject key)
type Edge = (u8, i64, u8, i64);

fn arb_edge() -> impl Strategy<Value = Edge> {
    (0u8..2, 0..KEYS, 0u8..3, 0..KEYS)
}

fn target(namespace: u8) -> (Namespace, Relation) {
    if namespace == 0 {
        (Namespace::team(), Relation::member())
    } else {
        (Namespace::user_task(), Relation::viewer())
    }
}

fn to_relationship((namespace, key, kind, subject_key): Edge) -> Option<NewRelationship> {
    let (object_namespace, relation) = target(namespace);
    let object = EntityRef::new(object_namespace, key);
    let subject: Subject = match kind {
        0 => EntityRef::user(subject_key % USERS).into(),
        1 => EntityRef::team(subject_key).userset(Relation::member()).into(),
        _ => EntityRef::user_task(subject_key).userset(Relation::viewer()).into(),
    };
    if let Subject::Userset(userset) = &subject {
        if userset.entity == object && userset.relation == relation {
            return None;
        }
    }
    Some(NewRelationship::new(object, relation, subject, 1))
}

async fn brute_force(engine: &RebacEngine, namespace: u8, user: i64) -> BTreeSet<i64> {
    let (object_namespace, relation) = target(namespace);
    let cancel = CancellationSignal::new();
    let mut keys = BTreeSet::new();
    for key in 0..KEYS {
        let request = CheckRequest::new(
            EntityRef::new(object_namespace.clone(), key),
            relation.clone(),
            EntityRef::user(user),
        );
        if let Ok(true) = engine.check(&request, &cancel).await {
            keys.insert(key);
        }
    }
    keys
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn list_objects_matches_check(
        edges in prop::collection::vec(arb_edge(), 0..24),
        max_depth in 1u32..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let comparisons = rt.block_on(async {
            let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()))
                .with_config(ResolverConfig::default().with_max_depth(max_depth))
                .unwrap();
            let relationships: Vec<_> = edges.into_iter().filter_map(to_relationship).collect();
            engine.write_relationships(relationships).await.unwrap();

            let mut comparisons = Vec::new();
            for namespace in 0u8..2 {
                let (object_namespace, relation) = target(namespace);
                for user in 0..USERS {
                    let request = ListObjectsRequest::new(
                        object_namespace.clone(),
                        relation.clone(),
                        EntityRef::user(user),
                    );
                    let listed = engine
                        .list_objects(&request, &CancellationSignal::new())
                        .await
                        .unwrap();
                    let expected = brute_force(&engine, namespace, user).await;
                    comparisons.push((listed, expected));
                }
            }
            comparisons
        });

        for (listed, expected) in comparisons {
            prop_assert_eq!(listed, expected);
        }
    }

    #[test]
    fn list_objects_is_idempotent(edges in prop::collection::vec(arb_edge(), 0..24)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (first, second) = rt.block_on(async {
            let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()));
            let relationships: Vec<_> = edges.into_iter().filter_map(to_relationship).collect();
            engine.write_relationships(relationships).await.unwrap();

            let request = ListObjectsRequest::new(Namespace::user_task(), Relation::viewer(), EntityRef::user(0));
            let cancel = CancellationSignal::new();
            let first = engine.list_objects(&request, &cancel).await.unwrap();
            let second = engine.list_objects(&request, &cancel).await.unwrap();
            (first, second)
        });

        prop_assert_eq!(first, second);
    }
}
