//! Per-invocation bookkeeping shared by Check, Expand and ListObjects.

use crate::{
    cancel::CancellationSignal,
    config::ResolverConfig,
    error::{RebacError, Result},
    models::*,
    repository::TupleStore,
};
use chrono::{DateTime, Utc};

/// Owned by exactly one invocation; never shared across concurrent requests.
#[derive(Debug)]
pub(crate) struct ResolutionContext {
    /// Snapshot time used for active-tuple filtering on every fetch.
    pub(crate) at: DateTime<Utc>,
    pub(crate) max_depth: u32,
    cancel: CancellationSignal,
    fetched: usize,
    max_tuples: usize,
}

impl ResolutionContext {
    pub(crate) fn new(config: &ResolverConfig, cancel: &CancellationSignal) -> Self {
        Self {
            at: Utc::now(),
            max_depth: config.max_depth,
            cancel: cancel.clone(),
            fetched: 0,
            max_tuples: config.max_tuples_per_request,
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        self.cancel.ensure_live()
    }

    fn account(&mut self, count: usize) -> Result<()> {
        self.fetched = self.fetched.saturating_add(count);
        if self.fetched > self.max_tuples {
            return Err(RebacError::ResourceLimitExceeded {
                limit: self.max_tuples,
            });
        }
        Ok(())
    }

    pub(crate) async fn find_by_object(
        &mut self,
        store: &dyn TupleStore,
        object: &EntityRef,
        relation: &Relation,
    ) -> Result<Vec<RelationTuple>> {
        self.ensure_live()?;
        let tuples = store.find_by_object(object, relation, self.at).await?;
        self.account(tuples.len())?;
        Ok(tuples)
    }

    pub(crate) async fn find_by_relation(
        &mut self,
        store: &dyn TupleStore,
        namespace: &Namespace,
        relation: &Relation,
        subject: &SubjectMatch,
    ) -> Result<Vec<RelationTuple>> {
        self.ensure_live()?;
        let tuples = store
            .find_by_relation(namespace, relation, subject, self.at)
            .await?;
        self.account(tuples.len())?;
        Ok(tuples)
    }

    #[cfg(test)]
    pub(crate) fn fetched(&self) -> usize {
        self.fetched
    }
}
