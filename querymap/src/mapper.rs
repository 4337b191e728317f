//! Typed single-entity mapper.

use std::marker::PhantomData;

use querymap_core::{Identifiable, ParamValue, Query, RepoResult, Repository};
use tracing::debug;

/// Fixed greeting returned by [`Mapper::hello`].
pub const GREETING: &str = "hello baomidou!";

/// Repository handle bound to one entity type.
///
/// A `Mapper` owns no rows and no mutable state. Lookups are expressed as
/// [`Query`] predicates and delegated to the wrapped repository's generic
/// "at most one matching row" primitive, [`Repository::select_one`].
/// It is `Send + Sync` whenever `R` is, so one mapper can serve concurrent callers.
pub struct Mapper<T, R> {
    repo: R,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R> Mapper<T, R>
where
    T: Identifiable + Send + Sync + 'static,
    R: Repository<T>,
{
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            _entity: PhantomData,
        }
    }

    /// Look up the entity whose identity column equals `id`.
    ///
    /// Returns `Ok(None)` when nothing matches. Two or more matches surface as
    /// [`RepoError::TooManyResults`](querymap_core::RepoError::TooManyResults),
    /// and storage failures are returned as the backend reported them.
    pub async fn find_by_id(&self, id: T::Key) -> RepoResult<Option<T>>
    where
        T::Key: Into<ParamValue>,
    {
        let value: ParamValue = id.into();
        debug!(column = T::ID_COLUMN, id = %value, "mapper find_by_id");
        let query = Query::new().eq(T::ID_COLUMN, value);
        let found = self.repo.select_one(&query).await;
        match &found {
            Ok(row) => debug!(found = row.is_some(), "mapper find_by_id done"),
            Err(e) => debug!(error = %e, "mapper find_by_id failed"),
        }
        found
    }

    pub fn hello(&self) -> &'static str {
        GREETING
    }

    /// The wrapped repository, for operations beyond the mapper's own.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn into_inner(self) -> R {
        self.repo
    }
}

impl<T, R: Clone> Clone for Mapper<T, R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            _entity: PhantomData,
        }
    }
}
