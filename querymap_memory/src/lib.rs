#![forbid(unsafe_code)]
#![allow(unexpected_cfgs)]
//! In-memory backend for querymap.
//!
//! [`MemoryRepository`] keeps rows in a shared `Vec` behind an `RwLock` and
//! evaluates [`Query`] wrappers directly against the values produced by
//! `Fetchable::column_values`. It is meant for tests, prototypes and
//! embedding, and follows the same semantics as the SQL backends: unknown
//! columns are rejected, comparisons against NULL never match, and ordering
//! puts NULLs first when ascending.

use std::cmp::Ordering;
use std::io;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use async_trait::async_trait;
use querymap_core::{
    Fetchable, Identifiable, ParamValue, Query, RepoError, RepoResult, Repository,
};
use serde::de::DeserializeOwned;

#[cfg(feature = "tracing")]
use tracing::info;

#[inline]
#[allow(unused_variables)]
fn obs_record(op: &str, table: &str, start: Instant, rows: usize, success: bool) {
    let elapsed = start.elapsed().as_millis() as u64;
    #[cfg(feature = "tracing")]
    {
        info!(
            backend = "memory",
            table = table,
            op = op,
            rows = rows,
            elapsed_ms = elapsed,
            success = success,
            "repo op"
        );
    }
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("repo_ops_total", 1, "op" => op.to_string(), "table" => table.to_string(), "success" => success.to_string());
        metrics::histogram!("repo_op_duration_ms", elapsed as f64, "op" => op.to_string(), "table" => table.to_string());
        if !success {
            metrics::counter!("repo_op_errors_total", 1, "op" => op.to_string(), "table" => table.to_string());
        }
    }
}

/// Record the outcome of `result` and pass it through.
fn observed<R>(
    op: &str,
    table: &str,
    start: Instant,
    result: RepoResult<R>,
    rows: impl FnOnce(&R) -> usize,
) -> RepoResult<R> {
    match &result {
        Ok(r) => obs_record(op, table, start, rows(r), true),
        Err(_) => obs_record(op, table, start, 0, false),
    }
    result
}

fn offline() -> RepoError {
    RepoError::backend(io::Error::new(
        io::ErrorKind::NotConnected,
        "memory store is offline",
    ))
}

fn poisoned() -> RepoError {
    RepoError::backend(io::Error::new(
        io::ErrorKind::Other,
        "memory store lock poisoned",
    ))
}

fn duplicate_key(key: &impl std::fmt::Debug) -> RepoError {
    RepoError::backend(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("duplicate key {:?}", key),
    ))
}

static NULL: ParamValue = ParamValue::Null;

/// Convert a generated integer id into the entity's key type.
fn key_from_i64<K: DeserializeOwned>(n: i64) -> RepoResult<K> {
    serde_json::from_value(serde_json::Value::from(n)).map_err(RepoError::backend)
}

struct State<T> {
    rows: Vec<T>,
    next_id: i64,
    online: bool,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
            online: true,
        }
    }
}

/// A cloneable handle over shared in-memory storage for entity `T`.
///
/// Clones share the same rows, so one clone can seed or take the store
/// offline while another is used through a `Mapper` or generated repository.
pub struct MemoryRepository<T> {
    state: Arc<RwLock<State<T>>>,
}

impl<T> Clone for MemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl<T> MemoryRepository<T>
where
    T: Fetchable + Identifiable + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store that already holds `rows`. See [`MemoryRepository::seed`].
    pub fn with_rows(rows: impl IntoIterator<Item = T>) -> RepoResult<Self> {
        let repo = Self::new();
        repo.seed(rows)?;
        Ok(repo)
    }

    /// Append rows verbatim. Ids are neither assigned nor checked for
    /// uniqueness, which makes it possible to stage ambiguous data.
    pub fn seed(&self, rows: impl IntoIterator<Item = T>) -> RepoResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.rows.extend(rows);
        Ok(())
    }

    /// Toggle availability. While offline every repository operation fails
    /// with a backend error.
    pub fn set_online(&self, online: bool) -> RepoResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.online = online;
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.state.read().map(|s| s.online).unwrap_or(false)
    }

    /// Copy of every stored row in insertion order.
    pub fn snapshot(&self) -> RepoResult<Vec<T>> {
        Ok(self.read()?.rows.clone())
    }

    pub fn len(&self) -> RepoResult<usize> {
        Ok(self.read()?.rows.len())
    }

    pub fn is_empty(&self) -> RepoResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State<T>>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        if !state.online {
            return Err(offline());
        }
        Ok(state)
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State<T>>> {
        let state = self.state.write().map_err(|_| poisoned())?;
        if !state.online {
            return Err(offline());
        }
        Ok(state)
    }
}

/// Evaluate `query` against one row.
fn row_matches<T: Fetchable>(query: &Query, row: &T) -> bool {
    let values = row.column_values();
    query.matches(|col: &str| {
        T::SELECT_COLUMNS
            .iter()
            .position(|c| *c == col)
            .and_then(|i| values.get(i))
    })
}

/// Order two rows by the query's sort keys. NULL sorts before any value;
/// values of incomparable kinds are treated as equal. A value missing from a
/// short row reads as NULL.
fn compare_rows(order: &[(usize, bool)], a: &[ParamValue], b: &[ParamValue]) -> Ordering {
    for &(idx, ascending) in order {
        let x = a.get(idx).unwrap_or(&NULL);
        let y = b.get(idx).unwrap_or(&NULL);
        let ord = match (x, y) {
            (ParamValue::Null, ParamValue::Null) => Ordering::Equal,
            (ParamValue::Null, _) => Ordering::Less,
            (_, ParamValue::Null) => Ordering::Greater,
            (x, y) => x.compare(y).unwrap_or(Ordering::Equal),
        };
        let ord = if ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn select_rows<T: Fetchable + Clone>(rows: &[T], query: &Query) -> Vec<T> {
    let mut hits: Vec<(Vec<ParamValue>, &T)> = rows
        .iter()
        .filter(|r| row_matches(query, *r))
        .map(|r| (r.column_values(), r))
        .collect();

    if !query.order().is_empty() {
        let order: Vec<(usize, bool)> = query
            .order()
            .iter()
            .filter_map(|o| {
                T::SELECT_COLUMNS
                    .iter()
                    .position(|c| *c == o.column)
                    .map(|i| (i, o.ascending))
            })
            .collect();
        hits.sort_by(|(a, _), (b, _)| compare_rows(&order, a, b));
    }

    hits.into_iter()
        .skip(query.offset_value().unwrap_or(0))
        .take(query.limit_value().unwrap_or(usize::MAX))
        .map(|(_, r)| r.clone())
        .collect()
}

#[async_trait]
impl<T> Repository<T> for MemoryRepository<T>
where
    T: Fetchable + Identifiable + Clone + Send + Sync + 'static,
    T::Key: Clone + PartialEq + std::fmt::Debug + DeserializeOwned + Send + Sync,
{
    async fn find_by_id(&self, id: &T::Key) -> RepoResult<Option<T>> {
        let start = Instant::now();
        let result = self.read().map(|state| {
            state
                .rows
                .iter()
                .find(|r| r.id().as_ref() == Some(id))
                .cloned()
        });
        observed("find_by_id", T::TABLE, start, result, |r| {
            usize::from(r.is_some())
        })
    }

    async fn insert(&self, entity: &T) -> RepoResult<T> {
        let start = Instant::now();
        let result = self.write().and_then(|mut state| {
            let mut row = entity.clone();
            match row.id() {
                Some(key) => {
                    if state.rows.iter().any(|r| r.id().as_ref() == Some(&key)) {
                        return Err(duplicate_key(&key));
                    }
                }
                None => {
                    // Skip ids that were seeded or inserted explicitly.
                    let key = loop {
                        let candidate: T::Key = key_from_i64(state.next_id)?;
                        state.next_id += 1;
                        if !state
                            .rows
                            .iter()
                            .any(|r| r.id().as_ref() == Some(&candidate))
                        {
                            break candidate;
                        }
                    };
                    row.set_id(key);
                }
            }
            state.rows.push(row.clone());
            Ok(row)
        });
        observed("insert", T::TABLE, start, result, |_| 1)
    }

    async fn update(&self, entity: &T) -> RepoResult<T> {
        let start = Instant::now();
        let result = self.write().and_then(|mut state| {
            let key = entity.id().ok_or(RepoError::NotFound)?;
            let slot = state
                .rows
                .iter_mut()
                .find(|r| r.id().as_ref() == Some(&key))
                .ok_or(RepoError::NotFound)?;
            *slot = entity.clone();
            Ok(entity.clone())
        });
        observed("update", T::TABLE, start, result, |_| 1)
    }

    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<bool> {
        let start = Instant::now();
        let result = self.write().map(|mut state| {
            let before = state.rows.len();
            state.rows.retain(|r| r.id().as_ref() != Some(id));
            before - state.rows.len()
        });
        observed("delete_by_id", T::TABLE, start, result, |n| *n).map(|n| n > 0)
    }

    async fn select_list(&self, query: &Query) -> RepoResult<Vec<T>> {
        let start = Instant::now();
        let result = query
            .validate(T::SELECT_COLUMNS)
            .and_then(|_| self.read())
            .map(|state| select_rows(&state.rows, query));
        observed("select_list", T::TABLE, start, result, Vec::len)
    }

    async fn select_count(&self, query: &Query) -> RepoResult<u64> {
        let start = Instant::now();
        let result = query
            .validate(T::SELECT_COLUMNS)
            .and_then(|_| self.read())
            .map(|state| state.rows.iter().filter(|r| row_matches(query, *r)).count() as u64);
        observed("select_count", T::TABLE, start, result, |_| 1)
    }

    async fn delete_matching(&self, query: &Query) -> RepoResult<u64> {
        let start = Instant::now();
        let result = query
            .validate(T::SELECT_COLUMNS)
            .and_then(|_| query.check_block_attack())
            .and_then(|_| self.write())
            .map(|mut state| {
                let before = state.rows.len();
                state.rows.retain(|r| !row_matches(query, r));
                (before - state.rows.len()) as u64
            });
        observed("delete_matching", T::TABLE, start, result, |n| *n as usize)
    }
}
