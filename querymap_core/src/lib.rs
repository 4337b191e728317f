#![forbid(unsafe_code)]
//! Core traits for the querymap repository library.
//! This crate is database-agnostic and should not contain any backend-specific logic.

use std::cmp::Ordering;
use std::fmt;

// Re-export for downstream macro expansions (used by querymap_macros::repository)
pub use async_trait::async_trait;

pub mod query;

pub use query::{Compare, Condition, IgnoreStrategy, LikeMode, Order, Query};

/// Compile-time table metadata for an entity.
/// Implemented via `#[derive(Entity)]` in `querymap_macros`.
pub trait Fetchable {
    const TABLE: &'static str;
    const SELECT_COLUMNS: &'static [&'static str];

    /// Current field values, aligned index-for-index with `SELECT_COLUMNS`.
    fn column_values(&self) -> Vec<ParamValue>;
}

/// A backend-agnostic representation of a database parameter value.
/// This is used to pass entity field values from generated code to backend adapters
/// without making `querymap_core` dependent on a specific database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Null,
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::I32(i) => Some(i64::from(*i)),
            ParamValue::I64(i) => Some(*i),
            ParamValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::F64(f) => Some(*f),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    /// SQL-flavoured ordering between two values.
    ///
    /// Integer widths and floats compare numerically, booleans count as 0/1, and
    /// strings compare lexicographically. `Null` or mismatched kinds yield `None`.
    pub fn compare(&self, other: &ParamValue) -> Option<Ordering> {
        match (self, other) {
            (ParamValue::Null, _) | (_, ParamValue::Null) => None,
            (ParamValue::String(a), ParamValue::String(b)) => Some(a.cmp(b)),
            (ParamValue::String(_), _) | (_, ParamValue::String(_)) => None,
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
            },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => f.write_str(s),
            ParamValue::I32(i) => write!(f, "{}", i),
            ParamValue::I64(i) => write!(f, "{}", i),
            ParamValue::F64(v) => write!(f, "{}", v),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Null => f.write_str("NULL"),
        }
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::I32(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::I64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::F64(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl<V: Into<ParamValue>> From<Option<V>> for ParamValue {
    fn from(v: Option<V>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

/// Trait for entities that have an identifiable key.
/// This trait exposes the key type and column name so macros can introspect it.
pub trait Identifiable {
    /// The type of the primary key (e.g., `i64`, `String`).
    type Key;

    /// The name of the primary key column in the database.
    const ID_COLUMN: &'static str;

    /// Returns a copy of the entity's ID, if it has one.
    fn id(&self) -> Option<Self::Key>;

    /// Stores a key assigned by the backend (e.g., an auto-increment id).
    fn set_id(&mut self, key: Self::Key);
}

/// Trait for types whose fields can be extracted for an INSERT statement.
/// This is implemented by the `#[derive(Entity)]` macro.
pub trait Insertable {
    /// The columns to be used in an INSERT statement, excluding auto-generated keys.
    const INSERT_COLUMNS: &'static [&'static str];

    /// The values of the fields corresponding to `INSERT_COLUMNS`.
    fn insert_values(&self) -> Vec<ParamValue>;
}

/// Trait for types whose fields can be extracted for an UPDATE statement.
/// This is implemented by the `#[derive(Entity)]` macro.
pub trait Updatable {
    /// The columns to be used in an UPDATE statement's SET clause.
    const UPDATE_COLUMNS: &'static [&'static str];

    /// The values of the fields corresponding to `UPDATE_COLUMNS`, followed by the id.
    fn update_values(&self) -> Vec<ParamValue>;
}

/// Lightweight, backend-agnostic error type for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// The entity was not found.
    #[error("entity not found")]
    NotFound,
    /// A single-row lookup matched more than one record.
    #[error("expected one result (or none), but found {found}")]
    TooManyResults { found: usize },
    /// A query referenced a column the entity does not map.
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    /// A delete without conditions was refused.
    #[error("refusing to delete every row without an explicit ignore strategy")]
    BlockAttack,
    /// Error while mapping a backend row into an entity.
    #[error("mapping error")]
    Mapping {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Opaque backend error from the underlying driver or adapter.
    #[error("backend error")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RepoError {
    /// Wrap a backend/driver error.
    pub fn backend<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Backend {
            source: Box::new(e),
        }
    }
    /// Wrap a row-mapping error.
    pub fn mapping<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Mapping {
            source: Box::new(e),
        }
    }
}

/// Convenience alias for results returned by repository methods.
pub type RepoResult<T> = Result<T, RepoError>;

/// Page coordinates for [`Repository::select_page`]. `current` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub current: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(current: usize, size: usize) -> Self {
        Self {
            current: current.max(1),
            size,
        }
    }

    pub fn offset(&self) -> usize {
        (self.current.max(1) - 1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// One page of records plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: u64,
    pub current: usize,
    pub size: usize,
}

impl<T> Page<T> {
    /// Number of pages needed to show `total` rows; zero when `size` is zero.
    pub fn pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        let size = self.size as u64;
        self.total / size + u64::from(self.total % size != 0)
    }

    pub fn has_next(&self) -> bool {
        (self.current as u64) < self.pages()
    }
}

/// A minimal, asynchronous repository interface for an entity `T`.
/// This is intentionally DB-agnostic. Concrete backends provide implementations.
///
/// Backends implement the required methods; the provided ones are built on
/// `select_list` and `select_count`.
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Identifiable + Send + Sync + 'static,
{
    /// Fetch an entity by its primary key. Returns Ok(None) if not found.
    async fn find_by_id(&self, id: &T::Key) -> RepoResult<Option<T>>;

    /// Insert a new entity. The returned entity may be different if the database
    /// generates some fields (e.g., auto-incrementing IDs).
    async fn insert(&self, entity: &T) -> RepoResult<T>;

    /// Update an existing entity. The returned entity may be different if the
    /// database modifies it (e.g., `ON UPDATE` timestamps).
    async fn update(&self, entity: &T) -> RepoResult<T>;

    /// Delete an entity by key. Returns true if a row was affected.
    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<bool>;

    /// All rows matching `query`, honouring its ordering, offset and limit.
    async fn select_list(&self, query: &Query) -> RepoResult<Vec<T>>;

    /// Number of rows matching `query`. Ordering, offset and limit are ignored.
    async fn select_count(&self, query: &Query) -> RepoResult<u64>;

    /// Delete every row matching `query`. Returns the number of rows removed.
    ///
    /// A query without conditions fails with [`RepoError::BlockAttack`]
    /// unless it carries an [`IgnoreStrategy`] that allows it.
    async fn delete_matching(&self, query: &Query) -> RepoResult<u64>;

    /// Equality finder for a single column.
    /// This is the low-level hook used by macro-generated `find_by_<field>` methods.
    async fn find_by_field(&self, field_name: &str, value: ParamValue) -> RepoResult<Vec<T>> {
        self.select_list(&Query::new().eq(field_name, value)).await
    }

    /// At most one row matching `query`.
    ///
    /// No match is `Ok(None)`. More than one match is
    /// [`RepoError::TooManyResults`] rather than an arbitrary pick.
    async fn select_one(&self, query: &Query) -> RepoResult<Option<T>> {
        let mut rows = self.select_list(query).await?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            found => Err(RepoError::TooManyResults { found }),
        }
    }

    async fn exists(&self, query: &Query) -> RepoResult<bool> {
        Ok(self.select_count(query).await? > 0)
    }

    /// Rows whose primary key is one of `ids`. Missing keys are skipped.
    async fn select_by_ids(&self, ids: &[T::Key]) -> RepoResult<Vec<T>>
    where
        T::Key: Into<ParamValue> + Clone + Sync,
    {
        let values: Vec<ParamValue> = ids.iter().cloned().map(Into::into).collect();
        self.select_list(&Query::new().in_list(T::ID_COLUMN, values))
            .await
    }

    /// Paged variant of `select_list`. The page's offset and size replace any
    /// offset or limit already set on `query`.
    async fn select_page(&self, page: PageRequest, query: &Query) -> RepoResult<Page<T>> {
        let total = self.select_count(query).await?;
        let offset = page.offset();
        let records = if page.size == 0 || offset as u64 >= total {
            Vec::new()
        } else {
            let windowed = query.clone().offset(offset).limit(page.size);
            self.select_list(&windowed).await?
        };
        Ok(Page {
            records,
            total,
            current: page.current,
            size: page.size,
        })
    }
}

/// Boxed repositories (including `Box<dyn Repository<T>>`) are repositories.
/// Provided methods are forwarded too, so backend overrides are kept.
#[async_trait]
impl<T, R> Repository<T> for Box<R>
where
    T: Identifiable + Send + Sync + 'static,
    T::Key: Sync,
    R: Repository<T> + ?Sized,
{
    async fn find_by_id(&self, id: &T::Key) -> RepoResult<Option<T>> {
        (**self).find_by_id(id).await
    }
    async fn insert(&self, entity: &T) -> RepoResult<T> {
        (**self).insert(entity).await
    }
    async fn update(&self, entity: &T) -> RepoResult<T> {
        (**self).update(entity).await
    }
    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<bool> {
        (**self).delete_by_id(id).await
    }
    async fn select_list(&self, query: &Query) -> RepoResult<Vec<T>> {
        (**self).select_list(query).await
    }
    async fn select_count(&self, query: &Query) -> RepoResult<u64> {
        (**self).select_count(query).await
    }
    async fn delete_matching(&self, query: &Query) -> RepoResult<u64> {
        (**self).delete_matching(query).await
    }
    async fn find_by_field(&self, field_name: &str, value: ParamValue) -> RepoResult<Vec<T>> {
        (**self).find_by_field(field_name, value).await
    }
    async fn select_one(&self, query: &Query) -> RepoResult<Option<T>> {
        (**self).select_one(query).await
    }
    async fn exists(&self, query: &Query) -> RepoResult<bool> {
        (**self).exists(query).await
    }
    async fn select_page(&self, page: PageRequest, query: &Query) -> RepoResult<Page<T>> {
        (**self).select_page(page, query).await
    }
}

/// A tiny adapter for mapping a backend-specific row type into an entity `T`.
/// Backends (e.g., libsql) implement this for their row representations.
#[allow(clippy::wrong_self_convention)]
pub trait RowAdapter<T> {
    type Row;
    fn from_row(&self, row: &Self::Row) -> RepoResult<T>;
}
