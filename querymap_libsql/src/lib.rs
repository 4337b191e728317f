#![forbid(unsafe_code)]
#![allow(unexpected_cfgs)]
#![cfg_attr(
    not(feature = "libsql-backend"),
    doc = "Enable feature `libsql-backend` to use this adapter."
)]

#[cfg(feature = "libsql-backend")]
mod backend {
    use std::marker::PhantomData;
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use libsql::{params, Connection, Database, Row, Value};
    use querymap_core::{
        Fetchable, Identifiable, Insertable, ParamValue, Query, RepoError, RepoResult,
        Repository, RowAdapter, Updatable,
    };

    #[cfg(feature = "tracing")]
    use tracing::info;

    #[inline]
    #[allow(unused_variables)]
    fn obs_record(op: &str, table: &str, start: Instant, rows: usize, success: bool) {
        let elapsed = start.elapsed().as_millis() as u64;
        #[cfg(feature = "tracing")]
        {
            info!(
                backend = "libsql",
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
    pub(crate) fn observed<R>(
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

    // Helper function to convert ParamValue to libsql::Value.
    fn to_libsql_value(p: ParamValue) -> Value {
        match p {
            ParamValue::String(s) => s.into(),
            ParamValue::I32(i) => (i as i64).into(), // libsql uses i64 for integers
            ParamValue::I64(i) => i.into(),
            ParamValue::F64(f) => f.into(),
            ParamValue::Bool(b) => (b as i64).into(), // SQLite bools are 0/1
            ParamValue::Null => Value::Null,
        }
    }

    fn to_libsql_values(params: Vec<ParamValue>) -> Vec<Value> {
        params.into_iter().map(to_libsql_value).collect()
    }

    /// Statements that do not depend on a query, built once per repository.
    struct RepoSql<T> {
        select_by_id: String,
        delete_by_id: String,
        insert: String,
        update_by_id: String,
        _marker: PhantomData<T>,
    }

    impl<T> RepoSql<T>
    where
        T: Fetchable + Identifiable + Insertable + Updatable,
    {
        fn new() -> Self {
            Self {
                select_by_id: querymap_sql_builder::select_by_id::<T>(T::ID_COLUMN),
                delete_by_id: querymap_sql_builder::delete_by_id::<T>(T::ID_COLUMN),
                insert: querymap_sql_builder::insert::<T>(T::ID_COLUMN),
                update_by_id: querymap_sql_builder::update_by_id::<T>(T::ID_COLUMN),
                _marker: PhantomData,
            }
        }
    }

    /// A fully asynchronous, `libsql`-backed repository.
    pub struct LibsqlRepository<T, A>
    where
        T: Identifiable + 'static,
        A: RowAdapter<T> + Send + Sync + 'static,
    {
        db: Arc<Database>,
        /// Optional pinned connection. When set, all operations use it instead
        /// of opening a new one.
        conn: Option<Connection>,
        adapter: A,
        sql: RepoSql<T>,
    }

    impl<T, A> LibsqlRepository<T, A>
    where
        T: Fetchable + Identifiable + Insertable + Updatable + 'static,
        A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
    {
        /// Creates a new repository from an existing `libsql::Database` object.
        pub fn new(db: Arc<Database>, adapter: A) -> Self {
            Self {
                db,
                conn: None,
                adapter,
                sql: RepoSql::new(),
            }
        }

        /// Creates a repository that executes every operation on `conn`.
        /// In-memory databases need this, as each new connection sees an empty database.
        pub fn from_conn(db: Arc<Database>, conn: Connection, adapter: A) -> Self {
            Self {
                db,
                conn: Some(conn),
                adapter,
                sql: RepoSql::new(),
            }
        }

        /// Creates a new repository by opening a local database URL or path.
        pub async fn from_url(database_url: &str, adapter: A) -> RepoResult<Self> {
            // Database::open is deprecated upstream; keep a narrow allow here until Builder migration
            #[allow(deprecated)]
            let db = Arc::new(Database::open(database_url).map_err(RepoError::backend)?);
            Ok(Self::new(db, adapter))
        }

        fn connection(&self) -> RepoResult<Connection> {
            match &self.conn {
                Some(c) => Ok(c.clone()),
                None => self.db.connect().map_err(RepoError::backend),
            }
        }

        async fn query_rows(
            &self,
            conn: &Connection,
            sql: &str,
            params: Vec<Value>,
        ) -> RepoResult<Vec<T>> {
            let mut rows = conn.query(sql, params).await.map_err(RepoError::backend)?;
            let mut entities = Vec::new();
            while let Some(row) = rows.next().await.map_err(RepoError::backend)? {
                entities.push(self.adapter.from_row(&row)?);
            }
            Ok(entities)
        }
    }

    #[async_trait]
    impl<T, A> Repository<T> for LibsqlRepository<T, A>
    where
        T: Fetchable + Identifiable + Insertable + Updatable + Send + Sync + Clone + 'static,
        A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
        T::Key: Clone + Send + Sync + 'static + Into<Value> + serde::de::DeserializeOwned,
    {
        async fn find_by_id(&self, id: &T::Key) -> RepoResult<Option<T>> {
            let start = Instant::now();
            let result: RepoResult<Option<T>> = async {
                let conn = self.connection()?;
                let mut found = self
                    .query_rows(&conn, &self.sql.select_by_id, vec![id.clone().into()])
                    .await?;
                found.truncate(1);
                Ok(found.pop())
            }
            .await;
            observed("find_by_id", T::TABLE, start, result, |found| found.iter().len())
        }

        async fn insert(&self, entity: &T) -> RepoResult<T> {
            let start = Instant::now();
            let result: RepoResult<T> = async {
                let values = to_libsql_values(entity.insert_values());
                let conn = self.connection()?;

                #[cfg(feature = "libsql_returning")]
                let new_id: i64 = {
                    // INSERT ... RETURNING yields the new id as the only column
                    let mut rows = conn
                        .query(&self.sql.insert, values)
                        .await
                        .map_err(RepoError::backend)?;
                    let row = rows
                        .next()
                        .await
                        .map_err(RepoError::backend)?
                        .ok_or_else(|| {
                            RepoError::backend(std::io::Error::new(
                                std::io::ErrorKind::Other,
                                "no row returned from INSERT ... RETURNING",
                            ))
                        })?;
                    row.get(0).map_err(RepoError::backend)?
                };

                #[cfg(not(feature = "libsql_returning"))]
                let new_id: i64 = {
                    conn.execute(&self.sql.insert, values)
                        .await
                        .map_err(RepoError::backend)?;
                    conn.last_insert_rowid()
                };

                let new_key: T::Key = serde_json::from_value(serde_json::Value::from(new_id))
                    .map_err(RepoError::backend)?;

                // Fetch using the same connection to avoid any visibility issues
                let mut rows = conn
                    .query(&self.sql.select_by_id, params!(new_key.into()))
                    .await
                    .map_err(RepoError::backend)?;
                match rows.next().await.map_err(RepoError::backend)? {
                    Some(row) => self.adapter.from_row(&row),
                    None => Err(RepoError::backend(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "Failed to fetch entity after insert",
                    ))),
                }
            }
            .await;
            observed("insert", T::TABLE, start, result, |_| 1)
        }

        async fn update(&self, entity: &T) -> RepoResult<T> {
            let start = Instant::now();
            let result: RepoResult<T> = async {
                let values = to_libsql_values(entity.update_values());
                let conn = self.connection()?;
                let n = conn
                    .execute(&self.sql.update_by_id, values)
                    .await
                    .map_err(RepoError::backend)?;
                if n == 0 {
                    return Err(RepoError::NotFound);
                }
                Ok(entity.clone())
            }
            .await;
            observed("update", T::TABLE, start, result, |_| 1)
        }

        async fn delete_by_id(&self, id: &T::Key) -> RepoResult<bool> {
            let start = Instant::now();
            let result: RepoResult<u64> = async {
                let conn = self.connection()?;
                conn.execute(&self.sql.delete_by_id, params!(id.clone()))
                    .await
                    .map_err(RepoError::backend)
            }
            .await;
            observed("delete_by_id", T::TABLE, start, result, |n| *n as usize).map(|n| n > 0)
        }

        async fn select_list(&self, query: &Query) -> RepoResult<Vec<T>> {
            let start = Instant::now();
            let result: RepoResult<Vec<T>> = async {
                let (sql, params) = querymap_sql_builder::select_query::<T>(query)?;
                let conn = self.connection()?;
                self.query_rows(&conn, &sql, to_libsql_values(params)).await
            }
            .await;
            observed("select_list", T::TABLE, start, result, Vec::len)
        }

        async fn select_count(&self, query: &Query) -> RepoResult<u64> {
            let start = Instant::now();
            let result: RepoResult<u64> = async {
                let (sql, params) = querymap_sql_builder::count_query::<T>(query)?;
                let conn = self.connection()?;
                let mut rows = conn
                    .query(&sql, to_libsql_values(params))
                    .await
                    .map_err(RepoError::backend)?;
                let count: i64 = match rows.next().await.map_err(RepoError::backend)? {
                    Some(row) => row.get(0).map_err(RepoError::mapping)?,
                    None => 0,
                };
                Ok(count.max(0) as u64)
            }
            .await;
            observed("select_count", T::TABLE, start, result, |_| 1)
        }

        async fn delete_matching(&self, query: &Query) -> RepoResult<u64> {
            let start = Instant::now();
            let result: RepoResult<u64> = async {
                let (sql, params) = querymap_sql_builder::delete_query::<T>(query)?;
                let conn = self.connection()?;
                conn.execute(&sql, to_libsql_values(params))
                    .await
                    .map_err(RepoError::backend)
            }
            .await;
            observed("delete_matching", T::TABLE, start, result, |n| *n as usize)
        }
    }
}

#[cfg(feature = "libsql-backend")]
pub use backend::LibsqlRepository;

#[cfg(all(test, feature = "libsql-backend"))]
mod tests {
    use super::backend::LibsqlRepository;
    use libsql::Database;
    use querymap_core::{IgnoreStrategy, PageRequest, Query, RepoError, Repository, RowAdapter};
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(querymap_macros::Entity, Clone, Debug, PartialEq)]
    #[entity(table = "users")]
    struct U {
        #[fetch(id)]
        id: Option<i64>,
        name: String,
        active: bool,
    }

    struct A;
    impl RowAdapter<U> for A {
        type Row = libsql::Row;
        fn from_row(&self, row: &Self::Row) -> querymap_core::RepoResult<U> {
            let id: i64 = row.get(0).map_err(RepoError::mapping)?;
            let name: String = row.get(1).map_err(RepoError::mapping)?;
            let active: i64 = row.get(2).map_err(RepoError::mapping)?;
            Ok(U {
                id: Some(id),
                name,
                active: active != 0,
            })
        }
    }

    async fn setup_db(dir: &tempfile::TempDir) -> Arc<Database> {
        let path = dir.path().join("querymap_libsql_tests.sqlite3");
        // Database::open is deprecated upstream; narrow allow inside tests setup only.
        #[allow(deprecated)]
        let db = Database::open(format!("file:{}?mode=rwc", path.display())).expect("open db");
        let conn = db.connect().expect("connect");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, active INTEGER NOT NULL);",
            (),
        )
        .await
        .expect("apply schema");
        Arc::new(db)
    }

    fn user(name: &str, active: bool) -> U {
        U {
            id: None,
            name: name.into(),
            active,
        }
    }

    #[tokio::test]
    async fn unknown_column_is_rejected_before_execution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo: LibsqlRepository<U, A> = LibsqlRepository::new(setup_db(&dir).await, A);
        let err = repo
            .find_by_field("does_not_exist", "x".into())
            .await
            .expect_err("expected unknown column");
        assert!(matches!(err, RepoError::UnknownColumn(c) if c == "does_not_exist"));
    }

    // Adapter that intentionally requests a missing column index to force a mapping error
    struct BadAdapter;
    impl RowAdapter<U> for BadAdapter {
        type Row = libsql::Row;
        fn from_row(&self, row: &Self::Row) -> querymap_core::RepoResult<U> {
            let _: String = row.get(999).map_err(RepoError::mapping)?;
            unreachable!("should have failed before");
        }
    }

    #[tokio::test]
    async fn row_adapter_mapping_error_surfaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = setup_db(&dir).await;
        let good: LibsqlRepository<U, A> = LibsqlRepository::new(db.clone(), A);
        let created = good.insert(&user("map", true)).await.expect("insert ok");

        let bad: LibsqlRepository<U, BadAdapter> = LibsqlRepository::new(db, BadAdapter);
        let err = bad
            .find_by_id(&created.id.unwrap())
            .await
            .expect_err("expected mapping error");
        assert!(matches!(err, RepoError::Mapping { .. }));
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo: LibsqlRepository<U, A> = LibsqlRepository::new(setup_db(&dir).await, A);
        let ghost = U {
            id: Some(404),
            ..user("ghost", false)
        };
        assert!(matches!(
            repo.update(&ghost).await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn select_one_by_id_and_ambiguous_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo: LibsqlRepository<U, A> = LibsqlRepository::new(setup_db(&dir).await, A);
        let ann = repo.insert(&user("Ann", true)).await.unwrap();
        repo.insert(&user("Bob", true)).await.unwrap();

        let found = repo
            .select_one(&Query::new().eq("id", ann.id.unwrap()))
            .await
            .unwrap();
        assert_eq!(found, Some(ann));

        let err = repo
            .select_one(&Query::new().eq("active", true))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::TooManyResults { found: 2 }));
    }

    #[tokio::test]
    async fn pinned_connection_sees_in_memory_schema() {
        #[allow(deprecated)]
        let db = Database::open(":memory:").expect("open db");
        let conn = db.connect().expect("connect");
        conn.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, active INTEGER NOT NULL);",
            (),
        )
        .await
        .expect("apply schema");
        let repo: LibsqlRepository<U, A> = LibsqlRepository::from_conn(Arc::new(db), conn, A);
        repo.insert(&user("Ann", false)).await.unwrap();
        assert_eq!(repo.select_count(&Query::new()).await.unwrap(), 1);
        assert_eq!(
            repo.delete_matching(&Query::new().eq("active", false))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn unconditional_delete_needs_ignore_strategy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo: LibsqlRepository<U, A> = LibsqlRepository::new(setup_db(&dir).await, A);
        repo.insert(&user("Ann", true)).await.unwrap();
        repo.insert(&user("Bob", false)).await.unwrap();

        let err = repo.delete_matching(&Query::new()).await.unwrap_err();
        assert!(matches!(err, RepoError::BlockAttack));
        assert_eq!(repo.select_count(&Query::new()).await.unwrap(), 2);

        let wipe = Query::new().ignore(IgnoreStrategy::new().block_attack(true));
        assert_eq!(repo.delete_matching(&wipe).await.unwrap(), 2);
        assert_eq!(repo.select_count(&Query::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_page_size_returns_all_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo: LibsqlRepository<U, A> = LibsqlRepository::new(setup_db(&dir).await, A);
        repo.insert(&user("Ann", true)).await.unwrap();
        repo.insert(&user("Bob", true)).await.unwrap();

        let page = repo
            .select_page(PageRequest::new(1, usize::MAX), &Query::new().order_by_asc("id"))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.len(), 2);
        assert!(!page.has_next());
    }

    #[test]
    fn observed_passes_failures_through() {
        let failed: querymap_core::RepoResult<u8> = Err(RepoError::NotFound);
        let err = super::backend::observed("update", "users", Instant::now(), failed, |_| 1)
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
        let ok = super::backend::observed("update", "users", Instant::now(), Ok(3u8), |n| *n as usize);
        assert_eq!(ok.unwrap(), 3);
    }
}
