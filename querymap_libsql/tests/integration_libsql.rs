#![allow(unexpected_cfgs)]
#![allow(unused_imports)]

use querymap_core::{RepoError, RepoResult, Repository, RowAdapter};
use tests_common::{migrations, User};

#[cfg(feature = "libsql-backend")]
struct UserAdapter;

#[cfg(feature = "libsql-backend")]
impl RowAdapter<User> for UserAdapter {
    type Row = libsql::Row;

    fn from_row(&self, row: &Self::Row) -> RepoResult<User> {
        // Column order follows tests_common::User derived metadata: id, name, age, email
        let id: i64 = row.get(0).map_err(RepoError::mapping)?;
        let name: String = row.get(1).map_err(RepoError::mapping)?;
        let age: i64 = row.get(2).map_err(RepoError::mapping)?;
        let email: Option<String> = row.get(3).map_err(RepoError::mapping)?;
        Ok(User {
            id: Some(id),
            name,
            age: i32::try_from(age).map_err(RepoError::mapping)?,
            email,
        })
    }
}

/// Hands out a fresh database file per repository, all under one temp dir.
#[cfg(feature = "libsql-backend")]
struct LibsqlFactory {
    dir: tempfile::TempDir,
    next: std::sync::atomic::AtomicUsize,
}

#[cfg(feature = "libsql-backend")]
impl LibsqlFactory {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            next: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(feature = "libsql-backend")]
#[async_trait::async_trait]
impl tests_common::RepoFactory for LibsqlFactory {
    async fn new_user_repo(&self) -> RepoResult<Box<dyn Repository<User> + Send + Sync>> {
        use querymap_libsql::LibsqlRepository;

        let n = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = self.dir.path().join(format!("users_{n}.sqlite3"));
        let url = format!("file:{}?mode=rwc", path.display());
        let repo: LibsqlRepository<User, UserAdapter> =
            LibsqlRepository::from_url(&url, UserAdapter).await?;

        #[allow(deprecated)]
        let db = libsql::Database::open(&url).map_err(RepoError::backend)?;
        let conn = db.connect().map_err(RepoError::backend)?;
        conn.execute(migrations::LIBSQL_USERS_SQL, ())
            .await
            .map_err(RepoError::backend)?;
        Ok(Box::new(repo))
    }
}

#[cfg(feature = "libsql-backend")]
#[tokio::test]
async fn libsql_generic_scenarios() -> RepoResult<()> {
    let f = LibsqlFactory::new();
    tests_common::test_crud_roundtrip(&f).await?;
    tests_common::test_find_by_field(&f).await?;
    tests_common::test_query_wrapper(&f).await?;
    tests_common::test_select_one_contract(&f).await?;
    tests_common::test_guards_and_edge_queries(&f).await?;
    tests_common::test_mapper_find_by_id(&f).await?;
    Ok(())
}

#[cfg(feature = "libsql-backend")]
#[tokio::test]
async fn libsql_null_email_roundtrips() -> RepoResult<()> {
    use querymap_core::Query;
    use tests_common::RepoFactory;

    let f = LibsqlFactory::new();
    let repo = f.new_user_repo().await?;
    let created = repo
        .insert(&tests_common::new_user("Nil", 40, None))
        .await?;
    assert_eq!(created.email, None);
    let found = repo.select_one(&Query::new().is_null("email")).await?;
    assert_eq!(found, Some(created));
    Ok(())
}
