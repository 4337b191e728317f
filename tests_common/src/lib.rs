#![allow(unexpected_cfgs)]
//! Common integration testing utilities and generic tests reusable across backends.

use async_trait::async_trait;
use querymap::{
    Entity, IgnoreStrategy, Mapper, PageRequest, ParamValue, Query, RepoError, RepoResult,
    Repository,
};

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "users")] // consistent across backends
pub struct User {
    #[fetch(id)]
    pub id: Option<i64>,
    pub name: String,
    pub age: i32,
    pub email: Option<String>,
}

/// A user without an id, ready to be inserted.
pub fn new_user(name: &str, age: i32, email: Option<&str>) -> User {
    User {
        id: None,
        name: name.to_string(),
        age,
        email: email.map(str::to_string),
    }
}

/// Expose migration SQL via constants for harnesses.
pub mod migrations {
    pub const LIBSQL_USERS_SQL: &str = include_str!("../migrations/libsql/001_users.sql");
}

#[async_trait]
pub trait RepoFactory {
    /// Construct a clean repository connected to a store with the required schema.
    async fn new_user_repo(&self) -> RepoResult<Box<dyn Repository<User> + Send + Sync>>;
}

/// Generic CRUD roundtrip test.
pub async fn test_crud_roundtrip<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_user_repo().await?;

    let created = repo.insert(&new_user("Ann", 30, Some("ann@example.com"))).await?;
    let id = created.id.ok_or(RepoError::NotFound)?;

    let fetched = repo.find_by_id(&id).await?;
    assert_eq!(fetched.as_ref().map(|u| u.name.as_str()), Some("Ann"));

    let mut changed = fetched.ok_or(RepoError::NotFound)?;
    changed.age = 31;
    changed.email = None;
    let updated = repo.update(&changed).await?;
    assert_eq!(updated.age, 31);
    assert_eq!(repo.find_by_id(&id).await?, Some(changed));

    assert!(repo.delete_by_id(&id).await?);
    assert!(!repo.delete_by_id(&id).await?);
    assert_eq!(repo.find_by_id(&id).await?, None);
    Ok(())
}

/// Generic find_by_field test.
pub async fn test_find_by_field<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_user_repo().await?;
    repo.insert(&new_user("Bob", 25, Some("bob@example.com"))).await?;
    repo.insert(&new_user("Bea", 25, None)).await?;

    let found = repo
        .find_by_field("email", "bob@example.com".into())
        .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(repo.find_by_field("age", 25.into()).await?.len(), 2);
    assert!(repo.find_by_field("name", "Zed".into()).await?.is_empty());
    Ok(())
}

/// Filtering, ordering, counting and paging through the query wrapper.
pub async fn test_query_wrapper<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_user_repo().await?;
    for (name, age, email) in [
        ("Ann", 30, Some("ann@x.org")),
        ("Bob", 25, None),
        ("Cid", 41, Some("cid@y.org")),
        ("Dee", 25, Some("dee@x.org")),
        ("Eve", 19, Some("eve@x.org")),
    ] {
        repo.insert(&new_user(name, age, email)).await?;
    }

    let adults_on_x = Query::new()
        .ge("age", 21)
        .like_left("email", "@x.org")
        .order_by_desc("age");
    let rows = repo.select_list(&adults_on_x).await?;
    let names: Vec<&str> = rows.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["Ann", "Dee"]);

    let either = Query::new().eq("name", "Cid").or().is_null("email");
    assert_eq!(repo.select_count(&either).await?, 2);

    let window = Query::new().between("age", 20, 40).order_by_asc("name");
    let page = repo.select_page(PageRequest::new(2, 2), &window).await?;
    assert_eq!(page.total, 3);
    assert_eq!(page.pages(), 2);
    assert_eq!(
        page.records.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        ["Dee"]
    );

    assert!(repo.exists(&Query::new().in_list("name", ["Eve", "Zed"])).await?);
    assert!(!repo.exists(&Query::new().in_list("name", Vec::<String>::new())).await?);

    let removed = repo.delete_matching(&Query::new().lt("age", 21)).await?;
    assert_eq!(removed, 1);
    assert_eq!(repo.select_count(&Query::new()).await?, 4);

    let err = repo
        .select_list(&Query::new().eq("nickname", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownColumn(ref c) if c == "nickname"));
    Ok(())
}

/// `select_one` returns nothing, the single match, or an ambiguity error.
pub async fn test_select_one_contract<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_user_repo().await?;
    repo.insert(&new_user("Ann", 30, None)).await?;
    repo.insert(&new_user("Bob", 30, None)).await?;

    assert!(repo.select_one(&Query::new().eq("name", "Zed")).await?.is_none());
    let ann = repo.select_one(&Query::new().eq("name", "Ann")).await?;
    assert_eq!(ann.map(|u| u.age), Some(30));

    let err = repo
        .select_one(&Query::new().eq("age", 30))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::TooManyResults { found: 2 }));
    Ok(())
}

/// Full-table deletes need an opt-out, oversized pages return everything and
/// `all_eq_with` can drop null or filtered pairs.
pub async fn test_guards_and_edge_queries<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_user_repo().await?;
    repo.insert(&new_user("Ann", 30, None)).await?;
    repo.insert(&new_user("Bob", 25, Some("bob@x.org"))).await?;

    let everything = repo
        .select_page(PageRequest::new(1, usize::MAX), &Query::new().order_by_asc("name"))
        .await?;
    assert_eq!(everything.total, 2);
    assert_eq!(everything.records.len(), 2);
    assert!(!everything.has_next());

    let pairs = || {
        vec![
            ("age", ParamValue::I32(30)),
            ("email", ParamValue::Null),
        ]
    };
    // Nulls become IS NULL by default, or are skipped on request.
    assert_eq!(repo.select_count(&Query::new().all_eq(pairs())).await?, 1);
    let skipped = Query::new().all_eq_with(|_, _| true, pairs(), false);
    assert_eq!(repo.select_count(&skipped).await?, 1);
    let only_email = Query::new().all_eq_with(|col, _| col == "email", pairs(), true);
    assert_eq!(repo.select_list(&only_email).await?.len(), 1);

    let err = repo.delete_matching(&Query::new()).await.unwrap_err();
    assert!(matches!(err, RepoError::BlockAttack));
    assert_eq!(repo.select_count(&Query::new()).await?, 2);

    let wipe = Query::new().ignore(IgnoreStrategy::new().block_attack(true));
    assert_eq!(repo.delete_matching(&wipe).await?, 2);
    assert_eq!(repo.select_count(&Query::new()).await?, 0);
    Ok(())
}

/// The single-entity mapper over a backend: present, absent, greeting.
pub async fn test_mapper_find_by_id<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let mapper = Mapper::<User, _>::new(f.new_user_repo().await?);
    let ann = mapper
        .repository()
        .insert(&new_user("Ann", 30, None))
        .await?;
    let id = ann.id.ok_or(RepoError::NotFound)?;

    assert_eq!(mapper.find_by_id(id).await?, Some(ann));
    assert_eq!(mapper.find_by_id(id + 1000).await?, None);
    assert_eq!(mapper.hello(), "hello baomidou!");
    Ok(())
}
