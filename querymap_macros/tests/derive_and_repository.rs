#![allow(unexpected_cfgs)]

use querymap_core::{
    Fetchable, Identifiable, Insertable, ParamValue, Query, RepoError, Repository, Updatable,
};
use querymap_macros::{repository, Entity};
use querymap_memory::MemoryRepository;

#[derive(Entity, Clone, Debug, PartialEq)]
pub struct BlogPost {
    #[fetch(id)]
    pub id: Option<i64>,
    #[fetch(column = "headline")]
    pub title: String,
    pub views: i32,
    pub published: bool,
    pub rating: Option<f64>,
    #[fetch(skip)]
    pub scratch: Vec<u8>,
}

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "countries")]
pub struct Country {
    #[fetch(id)]
    pub code: String,
    pub name: String,
}

fn post(title: &str, views: i32, published: bool) -> BlogPost {
    BlogPost {
        id: None,
        title: title.into(),
        views,
        published,
        rating: None,
        scratch: Vec::new(),
    }
}

#[test]
fn derive_generates_table_and_column_metadata() {
    assert_eq!(BlogPost::TABLE, "blog_posts");
    assert_eq!(
        BlogPost::SELECT_COLUMNS,
        &["id", "headline", "views", "published", "rating"]
    );
    assert_eq!(
        <BlogPost as Insertable>::INSERT_COLUMNS,
        &["headline", "views", "published", "rating"]
    );
    assert_eq!(
        <BlogPost as Updatable>::UPDATE_COLUMNS,
        <BlogPost as Insertable>::INSERT_COLUMNS
    );
    assert_eq!(BlogPost::ID_COLUMN, "id");
    assert_eq!(Country::TABLE, "countries");
    assert_eq!(Country::ID_COLUMN, "code");
}

#[test]
fn derive_generates_value_accessors() {
    let mut p = post("Hi", 3, true);
    assert_eq!(p.id(), None);
    p.set_id(11);
    assert_eq!(p.id(), Some(11));
    assert_eq!(
        p.column_values(),
        vec![
            ParamValue::I64(11),
            ParamValue::String("Hi".into()),
            ParamValue::I32(3),
            ParamValue::Bool(true),
            ParamValue::Null,
        ]
    );
    let upd = p.update_values();
    assert_eq!(upd.first(), Some(&ParamValue::String("Hi".into())));
    assert_eq!(upd.last(), Some(&ParamValue::I64(11)));
    assert_eq!(p.insert_values().len(), 4);
}

#[test]
fn non_optional_ids_are_always_present() {
    let mut c = Country {
        code: "SE".into(),
        name: "Sweden".into(),
    };
    assert_eq!(c.id(), Some("SE".to_string()));
    c.set_id("NO".into());
    assert_eq!(c.code, "NO");
    // The generated adapter is a unit struct.
    let _adapter = CountryRowAdapter;
}

#[repository(entity = BlogPost, finders(find_by_views: i32, find_by_published: bool, find_one_by_headline: String))]
pub mod posts {}

#[tokio::test]
async fn generated_repository_finders_delegate_to_backend() -> querymap_core::RepoResult<()> {
    let store = MemoryRepository::<BlogPost>::new();
    let repo = posts::Repository::new(store.clone());

    repo.insert(&post("a", 10, true)).await?;
    repo.insert(&post("b", 10, false)).await?;
    repo.insert(&post("c", 99, true)).await?;

    assert_eq!(repo.find_by_views(&10).await?.len(), 2);
    assert_eq!(repo.find_by_published(&false).await?.len(), 1);

    let c = repo.find_one_by_headline(&"c".to_string()).await?;
    assert_eq!(c.map(|p| p.views), Some(99));
    assert_eq!(repo.find_one_by_headline(&"zzz".to_string()).await?, None);

    // Rows written through the wrapper are visible on the backend it wraps.
    assert_eq!(repo.inner().len()?, 3);
    assert_eq!(store.len()?, 3);
    Ok(())
}

#[tokio::test]
async fn generated_find_one_reports_ambiguity() {
    let store = MemoryRepository::with_rows([
        BlogPost {
            id: Some(1),
            ..post("same", 1, true)
        },
        BlogPost {
            id: Some(2),
            ..post("same", 2, true)
        },
    ])
    .unwrap();
    let repo = posts::Repository::new(store);
    let err = repo
        .find_one_by_headline(&"same".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::TooManyResults { found: 2 }));
}

#[tokio::test]
async fn generated_repository_forwards_the_core_trait() -> querymap_core::RepoResult<()> {
    let repo = posts::Repository::new(MemoryRepository::<BlogPost>::new());
    let created = repo.insert(&post("x", 1, false)).await?;
    let id = created.id.expect("id assigned");

    let mut changed = created.clone();
    changed.views = 2;
    repo.update(&changed).await?;
    assert_eq!(repo.find_by_id(&id).await?.map(|p| p.views), Some(2));

    assert_eq!(repo.select_count(&Query::new().eq("published", false)).await?, 1);
    assert_eq!(repo.delete_matching(&Query::new().gt("views", 1)).await?, 1);
    assert!(!repo.delete_by_id(&id).await?);
    assert!(repo.into_inner().is_empty()?);
    Ok(())
}
