//! Run with:
//!   cargo run -p querymap --example hello_mapper

use querymap::backends::MemoryRepository;
use querymap::{Entity, Mapper, Query, RepoResult, Repository};

#[derive(Entity, Clone, Debug, PartialEq)]
pub struct User {
    #[fetch(id)]
    pub id: Option<i64>,
    pub name: String,
    pub age: i32,
}

#[querymap::repository(entity = User, finders(find_by_age: i32, find_one_by_name: String))]
pub mod user_repository {}

#[tokio::main]
async fn main() -> RepoResult<()> {
    let store = MemoryRepository::<User>::new();
    for (name, age) in [("Ann", 30), ("Bob", 25), ("Cid", 30)] {
        store
            .insert(&User {
                id: None,
                name: name.into(),
                age,
            })
            .await?;
    }

    let mapper = Mapper::new(store.clone());
    println!("{}", mapper.hello());
    println!("find_by_id(1) = {:?}", mapper.find_by_id(1).await?);
    println!("find_by_id(9) = {:?}", mapper.find_by_id(9).await?);

    let repo = user_repository::Repository::new(store);
    println!("age 30 = {:?}", repo.find_by_age(&30).await?);
    println!("name Bob = {:?}", repo.find_one_by_name(&"Bob".to_string()).await?);

    let q = Query::new().ge("age", 26).order_by_desc("name");
    println!("age >= 26 = {:?}", repo.select_list(&q).await?);
    Ok(())
}
