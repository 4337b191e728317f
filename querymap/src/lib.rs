#![forbid(unsafe_code)]
//! Facade crate re-exporting core traits and macros for the `querymap` library,
//! plus the typed single-entity [`Mapper`].
//!
//! This crate provides the main public API. It re-exports all necessary traits
//! and procedural macros so that you only need to add this single crate as a
//! dependency in your application.
//!
//! # Example: a mapper over the in-memory backend
//!
//! ```
//! # #[cfg(feature = "memory-backend")]
//! # fn main() -> querymap::RepoResult<()> {
//! use querymap::backends::MemoryRepository;
//! use querymap::{Entity, Mapper};
//!
//! #[derive(Entity, Clone, Debug, PartialEq)]
//! pub struct User {
//!     #[fetch(id)]
//!     pub id: Option<i64>,
//!     pub name: String,
//! }
//!
//! let store = MemoryRepository::with_rows([User { id: Some(1), name: "Ann".into() }])?;
//! let mapper = Mapper::new(store);
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! assert_eq!(rt.block_on(mapper.find_by_id(1))?.map(|u| u.name), Some("Ann".to_string()));
//! assert_eq!(rt.block_on(mapper.find_by_id(2))?, None);
//! assert_eq!(mapper.hello(), "hello baomidou!");
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "memory-backend"))]
//! # fn main() {}
//! ```
//!
//! # Example: Deriving `Entity`
//!
//! The macro deduces the table name (`users`) by pluralizing the snake_case
//! struct name, and generates a `UserRowAdapter` type alongside the trait impls.
//! ```ignore
//! use querymap::{Entity, Fetchable}; // `Fetchable` must be in scope to access associated constants.
//!
//! #[derive(Entity, Clone, Debug)]
//! pub struct User {
//!     #[fetch(id)]
//!     pub id: Option<i64>,
//!     #[fetch(column = "email_address")]
//!     pub email: String,
//! }
//!
//! assert_eq!(User::TABLE, "users");
//! assert_eq!(User::SELECT_COLUMNS, &["id", "email_address"]);
//! let _adapter = UserRowAdapter;
//! ```

#![allow(unexpected_cfgs)]

mod mapper;

pub use mapper::{Mapper, GREETING};

// Re-export all core traits and types.
pub use querymap_core::{
    Compare, Condition, Fetchable, Identifiable, IgnoreStrategy, Insertable, LikeMode, Order, Page,
    PageRequest, ParamValue, Query, RepoError, RepoResult, Repository, RowAdapter, Updatable,
};

// Re-export all procedural macros.
pub use querymap_macros::{repository, Entity};

// Optional re-export of the SQL builder helpers.
#[cfg(feature = "sql-builder")]
pub use querymap_sql_builder as sql_builder;

// Optional batch insert extension: sequential inserts.
#[cfg(feature = "batch-ext")]
pub mod batch_ext {
    use crate::RepoResult;

    #[async_trait::async_trait]
    pub trait BatchInsertExt<T>: querymap_core::Repository<T>
    where
        T: querymap_core::Identifiable + Send + Sync + Clone + 'static,
    {
        /// Insert every entity in order and return the stored versions.
        /// Stops at the first failure; rows inserted before it stay inserted.
        async fn insert_batch(&self, entities: &[T]) -> RepoResult<Vec<T>> {
            let mut out = Vec::with_capacity(entities.len());
            for e in entities {
                out.push(self.insert(e).await?);
            }
            Ok(out)
        }
    }

    #[async_trait::async_trait]
    impl<T, R> BatchInsertExt<T> for R
    where
        T: querymap_core::Identifiable + Send + Sync + Clone + 'static,
        R: querymap_core::Repository<T> + Send + Sync + ?Sized,
    {
    }
}

#[cfg(feature = "upsert-ext")]
pub mod upsert_ext {
    use crate::RepoResult;

    #[async_trait::async_trait]
    pub trait SaveOrUpdateExt<T>: querymap_core::Repository<T>
    where
        T: querymap_core::Identifiable + Send + Sync + Clone + 'static,
        T::Key: Send + Sync,
    {
        /// Insert when the entity has no id or its id is not stored yet,
        /// otherwise update the stored row.
        async fn save_or_update(&self, entity: &T) -> RepoResult<T> {
            let key = match entity.id() {
                Some(key) => key,
                None => return self.insert(entity).await,
            };
            if self.find_by_id(&key).await?.is_some() {
                self.update(entity).await
            } else {
                self.insert(entity).await
            }
        }
    }

    #[async_trait::async_trait]
    impl<T, R> SaveOrUpdateExt<T> for R
    where
        T: querymap_core::Identifiable + Send + Sync + Clone + 'static,
        T::Key: Send + Sync,
        R: querymap_core::Repository<T> + Send + Sync + ?Sized,
    {
    }
}

// Backend repositories re-exported under a neutral namespace, so end-users don't
// have to depend on backend crates directly. These are feature-gated.
pub mod backends {
    #[cfg(feature = "memory-backend")]
    pub use querymap_memory::MemoryRepository;

    #[cfg(feature = "libsql-backend")]
    pub use querymap_libsql::LibsqlRepository;
}
