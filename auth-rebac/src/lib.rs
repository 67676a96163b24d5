//! Relationship-based access control (ReBAC) engine
//!
//! Authorization is answered from a store of relation tuples, each stating
//! that an object has a relation to a subject:
//! - Check: does a subject hold a relation on an object, directly or through
//!   userset indirection?
//! - ListObjects: which objects of a namespace can a subject reach?
//! - Expand: which subjects hold a relation on an object?
//! - Writes: atomic batches of inserts, deletes and temporal closes
//!
//! # Core Concepts
//!
//! - **Entity**: `(namespace, key)`, e.g. `UserTask:42` or `User:7`
//! - **Userset**: all subjects holding a relation on an entity, e.g. `Team:3#member`
//! - **Tuple**: `object#relation@subject`, optionally valid only within a time window
//!
//! # Example
//!
//! ```rust
//! use auth_rebac::{
//!     CancellationSignal, CheckRequest, EntityRef, InMemoryTupleStore, NewRelationship,
//!     RebacEngine, Relation,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RebacEngine::new(Arc::new(InMemoryTupleStore::new()));
//!
//!     // Members of Team:3 may view UserTask:42
//!     engine
//!         .write_relationship(NewRelationship::new(
//!             EntityRef::user_task(42),
//!             Relation::viewer(),
//!             EntityRef::team(3).userset(Relation::member()),
//!             1,
//!         ))
//!         .await?;
//!     engine
//!         .write_relationship(NewRelationship::new(
//!             EntityRef::team(3),
//!             Relation::member(),
//!             EntityRef::user(7),
//!             1,
//!         ))
//!         .await?;
//!
//!     let request = CheckRequest::new(EntityRef::user_task(42), Relation::viewer(), EntityRef::user(7));
//!     assert!(engine.check(&request, &CancellationSignal::new()).await?);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod check;
pub mod config;
mod context;
pub mod engine;
pub mod error;
pub mod expand;
pub mod gateway;
pub mod list;
pub mod logging;
pub mod models;
pub mod repository;
pub mod schema;
pub mod writer;

pub use cancel::CancellationSignal;
pub use check::{CheckRequest, UsersetResolver};
pub use crate::config::{EngineSettings, ResolverConfig};
pub use engine::RebacEngine;
pub use error::*;
pub use expand::{ExpandNode, SubjectExpander};
pub use gateway::{AuthorizationGateway, Decision};
pub use list::{ListObjectsRequest, ObjectLister};
pub use logging::{init_tracing, LoggingConfig};
pub use models::*;
pub use repository::{InMemoryTupleStore, PostgresTupleStore, TupleStore};
pub use schema::*;
pub use writer::{NewRelationship, RelationshipWriter};
