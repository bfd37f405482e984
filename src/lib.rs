//! Relationship-aware CRUD and partial-schema derivation for the admin backend.

pub mod cli;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod filter;
pub mod schema;
pub mod types;

pub use database::{Entity, EntityRepository, FieldInput, Payload, Related, Session};
pub use entity::{EntityDescriptor, Registry, RelationshipSpec};
pub use error::EntityError;
pub use schema::{SchemaDescriptor, SchemaDeriver};
