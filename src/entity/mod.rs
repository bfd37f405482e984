//! Entity descriptors, relationships and the startup registry.

pub mod catalog;
pub mod descriptor;
pub mod registry;

pub use descriptor::{Cardinality, EntityDescriptor, FkOwner, RelationshipSpec};
pub use registry::Registry;
