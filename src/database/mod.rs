pub mod manager;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod repository;
pub mod session;

pub use manager::DatabaseError;
pub use memory::{MemorySession, MemoryStore};
pub use postgres::PgSession;
pub use record::{Entity, FieldInput, Payload, Related};
pub use repository::EntityRepository;
pub use session::{Row, Session};
