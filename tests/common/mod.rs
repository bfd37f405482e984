#![allow(dead_code)]

use std::sync::{Arc, Once};

use admin_crud::database::{EntityRepository, MemorySession, MemoryStore, Payload};
use admin_crud::entity::catalog::{self, ROLE, UPLOAD, USER, USER_PROFILE};
use admin_crud::entity::Registry;
use anyhow::Result;
use serde_json::Value;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Admin catalog over a fresh in-memory store
pub struct Fixture {
    pub registry: Arc<Registry>,
    pub store: MemoryStore,
    pub users: EntityRepository,
    pub roles: EntityRepository,
    pub profiles: EntityRepository,
    pub uploads: EntityRepository,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        init_tracing();
        let registry = Arc::new(catalog::admin_registry()?);
        let store = MemoryStore::from_registry(&registry);
        Ok(Self {
            users: EntityRepository::new(registry.clone(), USER)?,
            roles: EntityRepository::new(registry.clone(), ROLE)?,
            profiles: EntityRepository::new(registry.clone(), USER_PROFILE)?,
            uploads: EntityRepository::new(registry.clone(), UPLOAD)?,
            registry,
            store,
        })
    }

    pub fn session(&self) -> MemorySession {
        self.store.session()
    }
}

pub fn payload(value: Value) -> Payload {
    Payload::from_json(value).expect("payload must be a JSON object")
}
