use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::database::record::{Entity, FieldInput, Payload, Related};
use crate::database::session::{Row, Session};
use crate::entity::{Cardinality, EntityDescriptor, FkOwner, Registry, RelationshipSpec};
use crate::error::EntityError;
use crate::filter::Filter;

/// Relationship-aware CRUD over one registered entity type.
///
/// The repository owns no connection: every call takes the caller's
/// session and runs inside its own unit of work, committed on success and
/// rolled back on any error.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    registry: Arc<Registry>,
    descriptor: Arc<EntityDescriptor>,
}

impl EntityRepository {
    /// Bind a repository to `entity`; fails for unknown entities or an
    /// inconsistent registry
    pub fn new(registry: Arc<Registry>, entity: &str) -> Result<Self, EntityError> {
        registry.validate()?;
        let descriptor = registry.descriptor(entity)?;
        Ok(Self { registry, descriptor })
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn create<S>(&self, session: &mut S, payload: &Payload) -> Result<Entity, EntityError>
    where
        S: Session + ?Sized,
    {
        let row = self.prepare_create(payload)?;
        session.begin().await?;
        let result = self.insert_row(session, row).await;
        let entity = self.finish(session, result).await?;
        info!("Created {} {}", self.descriptor.name(), entity.key());
        Ok(entity)
    }

    pub async fn read_by_key<S>(&self, session: &mut S, key: Uuid, join: bool) -> Result<Entity, EntityError>
    where
        S: Session + ?Sized,
    {
        session.begin().await?;
        let result = self.read_in(session, key, join).await;
        self.finish(session, result).await
    }

    /// One page in primary-key order; a `limit` above `repository.max_limit`
    /// is rejected rather than shortened
    pub async fn read_all<S>(&self, session: &mut S, skip: u64, limit: u64, join: bool) -> Result<Vec<Entity>, EntityError>
    where
        S: Session + ?Sized,
    {
        Self::check_limit(limit)?;
        session.begin().await?;
        let result = self.read_page(session, skip, limit, join).await;
        self.finish(session, result).await
    }

    /// Apply the `Set` fields of `payload`; `Unset` fields are left alone
    pub async fn update<S>(&self, session: &mut S, key: Uuid, payload: &Payload) -> Result<Entity, EntityError>
    where
        S: Session + ?Sized,
    {
        let fields = self.prepare_update(key, payload)?;
        session.begin().await?;
        let result = self.update_in(session, key, fields).await;
        let entity = self.finish(session, result).await?;
        info!("Updated {} {}", self.descriptor.name(), key);
        Ok(entity)
    }

    /// Remove one row; dependent rows are not touched
    pub async fn delete<S>(&self, session: &mut S, key: Uuid) -> Result<(), EntityError>
    where
        S: Session + ?Sized,
    {
        session.begin().await?;
        let result = self.delete_in(session, key).await;
        self.finish(session, result).await?;
        info!("Deleted {} {}", self.descriptor.name(), key);
        Ok(())
    }

    pub async fn count<S>(&self, session: &mut S) -> Result<u64, EntityError>
    where
        S: Session + ?Sized,
    {
        session.begin().await?;
        let result = match Filter::new(self.descriptor.table()) {
            Ok(filter) => session.count(&filter).await.map_err(EntityError::from),
            Err(e) => Err(e.into()),
        };
        self.finish(session, result).await
    }

    async fn finish<S, T>(&self, session: &mut S, result: Result<T, EntityError>) -> Result<T, EntityError>
    where
        S: Session + ?Sized,
    {
        match result {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!("Rollback after failed {} operation also failed: {}", self.descriptor.name(), rollback_err);
                }
                Err(err)
            }
        }
    }

    fn check_limit(limit: u64) -> Result<(), EntityError> {
        match CONFIG.repository.max_limit {
            Some(max) if limit > max => {
                warn!("Requested limit {} exceeds maximum {}", limit, max);
                Err(EntityError::invalid_field("limit", format!("must be at most {}", max)))
            }
            _ => Ok(()),
        }
    }

    /// Validate a create payload into a storable row with a primary key
    fn prepare_create(&self, payload: &Payload) -> Result<Row, EntityError> {
        let pk = self.descriptor.primary_key();
        let schema = self.descriptor.schema();

        let mut payload = payload.clone();
        let supplied = if schema.contains(pk) { None } else { payload.remove(pk) };

        let mut row = schema.validate_create(&payload)?;
        let key = match supplied {
            Some(FieldInput::Set(value)) if !value.is_null() => Some(Self::parse_key(pk, &value)?),
            _ => row.get(pk).and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok()),
        };
        let key = key.unwrap_or_else(Uuid::new_v4);
        row.insert(pk.to_string(), Value::String(key.to_string()));
        Ok(row)
    }

    /// Validate an update payload; the primary key may be restated but not changed
    fn prepare_update(&self, key: Uuid, payload: &Payload) -> Result<Row, EntityError> {
        let pk = self.descriptor.primary_key();
        let mut payload = payload.clone();
        if let Some(FieldInput::Set(value)) = payload.remove(pk) {
            if Self::parse_key(pk, &value)? != key {
                return Err(EntityError::invalid_field(pk, "primary key cannot be changed"));
            }
        }
        self.descriptor.schema().validate_update(&payload)
    }

    fn parse_key(pk: &str, value: &Value) -> Result<Uuid, EntityError> {
        value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| EntityError::invalid_field(pk, "expected a UUID"))
    }

    fn key_filter(&self, key: Uuid) -> Result<Filter, EntityError> {
        Ok(Filter::eq(
            self.descriptor.table(),
            self.descriptor.primary_key(),
            json!(key.to_string()),
        )?)
    }

    async fn insert_row<S>(&self, session: &mut S, row: Row) -> Result<Entity, EntityError>
    where
        S: Session + ?Sized,
    {
        let stored = session.insert(self.descriptor.table(), row).await?;
        Ok(Entity::from_row(&self.descriptor, stored)?)
    }

    async fn read_in<S>(&self, session: &mut S, key: Uuid, join: bool) -> Result<Entity, EntityError>
    where
        S: Session + ?Sized,
    {
        let row = session
            .fetch(&self.key_filter(key)?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EntityError::not_found(self.descriptor.name(), key))?;

        let mut entities = vec![Entity::from_row(&self.descriptor, row)?];
        if join {
            self.attach_relationships(session, &mut entities).await?;
        }
        Ok(entities.remove(0))
    }

    async fn read_page<S>(&self, session: &mut S, skip: u64, limit: u64, join: bool) -> Result<Vec<Entity>, EntityError>
    where
        S: Session + ?Sized,
    {
        let mut filter = Filter::new(self.descriptor.table())?;
        filter.order(self.descriptor.primary_key())?;
        filter.offset(skip).limit(limit);

        let rows = session.fetch(&filter).await?;
        if CONFIG.repository.debug_logging {
            debug!("read_all {} skip={} limit={} -> {} rows", self.descriptor.name(), skip, limit, rows.len());
        }

        let mut entities = rows
            .into_iter()
            .map(|row| Entity::from_row(&self.descriptor, row))
            .collect::<Result<Vec<_>, _>>()?;
        if join && !entities.is_empty() {
            self.attach_relationships(session, &mut entities).await?;
        }
        Ok(entities)
    }

    async fn update_in<S>(&self, session: &mut S, key: Uuid, fields: Row) -> Result<Entity, EntityError>
    where
        S: Session + ?Sized,
    {
        let row = if fields.is_empty() {
            session.fetch(&self.key_filter(key)?).await?.into_iter().next()
        } else {
            let pk = self.descriptor.primary_key();
            session
                .update(self.descriptor.table(), pk, &json!(key.to_string()), fields)
                .await?
        };
        let row = row.ok_or_else(|| EntityError::not_found(self.descriptor.name(), key))?;
        Ok(Entity::from_row(&self.descriptor, row)?)
    }

    async fn delete_in<S>(&self, session: &mut S, key: Uuid) -> Result<(), EntityError>
    where
        S: Session + ?Sized,
    {
        let removed = session
            .delete(self.descriptor.table(), self.descriptor.primary_key(), &json!(key.to_string()))
            .await?;
        if removed {
            Ok(())
        } else {
            Err(EntityError::not_found(self.descriptor.name(), key))
        }
    }

    /// Resolve every declared relationship for a batch of entities.
    ///
    /// One lookup per relationship, whatever the batch size. Any failure
    /// aborts the whole read.
    async fn attach_relationships<S>(&self, session: &mut S, entities: &mut [Entity]) -> Result<(), EntityError>
    where
        S: Session + ?Sized,
    {
        for relationship in self.descriptor.relationships() {
            let target = self.registry.descriptor(&relationship.target)?;
            debug!(
                "Resolving {}.{} -> {} for {} row(s)",
                self.descriptor.name(),
                relationship.name,
                target.name(),
                entities.len()
            );
            match relationship.owner {
                FkOwner::Target => self.attach_children(session, relationship, &target, entities).await?,
                FkOwner::Source => self.attach_parents(session, relationship, &target, entities).await?,
            }
        }
        Ok(())
    }

    /// Target rows whose foreign key points back at one of `entities`
    async fn attach_children<S>(
        &self,
        session: &mut S,
        relationship: &RelationshipSpec,
        target: &EntityDescriptor,
        entities: &mut [Entity],
    ) -> Result<(), EntityError>
    where
        S: Session + ?Sized,
    {
        let keys: Vec<Value> = entities.iter().map(|e| Value::String(e.key().to_string())).collect();
        let filter = Filter::any_of(target.table(), &relationship.foreign_key, keys)?;

        let mut grouped: HashMap<Uuid, Vec<Entity>> = HashMap::new();
        for row in session.fetch(&filter).await? {
            let owner = row.get(&relationship.foreign_key).and_then(as_uuid);
            let child = Entity::from_row(target, row)?;
            if let Some(owner) = owner {
                grouped.entry(owner).or_default().push(child);
            }
        }

        for entity in entities.iter_mut() {
            let children = grouped.remove(&entity.key()).unwrap_or_default();
            let related = match relationship.cardinality {
                Cardinality::One => {
                    if children.len() > 1 {
                        warn!(
                            "{} {} has {} {} rows for one-to-one '{}', keeping the first",
                            self.descriptor.name(),
                            entity.key(),
                            children.len(),
                            target.name(),
                            relationship.name
                        );
                    }
                    Related::One(children.into_iter().next().map(Box::new))
                }
                Cardinality::Many => Related::Many(children),
            };
            entity.attach(relationship.name.clone(), related);
        }
        Ok(())
    }

    /// Target rows referenced by the foreign key each of `entities` holds
    async fn attach_parents<S>(
        &self,
        session: &mut S,
        relationship: &RelationshipSpec,
        target: &EntityDescriptor,
        entities: &mut [Entity],
    ) -> Result<(), EntityError>
    where
        S: Session + ?Sized,
    {
        let mut wanted: Vec<Uuid> = entities
            .iter()
            .filter_map(|e| self.held_key(e, &relationship.foreign_key))
            .collect();
        wanted.sort();
        wanted.dedup();

        let mut parents: HashMap<Uuid, Entity> = HashMap::new();
        if !wanted.is_empty() {
            let keys = wanted.iter().map(|k| Value::String(k.to_string())).collect();
            let filter = Filter::any_of(target.table(), target.primary_key(), keys)?;
            for row in session.fetch(&filter).await? {
                let parent = Entity::from_row(target, row)?;
                parents.insert(parent.key(), parent);
            }
        }

        for entity in entities.iter_mut() {
            let parent = self
                .held_key(entity, &relationship.foreign_key)
                .and_then(|k| parents.get(&k).cloned());
            entity.attach(relationship.name.clone(), Related::One(parent.map(Box::new)));
        }
        Ok(())
    }

    /// Foreign key value held by `entity`; the primary key lives outside `fields`
    fn held_key(&self, entity: &Entity, foreign_key: &str) -> Option<Uuid> {
        if foreign_key == self.descriptor.primary_key() {
            Some(entity.key())
        } else {
            entity.get(foreign_key).and_then(as_uuid)
        }
    }
}

fn as_uuid(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}
