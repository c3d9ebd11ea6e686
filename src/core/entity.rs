use std::collections::{BTreeMap, HashMap};
use parking_lot::RwLock;
use crate::core::error::Result;
use crate::core::types::Entity;

/// Read access to the persisted entities owned by the DAO layer.
pub trait EntitySource: Send + Sync {
    fn count(&self, entity_type: &str) -> Result<u64>;

    /// Entities of one type ordered by id, `limit` at a time.
    fn page(&self, entity_type: &str, offset: u64, limit: usize) -> Result<Vec<Entity>>;

    /// Entities whose indexed "referenced by" fields depend on `(entity_type, id)`.
    fn referencing(&self, entity_type: &str, id: &str) -> Result<Vec<Entity>>;
}

/// Source for nodes that only ever receive changes, never rebuild.
pub struct NoEntitySource;

impl EntitySource for NoEntitySource {
    fn count(&self, _entity_type: &str) -> Result<u64> {
        Ok(0)
    }

    fn page(&self, _entity_type: &str, _offset: u64, _limit: usize) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }

    fn referencing(&self, _entity_type: &str, _id: &str) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
}

type EntityKey = (String, String);

/// In-memory entity table, handy for embedding and tests.
pub struct MemoryEntitySource {
    entities: RwLock<BTreeMap<EntityKey, Entity>>,
    // referenced (type, id) -> referencing (type, id)
    references: RwLock<HashMap<EntityKey, Vec<EntityKey>>>,
}

impl MemoryEntitySource {
    pub fn new() -> Self {
        MemoryEntitySource {
            entities: RwLock::new(BTreeMap::new()),
            references: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, entity: Entity) {
        let key = (entity.entity_type.clone(), entity.id.clone());
        self.entities.write().insert(key, entity);
    }

    pub fn remove(&self, entity_type: &str, id: &str) -> Option<Entity> {
        self.entities.write().remove(&(entity_type.to_string(), id.to_string()))
    }

    /// Record that `from` embeds data of `to` in its index fields.
    pub fn add_reference(&self, from: (&str, &str), to: (&str, &str)) {
        let to_key = (to.0.to_string(), to.1.to_string());
        let from_key = (from.0.to_string(), from.1.to_string());
        let mut references = self.references.write();
        let entry = references.entry(to_key).or_insert_with(Vec::new);
        if !entry.contains(&from_key) {
            entry.push(from_key);
        }
    }
}

impl Default for MemoryEntitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitySource for MemoryEntitySource {
    fn count(&self, entity_type: &str) -> Result<u64> {
        let entities = self.entities.read();
        Ok(entities.keys().filter(|(t, _)| t == entity_type).count() as u64)
    }

    fn page(&self, entity_type: &str, offset: u64, limit: usize) -> Result<Vec<Entity>> {
        let entities = self.entities.read();
        Ok(entities.iter()
            .filter(|((t, _), _)| t == entity_type)
            .skip(offset as usize)
            .take(limit)
            .map(|(_, entity)| entity.clone())
            .collect())
    }

    fn referencing(&self, entity_type: &str, id: &str) -> Result<Vec<Entity>> {
        let references = self.references.read();
        let entities = self.entities.read();
        let key = (entity_type.to_string(), id.to_string());

        Ok(references.get(&key)
            .map(|froms| froms.iter().filter_map(|k| entities.get(k).cloned()).collect())
            .unwrap_or_default())
    }
}

/// Maps entity types to the logical index that holds them.
pub struct EntityRegistry {
    indexes: RwLock<HashMap<String, String>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        EntityRegistry {
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, entity_type: &str, index_name: &str) {
        self.indexes.write().insert(entity_type.to_string(), index_name.to_string());
    }

    /// Unregistered types get an index named after the type.
    pub fn index_name_for(&self, entity_type: &str) -> String {
        self.indexes.read()
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| entity_type.to_string())
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
