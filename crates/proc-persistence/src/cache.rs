// cache.rs
use proc_domain::{Criteria, EntityKind, EntityRecord};
use serde_json::Value as JsonValue;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Entrada de la cache: el registro vivo y la instantánea de su estado en
/// el momento de cargarlo (o del último flush).
#[derive(Debug, Clone)]
pub struct CachedEntity {
  pub record: EntityRecord,
  original_state: JsonValue,
}

impl CachedEntity {
  /// Cambió respecto a la instantánea.
  pub fn is_dirty(&self) -> bool {
    self.record.persistent_state() != self.original_state
  }
}

/// Memo por transacción de las entidades cargadas desde el store. Evita
/// cargas duplicadas y permite detectar qué entidades necesitan UPDATE.
/// Nunca se comparte entre transacciones.
#[derive(Debug, Default)]
pub struct EntityCache {
  entries: HashMap<EntityKind, HashMap<String, CachedEntity>>,
}

impl EntityCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registra `record` junto con la instantánea para la detección de
  /// cambios.
  pub fn put(&mut self, record: EntityRecord) -> &mut EntityRecord {
    let original_state = record.persistent_state();
    let cached = CachedEntity { record, original_state };
    match self.entries.entry(cached.record.kind).or_default().entry(cached.record.id.clone()) {
      Entry::Occupied(mut slot) => {
        slot.insert(cached);
        &mut slot.into_mut().record
      }
      Entry::Vacant(slot) => &mut slot.insert(cached).record,
    }
  }

  pub fn get(&self, kind: EntityKind, id: &str) -> Option<&EntityRecord> {
    self.entries.get(&kind).and_then(|m| m.get(id)).map(|c| &c.record)
  }

  pub fn get_mut(&mut self, kind: EntityKind, id: &str) -> Option<&mut EntityRecord> {
    self.entries.get_mut(&kind).and_then(|m| m.get_mut(id)).map(|c| &mut c.record)
  }

  pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
    self.get(kind, id).is_some()
  }

  pub fn remove(&mut self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
    self.entries.get_mut(&kind).and_then(|m| m.remove(id)).map(|c| c.record)
  }

  /// Entidades en cache de `kind` que cumplen el criterio.
  pub fn find_by(&self, kind: EntityKind, criteria: &Criteria) -> Vec<&EntityRecord> {
    self.entries
        .get(&kind)
        .map(|m| m.values().map(|c| &c.record).filter(|r| criteria.matches(r)).collect())
        .unwrap_or_default()
  }

  /// Entradas modificadas desde la carga, ordenadas por tipo e id para que
  /// el plan de flush sea determinista.
  pub fn dirty_entries(&self) -> Vec<&EntityRecord> {
    let mut out: Vec<&EntityRecord> = self.entries
                                          .values()
                                          .flat_map(|m| m.values())
                                          .filter(|c| c.is_dirty())
                                          .map(|c| &c.record)
                                          .collect();
    out.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.id.cmp(&b.id)));
    out
  }

  /// Tras un flush exitoso: nueva revisión y nueva instantánea.
  pub fn mark_flushed(&mut self, kind: EntityKind, id: &str, revision: i32) {
    if let Some(c) = self.entries.get_mut(&kind).and_then(|m| m.get_mut(id)) {
      c.record.revision = revision;
      c.original_state = c.record.persistent_state();
    }
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loaded_entity_is_clean_until_changed() {
    let mut cache = EntityCache::new();
    cache.put(EntityRecord::with_id(EntityKind::Task, "t1").with_field("name", "a"));
    assert!(cache.dirty_entries().is_empty());
    cache.get_mut(EntityKind::Task, "t1").unwrap().set_field("name", "b");
    assert_eq!(cache.dirty_entries().len(), 1);
    cache.mark_flushed(EntityKind::Task, "t1", 2);
    assert!(cache.dirty_entries().is_empty());
    assert_eq!(cache.get(EntityKind::Task, "t1").unwrap().revision, 2);
  }

  #[test]
  fn find_by_filters_on_field() {
    let mut cache = EntityCache::new();
    cache.put(EntityRecord::with_id(EntityKind::Task, "t1").with_field("proc_inst_id", "p1"));
    cache.put(EntityRecord::with_id(EntityKind::Task, "t2").with_field("proc_inst_id", "p2"));
    let found = cache.find_by(EntityKind::Task, &Criteria::field_equals("proc_inst_id", "p2"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "t2");
  }
}
