// pending.rs
use indexmap::IndexMap;
use log::debug;
use proc_domain::{Criteria, EntityKind, EntityRecord};
use std::collections::HashMap;

/// Borrado masivo registrado: sentencia (por defecto `bulkDelete<Kind>`),
/// tipo afectado y filtro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDeleteOperation {
  pub statement: String,
  pub kind: EntityKind,
  pub criteria: Criteria,
}

/// Operaciones pendientes de una transacción, agrupadas por tipo. Dentro de
/// cada tipo se conserva el orden de registro.
#[derive(Debug, Default)]
pub struct PendingOperations {
  inserted: HashMap<EntityKind, IndexMap<String, EntityRecord>>,
  deleted: HashMap<EntityKind, IndexMap<String, EntityRecord>>,
  bulk_deletes: HashMap<EntityKind, Vec<BulkDeleteOperation>>,
}

impl PendingOperations {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn add_insert(&mut self, record: EntityRecord) {
    self.inserted.entry(record.kind).or_default().insert(record.id.clone(), record);
  }

  pub(crate) fn add_delete(&mut self, record: EntityRecord) {
    self.deleted.entry(record.kind).or_default().insert(record.id.clone(), record);
  }

  pub(crate) fn add_bulk_delete(&mut self, operation: BulkDeleteOperation) {
    let ops = self.bulk_deletes.entry(operation.kind).or_default();
    if !ops.contains(&operation) {
      ops.push(operation);
    }
  }

  pub(crate) fn inserted_mut(&mut self, kind: EntityKind, id: &str) -> Option<&mut EntityRecord> {
    self.inserted.get_mut(&kind).and_then(|m| m.get_mut(id))
  }

  pub fn inserted(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
    self.inserted.get(&kind).into_iter().flat_map(|m| m.values())
  }

  pub fn deleted(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
    self.deleted.get(&kind).into_iter().flat_map(|m| m.values())
  }

  pub fn bulk_deletes(&self, kind: EntityKind) -> &[BulkDeleteOperation] {
    self.bulk_deletes.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
  }

  pub fn get_inserted(&self, kind: EntityKind, id: &str) -> Option<&EntityRecord> {
    self.inserted.get(&kind).and_then(|m| m.get(id))
  }

  pub fn is_inserted(&self, kind: EntityKind, id: &str) -> bool {
    self.get_inserted(kind, id).is_some()
  }

  pub fn is_deleted(&self, kind: EntityKind, id: &str) -> bool {
    self.deleted.get(&kind).is_some_and(|m| m.contains_key(id))
  }

  /// Tipos con al menos una operación pendiente.
  pub fn kinds(&self) -> Vec<EntityKind> {
    let mut kinds: Vec<EntityKind> = self.inserted
                                         .iter()
                                         .filter(|(_, m)| !m.is_empty())
                                         .map(|(k, _)| *k)
                                         .chain(self.deleted.iter().filter(|(_, m)| !m.is_empty()).map(|(k, _)| *k))
                                         .chain(self.bulk_deletes.iter().filter(|(_, v)| !v.is_empty()).map(|(k, _)| *k))
                                         .collect();
    kinds.sort();
    kinds.dedup();
    kinds
  }

  pub fn insert_count(&self) -> usize {
    self.inserted.values().map(|m| m.len()).sum()
  }

  pub fn delete_count(&self) -> usize {
    self.deleted.values().map(|m| m.len()).sum()
  }

  pub fn bulk_delete_count(&self) -> usize {
    self.bulk_deletes.values().map(|v| v.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.insert_count() == 0 && self.delete_count() == 0 && self.bulk_delete_count() == 0
  }

  pub(crate) fn take_inserted(&mut self, kind: EntityKind) -> Vec<EntityRecord> {
    self.inserted.remove(&kind).map(|m| m.into_values().collect()).unwrap_or_default()
  }

  pub(crate) fn take_deleted(&mut self, kind: EntityKind) -> Vec<EntityRecord> {
    self.deleted.remove(&kind).map(|m| m.into_values().collect()).unwrap_or_default()
  }

  pub(crate) fn take_bulk_deletes(&mut self, kind: EntityKind) -> Vec<BulkDeleteOperation> {
    self.bulk_deletes.remove(&kind).unwrap_or_default()
  }

  pub(crate) fn clear(&mut self) {
    self.inserted.clear();
    self.deleted.clear();
    self.bulk_deletes.clear();
  }

  /// Cancela los pares insert/delete del mismo id: la entidad nunca llega al
  /// store. Devuelve cuántos pares se eliminaron.
  pub(crate) fn cancel_insert_delete_pairs(&mut self) -> usize {
    let mut cancelled = 0;
    for (kind, deleted) in self.deleted.iter_mut() {
      let Some(inserted) = self.inserted.get_mut(kind) else {
        continue;
      };
      let pairs: Vec<String> = deleted.keys().filter(|id| inserted.contains_key(*id)).cloned().collect();
      for id in pairs {
        inserted.shift_remove(&id);
        deleted.shift_remove(&id);
        debug!("insert+delete de {} {} cancelados", kind, id);
        cancelled += 1;
      }
    }
    cancelled
  }
}

/// Vista de sólo-eliminación sobre las operaciones pendientes, entregada a
/// los `FlushOptimizer`. No permite añadir ni reordenar.
pub struct PendingOperationsView<'a> {
  ops: &'a mut PendingOperations,
  removed: usize,
}

impl<'a> PendingOperationsView<'a> {
  pub fn new(ops: &'a mut PendingOperations) -> Self {
    Self { ops, removed: 0 }
  }

  pub fn inserted(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
    self.ops.inserted(kind)
  }

  pub fn deleted(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
    self.ops.deleted(kind)
  }

  pub fn bulk_deletes(&self, kind: EntityKind) -> &[BulkDeleteOperation] {
    self.ops.bulk_deletes(kind)
  }

  pub fn is_inserted(&self, kind: EntityKind, id: &str) -> bool {
    self.ops.is_inserted(kind, id)
  }

  pub fn is_deleted(&self, kind: EntityKind, id: &str) -> bool {
    self.ops.is_deleted(kind, id)
  }

  pub fn kinds(&self) -> Vec<EntityKind> {
    self.ops.kinds()
  }

  /// Quita los inserts de `kind` que cumplen `predicate`. Un delete
  /// pendiente del mismo id se quita con su insert: la fila nunca llegó al
  /// store.
  pub fn remove_inserts_where<F>(&mut self, kind: EntityKind, mut predicate: F) -> usize
    where F: FnMut(&EntityRecord) -> bool
  {
    let Some(map) = self.ops.inserted.get_mut(&kind) else {
      return 0;
    };
    let ids: Vec<String> = map.values().filter(|r| predicate(r)).map(|r| r.id.clone()).collect();
    for id in &ids {
      map.shift_remove(id);
    }
    self.removed += ids.len();
    if let Some(deleted) = self.ops.deleted.get_mut(&kind) {
      for id in &ids {
        if deleted.shift_remove(id).is_some() {
          debug!("delete de {} {} descartado junto con su insert", kind, id);
          self.removed += 1;
        }
      }
    }
    ids.len()
  }

  pub fn remove_delete(&mut self, kind: EntityKind, id: &str) -> bool {
    let removed = self.ops.deleted.get_mut(&kind).and_then(|m| m.shift_remove(id)).is_some();
    if removed {
      self.removed += 1;
    }
    removed
  }

  /// Quita los borrados masivos de `kind` que cumplen `predicate`.
  pub fn remove_bulk_deletes_where<F>(&mut self, kind: EntityKind, mut predicate: F) -> usize
    where F: FnMut(&BulkDeleteOperation) -> bool
  {
    let Some(ops) = self.ops.bulk_deletes.get_mut(&kind) else {
      return 0;
    };
    let before = ops.len();
    ops.retain(|op| !predicate(op));
    let removed = before - ops.len();
    self.removed += removed;
    removed
  }

  /// Total de operaciones eliminadas a través de esta vista.
  pub fn removed(&self) -> usize {
    self.removed
  }
}

/// Regla adicional de eliminación de operaciones innecesarias. Se ejecuta
/// antes de la cancelación genérica de pares insert/delete.
///
/// Las reglas sólo pueden quitar trabajo y deben ser idempotentes.
pub trait FlushOptimizer: Send + Sync {
  fn name(&self) -> &str;

  fn remove_unnecessary_operations(&self, operations: &mut PendingOperationsView<'_>);
}
