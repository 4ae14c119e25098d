// foreign_keys.rs
use crate::EntityKind;
use once_cell::sync::Lazy;

/// Relación de clave foránea declarada en el modelo de datos: el campo
/// `field` de `child` referencia el `id` de `parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignKey {
  pub child: EntityKind,
  pub field: &'static str,
  pub parent: EntityKind,
}

impl ForeignKey {
  pub const fn new(child: EntityKind, field: &'static str, parent: EntityKind) -> Self {
    Self { child, field, parent }
  }

  /// Una auto-referencia (p.ej. `Execution.parent_id`) no impone orden entre
  /// tipos; el orden dentro del tipo lo decide el orden de registro.
  pub fn is_self_reference(&self) -> bool {
    self.child == self.parent
  }
}

static STANDARD_FOREIGN_KEYS: Lazy<Vec<ForeignKey>> = Lazy::new(|| {
  use EntityKind::*;
  vec![ForeignKey::new(ByteArray, "deployment_id", Deployment),
       ForeignKey::new(ProcessDefinition, "deployment_id", Deployment),
       ForeignKey::new(ProcessDefinitionInfo, "proc_def_id", ProcessDefinition),
       ForeignKey::new(ProcessDefinitionInfo, "info_json_id", ByteArray),
       ForeignKey::new(Execution, "proc_inst_id", Execution),
       ForeignKey::new(Execution, "parent_id", Execution),
       ForeignKey::new(Execution, "super_exec", Execution),
       ForeignKey::new(Execution, "proc_def_id", ProcessDefinition),
       ForeignKey::new(ActivityInstance, "proc_inst_id", Execution),
       ForeignKey::new(Task, "execution_id", Execution),
       ForeignKey::new(Task, "proc_inst_id", Execution),
       ForeignKey::new(Task, "proc_def_id", ProcessDefinition),
       ForeignKey::new(IdentityLink, "task_id", Task),
       ForeignKey::new(IdentityLink, "proc_inst_id", Execution),
       ForeignKey::new(IdentityLink, "proc_def_id", ProcessDefinition),
       ForeignKey::new(VariableInstance, "execution_id", Execution),
       ForeignKey::new(VariableInstance, "proc_inst_id", Execution),
       ForeignKey::new(VariableInstance, "bytearray_id", ByteArray),
       ForeignKey::new(EventSubscription, "execution_id", Execution),
       ForeignKey::new(EventSubscription, "proc_inst_id", Execution),
       ForeignKey::new(Job, "execution_id", Execution),
       ForeignKey::new(Job, "proc_inst_id", Execution),
       ForeignKey::new(Job, "exception_stack_id", ByteArray),
       ForeignKey::new(Job, "custom_values_id", ByteArray),
       ForeignKey::new(TimerJob, "execution_id", Execution),
       ForeignKey::new(TimerJob, "proc_inst_id", Execution),
       ForeignKey::new(TimerJob, "exception_stack_id", ByteArray),
       ForeignKey::new(TimerJob, "custom_values_id", ByteArray),
       ForeignKey::new(SuspendedJob, "execution_id", Execution),
       ForeignKey::new(SuspendedJob, "proc_inst_id", Execution),
       ForeignKey::new(SuspendedJob, "exception_stack_id", ByteArray),
       ForeignKey::new(SuspendedJob, "custom_values_id", ByteArray),
       ForeignKey::new(DeadLetterJob, "execution_id", Execution),
       ForeignKey::new(DeadLetterJob, "proc_inst_id", Execution),
       ForeignKey::new(DeadLetterJob, "exception_stack_id", ByteArray),
       ForeignKey::new(DeadLetterJob, "custom_values_id", ByteArray),
       ForeignKey::new(HistoryJob, "exception_stack_id", ByteArray),
       ForeignKey::new(HistoryJob, "custom_values_id", ByteArray),
       ForeignKey::new(Attachment, "content_id", ByteArray),
       ForeignKey::new(HistoricVariableInstance, "bytearray_id", ByteArray),
       ForeignKey::new(HistoricDetail, "bytearray_id", ByteArray)]
});

/// Colección de claves foráneas declaradas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeys {
  keys: Vec<ForeignKey>,
}

impl ForeignKeys {
  pub fn new(keys: Vec<ForeignKey>) -> Self {
    Self { keys }
  }

  /// Claves foráneas del modelo de datos estándar del motor.
  pub fn standard() -> Self {
    Self { keys: STANDARD_FOREIGN_KEYS.clone() }
  }

  pub fn iter(&self) -> impl Iterator<Item = &ForeignKey> {
    self.keys.iter()
  }

  pub fn len(&self) -> usize {
    self.keys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }

  /// Claves declaradas en `child` (columnas que referencian a otros).
  pub fn declared_on(&self, child: EntityKind) -> impl Iterator<Item = &ForeignKey> {
    self.keys.iter().filter(move |fk| fk.child == child)
  }

  /// Claves que apuntan a `parent`.
  pub fn referencing(&self, parent: EntityKind) -> impl Iterator<Item = &ForeignKey> {
    self.keys.iter().filter(move |fk| fk.parent == parent)
  }

  /// Campos de `kind` que son columnas FK, sin duplicados y en orden de
  /// declaración.
  pub fn columns_of(&self, kind: EntityKind) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for fk in self.declared_on(kind) {
      if !out.contains(&fk.field) {
        out.push(fk.field);
      }
    }
    out
  }

  /// Devuelve la clave declarada para `(child, field)`, si existe.
  pub fn find(&self, child: EntityKind, field: &str) -> Option<&ForeignKey> {
    self.keys.iter().find(|fk| fk.child == child && fk.field == field)
  }
}

impl Default for ForeignKeys {
  fn default() -> Self {
    Self::standard()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn columns_are_deduplicated_per_kind() {
    let fks = ForeignKeys::standard();
    assert_eq!(fks.columns_of(EntityKind::Execution),
               vec!["proc_inst_id", "parent_id", "super_exec", "proc_def_id"]);
    assert!(fks.columns_of(EntityKind::EventLogEntry).is_empty());
  }

  #[test]
  fn referencing_lists_children_of_a_parent() {
    let fks = ForeignKeys::standard();
    let children: Vec<EntityKind> = fks.referencing(EntityKind::Task).map(|fk| fk.child).collect();
    assert_eq!(children, vec![EntityKind::IdentityLink]);
    assert!(fks.find(EntityKind::Task, "execution_id").is_some());
    assert!(fks.find(EntityKind::Task, "name").is_none());
  }
}
