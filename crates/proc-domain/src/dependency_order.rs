// dependency_order.rs
use crate::{DomainError, EntityKind, ForeignKeys};
use std::collections::HashMap;

/// Orden total de tipos de entidad que respeta las claves foráneas.
///
/// - `delete_order`: hijos antes que padres (quien referencia se borra
///   primero).
/// - `insert_order`: exactamente el inverso, padres antes que hijos.
///
/// Es un valor construido explícitamente e inyectado en la fábrica de
/// sesiones; no existe estado global mutable. Una tabla mal mantenida no se
/// detecta sola en tiempo de flush (aparece como violación de FK en el
/// store), por eso `validate` contrasta el orden con las claves declaradas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDependencyOrder {
  delete_order: Vec<EntityKind>,
  insert_order: Vec<EntityKind>,
  delete_positions: HashMap<EntityKind, usize>,
}

impl EntityDependencyOrder {
  /// Tabla mantenida a mano para el modelo estándar.
  pub fn standard() -> Self {
    use EntityKind::*;
    Self::from_delete_order(vec![IdentityLink,
                                 VariableInstance,
                                 EventSubscription,
                                 Job,
                                 TimerJob,
                                 SuspendedJob,
                                 DeadLetterJob,
                                 HistoryJob,
                                 Task,
                                 ActivityInstance,
                                 Execution,
                                 ProcessDefinitionInfo,
                                 ProcessDefinition,
                                 Attachment,
                                 Comment,
                                 EventLogEntry,
                                 HistoricIdentityLink,
                                 HistoricDetail,
                                 HistoricVariableInstance,
                                 HistoricTaskLogEntry,
                                 HistoricTaskInstance,
                                 HistoricActivityInstance,
                                 HistoricProcessInstance,
                                 ByteArray,
                                 Deployment,
                                 Property])
  }

  /// Construye el orden a partir de la secuencia de borrado; la de inserción
  /// se obtiene invirtiéndola. No valida: usar `validate`.
  pub fn from_delete_order(delete_order: Vec<EntityKind>) -> Self {
    let mut insert_order = delete_order.clone();
    insert_order.reverse();
    let delete_positions = delete_order.iter().enumerate().map(|(i, k)| (*k, i)).collect();
    Self { delete_order, insert_order, delete_positions }
  }

  /// Calcula un orden de borrado mediante ordenación topológica de las
  /// claves declaradas. Entre candidatos disponibles se respeta el orden de
  /// `EntityKind::all()` para que el resultado sea determinista.
  pub fn derive_from_foreign_keys(foreign_keys: &ForeignKeys) -> Result<Self, DomainError> {
    let kinds = EntityKind::all();
    // referencias pendientes hacia cada padre desde hijos aún no emitidos
    let mut pending_children: HashMap<EntityKind, usize> = kinds.iter().map(|k| (*k, 0)).collect();
    for fk in foreign_keys.iter().filter(|fk| !fk.is_self_reference()) {
      *pending_children.entry(fk.parent).or_insert(0) += 1;
    }

    let mut emitted: Vec<EntityKind> = Vec::with_capacity(kinds.len());
    while emitted.len() < kinds.len() {
      let next = kinds.iter()
                      .copied()
                      .find(|k| !emitted.contains(k) && pending_children.get(k).copied().unwrap_or(0) == 0);
      let Some(kind) = next else {
        let blocked: Vec<String> = kinds.iter().filter(|k| !emitted.contains(k)).map(|k| k.to_string()).collect();
        return Err(DomainError::Ordering(format!("ciclo de claves foráneas entre: {}", blocked.join(", "))));
      };
      for fk in foreign_keys.declared_on(kind).filter(|fk| !fk.is_self_reference()) {
        if let Some(count) = pending_children.get_mut(&fk.parent) {
          *count = count.saturating_sub(1);
        }
      }
      emitted.push(kind);
    }
    Ok(Self::from_delete_order(emitted))
  }

  pub fn delete_order(&self) -> &[EntityKind] {
    &self.delete_order
  }

  pub fn insert_order(&self) -> &[EntityKind] {
    &self.insert_order
  }

  pub fn delete_position(&self, kind: EntityKind) -> Option<usize> {
    self.delete_positions.get(&kind).copied()
  }

  pub fn insert_position(&self, kind: EntityKind) -> Option<usize> {
    self.delete_position(kind).map(|p| self.delete_order.len() - 1 - p)
  }

  /// Comprueba que cada tipo aparece exactamente una vez y que, para cada
  /// clave foránea entre tipos distintos, el hijo se borra antes que el padre.
  pub fn validate(&self, foreign_keys: &ForeignKeys) -> Result<(), DomainError> {
    if self.delete_positions.len() != self.delete_order.len() {
      return Err(DomainError::Ordering("un tipo de entidad aparece más de una vez".to_string()));
    }
    let missing: Vec<String> = EntityKind::all().iter()
                                                .filter(|k| !self.delete_positions.contains_key(k))
                                                .map(|k| k.to_string())
                                                .collect();
    if !missing.is_empty() {
      return Err(DomainError::Ordering(format!("tipos sin posición: {}", missing.join(", "))));
    }
    for fk in foreign_keys.iter().filter(|fk| !fk.is_self_reference()) {
      let child = self.delete_position(fk.child);
      let parent = self.delete_position(fk.parent);
      match (child, parent) {
        (Some(c), Some(p)) if c < p => {}
        _ => {
          return Err(DomainError::Ordering(format!("{}.{} referencia {} pero se borra después",
                                                   fk.child, fk.field, fk.parent)))
        }
      }
    }
    Ok(())
  }
}

impl Default for EntityDependencyOrder {
  fn default() -> Self {
    Self::standard()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ForeignKey;

  #[test]
  fn swapped_parent_and_child_is_rejected() {
    let mut order = EntityDependencyOrder::standard().delete_order().to_vec();
    let task = order.iter().position(|k| *k == EntityKind::Task).unwrap();
    let link = order.iter().position(|k| *k == EntityKind::IdentityLink).unwrap();
    order.swap(task, link);
    let broken = EntityDependencyOrder::from_delete_order(order);
    match broken.validate(&ForeignKeys::standard()) {
      Err(DomainError::Ordering(msg)) => assert!(msg.contains("IdentityLink.task_id")),
      other => panic!("expected ordering error, got {:?}", other),
    }
  }

  #[test]
  fn missing_and_duplicated_kinds_are_rejected() {
    let mut order = EntityDependencyOrder::standard().delete_order().to_vec();
    order.pop();
    assert!(EntityDependencyOrder::from_delete_order(order.clone()).validate(&ForeignKeys::standard()).is_err());
    order.push(EntityKind::Task);
    assert!(EntityDependencyOrder::from_delete_order(order).validate(&ForeignKeys::standard()).is_err());
  }

  #[test]
  fn cycle_is_reported_when_deriving() {
    let mut keys: Vec<ForeignKey> = ForeignKeys::standard().iter().copied().collect();
    keys.push(ForeignKey::new(EntityKind::Execution, "task_id", EntityKind::Task));
    let err = EntityDependencyOrder::derive_from_foreign_keys(&ForeignKeys::new(keys)).unwrap_err();
    assert!(matches!(err, DomainError::Ordering(_)));
  }
}
