// optimizer.rs
use log::trace;
use proc_domain::{Criteria, EntityKind, ForeignKeys};
use proc_persistence::{FlushOptimizer, PendingOperationsView};
use std::collections::HashSet;

/// Reglas de cancelación propias del motor de procesos, aplicadas antes de
/// la cancelación genérica de pares insert/delete.
///
/// 1. Si una ejecución se borra en la transacción, los inserts pendientes
///    de instancias de actividad de esa instancia de proceso sobran: el
///    borrado en cascada las eliminaría enseguida.
/// 2. Un borrado masivo filtrado por una columna FK hacia `Execution` cuyo
///    valor es una ejecución insertada en esta misma transacción no tiene
///    nada que borrar en el store. Se descarta junto con los inserts
///    pendientes que habría alcanzado, de modo que el efecto neto no cambia.
///
/// Sólo quitan operaciones; aplicarlas dos veces no quita nada más.
#[derive(Debug, Clone)]
pub struct ProcessFlushOptimizer {
  foreign_keys: ForeignKeys,
}

impl ProcessFlushOptimizer {
  pub fn new(foreign_keys: ForeignKeys) -> Self {
    Self { foreign_keys }
  }

  fn references_execution(&self, kind: EntityKind, field: &str) -> bool {
    self.foreign_keys
        .find(kind, field)
        .is_some_and(|fk| fk.parent == EntityKind::Execution)
  }

  fn drop_activity_inserts_of_deleted_executions(&self, operations: &mut PendingOperationsView<'_>) -> usize {
    let deleted: HashSet<String> = operations.deleted(EntityKind::Execution).map(|r| r.id.clone()).collect();
    if deleted.is_empty() {
      return 0;
    }
    operations.remove_inserts_where(EntityKind::ActivityInstance, |r| {
                r.field_str("proc_inst_id").is_some_and(|p| deleted.contains(p))
              })
  }

  fn drop_bulk_deletes_of_inserted_executions(&self, operations: &mut PendingOperationsView<'_>) -> usize {
    let mut removed = 0;
    for kind in operations.kinds() {
      let targets: Vec<Criteria> = operations.bulk_deletes(kind)
                                             .iter()
                                             .filter(|op| {
                                               self.references_execution(kind, &op.criteria.field)
                                               && operations.is_inserted(EntityKind::Execution, &op.criteria.value)
                                             })
                                             .map(|op| op.criteria.clone())
                                             .collect();
      for criteria in targets {
        trace!("bulk delete {} {} = {} sin filas en el store", kind, criteria.field, criteria.value);
        removed += operations.remove_bulk_deletes_where(kind, |op| op.criteria == criteria);
        removed += operations.remove_inserts_where(kind, |r| criteria.matches(r));
      }
    }
    removed
  }
}

impl Default for ProcessFlushOptimizer {
  fn default() -> Self {
    Self::new(ForeignKeys::standard())
  }
}

impl FlushOptimizer for ProcessFlushOptimizer {
  fn name(&self) -> &str {
    "ProcessFlushOptimizer"
  }

  fn remove_unnecessary_operations(&self, operations: &mut PendingOperationsView<'_>) {
    self.drop_activity_inserts_of_deleted_executions(operations);
    self.drop_bulk_deletes_of_inserted_executions(operations);
  }
}
