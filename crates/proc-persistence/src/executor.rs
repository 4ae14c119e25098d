// executor.rs
use crate::sql::Schema;
use crate::statement::{AffectedRows, FlushStatement};
use proc_command::Result;
use proc_domain::{Criteria, EntityKind, EntityRecord};
use std::sync::Arc;

/// Ejecutor de sentencias ligado a una transacción del store. Lo abre la
/// fábrica de sesiones para cada `DbSqlSession`.
pub trait StatementExecutor: Send {
  /// Aplica una sentencia del plan de flush y devuelve las filas afectadas.
  fn execute(&mut self, statement: &FlushStatement) -> Result<AffectedRows>;

  fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>>;

  /// Filas de `kind` que cumplen `criteria` (todas si es `None`), ordenadas
  /// por id.
  fn select_list(&mut self, kind: EntityKind, criteria: Option<&Criteria>) -> Result<Vec<EntityRecord>>;

  fn commit(&mut self) -> Result<()>;

  fn rollback(&mut self) -> Result<()>;

  /// Libera la conexión. Una transacción abierta se descarta.
  fn close(&mut self) {}
}

/// Abre ejecutores sobre un store concreto.
pub trait StatementExecutorFactory: Send + Sync {
  fn open_executor(&self, schema: &Arc<Schema>) -> Result<Box<dyn StatementExecutor>>;
}
