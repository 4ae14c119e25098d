// in_memory.rs
//
// Store en memoria con transacciones por ejecutor. Aplica las mismas
// reglas que una base de datos relacional: claves foráneas declaradas,
// ids únicos y revisiones, de modo que un plan de flush mal ordenado falla
// igual que contra la base de datos.
use crate::executor::{StatementExecutor, StatementExecutorFactory};
use crate::sql::Schema;
use crate::statement::{AffectedRows, FlushOperation, FlushParameter, FlushStatement};
use log::{debug, warn};
use proc_command::{CommandError, Result};
use proc_domain::{Criteria, EntityKind, EntityRecord, ForeignKeys};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Tables = HashMap<EntityKind, BTreeMap<String, EntityRecord>>;

#[derive(Debug, Default)]
struct StoreState {
  tables: Tables,
  committed_log: Vec<FlushStatement>,
  fail_on: Option<String>,
}

/// Store compartido. Clonarlo comparte los datos.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
  state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
    self.state
        .lock()
        .map_err(|e| CommandError::Storage(format!("mutex poisoned: {:?}", e)))
  }

  pub fn get(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
    self.lock().ok().and_then(|s| s.tables.get(&kind).and_then(|t| t.get(id)).cloned())
  }

  pub fn rows(&self, kind: EntityKind) -> Vec<EntityRecord> {
    self.lock()
        .map(|s| s.tables.get(&kind).map(|t| t.values().cloned().collect()).unwrap_or_default())
        .unwrap_or_default()
  }

  pub fn count(&self, kind: EntityKind) -> usize {
    self.lock().map(|s| s.tables.get(&kind).map(|t| t.len()).unwrap_or(0)).unwrap_or(0)
  }

  pub fn total_rows(&self) -> usize {
    self.lock().map(|s| s.tables.values().map(|t| t.len()).sum()).unwrap_or(0)
  }

  /// Sentencias confirmadas, en orden de ejecución.
  pub fn executed_statements(&self) -> Vec<FlushStatement> {
    self.lock().map(|s| s.committed_log.clone()).unwrap_or_default()
  }

  pub fn clear_log(&self) {
    if let Ok(mut s) = self.lock() {
      s.committed_log.clear();
    }
  }

  /// La próxima sentencia con ese identificador falla con error de store.
  pub fn fail_on_statement(&self, statement: &str) {
    if let Ok(mut s) = self.lock() {
      s.fail_on = Some(statement.to_string());
    }
  }
}

/// Ejecutor de una transacción sobre `InMemoryStore`. Trabaja sobre una
/// copia que reemplaza a los datos compartidos al confirmar.
pub struct InMemoryStatementExecutor {
  store: InMemoryStore,
  foreign_keys: ForeignKeys,
  working: Option<Tables>,
  executed: Vec<FlushStatement>,
}

impl InMemoryStatementExecutor {
  pub fn new(store: InMemoryStore, foreign_keys: ForeignKeys) -> Self {
    Self { store,
           foreign_keys,
           working: None,
           executed: Vec::new() }
  }

  fn working(&mut self) -> Result<&mut Tables> {
    if self.working.is_none() {
      let snapshot = self.store.lock()?.tables.clone();
      self.working = Some(snapshot);
    }
    self.working
        .as_mut()
        .ok_or_else(|| CommandError::IllegalState("copia de trabajo no disponible".to_string()))
  }

  fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
    match &self.working {
      Some(tables) => Ok(f(tables)),
      None => Ok(f(&self.store.lock()?.tables)),
    }
  }
}

fn check_parents(tables: &Tables, foreign_keys: &ForeignKeys, record: &EntityRecord) -> Result<()> {
  for fk in foreign_keys.declared_on(record.kind) {
    if let Some(parent_id) = record.field_str(fk.field) {
      if fk.parent == record.kind && parent_id == record.id {
        continue;
      }
      let exists = tables.get(&fk.parent).is_some_and(|t| t.contains_key(parent_id));
      if !exists {
        return Err(CommandError::Storage(format!("violación de clave foránea: {}.{} = {} no existe en {}",
                                                 record.kind, fk.field, parent_id, fk.parent)));
      }
    }
  }
  Ok(())
}

fn check_no_children(tables: &Tables, foreign_keys: &ForeignKeys, kind: EntityKind, id: &str) -> Result<()> {
  for fk in foreign_keys.referencing(kind) {
    let referenced = tables.get(&fk.child)
                           .is_some_and(|t| t.values().any(|r| r.field_str(fk.field) == Some(id)));
    if referenced {
      return Err(CommandError::Storage(format!("violación de clave foránea: {} {} referenciado por {}.{}",
                                               kind, id, fk.child, fk.field)));
    }
  }
  Ok(())
}

/// Aplica `statement` sobre `tables` con las mismas reglas que la base de
/// datos.
fn apply(tables: &mut Tables, foreign_keys: &ForeignKeys, statement: &FlushStatement) -> Result<AffectedRows> {
  let kind = statement.kind;
  match (&statement.operation, &statement.parameter) {
    (FlushOperation::Insert, FlushParameter::Entity(r)) => apply_inserts(tables, foreign_keys, std::slice::from_ref(r)),
    (FlushOperation::BulkInsert, FlushParameter::Entities(rs)) => apply_inserts(tables, foreign_keys, rs),
    (FlushOperation::Update, FlushParameter::Entity(r)) => {
      let Some(current) = tables.get(&kind).and_then(|t| t.get(&r.id)) else {
        return Ok(0);
      };
      if kind.has_revision() && current.revision != r.revision {
        return Ok(0);
      }
      let mut next = r.clone();
      if kind.has_revision() {
        next.revision = r.revision_next();
      }
      check_parents(tables, foreign_keys, &next)?;
      tables.entry(kind).or_default().insert(next.id.clone(), next);
      Ok(1)
    }
    (FlushOperation::Delete, FlushParameter::Entity(r)) => {
      let Some(current) = tables.get(&kind).and_then(|t| t.get(&r.id)) else {
        return Ok(0);
      };
      if kind.has_revision() && current.revision != r.revision {
        return Ok(0);
      }
      if let Some(t) = tables.get_mut(&kind) {
        t.remove(&r.id);
      }
      check_no_children(tables, foreign_keys, kind, &r.id)?;
      Ok(1)
    }
    (FlushOperation::BulkDelete, FlushParameter::Criteria(c)) => {
      let ids: Vec<String> = tables.get(&kind)
                                   .map(|t| t.values().filter(|r| c.matches(r)).map(|r| r.id.clone()).collect())
                                   .unwrap_or_default();
      if let Some(t) = tables.get_mut(&kind) {
        for id in &ids {
          t.remove(id);
        }
      }
      for id in &ids {
        check_no_children(tables, foreign_keys, kind, id)?;
      }
      Ok(ids.len())
    }
    (op, _) => Err(CommandError::IllegalArgument(format!("parámetro incompatible con {} en {}", op, statement.statement))),
  }
}

fn apply_inserts(tables: &mut Tables, foreign_keys: &ForeignKeys, records: &[EntityRecord]) -> Result<AffectedRows> {
  for r in records {
    if tables.get(&r.kind).is_some_and(|t| t.contains_key(&r.id)) {
      return Err(CommandError::Storage(format!("clave duplicada: {} {}", r.kind, r.id)));
    }
    tables.entry(r.kind).or_default().insert(r.id.clone(), r.clone());
  }
  // las claves se comprueban al final de la sentencia, como en SQL
  for r in records {
    check_parents(tables, foreign_keys, r)?;
  }
  Ok(records.len())
}

impl StatementExecutor for InMemoryStatementExecutor {
  fn execute(&mut self, statement: &FlushStatement) -> Result<AffectedRows> {
    {
      let mut state = self.store.lock()?;
      if state.fail_on.as_deref() == Some(statement.statement.as_str()) {
        state.fail_on = None;
        return Err(CommandError::Storage(format!("fallo inyectado en {}", statement.statement)));
      }
    }
    let foreign_keys = self.foreign_keys.clone();
    let tables = self.working()?;
    // una sentencia fallida no deja efectos parciales
    let mut attempt = tables.clone();
    let affected = apply(&mut attempt, &foreign_keys, statement)?;
    *tables = attempt;
    self.executed.push(statement.clone());
    Ok(affected)
  }

  fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
    self.read(|t| t.get(&kind).and_then(|rows| rows.get(id)).cloned())
  }

  fn select_list(&mut self, kind: EntityKind, criteria: Option<&Criteria>) -> Result<Vec<EntityRecord>> {
    self.read(|t| {
          t.get(&kind)
           .map(|rows| rows.values().filter(|r| criteria.map_or(true, |c| c.matches(r))).cloned().collect())
           .unwrap_or_default()
        })
  }

  fn commit(&mut self) -> Result<()> {
    if self.executed.is_empty() {
      self.working = None;
      return Ok(());
    }
    let mut state = self.store.lock()?;
    // se reaplica sobre el estado actual para detectar escrituras
    // concurrentes confirmadas después de la copia
    let mut merged = state.tables.clone();
    for statement in &self.executed {
      let affected = apply(&mut merged, &self.foreign_keys, statement)?;
      let guarded = matches!(statement.operation, FlushOperation::Update | FlushOperation::Delete);
      if guarded && affected == 0 && statement.kind.has_revision() {
        warn!("conflicto al confirmar {}", statement);
        return Err(CommandError::OptimisticLocking(format!("{} modificado por otra transacción", statement)));
      }
    }
    state.tables = merged;
    state.committed_log.extend(self.executed.drain(..));
    self.working = None;
    debug!("transacción en memoria confirmada");
    Ok(())
  }

  fn rollback(&mut self) -> Result<()> {
    self.working = None;
    self.executed.clear();
    Ok(())
  }

  fn close(&mut self) {
    if !self.executed.is_empty() {
      debug!("cerrando ejecutor en memoria con {} sentencias sin confirmar", self.executed.len());
    }
    self.working = None;
    self.executed.clear();
  }
}

/// Fábrica de ejecutores en memoria sobre un store compartido.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutorFactory {
  store: InMemoryStore,
}

impl InMemoryExecutorFactory {
  pub fn new(store: InMemoryStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &InMemoryStore {
    &self.store
  }
}

impl StatementExecutorFactory for InMemoryExecutorFactory {
  fn open_executor(&self, schema: &Arc<Schema>) -> Result<Box<dyn StatementExecutor>> {
    Ok(Box::new(InMemoryStatementExecutor::new(self.store.clone(), schema.foreign_keys.clone())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proc_domain::Criteria;

  fn stmt(kind: EntityKind, operation: FlushOperation, parameter: FlushParameter) -> FlushStatement {
    FlushStatement { statement: format!("{}{}", operation, kind), kind, operation, parameter }
  }

  fn exec_row(id: &str) -> EntityRecord {
    let mut r = EntityRecord::with_id(EntityKind::Execution, id);
    r.revision = 1;
    r
  }

  fn task_row(id: &str, execution: &str) -> EntityRecord {
    let mut r = EntityRecord::with_id(EntityKind::Task, id).with_field("execution_id", execution);
    r.revision = 1;
    r
  }

  #[test]
  fn foreign_keys_are_enforced() {
    let store = InMemoryStore::new();
    let mut ex = InMemoryStatementExecutor::new(store.clone(), ForeignKeys::standard());
    let orphan = stmt(EntityKind::Task, FlushOperation::Insert, FlushParameter::Entity(task_row("t1", "e1")));
    assert!(matches!(ex.execute(&orphan), Err(CommandError::Storage(_))));

    ex.execute(&stmt(EntityKind::Execution, FlushOperation::Insert, FlushParameter::Entity(exec_row("e1"))))
      .unwrap();
    ex.execute(&orphan).unwrap();
    let parent_delete = stmt(EntityKind::Execution, FlushOperation::Delete, FlushParameter::Entity(exec_row("e1")));
    assert!(ex.execute(&parent_delete).is_err());
    // el fallo no dejó efectos
    assert!(ex.select_by_id(EntityKind::Execution, "e1").unwrap().is_some());
  }

  #[test]
  fn commit_publishes_and_rollback_discards() {
    let store = InMemoryStore::new();
    let mut ex = InMemoryStatementExecutor::new(store.clone(), ForeignKeys::standard());
    ex.execute(&stmt(EntityKind::Execution, FlushOperation::Insert, FlushParameter::Entity(exec_row("e1"))))
      .unwrap();
    assert_eq!(store.count(EntityKind::Execution), 0);
    ex.commit().unwrap();
    assert_eq!(store.count(EntityKind::Execution), 1);
    assert_eq!(store.executed_statements().len(), 1);

    ex.execute(&stmt(EntityKind::Execution, FlushOperation::Insert, FlushParameter::Entity(exec_row("e2"))))
      .unwrap();
    ex.rollback().unwrap();
    assert_eq!(store.count(EntityKind::Execution), 1);
  }

  #[test]
  fn stale_revision_matches_no_rows() {
    let store = InMemoryStore::new();
    let mut ex = InMemoryStatementExecutor::new(store.clone(), ForeignKeys::standard());
    ex.execute(&stmt(EntityKind::Execution, FlushOperation::Insert, FlushParameter::Entity(exec_row("e1"))))
      .unwrap();
    let mut stale = exec_row("e1");
    stale.revision = 5;
    assert_eq!(ex.execute(&stmt(EntityKind::Execution, FlushOperation::Update, FlushParameter::Entity(stale)))
                 .unwrap(),
               0);
    assert_eq!(ex.execute(&stmt(EntityKind::Execution, FlushOperation::Update, FlushParameter::Entity(exec_row("e1"))))
                 .unwrap(),
               1);
    assert_eq!(ex.select_by_id(EntityKind::Execution, "e1").unwrap().unwrap().revision, 2);
  }

  #[test]
  fn bulk_delete_by_criteria() {
    let store = InMemoryStore::new();
    let mut ex = InMemoryStatementExecutor::new(store, ForeignKeys::standard());
    ex.execute(&stmt(EntityKind::Execution, FlushOperation::Insert, FlushParameter::Entity(exec_row("e1"))))
      .unwrap();
    ex.execute(&stmt(EntityKind::Task,
                     FlushOperation::BulkInsert,
                     FlushParameter::Entities(vec![task_row("t1", "e1"), task_row("t2", "e1")])))
      .unwrap();
    let removed = ex.execute(&stmt(EntityKind::Task,
                                   FlushOperation::BulkDelete,
                                   FlushParameter::Criteria(Criteria::field_equals("execution_id", "e1"))))
                    .unwrap();
    assert_eq!(removed, 2);
    assert!(ex.select_list(EntityKind::Task, None).unwrap().is_empty());
  }
}
