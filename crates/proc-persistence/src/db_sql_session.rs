// db_sql_session.rs
//
// Sesión de persistencia por transacción. Acumula las operaciones que
// registran los gestores de entidades y, en el flush, produce la lista
// mínima de escrituras ordenada según `EntityDependencyOrder`:
//
//   1. eliminación de operaciones innecesarias (optimizadores + pares
//      insert/delete del mismo id)
//   2. inserts por tipo en INSERT_ORDER, agrupados en lotes cuando el tipo
//      lo admite
//   3. updates de las entidades de la cache que cambiaron
//   4. deletes por tipo en DELETE_ORDER: primero por id, luego masivos
//
// El flush ocurre una única vez por transacción.
use crate::cache::EntityCache;
use crate::executor::StatementExecutor;
use crate::factory::DbSqlSessionFactory;
use crate::pending::{BulkDeleteOperation, PendingOperations, PendingOperationsView};
use crate::statement::{FlushOperation, FlushParameter, FlushStatement};
use log::{debug, error, trace, warn};
use proc_command::{CommandError, Result, Session};
use proc_domain::{Criteria, EntityKind, EntityRecord};
use serde_json::{Map, Value as JsonValue};
use std::any::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Active,
  Flushed,
  Closed,
}

/// Resumen de las operaciones pendientes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingSummary {
  pub inserts: usize,
  pub updates: usize,
  pub deletes: usize,
  pub bulk_deletes: usize,
}

pub struct DbSqlSession {
  factory: DbSqlSessionFactory,
  executor: Box<dyn StatementExecutor>,
  cache: EntityCache,
  pending: PendingOperations,
  state: SessionState,
  flushed: Vec<FlushStatement>,
}

impl DbSqlSession {
  pub fn new(factory: DbSqlSessionFactory, executor: Box<dyn StatementExecutor>) -> Self {
    Self { factory,
           executor,
           cache: EntityCache::new(),
           pending: PendingOperations::new(),
           state: SessionState::Active,
           flushed: Vec::new() }
  }

  pub fn factory(&self) -> &DbSqlSessionFactory {
    &self.factory
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  /// Sentencias ejecutadas por el flush, en orden.
  pub fn flushed_statements(&self) -> &[FlushStatement] {
    &self.flushed
  }

  fn ensure_active(&self, operation: &str) -> Result<()> {
    match self.state {
      SessionState::Active => Ok(()),
      SessionState::Flushed => Err(CommandError::IllegalState(format!("{} tras el flush de la sesión", operation))),
      SessionState::Closed => Err(CommandError::IllegalState(format!("{} sobre una sesión cerrada", operation))),
    }
  }

  fn ensure_open(&self, operation: &str) -> Result<()> {
    if self.state == SessionState::Closed {
      return Err(CommandError::IllegalState(format!("{} sobre una sesión cerrada", operation)));
    }
    Ok(())
  }

  fn hidden_by_bulk_delete(&self, record: &EntityRecord) -> bool {
    self.pending.bulk_deletes(record.kind).iter().any(|op| op.criteria.matches(record))
  }

  // -- registro de operaciones ---------------------------------------------

  /// Registra una entidad nueva. Asigna id si falta y revisión 1 si no
  /// tiene. Devuelve el id.
  pub fn insert(&mut self, mut record: EntityRecord) -> Result<String> {
    self.ensure_active("insert")?;
    if record.id.is_empty() {
      record.id = self.factory.id_generator().next_id();
    }
    if record.revision == 0 {
      record.revision = 1;
    }
    if self.pending.is_inserted(record.kind, &record.id) || self.cache.contains(record.kind, &record.id) {
      return Err(CommandError::IllegalArgument(format!("{} {} ya existe en la sesión", record.kind, record.id)));
    }
    if self.pending.is_deleted(record.kind, &record.id) {
      return Err(CommandError::IllegalArgument(format!("{} {} fue borrado en esta transacción", record.kind, record.id)));
    }
    let id = record.id.clone();
    trace!("insert {} {}", record.kind, id);
    self.pending.add_insert(record);
    Ok(id)
  }

  /// Reemplaza el estado de una entidad. Si no cambió nada respecto a lo
  /// cargado no se emitirá UPDATE.
  pub fn update(&mut self, record: EntityRecord) -> Result<()> {
    self.ensure_active("update")?;
    if self.pending.is_deleted(record.kind, &record.id) {
      debug!("update de {} {} ignorado: borrado en esta transacción", record.kind, record.id);
      return Ok(());
    }
    if let Some(inserted) = self.pending.inserted_mut(record.kind, &record.id) {
      let revision = inserted.revision;
      *inserted = record;
      inserted.revision = revision;
      return Ok(());
    }
    if !self.cache.contains(record.kind, &record.id) && self.load(record.kind, &record.id)?.is_none() {
      return Err(CommandError::NotFound(format!("{} {}", record.kind, record.id)));
    }
    if let Some(cached) = self.cache.get_mut(record.kind, &record.id) {
      let revision = cached.revision;
      *cached = record;
      cached.revision = revision;
    }
    Ok(())
  }

  pub fn delete(&mut self, record: &EntityRecord) -> Result<()> {
    self.delete_by_id(record.kind, &record.id)
  }

  /// Registra el borrado de una entidad. Si fue insertada en esta misma
  /// transacción ambas operaciones se cancelan en el flush.
  pub fn delete_by_id(&mut self, kind: EntityKind, id: &str) -> Result<()> {
    self.ensure_active("delete")?;
    if self.pending.is_deleted(kind, id) {
      return Ok(());
    }
    let current = match self.pending.get_inserted(kind, id) {
      Some(r) => r.clone(),
      None => match self.cache.get(kind, id) {
        Some(r) => r.clone(),
        None => self.load(kind, id)?
                    .ok_or_else(|| CommandError::NotFound(format!("{} {}", kind, id)))?,
      },
    };
    trace!("delete {} {}", kind, id);
    self.pending.add_delete(current);
    Ok(())
  }

  /// Borrado masivo con la sentencia por defecto del tipo.
  pub fn bulk_delete(&mut self, kind: EntityKind, criteria: Criteria) -> Result<()> {
    let statement = self.factory.bulk_delete_statement(kind);
    self.bulk_delete_named(statement, kind, criteria)
  }

  pub fn bulk_delete_named(&mut self, statement: impl Into<String>, kind: EntityKind, criteria: Criteria) -> Result<()> {
    self.ensure_active("bulk delete")?;
    let statement = statement.into();
    trace!("{} {} = {}", statement, criteria.field, criteria.value);
    self.pending.add_bulk_delete(BulkDeleteOperation { statement, kind, criteria });
    Ok(())
  }

  // -- lecturas ------------------------------------------------------------

  fn load(&mut self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
    match self.executor.select_by_id(kind, id)? {
      Some(row) => Ok(Some(self.cache.put(row).clone())),
      None => Ok(None),
    }
  }

  /// Busca por id viendo primero lo registrado en la transacción.
  pub fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
    self.ensure_open("select")?;
    if self.pending.is_deleted(kind, id) {
      return Ok(None);
    }
    let found = if let Some(r) = self.pending.get_inserted(kind, id) {
      Some(r.clone())
    } else if let Some(r) = self.cache.get(kind, id) {
      Some(r.clone())
    } else {
      self.load(kind, id)?
    };
    Ok(found.filter(|r| !self.hidden_by_bulk_delete(r)))
  }

  /// Campos mutables de una entidad de la transacción; los cambios se
  /// detectan en el flush. Id, tipo y revisión quedan fuera de alcance.
  pub fn entity_mut(&mut self, kind: EntityKind, id: &str) -> Result<Option<&mut Map<String, JsonValue>>> {
    self.ensure_active("entity_mut")?;
    if self.select_by_id(kind, id)?.is_none() {
      return Ok(None);
    }
    let record = if self.pending.is_inserted(kind, id) {
      self.pending.inserted_mut(kind, id)
    } else {
      self.cache.get_mut(kind, id)
    };
    Ok(record.map(|r| &mut r.fields))
  }

  /// Filas del store combinadas con el estado de la transacción: versiones
  /// en cache, inserts pendientes y sin los borrados pendientes.
  pub fn select_list(&mut self, kind: EntityKind, criteria: Option<&Criteria>) -> Result<Vec<EntityRecord>> {
    self.ensure_open("select")?;
    let matches = |r: &EntityRecord| criteria.map_or(true, |c| c.matches(r));
    let rows = self.executor.select_list(kind, criteria)?;
    let mut out: Vec<EntityRecord> = Vec::with_capacity(rows.len());
    for row in rows {
      let current = match self.cache.get(kind, &row.id) {
        Some(cached) => cached.clone(),
        None => self.cache.put(row).clone(),
      };
      if matches(&current) {
        out.push(current);
      }
    }
    if let Some(c) = criteria {
      // entidades en cache que ahora cumplen el filtro aunque el store aún no
      let extra: Vec<EntityRecord> = self.cache
                                         .find_by(kind, c)
                                         .into_iter()
                                         .filter(|r| !out.iter().any(|o| o.id == r.id))
                                         .cloned()
                                         .collect();
      out.extend(extra);
    }
    let inserted: Vec<EntityRecord> = self.pending
                                          .inserted(kind)
                                          .filter(|r| matches(r) && !out.iter().any(|o| o.id == r.id))
                                          .cloned()
                                          .collect();
    out.extend(inserted);
    out.retain(|r| !self.pending.is_deleted(kind, &r.id) && !self.hidden_by_bulk_delete(r));
    Ok(out)
  }

  pub fn pending_summary(&self) -> PendingSummary {
    PendingSummary { inserts: self.pending.insert_count(),
                     updates: self.cache
                                  .dirty_entries()
                                  .iter()
                                  .filter(|r| !self.pending.is_deleted(r.kind, &r.id))
                                  .count(),
                     deletes: self.pending.delete_count(),
                     bulk_deletes: self.pending.bulk_delete_count() }
  }

  // -- flush ---------------------------------------------------------------

  /// Traduce las operaciones pendientes en escrituras. Sólo puede llamarse
  /// una vez; cualquier fallo aborta el resto del plan.
  pub fn flush(&mut self) -> Result<()> {
    self.ensure_active("flush")?;
    self.state = SessionState::Flushed;

    self.remove_unnecessary_operations();
    let plan = self.build_flush_plan()?;
    if plan.is_empty() {
      debug!("flush sin operaciones");
      return Ok(());
    }
    debug!("flush: {} sentencias ({} inserts, {} updates, {} deletes)",
           plan.len(),
           plan.iter().filter(|s| matches!(s.operation, FlushOperation::Insert | FlushOperation::BulkInsert)).count(),
           plan.iter().filter(|s| s.operation == FlushOperation::Update).count(),
           plan.iter().filter(|s| matches!(s.operation, FlushOperation::Delete | FlushOperation::BulkDelete)).count());

    for statement in &plan {
      trace!("{}", statement);
      let affected = self.executor.execute(statement).inspect_err(|e| error!("{} falló: {}", statement, e))?;
      let guarded = matches!(statement.operation, FlushOperation::Update | FlushOperation::Delete);
      if guarded && affected == 0 && statement.kind.has_revision() {
        warn!("bloqueo optimista en {}", statement);
        return Err(CommandError::OptimisticLocking(format!("{} fue modificado o borrado por otra transacción",
                                                           statement)));
      }
      self.after_statement(statement);
    }
    self.flushed = plan;
    Ok(())
  }

  fn after_statement(&mut self, statement: &FlushStatement) {
    match (&statement.operation, &statement.parameter) {
      (FlushOperation::Update, FlushParameter::Entity(r)) => {
        let revision = if r.kind.has_revision() { r.revision_next() } else { r.revision };
        self.cache.mark_flushed(r.kind, &r.id, revision);
      }
      (FlushOperation::Insert, FlushParameter::Entity(r)) => {
        self.cache.put(r.clone());
      }
      (FlushOperation::BulkInsert, FlushParameter::Entities(rs)) => {
        for r in rs {
          self.cache.put(r.clone());
        }
      }
      (FlushOperation::Delete, FlushParameter::Entity(r)) => {
        self.cache.remove(r.kind, &r.id);
      }
      _ => {}
    }
  }

  /// Punto de extensión: primero las reglas de los optimizadores
  /// registrados, después la cancelación genérica de pares insert/delete.
  fn remove_unnecessary_operations(&mut self) {
    for optimizer in self.factory.optimizers() {
      let mut view = PendingOperationsView::new(&mut self.pending);
      optimizer.remove_unnecessary_operations(&mut view);
      if view.removed() > 0 {
        debug!("{} eliminó {} operaciones", optimizer.name(), view.removed());
      }
    }
    let pairs = self.pending.cancel_insert_delete_pairs();
    if pairs > 0 {
      debug!("{} pares insert/delete cancelados", pairs);
    }
  }

  fn build_flush_plan(&mut self) -> Result<Vec<FlushStatement>> {
    let factory = self.factory.clone();
    let order = factory.dependency_order();
    let max = factory.max_nr_of_statements_in_bulk_insert();
    let mut plan = Vec::new();

    for kind in order.insert_order() {
      let records = self.pending.take_inserted(*kind);
      if records.is_empty() {
        continue;
      }
      if records.len() > 1 && factory.is_bulk_insertable(*kind) {
        let statement = factory.bulk_insert_statement(*kind);
        for chunk in records.chunks(max) {
          plan.push(FlushStatement { statement: statement.clone(),
                                     kind: *kind,
                                     operation: FlushOperation::BulkInsert,
                                     parameter: FlushParameter::Entities(chunk.to_vec()) });
        }
      } else {
        let statement = factory.insert_statement(*kind);
        plan.extend(records.into_iter().map(|r| FlushStatement { statement: statement.clone(),
                                                                 kind: *kind,
                                                                 operation: FlushOperation::Insert,
                                                                 parameter: FlushParameter::Entity(r) }));
      }
    }

    let updates: Vec<EntityRecord> = self.cache
                                         .dirty_entries()
                                         .into_iter()
                                         .filter(|r| !self.pending.is_deleted(r.kind, &r.id) && !self.hidden_by_bulk_delete(r))
                                         .cloned()
                                         .collect();
    for record in updates {
      plan.push(FlushStatement { statement: factory.update_statement(record.kind),
                                 kind: record.kind,
                                 operation: FlushOperation::Update,
                                 parameter: FlushParameter::Entity(record) });
    }

    for kind in order.delete_order() {
      let statement = factory.delete_statement(*kind);
      plan.extend(self.pending
                      .take_deleted(*kind)
                      .into_iter()
                      .map(|r| FlushStatement { statement: statement.clone(),
                                                kind: *kind,
                                                operation: FlushOperation::Delete,
                                                parameter: FlushParameter::Entity(r) }));
      plan.extend(self.pending
                      .take_bulk_deletes(*kind)
                      .into_iter()
                      .map(|op| FlushStatement { statement: op.statement,
                                                 kind: op.kind,
                                                 operation: FlushOperation::BulkDelete,
                                                 parameter: FlushParameter::Criteria(op.criteria) }));
    }

    if !self.pending.is_empty() {
      let left: Vec<String> = self.pending.kinds().iter().map(|k| k.to_string()).collect();
      return Err(CommandError::IllegalState(format!("tipos sin posición en el orden de dependencias: {}",
                                                    left.join(", "))));
    }
    Ok(plan)
  }

  // -- transacción ---------------------------------------------------------

  pub fn commit(&mut self) -> Result<()> {
    self.ensure_open("commit")?;
    self.executor.commit()
  }

  /// Descarta todo lo pendiente y revierte la transacción del store.
  pub fn rollback(&mut self) -> Result<()> {
    self.ensure_open("rollback")?;
    self.pending.clear();
    self.cache.clear();
    self.executor.rollback()
  }

  pub fn close(&mut self) {
    if self.state == SessionState::Closed {
      return;
    }
    self.executor.close();
    self.pending.clear();
    self.cache.clear();
    self.state = SessionState::Closed;
  }
}

impl Session for DbSqlSession {
  fn flush(&mut self) -> Result<()> {
    DbSqlSession::flush(self)
  }

  fn close(&mut self) {
    DbSqlSession::close(self)
  }

  fn commit(&mut self) -> Result<()> {
    DbSqlSession::commit(self)
  }

  fn rollback(&mut self) -> Result<()> {
    DbSqlSession::rollback(self)
  }

  fn as_any_mut(&mut self) -> &mut dyn Any {
    self
  }
}
