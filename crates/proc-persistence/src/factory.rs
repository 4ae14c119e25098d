// factory.rs
use crate::db_sql_session::DbSqlSession;
use crate::dialect::DatabaseDialect;
use crate::executor::StatementExecutorFactory;
use crate::id_generator::{IdGenerator, UuidIdGenerator};
use crate::in_memory::InMemoryExecutorFactory;
use crate::pending::FlushOptimizer;
use crate::sql::Schema;
use dashmap::DashMap;
use log::{debug, info};
use proc_command::{CommandError, Result, Session, SessionFactory};
use proc_domain::{EntityDependencyOrder, EntityKind, ForeignKeys};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_MAX_NR_OF_STATEMENTS_IN_BULK_INSERT: usize = 100;

/// Configuración de lotes y sentencias compartida por todas las sesiones de
/// un motor. Se obtiene de `DbSqlSessionFactoryBuilder` y no cambia después:
/// sólo las caches de identificadores de sentencia se rellenan bajo demanda.
#[derive(Clone)]
pub struct DbSqlSessionFactory {
  inner: Arc<FactoryInner>,
}

struct FactoryInner {
  schema: Arc<Schema>,
  dependency_order: EntityDependencyOrder,
  bulk_insertable: HashMap<EntityKind, bool>,
  max_nr_of_statements_in_bulk_insert: usize,
  database_specific_statements: HashMap<String, String>,
  insert_statements: DashMap<EntityKind, String>,
  bulk_insert_statements: DashMap<EntityKind, String>,
  update_statements: DashMap<EntityKind, String>,
  delete_statements: DashMap<EntityKind, String>,
  bulk_delete_statements: DashMap<EntityKind, String>,
  id_generator: Arc<dyn IdGenerator>,
  optimizers: Vec<Arc<dyn FlushOptimizer>>,
  executor_factory: Arc<dyn StatementExecutorFactory>,
}

impl DbSqlSessionFactory {
  pub fn builder(dialect: DatabaseDialect) -> DbSqlSessionFactoryBuilder {
    DbSqlSessionFactoryBuilder::new(dialect)
  }

  pub fn dialect(&self) -> DatabaseDialect {
    self.inner.schema.dialect
  }

  pub fn schema(&self) -> &Arc<Schema> {
    &self.inner.schema
  }

  pub fn foreign_keys(&self) -> &ForeignKeys {
    &self.inner.schema.foreign_keys
  }

  pub fn dependency_order(&self) -> &EntityDependencyOrder {
    &self.inner.dependency_order
  }

  pub fn max_nr_of_statements_in_bulk_insert(&self) -> usize {
    self.inner.max_nr_of_statements_in_bulk_insert
  }

  pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
    &self.inner.id_generator
  }

  pub fn optimizers(&self) -> &[Arc<dyn FlushOptimizer>] {
    &self.inner.optimizers
  }

  pub fn is_bulk_insertable(&self, kind: EntityKind) -> bool {
    self.inner.bulk_insertable.get(&kind).copied().unwrap_or(false)
  }

  /// Identificador final de una sentencia, aplicando la variante específica
  /// del dialecto si existe.
  pub fn statement(&self, statement: &str) -> String {
    self.inner
        .database_specific_statements
        .get(statement)
        .cloned()
        .unwrap_or_else(|| statement.to_string())
  }

  fn memoized(&self, cache: &DashMap<EntityKind, String>, prefix: &str, kind: EntityKind) -> String {
    cache.entry(kind)
         .or_insert_with(|| self.statement(&format!("{}{}", prefix, kind.name())))
         .value()
         .clone()
  }

  pub fn insert_statement(&self, kind: EntityKind) -> String {
    self.memoized(&self.inner.insert_statements, "insert", kind)
  }

  pub fn bulk_insert_statement(&self, kind: EntityKind) -> String {
    self.memoized(&self.inner.bulk_insert_statements, "bulkInsert", kind)
  }

  pub fn update_statement(&self, kind: EntityKind) -> String {
    self.memoized(&self.inner.update_statements, "update", kind)
  }

  pub fn delete_statement(&self, kind: EntityKind) -> String {
    self.memoized(&self.inner.delete_statements, "delete", kind)
  }

  pub fn bulk_delete_statement(&self, kind: EntityKind) -> String {
    self.memoized(&self.inner.bulk_delete_statements, "bulkDelete", kind)
  }

  /// Abre una sesión con su propio ejecutor (transacción).
  pub fn open_db_session(&self) -> Result<DbSqlSession> {
    let executor = self.inner.executor_factory.open_executor(&self.inner.schema)?;
    Ok(DbSqlSession::new(self.clone(), executor))
  }
}

impl SessionFactory for DbSqlSessionFactory {
  fn session_type(&self) -> TypeId {
    TypeId::of::<DbSqlSession>()
  }

  fn open_session(&self) -> Result<Box<dyn Session>> {
    Ok(Box::new(self.open_db_session()?))
  }
}

impl std::fmt::Debug for DbSqlSessionFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DbSqlSessionFactory")
     .field("dialect", &self.dialect())
     .field("table_prefix", &self.inner.schema.table_prefix)
     .field("max_nr_of_statements_in_bulk_insert", &self.inner.max_nr_of_statements_in_bulk_insert)
     .field("optimizers", &self.inner.optimizers.iter().map(|o| o.name().to_string()).collect::<Vec<_>>())
     .finish()
  }
}

/// Constructor de `DbSqlSessionFactory`. Valida el orden de dependencias
/// contra las claves foráneas declaradas antes de producir la fábrica.
pub struct DbSqlSessionFactoryBuilder {
  dialect: DatabaseDialect,
  dependency_order: EntityDependencyOrder,
  foreign_keys: ForeignKeys,
  bulk_insert_exclusions: HashMap<DatabaseDialect, HashSet<EntityKind>>,
  bulk_insertable_overrides: HashMap<EntityKind, bool>,
  max_nr_of_statements_in_bulk_insert: usize,
  database_specific_statements: HashMap<(DatabaseDialect, String), String>,
  table_prefix: String,
  id_generator: Arc<dyn IdGenerator>,
  optimizers: Vec<Arc<dyn FlushOptimizer>>,
  executor_factory: Option<Arc<dyn StatementExecutorFactory>>,
  validate_order: bool,
}

impl DbSqlSessionFactoryBuilder {
  pub fn new(dialect: DatabaseDialect) -> Self {
    let mut bulk_insert_exclusions: HashMap<DatabaseDialect, HashSet<EntityKind>> = HashMap::new();
    // el driver de Oracle no liga bien columnas de texto largo en inserts
    // multi-fila
    bulk_insert_exclusions.insert(DatabaseDialect::Oracle,
                                  [EntityKind::EventLogEntry, EntityKind::HistoricTaskLogEntry].into_iter().collect());
    let database_specific_statements = EntityKind::all().iter()
                                                        .map(|k| {
                                                          let base = format!("bulkInsert{}", k.name());
                                                          ((DatabaseDialect::Oracle, base.clone()), format!("{}_oracle", base))
                                                        })
                                                        .collect();
    Self { dialect,
           dependency_order: EntityDependencyOrder::standard(),
           foreign_keys: ForeignKeys::standard(),
           bulk_insert_exclusions,
           bulk_insertable_overrides: HashMap::new(),
           max_nr_of_statements_in_bulk_insert: DEFAULT_MAX_NR_OF_STATEMENTS_IN_BULK_INSERT,
           database_specific_statements,
           table_prefix: String::new(),
           id_generator: Arc::new(UuidIdGenerator),
           optimizers: Vec::new(),
           executor_factory: None,
           validate_order: true }
  }

  pub fn dependency_order(mut self, order: EntityDependencyOrder) -> Self {
    self.dependency_order = order;
    self
  }

  pub fn foreign_keys(mut self, foreign_keys: ForeignKeys) -> Self {
    self.foreign_keys = foreign_keys;
    self
  }

  /// Excluye `kind` de la inserción masiva cuando el dialecto es `dialect`.
  pub fn exclude_from_bulk_insert(mut self, dialect: DatabaseDialect, kind: EntityKind) -> Self {
    self.bulk_insert_exclusions.entry(dialect).or_default().insert(kind);
    self
  }

  /// Fuerza el valor para `kind` con independencia del dialecto.
  pub fn bulk_insertable(mut self, kind: EntityKind, insertable: bool) -> Self {
    self.bulk_insertable_overrides.insert(kind, insertable);
    self
  }

  pub fn max_nr_of_statements_in_bulk_insert(mut self, max: usize) -> Self {
    self.max_nr_of_statements_in_bulk_insert = max;
    self
  }

  pub fn database_specific_statement(mut self,
                                     dialect: DatabaseDialect,
                                     statement: impl Into<String>,
                                     replacement: impl Into<String>)
                                     -> Self {
    self.database_specific_statements.insert((dialect, statement.into()), replacement.into());
    self
  }

  pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.table_prefix = prefix.into();
    self
  }

  pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
    self.id_generator = generator;
    self
  }

  pub fn flush_optimizer(mut self, optimizer: Arc<dyn FlushOptimizer>) -> Self {
    self.optimizers.push(optimizer);
    self
  }

  pub fn executor_factory(mut self, factory: Arc<dyn StatementExecutorFactory>) -> Self {
    self.executor_factory = Some(factory);
    self
  }

  /// Omite la comprobación del orden contra las claves foráneas. Sólo para
  /// reproducir configuraciones heredadas en pruebas.
  pub fn skip_order_validation(mut self) -> Self {
    self.validate_order = false;
    self
  }

  pub fn build(self) -> Result<DbSqlSessionFactory> {
    if self.max_nr_of_statements_in_bulk_insert == 0 {
      return Err(CommandError::IllegalArgument("max_nr_of_statements_in_bulk_insert debe ser mayor que 0".to_string()));
    }
    if self.validate_order {
      self.dependency_order.validate(&self.foreign_keys)?;
    }

    let excluded = self.bulk_insert_exclusions.get(&self.dialect);
    let mut bulk_insertable: HashMap<EntityKind, bool> =
      self.dependency_order
          .insert_order()
          .iter()
          .map(|k| (*k, !excluded.is_some_and(|set| set.contains(k))))
          .collect();
    bulk_insertable.extend(self.bulk_insertable_overrides.iter().map(|(k, v)| (*k, *v)));

    let dialect = self.dialect;
    let database_specific_statements = self.database_specific_statements
                                           .into_iter()
                                           .filter(|((d, _), _)| *d == dialect)
                                           .map(|((_, s), r)| (s, r))
                                           .collect();
    let executor_factory = self.executor_factory
                               .unwrap_or_else(|| Arc::new(InMemoryExecutorFactory::default()));
    let schema = Arc::new(Schema::new(dialect, &self.table_prefix, self.foreign_keys));

    info!("DbSqlSessionFactory: dialecto={} lote_max={} optimizadores={}",
          dialect,
          self.max_nr_of_statements_in_bulk_insert,
          self.optimizers.len());
    for kind in bulk_insertable.iter().filter(|(_, v)| !**v).map(|(k, _)| k) {
      debug!("{} excluido de la inserción masiva en {}", kind, dialect);
    }

    let inner = FactoryInner { schema,
                               dependency_order: self.dependency_order,
                               bulk_insertable,
                               max_nr_of_statements_in_bulk_insert: self.max_nr_of_statements_in_bulk_insert,
                               database_specific_statements,
                               insert_statements: DashMap::new(),
                               bulk_insert_statements: DashMap::new(),
                               update_statements: DashMap::new(),
                               delete_statements: DashMap::new(),
                               bulk_delete_statements: DashMap::new(),
                               id_generator: self.id_generator,
                               optimizers: self.optimizers,
                               executor_factory };
    Ok(DbSqlSessionFactory { inner: Arc::new(inner) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proc_domain::DomainError;

  #[test]
  fn oracle_excludes_log_kinds_from_bulk_insert() {
    let oracle = DbSqlSessionFactory::builder(DatabaseDialect::Oracle).build().unwrap();
    let pg = DbSqlSessionFactory::builder(DatabaseDialect::Postgres).build().unwrap();
    assert!(!oracle.is_bulk_insertable(EntityKind::HistoricTaskLogEntry));
    assert!(!oracle.is_bulk_insertable(EntityKind::EventLogEntry));
    assert!(oracle.is_bulk_insertable(EntityKind::Task));
    assert!(pg.is_bulk_insertable(EntityKind::HistoricTaskLogEntry));
    assert!(pg.is_bulk_insertable(EntityKind::EventLogEntry));
  }

  #[test]
  fn custom_exclusion_and_override() {
    let f = DbSqlSessionFactory::builder(DatabaseDialect::MySql).exclude_from_bulk_insert(DatabaseDialect::MySql,
                                                                                          EntityKind::ByteArray)
                                                                .exclude_from_bulk_insert(DatabaseDialect::H2, EntityKind::Task)
                                                                .bulk_insertable(EntityKind::Job, false)
                                                                .build()
                                                                .unwrap();
    assert!(!f.is_bulk_insertable(EntityKind::ByteArray));
    assert!(f.is_bulk_insertable(EntityKind::Task));
    assert!(!f.is_bulk_insertable(EntityKind::Job));
  }

  #[test]
  fn statements_resolve_with_dialect_overrides() {
    let oracle = DbSqlSessionFactory::builder(DatabaseDialect::Oracle).build().unwrap();
    assert_eq!(oracle.bulk_insert_statement(EntityKind::Task), "bulkInsertTask_oracle");
    assert_eq!(oracle.insert_statement(EntityKind::Task), "insertTask");
    // memoizado: misma respuesta en llamadas repetidas
    assert_eq!(oracle.bulk_insert_statement(EntityKind::Task), "bulkInsertTask_oracle");

    let sqlite = DbSqlSessionFactory::builder(DatabaseDialect::Sqlite).database_specific_statement(DatabaseDialect::Sqlite,
                                                                                                 "bulkDeleteTask",
                                                                                                 "bulkDeleteTaskLite")
                                                                      .build()
                                                                      .unwrap();
    assert_eq!(sqlite.bulk_insert_statement(EntityKind::Task), "bulkInsertTask");
    assert_eq!(sqlite.bulk_delete_statement(EntityKind::Task), "bulkDeleteTaskLite");
    assert_eq!(sqlite.update_statement(EntityKind::Execution), "updateExecution");
    assert_eq!(sqlite.delete_statement(EntityKind::Execution), "deleteExecution");
  }

  #[test]
  fn invalid_order_refuses_to_build() {
    let mut order = EntityDependencyOrder::standard().delete_order().to_vec();
    order.reverse();
    let err = DbSqlSessionFactory::builder(DatabaseDialect::Sqlite).dependency_order(EntityDependencyOrder::from_delete_order(order))
                                                                   .build()
                                                                   .unwrap_err();
    assert!(matches!(err, CommandError::Domain(DomainError::Ordering(_))));
  }

  #[test]
  fn zero_batch_size_is_rejected() {
    let err = DbSqlSessionFactory::builder(DatabaseDialect::Sqlite).max_nr_of_statements_in_bulk_insert(0)
                                                                   .build()
                                                                   .unwrap_err();
    assert!(matches!(err, CommandError::IllegalArgument(_)));
  }
}
