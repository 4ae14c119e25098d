// engine.rs
use crate::config::ProcessEngineConfig;
use crate::errors::{EngineError, Result};
use crate::history::HistoryManager;
use crate::optimizer::ProcessFlushOptimizer;
use crate::services::{HistoryService, RepositoryService, RuntimeService, TaskService};
use log::info;
use proc_command::CommandExecutor;
use proc_domain::ForeignKeys;
use proc_persistence::{check_url, DatabaseDialect, DbSqlSessionFactory, DieselExecutorFactory, IdGenerator,
                       InMemoryExecutorFactory, InMemoryStore, StatementExecutorFactory};
use std::sync::Arc;

/// Motor de procesos: fábrica de sesiones, cadena de comandos y servicios
/// construidos a partir de una `ProcessEngineConfig`.
pub struct ProcessEngine {
  config: ProcessEngineConfig,
  session_factory: DbSqlSessionFactory,
  executor: Arc<CommandExecutor>,
  memory_store: Option<InMemoryStore>,
  repository: RepositoryService,
  runtime: RuntimeService,
  tasks: TaskService,
  history: HistoryService,
}

impl ProcessEngine {
  pub fn new(config: ProcessEngineConfig) -> Result<Self> {
    Self::build(config, None)
  }

  /// Construye el motor con un generador de ids propio (p.ej. secuencial en
  /// pruebas).
  pub fn with_id_generator(config: ProcessEngineConfig, ids: Arc<dyn IdGenerator>) -> Result<Self> {
    Self::build(config, Some(ids))
  }

  pub fn from_env() -> Result<Self> {
    Self::new(ProcessEngineConfig::from_env()?)
  }

  fn build(config: ProcessEngineConfig, ids: Option<Arc<dyn IdGenerator>>) -> Result<Self> {
    let dialect = config.resolved_dialect()?;
    let (executor_factory, memory_store): (Arc<dyn StatementExecutorFactory>, Option<InMemoryStore>) =
      match &config.database_url {
        Some(url) => {
          if !matches!(dialect, DatabaseDialect::Sqlite | DatabaseDialect::Postgres) {
            return Err(EngineError::Config(format!("el dialecto {} no tiene ejecutor; usar sqlite o postgres",
                                                   dialect)));
          }
          check_url(url)?;
          (Arc::new(DieselExecutorFactory::new(url, config.pool_size)?), None)
        }
        None => {
          let store = InMemoryStore::new();
          (Arc::new(InMemoryExecutorFactory::new(store.clone())), Some(store))
        }
      };

    let foreign_keys = ForeignKeys::standard();
    let mut builder = DbSqlSessionFactory::builder(dialect).foreign_keys(foreign_keys.clone())
                                                           .max_nr_of_statements_in_bulk_insert(config.bulk_insert_max)
                                                           .table_prefix(config.table_prefix.clone())
                                                           .flush_optimizer(Arc::new(ProcessFlushOptimizer::new(foreign_keys)))
                                                           .executor_factory(executor_factory);
    if let Some(ids) = ids {
      builder = builder.id_generator(ids);
    }
    let session_factory = builder.build()?;

    let executor = Arc::new(CommandExecutor::builder().session_factory(Arc::new(session_factory.clone()))
                                                      .build());
    let history = HistoryManager::new(config.history_level);
    info!("motor de procesos listo: dialecto={} historia={} store={}",
          dialect,
          config.history_level,
          if memory_store.is_some() { "memoria" } else { "diesel" });

    Ok(Self { repository: RepositoryService::new(executor.clone()),
              runtime: RuntimeService::new(executor.clone(), history),
              tasks: TaskService::new(executor.clone(), history),
              history: HistoryService::new(executor.clone(), history),
              config,
              session_factory,
              executor,
              memory_store })
  }

  pub fn config(&self) -> &ProcessEngineConfig {
    &self.config
  }

  pub fn session_factory(&self) -> &DbSqlSessionFactory {
    &self.session_factory
  }

  pub fn command_executor(&self) -> &Arc<CommandExecutor> {
    &self.executor
  }

  /// Store en memoria, cuando el motor no tiene base de datos.
  pub fn memory_store(&self) -> Option<&InMemoryStore> {
    self.memory_store.as_ref()
  }

  pub fn repository_service(&self) -> &RepositoryService {
    &self.repository
  }

  pub fn runtime_service(&self) -> &RuntimeService {
    &self.runtime
  }

  pub fn task_service(&self) -> &TaskService {
    &self.tasks
  }

  pub fn history_service(&self) -> &HistoryService {
    &self.history
  }
}
