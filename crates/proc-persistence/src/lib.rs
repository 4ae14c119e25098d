//! Sesión de persistencia por transacción y su fábrica.
//!
//! `DbSqlSession` acumula inserts, updates y borrados durante un comando y
//! en el flush emite la lista mínima de sentencias ordenada por
//! dependencias de claves foráneas. Los stores se enchufan mediante
//! `StatementExecutorFactory`: en memoria (`InMemoryExecutorFactory`) o
//! Diesel (`DieselExecutorFactory`, SQLite o Postgres con la feature `pg`).

mod cache;
mod db_sql_session;
mod diesel_executor;
mod dialect;
mod executor;
mod factory;
mod id_generator;
mod in_memory;
mod pending;
pub mod sql;
mod statement;

pub use cache::{CachedEntity, EntityCache};
pub use db_sql_session::{DbSqlSession, PendingSummary, SessionState};
pub use diesel_executor::{check_url, new_from_env, DieselExecutorFactory, DieselStatementExecutor, DEFAULT_POOL_SIZE,
                          MIGRATIONS};
pub use dialect::DatabaseDialect;
pub use executor::{StatementExecutor, StatementExecutorFactory};
pub use factory::{DbSqlSessionFactory, DbSqlSessionFactoryBuilder, DEFAULT_MAX_NR_OF_STATEMENTS_IN_BULK_INSERT};
pub use id_generator::{IdGenerator, SequentialIdGenerator, UuidIdGenerator};
pub use in_memory::{InMemoryExecutorFactory, InMemoryStatementExecutor, InMemoryStore};
pub use pending::{BulkDeleteOperation, FlushOptimizer, PendingOperations, PendingOperationsView};
pub use statement::{AffectedRows, FlushOperation, FlushParameter, FlushStatement};
