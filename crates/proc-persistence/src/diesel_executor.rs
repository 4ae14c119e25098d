// diesel_executor.rs
//
// Ejecutor sobre Diesel + r2d2. Sin la feature `pg` el backend es SQLite
// (con `PRAGMA foreign_keys = ON` en cada conexión); con `pg`, Postgres.
// Cada ejecutor toma una conexión del pool durante toda la sesión y abre
// la transacción en la primera sentencia.
use crate::executor::{StatementExecutor, StatementExecutorFactory};
use crate::sql::{RenderedSql, Schema, SqlValue};
use crate::statement::{AffectedRows, FlushStatement};
use diesel::connection::TransactionManager;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel::sql_types::{Integer, Nullable, Text};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, error, info};
use once_cell::sync::OnceCell;
use proc_command::{CommandError, Result};
use proc_domain::{Criteria, EntityDependencyOrder, EntityKind, EntityRecord};
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[cfg(feature = "pg")]
type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
type DbConn = SqliteConnection;
#[cfg(feature = "pg")]
type Backend = diesel::pg::Pg;
#[cfg(not(feature = "pg"))]
type Backend = diesel::sqlite::Sqlite;
type DbPool = Pool<ConnectionManager<DbConn>>;

pub const DEFAULT_POOL_SIZE: u32 = 4;

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| CommandError::Storage(format!("db: {}", e)))
}

#[cfg(not(feature = "pg"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    for pragma in ["PRAGMA foreign_keys = ON;", "PRAGMA journal_mode = WAL;", "PRAGMA busy_timeout = 5000;"] {
      diesel::sql_query(pragma).execute(conn).map_err(diesel::r2d2::Error::QueryError)?;
    }
    Ok(())
  }
}

#[derive(QueryableByName)]
struct RawRow {
  #[diesel(sql_type = Text)]
  id_: String,
  #[diesel(sql_type = Integer)]
  rev_: i32,
  #[diesel(sql_type = Text)]
  fields_: String,
}

impl RawRow {
  fn into_record(self, kind: EntityKind) -> Result<EntityRecord> {
    let fields = match serde_json::from_str::<serde_json::Value>(&self.fields_) {
      Ok(serde_json::Value::Object(map)) => map,
      Ok(_) => return Err(CommandError::Storage(format!("FIELDS_ de {} {} no es un objeto", kind, self.id_))),
      Err(e) => return Err(CommandError::Storage(format!("FIELDS_ de {} {} ilegible: {}", kind, self.id_, e))),
    };
    Ok(EntityRecord { id: self.id_,
                      kind,
                      revision: self.rev_,
                      fields })
  }
}

fn bind_all(rendered: RenderedSql) -> BoxedSqlQuery<'static, Backend, SqlQuery> {
  let mut query = diesel::sql_query(rendered.sql).into_boxed::<Backend>();
  for param in rendered.params {
    query = match param {
      SqlValue::Text(s) => query.bind::<Text, _>(s),
      SqlValue::NullableText(s) => query.bind::<Nullable<Text>, _>(s),
      SqlValue::Int(i) => query.bind::<Integer, _>(i),
    };
  }
  query
}

/// Pool compartido y preparación del esquema.
pub struct DieselExecutorFactory {
  pool: Arc<DbPool>,
  prefixed_tables: OnceCell<()>,
}

impl DieselExecutorFactory {
  /// Crea el pool y aplica las migraciones embebidas.
  pub fn new(database_url: &str, pool_size: u32) -> Result<Self> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let builder = Pool::<ConnectionManager<DbConn>>::builder().max_size(pool_size.max(1));
    #[cfg(not(feature = "pg"))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager)
                      .map_err(|e| CommandError::Storage(format!("pool: {}", e)))?;
    let factory = Self { pool: Arc::new(pool),
                         prefixed_tables: OnceCell::new() };
    let mut conn = factory.conn()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)
                      .map_err(|e| CommandError::Storage(format!("migraciones: {}", e)))?;
    info!("{} migraciones aplicadas", applied.len());
    Ok(factory)
  }

  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>> {
    self.pool.get().map_err(|e| CommandError::Storage(format!("pool: {}", e)))
  }

  /// Con prefijo de tablas las migraciones no aplican: se crean las tablas
  /// prefijadas una sola vez.
  fn ensure_prefixed_tables(&self, schema: &Schema) -> Result<()> {
    if schema.table_prefix.is_empty() {
      return Ok(());
    }
    self.prefixed_tables
        .get_or_try_init(|| {
          let order = EntityDependencyOrder::derive_from_foreign_keys(&schema.foreign_keys)?;
          let mut conn = self.conn()?;
          for ddl in schema.create_table_ddl(order.insert_order()) {
            map_db_err(diesel::sql_query(ddl).execute(&mut conn))?;
          }
          debug!("tablas con prefijo {} preparadas", schema.table_prefix);
          Ok::<(), CommandError>(())
        })
        .map(|_| ())
  }
}

impl StatementExecutorFactory for DieselExecutorFactory {
  fn open_executor(&self, schema: &Arc<Schema>) -> Result<Box<dyn StatementExecutor>> {
    self.ensure_prefixed_tables(schema)?;
    Ok(Box::new(DieselStatementExecutor { conn: self.conn()?,
                                          schema: schema.clone(),
                                          in_transaction: false }))
  }
}

pub struct DieselStatementExecutor {
  conn: PooledConnection<ConnectionManager<DbConn>>,
  schema: Arc<Schema>,
  in_transaction: bool,
}

impl DieselStatementExecutor {
  fn begin(&mut self) -> Result<()> {
    if !self.in_transaction {
      map_db_err(<DbConn as Connection>::TransactionManager::begin_transaction(&mut *self.conn))?;
      self.in_transaction = true;
    }
    Ok(())
  }

  fn load_rows(&mut self, kind: EntityKind, rendered: RenderedSql) -> Result<Vec<EntityRecord>> {
    self.begin()?;
    let rows = map_db_err(bind_all(rendered).load::<RawRow>(&mut *self.conn))?;
    rows.into_iter().map(|r| r.into_record(kind)).collect()
  }
}

impl StatementExecutor for DieselStatementExecutor {
  fn execute(&mut self, statement: &FlushStatement) -> Result<AffectedRows> {
    let rendered = self.schema.render(statement)?;
    self.begin()?;
    debug!("{}", rendered.sql);
    bind_all(rendered).execute(&mut *self.conn)
                      .map_err(|e| {
                        error!("{} falló: {}", statement, e);
                        CommandError::Storage(format!("db: {}", e))
                      })
  }

  fn select_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
    let rendered = crate::sql::render_select_by_id(self.schema.dialect, self.schema.layout(kind)?, id);
    Ok(self.load_rows(kind, rendered)?.into_iter().next())
  }

  fn select_list(&mut self, kind: EntityKind, criteria: Option<&Criteria>) -> Result<Vec<EntityRecord>> {
    let rendered = crate::sql::render_select_by_criteria(self.schema.dialect, self.schema.layout(kind)?, criteria)?;
    self.load_rows(kind, rendered)
  }

  fn commit(&mut self) -> Result<()> {
    if self.in_transaction {
      self.in_transaction = false;
      map_db_err(<DbConn as Connection>::TransactionManager::commit_transaction(&mut *self.conn))?;
    }
    Ok(())
  }

  fn rollback(&mut self) -> Result<()> {
    if self.in_transaction {
      self.in_transaction = false;
      map_db_err(<DbConn as Connection>::TransactionManager::rollback_transaction(&mut *self.conn))?;
    }
    Ok(())
  }

  fn close(&mut self) {
    if let Err(e) = self.rollback() {
      error!("rollback al cerrar falló: {}", e);
    }
  }
}

/// Fábrica desde el entorno: `PROC_DB_URL` (o `DATABASE_URL`) y
/// `PROC_DB_POOL_SIZE`. Lee `.env` si existe.
pub fn new_from_env() -> Result<DieselExecutorFactory> {
  dotenvy::dotenv().ok();
  let url = std::env::var("PROC_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                        .map_err(|_| CommandError::IllegalArgument("PROC_DB_URL / DATABASE_URL no definida".into()))?;
  let pool_size = std::env::var("PROC_DB_POOL_SIZE").ok()
                                                     .and_then(|s| s.parse::<u32>().ok())
                                                     .unwrap_or(DEFAULT_POOL_SIZE);
  check_url(&url)?;
  DieselExecutorFactory::new(&url, pool_size)
}

#[cfg(feature = "pg")]
pub fn check_url(url: &str) -> Result<()> {
  let l = url.to_lowercase();
  if l.starts_with("postgres") || url.contains('@') {
    Ok(())
  } else {
    Err(CommandError::IllegalArgument("la URL no parece de Postgres".into()))
  }
}

#[cfg(not(feature = "pg"))]
pub fn check_url(url: &str) -> Result<()> {
  let l = url.to_lowercase();
  if l.starts_with("postgres") {
    return Err(CommandError::IllegalArgument("compilado sin la feature 'pg'; activarla para usar Postgres".into()));
  }
  Ok(())
}
