// config.rs
use crate::errors::{EngineError, Result};
use crate::history::HistoryLevel;
use proc_persistence::{DatabaseDialect, DEFAULT_MAX_NR_OF_STATEMENTS_IN_BULK_INSERT, DEFAULT_POOL_SIZE};
use std::collections::HashMap;

/// Configuración del motor. Sin `database_url` se usa el store en memoria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEngineConfig {
  pub database_url: Option<String>,
  pub dialect: Option<DatabaseDialect>,
  pub history_level: HistoryLevel,
  pub bulk_insert_max: usize,
  pub pool_size: u32,
  pub table_prefix: String,
}

impl Default for ProcessEngineConfig {
  fn default() -> Self {
    Self { database_url: None,
           dialect: None,
           history_level: HistoryLevel::default(),
           bulk_insert_max: DEFAULT_MAX_NR_OF_STATEMENTS_IN_BULK_INSERT,
           pool_size: DEFAULT_POOL_SIZE,
           table_prefix: String::new() }
  }
}

impl ProcessEngineConfig {
  pub fn builder() -> ProcessEngineConfigBuilder {
    ProcessEngineConfigBuilder::default()
  }

  /// Lee `.env` (si existe) y las variables `PROC_*` del entorno.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let vars: HashMap<String, String> = std::env::vars().collect();
    Self::from_vars(&vars)
  }

  /// Igual que `from_env` pero sobre un mapa explícito.
  pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
    let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
    let mut builder = Self::builder();
    if let Some(url) = get("PROC_DB_URL").or_else(|| get("DATABASE_URL")) {
      builder = builder.database_url(url);
    }
    if let Some(dialect) = get("PROC_DB_DIALECT") {
      let dialect = dialect.parse::<DatabaseDialect>()
                           .map_err(|e| EngineError::Config(format!("PROC_DB_DIALECT: {}", e)))?;
      builder = builder.dialect(dialect);
    }
    if let Some(level) = get("PROC_HISTORY_LEVEL") {
      builder = builder.history_level(level.parse()?);
    }
    if let Some(max) = get("PROC_BULK_INSERT_MAX") {
      let max = max.parse::<usize>()
                   .map_err(|e| EngineError::Config(format!("PROC_BULK_INSERT_MAX '{}': {}", max, e)))?;
      builder = builder.bulk_insert_max(max);
    }
    if let Some(size) = get("PROC_DB_POOL_SIZE") {
      let size = size.parse::<u32>()
                     .map_err(|e| EngineError::Config(format!("PROC_DB_POOL_SIZE '{}': {}", size, e)))?;
      builder = builder.pool_size(size);
    }
    if let Some(prefix) = get("PROC_TABLE_PREFIX") {
      builder = builder.table_prefix(prefix);
    }
    builder.build()
  }

  /// Dialecto explícito, o el deducido de la URL. El store en memoria usa
  /// H2.
  pub fn resolved_dialect(&self) -> Result<DatabaseDialect> {
    if let Some(dialect) = self.dialect {
      return Ok(dialect);
    }
    match &self.database_url {
      None => Ok(DatabaseDialect::H2),
      Some(url) => DatabaseDialect::from_url(url).ok_or_else(|| {
                     EngineError::Config(format!("no se puede deducir el dialecto de '{}'; definir PROC_DB_DIALECT", url))
                   }),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessEngineConfigBuilder {
  config: ProcessEngineConfig,
}

impl ProcessEngineConfigBuilder {
  pub fn database_url(mut self, url: impl Into<String>) -> Self {
    self.config.database_url = Some(url.into());
    self
  }

  pub fn dialect(mut self, dialect: DatabaseDialect) -> Self {
    self.config.dialect = Some(dialect);
    self
  }

  pub fn history_level(mut self, level: HistoryLevel) -> Self {
    self.config.history_level = level;
    self
  }

  pub fn bulk_insert_max(mut self, max: usize) -> Self {
    self.config.bulk_insert_max = max;
    self
  }

  pub fn pool_size(mut self, size: u32) -> Self {
    self.config.pool_size = size;
    self
  }

  pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.config.table_prefix = prefix.into();
    self
  }

  pub fn build(self) -> Result<ProcessEngineConfig> {
    let config = self.config;
    if config.bulk_insert_max == 0 {
      return Err(EngineError::Config("bulk_insert_max debe ser mayor que 0".to_string()));
    }
    if config.pool_size == 0 {
      return Err(EngineError::Config("pool_size debe ser mayor que 0".to_string()));
    }
    if !config.table_prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
      return Err(EngineError::Config(format!("prefijo de tablas inválido: '{}'", config.table_prefix)));
    }
    config.resolved_dialect()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn defaults_use_memory_store() {
    let config = ProcessEngineConfig::from_vars(&HashMap::new()).unwrap();
    assert_eq!(config.database_url, None);
    assert_eq!(config.resolved_dialect().unwrap(), DatabaseDialect::H2);
    assert_eq!(config.bulk_insert_max, 100);
    assert_eq!(config.history_level, HistoryLevel::Audit);
  }

  #[test]
  fn proc_url_wins_over_database_url() {
    let config = ProcessEngineConfig::from_vars(&vars(&[("PROC_DB_URL", "/tmp/a.db"),
                                                        ("DATABASE_URL", "postgres://x@h/db"),
                                                        ("PROC_HISTORY_LEVEL", "full"),
                                                        ("PROC_BULK_INSERT_MAX", "25")])).unwrap();
    assert_eq!(config.database_url.as_deref(), Some("/tmp/a.db"));
    assert_eq!(config.resolved_dialect().unwrap(), DatabaseDialect::Sqlite);
    assert_eq!(config.history_level, HistoryLevel::Full);
    assert_eq!(config.bulk_insert_max, 25);
  }

  #[test]
  fn invalid_values_are_config_errors() {
    assert!(matches!(ProcessEngineConfig::from_vars(&vars(&[("PROC_BULK_INSERT_MAX", "0")])),
                     Err(EngineError::Config(_))));
    assert!(matches!(ProcessEngineConfig::from_vars(&vars(&[("PROC_DB_POOL_SIZE", "many")])),
                     Err(EngineError::Config(_))));
    assert!(matches!(ProcessEngineConfig::from_vars(&vars(&[("PROC_TABLE_PREFIX", "a;b")])),
                     Err(EngineError::Config(_))));
    assert!(ProcessEngineConfig::from_vars(&vars(&[("PROC_DB_DIALECT", "sybase")])).is_err());
  }
}
