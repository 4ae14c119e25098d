// dialect.rs
use proc_command::CommandError;
use std::fmt;
use std::str::FromStr;

/// Motor de base de datos destino. Decide la sintaxis de los parámetros, la
/// forma de las inserciones multi-fila y las exclusiones de inserción masiva.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseDialect {
  H2,
  Sqlite,
  Postgres,
  MySql,
  MsSql,
  Oracle,
  Db2,
}

impl DatabaseDialect {
  pub fn all() -> &'static [DatabaseDialect] {
    &[DatabaseDialect::H2,
      DatabaseDialect::Sqlite,
      DatabaseDialect::Postgres,
      DatabaseDialect::MySql,
      DatabaseDialect::MsSql,
      DatabaseDialect::Oracle,
      DatabaseDialect::Db2]
  }

  pub fn name(&self) -> &'static str {
    match self {
      DatabaseDialect::H2 => "h2",
      DatabaseDialect::Sqlite => "sqlite",
      DatabaseDialect::Postgres => "postgres",
      DatabaseDialect::MySql => "mysql",
      DatabaseDialect::MsSql => "mssql",
      DatabaseDialect::Oracle => "oracle",
      DatabaseDialect::Db2 => "db2",
    }
  }

  /// Marcador del parámetro `index` (base 1).
  pub fn placeholder(&self, index: usize) -> String {
    match self {
      DatabaseDialect::Postgres => format!("${}", index),
      DatabaseDialect::Oracle => format!(":{}", index),
      _ => "?".to_string(),
    }
  }

  /// Oracle no admite `VALUES (..), (..)`; usa `INSERT ALL ... SELECT * FROM
  /// DUAL`.
  pub fn uses_insert_all(&self) -> bool {
    matches!(self, DatabaseDialect::Oracle)
  }

  /// Deduce el dialecto a partir de la URL de conexión.
  pub fn from_url(url: &str) -> Option<DatabaseDialect> {
    let l = url.trim().to_lowercase();
    if l.starts_with("postgres://") || l.starts_with("postgresql://") {
      Some(DatabaseDialect::Postgres)
    } else if l.starts_with("mysql://") || l.starts_with("mariadb://") {
      Some(DatabaseDialect::MySql)
    } else if l.starts_with("sqlite:")
              || l.starts_with("file:")
              || l.ends_with(".db")
              || l.ends_with(".sqlite")
              || l.contains("mode=memory")
    {
      Some(DatabaseDialect::Sqlite)
    } else if l.starts_with("jdbc:oracle") || l.starts_with("oracle://") {
      Some(DatabaseDialect::Oracle)
    } else if l.starts_with("sqlserver://") || l.starts_with("mssql://") {
      Some(DatabaseDialect::MsSql)
    } else if l.starts_with("db2://") {
      Some(DatabaseDialect::Db2)
    } else if l.starts_with("h2:") || l.starts_with("jdbc:h2") {
      Some(DatabaseDialect::H2)
    } else {
      None
    }
  }
}

impl fmt::Display for DatabaseDialect {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for DatabaseDialect {
  type Err = CommandError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "h2" => Ok(DatabaseDialect::H2),
      "sqlite" | "sqlite3" => Ok(DatabaseDialect::Sqlite),
      "postgres" | "postgresql" | "pg" => Ok(DatabaseDialect::Postgres),
      "mysql" | "mariadb" => Ok(DatabaseDialect::MySql),
      "mssql" | "sqlserver" => Ok(DatabaseDialect::MsSql),
      "oracle" => Ok(DatabaseDialect::Oracle),
      "db2" => Ok(DatabaseDialect::Db2),
      other => Err(CommandError::IllegalArgument(format!("dialecto desconocido: {}", other))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_parse_back() {
    for d in DatabaseDialect::all() {
      assert_eq!(d.name().parse::<DatabaseDialect>().unwrap(), *d);
    }
    assert!("informix".parse::<DatabaseDialect>().is_err());
  }

  #[test]
  fn dialect_is_inferred_from_url() {
    assert_eq!(DatabaseDialect::from_url("postgres://u:p@localhost/db"), Some(DatabaseDialect::Postgres));
    assert_eq!(DatabaseDialect::from_url("/tmp/proc_1.db"), Some(DatabaseDialect::Sqlite));
    assert_eq!(DatabaseDialect::from_url("file:mem?mode=memory&cache=shared"), Some(DatabaseDialect::Sqlite));
    assert_eq!(DatabaseDialect::from_url("whatever"), None);
  }
}
