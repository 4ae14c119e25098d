// statement.rs
use proc_domain::{Criteria, EntityKind, EntityRecord};
use std::fmt;

/// Tipo de escritura de una sentencia del plan de flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushOperation {
  Insert,
  BulkInsert,
  Update,
  Delete,
  BulkDelete,
}

impl fmt::Display for FlushOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      FlushOperation::Insert => "insert",
      FlushOperation::BulkInsert => "bulkInsert",
      FlushOperation::Update => "update",
      FlushOperation::Delete => "delete",
      FlushOperation::BulkDelete => "bulkDelete",
    };
    write!(f, "{}", s)
  }
}

/// Parámetro ligado a la sentencia.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushParameter {
  /// Una fila (insert, update o delete por id).
  Entity(EntityRecord),
  /// Filas de un insert masivo, en orden de registro.
  Entities(Vec<EntityRecord>),
  /// Filtro de un borrado masivo.
  Criteria(Criteria),
}

/// Sentencia planificada: identificador resuelto por la fábrica, tipo de
/// entidad, operación y parámetro.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushStatement {
  pub statement: String,
  pub kind: EntityKind,
  pub operation: FlushOperation,
  pub parameter: FlushParameter,
}

impl FlushStatement {
  /// Ids de las filas afectadas directamente (vacío en borrados masivos).
  pub fn entity_ids(&self) -> Vec<&str> {
    match &self.parameter {
      FlushParameter::Entity(e) => vec![e.id.as_str()],
      FlushParameter::Entities(es) => es.iter().map(|e| e.id.as_str()).collect(),
      FlushParameter::Criteria(_) => Vec::new(),
    }
  }

  /// Número de filas que la sentencia escribe (inserts/updates/deletes por
  /// id); los borrados masivos cuentan como una.
  pub fn row_count(&self) -> usize {
    match &self.parameter {
      FlushParameter::Entities(es) => es.len(),
      _ => 1,
    }
  }

  /// Indica si la sentencia menciona `id` como fila o como valor del filtro.
  pub fn references(&self, id: &str) -> bool {
    match &self.parameter {
      FlushParameter::Entity(e) => e.id == id || e.fields.values().any(|v| v.as_str() == Some(id)),
      FlushParameter::Entities(es) => es.iter().any(|e| e.id == id || e.fields.values().any(|v| v.as_str() == Some(id))),
      FlushParameter::Criteria(c) => c.value == id,
    }
  }
}

impl fmt::Display for FlushStatement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.parameter {
      FlushParameter::Entity(e) => write!(f, "{} [{}]", self.statement, e.id),
      FlushParameter::Entities(es) => write!(f, "{} [{} filas]", self.statement, es.len()),
      FlushParameter::Criteria(c) => write!(f, "{} [{} = {}]", self.statement, c.field, c.value),
    }
  }
}

/// Resultado de aplicar una sentencia: filas afectadas.
pub type AffectedRows = usize;
