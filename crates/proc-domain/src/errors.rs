// errors.rs
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
  #[error("Error de validación: {0}")]
  Validation(String),
  /// El orden de dependencias no respeta una clave foránea declarada o no
  /// contiene cada tipo de entidad exactamente una vez.
  #[error("Orden de dependencias inválido: {0}")]
  Ordering(String),
  #[error("Error de serialización: {0}")]
  Serialization(String),
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}
