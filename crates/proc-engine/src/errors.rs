use thiserror::Error;

// Errores del motor de procesos.
//
// Agrega los errores de la capa de comandos/persistencia y del modelo de
// datos, más las validaciones propias del motor y la configuración.
#[derive(Error, Debug)]
pub enum EngineError {
  /// Errores de ejecución de comandos (persistencia, bloqueo optimista,
  /// estado ilegal).
  #[error("Error de comando: {0}")]
  Command(#[from] proc_command::CommandError),

  #[error("Error de dominio: {0}")]
  Domain(#[from] proc_domain::DomainError),

  #[error("Error de serializacion: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Definiciones de proceso inválidas o argumentos fuera de rango.
  #[error("Error de validacion: {0}")]
  Validation(String),

  /// Variables de entorno o combinaciones de opciones inválidas.
  #[error("Error de configuracion: {0}")]
  Config(String),

  #[error("Otro error: {0}")]
  Other(String),
}

impl EngineError {
  /// Indica si el error es un conflicto de concurrencia reintentable.
  pub fn is_optimistic_locking(&self) -> bool {
    matches!(self, EngineError::Command(proc_command::CommandError::OptimisticLocking(_)))
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, EngineError::Command(proc_command::CommandError::NotFound(_)))
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;
