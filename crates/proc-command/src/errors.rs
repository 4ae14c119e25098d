// Archivo: errors.rs
// Propósito: definir los errores de la capa de comandos/sesiones y el alias
// Result<T> usado por las APIs del crate.
use proc_domain::DomainError;
use thiserror::Error;

/// Errores comunes de la ejecución de comandos.
///
/// - `IllegalState`: error de programación (flush doble, registrar una
///   operación tras el flush, sesión desconocida). No es recuperable.
/// - `OptimisticLocking`: una actualización o borrado no encontró la
///   revisión esperada.
/// - `Storage`: fallo del store al ejecutar el flush o una lectura.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Entidad no encontrada.
    #[error("No encontrado: {0}")]
    NotFound(String),
    /// Conflicto de revisión detectado al escribir.
    #[error("Bloqueo optimista: {0}")]
    OptimisticLocking(String),
    /// Error genérico de almacenamiento (BD, pool, restricción violada).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// Secuencia de operaciones ilegal.
    #[error("Estado ilegal: {0}")]
    IllegalState(String),
    /// Argumento inválido pasado por el llamador.
    #[error("Argumento inválido: {0}")]
    IllegalArgument(String),
    /// Error del modelo de datos.
    #[error("Error de dominio: {0}")]
    Domain(#[from] DomainError),
    /// Otro tipo de error.
    #[error("Otro: {0}")]
    Other(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, CommandError>;
