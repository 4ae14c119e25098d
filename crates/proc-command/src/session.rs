// Archivo: session.rs
// Propósito: contrato de las sesiones abiertas por un `CommandContext` y de
// las fábricas que las crean.
//
// Una sesión agrupa el trabajo pendiente de un recurso (base de datos,
// store en memoria, etc.) durante un comando. El contexto la abre de forma
// perezosa la primera vez que un comando la pide y la cierra al terminar.
use crate::errors::{CommandError, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Sesión ligada a un único `CommandContext`.
///
/// Secuencia garantizada por el contexto en un cierre con éxito:
/// `flush` (una vez) → `commit` (desde el contexto de transacción) →
/// `close`. En un fallo: `rollback` → `close`. `close` se llama siempre.
pub trait Session: Any + Send {
    /// Traduce el trabajo pendiente en escrituras contra el recurso.
    fn flush(&mut self) -> Result<()>;

    /// Libera el recurso. No debe fallar; los errores se registran.
    fn close(&mut self);

    /// Confirma la transacción del recurso.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Descarta la transacción del recurso.
    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Fábrica de sesiones de un tipo concreto. Las fábricas se comparten entre
/// hilos durante toda la vida del motor; cada comando abre sus propias
/// sesiones.
pub trait SessionFactory: Send + Sync {
    /// `TypeId` del tipo concreto de sesión que produce `open_session`.
    fn session_type(&self) -> TypeId;

    fn open_session(&self) -> Result<Box<dyn Session>>;
}

/// Registro inmutable de fábricas indexado por tipo de sesión.
#[derive(Default, Clone)]
pub struct SessionFactories {
    factories: HashMap<TypeId, Arc<dyn SessionFactory>>,
}

impl SessionFactories {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registra una fábrica; una fábrica posterior para el mismo tipo
    /// reemplaza a la anterior.
    pub fn register(&mut self, factory: Arc<dyn SessionFactory>) {
        self.factories.insert(factory.session_type(), factory);
    }

    pub fn contains(&self, session_type: TypeId) -> bool {
        self.factories.contains_key(&session_type)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Abre una sesión del tipo pedido.
    pub fn open(&self, session_type: TypeId, type_name: &str) -> Result<Box<dyn Session>> {
        let factory = self.factories
                          .get(&session_type)
                          .ok_or_else(|| CommandError::IllegalState(format!("no hay fábrica de sesión registrada para {}", type_name)))?;
        factory.open_session()
    }
}
