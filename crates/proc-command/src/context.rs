// Archivo: context.rs
// Propósito: implementar el `CommandContext`, dueño de las sesiones abiertas
// durante un comando y responsable de la secuencia de cierre.
use crate::command::Command;
use crate::errors::{CommandError, Result};
use crate::session::{Session, SessionFactories};
use crate::transaction::{TransactionListener, TransactionState};
use indexmap::IndexMap;
use log::{debug, error, warn};
use serde_json::Value as JsonValue;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Observador del ciclo de cierre del contexto.
///
/// Orden en un cierre con éxito: `closing` → flush de sesiones →
/// `after_sessions_flush` → cierre de sesiones → `closed`. Si el comando o
/// cualquiera de esos pasos falla: `close_failure` → cierre de sesiones.
pub trait CommandContextCloseListener: Send {
    fn closing(&mut self, _context: &mut CommandContext) -> Result<()> {
        Ok(())
    }

    fn after_sessions_flush(&mut self, _context: &mut CommandContext) -> Result<()> {
        Ok(())
    }

    fn closed(&mut self, _context: &mut CommandContext) {}

    fn close_failure(&mut self, _context: &mut CommandContext) {}
}

/// Estado de un comando en ejecución: sesiones abiertas (en orden de
/// apertura), atributos y listeners.
pub struct CommandContext {
    command_name: String,
    factories: Arc<SessionFactories>,
    sessions: IndexMap<TypeId, Box<dyn Session>>,
    attributes: HashMap<String, JsonValue>,
    close_listeners: Vec<Box<dyn CommandContextCloseListener>>,
    transaction_listeners: Vec<(TransactionState, Box<dyn TransactionListener>)>,
    transaction_active: bool,
    reused: bool,
    closed: bool,
}

impl CommandContext {
    pub fn new(command_name: impl Into<String>, factories: Arc<SessionFactories>) -> Self {
        Self { command_name: command_name.into(),
               factories,
               sessions: IndexMap::new(),
               attributes: HashMap::new(),
               close_listeners: Vec::new(),
               transaction_listeners: Vec::new(),
               transaction_active: false,
               reused: false,
               closed: false }
    }

    /// Nombre del comando que abrió el contexto.
    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    /// Devuelve la sesión de tipo `S`, abriéndola si aún no existe.
    pub fn session<S: Session>(&mut self) -> Result<&mut S> {
        if self.closed {
            return Err(CommandError::IllegalState(format!("contexto de {} ya cerrado", self.command_name)));
        }
        let type_id = TypeId::of::<S>();
        if !self.sessions.contains_key(&type_id) {
            let session = self.factories.open(type_id, std::any::type_name::<S>())?;
            debug!("sesión {} abierta para {}", std::any::type_name::<S>(), self.command_name);
            self.sessions.insert(type_id, session);
        }
        self.sessions
            .get_mut(&type_id)
            .and_then(|s| s.as_any_mut().downcast_mut::<S>())
            .ok_or_else(|| CommandError::IllegalState(format!("la fábrica no produjo una sesión {}", std::any::type_name::<S>())))
    }

    /// Sesión de tipo `S` sólo si ya fue abierta.
    pub fn existing_session<S: Session>(&mut self) -> Option<&mut S> {
        self.sessions
            .get_mut(&TypeId::of::<S>())
            .and_then(|s| s.as_any_mut().downcast_mut::<S>())
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ejecuta un comando dentro de este mismo contexto, sin pasar por la
    /// cadena de interceptores.
    pub fn execute_nested<C: Command + ?Sized>(&mut self, command: &C) -> Result<C::Output> {
        debug!("comando anidado {} en el contexto de {}", command.name(), self.command_name);
        command.execute(self)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: JsonValue) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<&JsonValue> {
        self.attributes.get(key)
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<JsonValue> {
        self.attributes.remove(key)
    }

    pub fn add_close_listener(&mut self, listener: Box<dyn CommandContextCloseListener>) {
        self.close_listeners.push(listener);
    }

    /// Registra un listener de transacción. Requiere una transacción activa.
    pub fn add_transaction_listener(&mut self,
                                    state: TransactionState,
                                    listener: Box<dyn TransactionListener>)
                                    -> Result<()> {
        if !self.transaction_active {
            return Err(CommandError::IllegalState("no hay contexto de transacción activo".to_string()));
        }
        self.transaction_listeners.push((state, listener));
        Ok(())
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_active
    }

    pub fn set_transaction_active(&mut self, active: bool) {
        self.transaction_active = active;
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn set_reused(&mut self, reused: bool) {
        self.reused = reused;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Ejecuta los listeners registrados para `state`; cada estado se
    /// dispara una sola vez.
    pub fn fire_transaction_event(&mut self, state: TransactionState) -> Result<()> {
        let (fired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.transaction_listeners).into_iter()
                                                                                            .partition(|(s, _)| *s == state);
        self.transaction_listeners = kept;
        for (_, listener) in fired {
            listener.execute(self)?;
        }
        Ok(())
    }

    /// Confirma todas las sesiones abiertas en orden de apertura.
    pub fn commit_sessions(&mut self) -> Result<()> {
        for session in self.sessions.values_mut() {
            session.commit()?;
        }
        Ok(())
    }

    /// Revierte todas las sesiones. Un fallo no detiene el resto; se
    /// devuelve el primero.
    pub fn rollback_sessions(&mut self) -> Result<()> {
        let mut first: Option<CommandError> = None;
        for session in self.sessions.values_mut() {
            if let Err(e) = session.rollback() {
                error!("fallo al revertir la sesión de {}: {}", self.command_name, e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Cierra el contexto. `failure` indica que el comando terminó con error:
    /// en ese caso no hay flush y los listeners de fallo revierten.
    ///
    /// Devuelve el primer error producido durante el cierre.
    pub fn close(&mut self, failure: Option<&CommandError>) -> Result<()> {
        if self.closed {
            return Err(CommandError::IllegalState(format!("contexto de {} cerrado dos veces", self.command_name)));
        }
        let mut outcome = Ok(());
        if failure.is_none() {
            outcome = self.notify(|l, ctx| l.closing(ctx))
                          .and_then(|_| self.flush_sessions())
                          .and_then(|_| self.notify(|l, ctx| l.after_sessions_flush(ctx)));
        }
        let failed = failure.is_some() || outcome.is_err();
        if let Err(e) = &outcome {
            warn!("cierre de {} fallido: {}", self.command_name, e);
        }
        if failed {
            let _ = self.notify(|l, ctx| {
                            l.close_failure(ctx);
                            Ok(())
                        });
        }
        self.close_sessions();
        if !failed {
            let _ = self.notify(|l, ctx| {
                            l.closed(ctx);
                            Ok(())
                        });
        }
        self.closed = true;
        outcome
    }

    fn flush_sessions(&mut self) -> Result<()> {
        for session in self.sessions.values_mut() {
            session.flush()?;
        }
        Ok(())
    }

    fn close_sessions(&mut self) {
        for (_, session) in self.sessions.iter_mut().rev() {
            session.close();
        }
        self.sessions.clear();
    }

    fn notify<F>(&mut self, mut f: F) -> Result<()>
        where F: FnMut(&mut Box<dyn CommandContextCloseListener>, &mut CommandContext) -> Result<()>
    {
        let mut listeners = std::mem::take(&mut self.close_listeners);
        let mut outcome = Ok(());
        for listener in listeners.iter_mut() {
            outcome = f(listener, self);
            if outcome.is_err() {
                break;
            }
        }
        listeners.append(&mut self.close_listeners);
        self.close_listeners = listeners;
        outcome
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
         .field("command_name", &self.command_name)
         .field("sessions", &self.sessions.len())
         .field("transaction_active", &self.transaction_active)
         .field("reused", &self.reused)
         .field("closed", &self.closed)
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closing_twice_is_illegal_state() {
        let mut ctx = CommandContext::new("test", Arc::new(SessionFactories::new()));
        ctx.set_attribute("k", json!(1));
        assert_eq!(ctx.attribute("k"), Some(&json!(1)));
        ctx.close(None).unwrap();
        assert!(matches!(ctx.close(None), Err(CommandError::IllegalState(_))));
        assert!(ctx.session::<crate::stubs::KeyValueSession>().is_err());
    }

    struct Recorder(Arc<std::sync::Mutex<Vec<&'static str>>>);

    impl CommandContextCloseListener for Recorder {
        fn closing(&mut self, _context: &mut CommandContext) -> Result<()> {
            self.0.lock().unwrap().push("closing");
            Ok(())
        }

        fn after_sessions_flush(&mut self, _context: &mut CommandContext) -> Result<()> {
            self.0.lock().unwrap().push("after_flush");
            Ok(())
        }

        fn closed(&mut self, _context: &mut CommandContext) {
            self.0.lock().unwrap().push("closed");
        }

        fn close_failure(&mut self, _context: &mut CommandContext) {
            self.0.lock().unwrap().push("failure");
        }
    }

    #[test]
    fn close_listeners_follow_success_and_failure_paths() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ok = CommandContext::new("ok", Arc::new(SessionFactories::new()));
        ok.add_close_listener(Box::new(Recorder(seen.clone())));
        ok.close(None).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["closing", "after_flush", "closed"]);

        seen.lock().unwrap().clear();
        let mut failed = CommandContext::new("failed", Arc::new(SessionFactories::new()));
        failed.add_close_listener(Box::new(Recorder(seen.clone())));
        failed.close(Some(&CommandError::Other("x".into()))).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["failure"]);
    }
}
