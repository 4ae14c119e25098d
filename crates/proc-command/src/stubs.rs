// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// `InMemoryKeyValueStore` es un almacén clave/valor compartido con
// transacciones por sesión. Registra en un diario cada paso del ciclo de
// vida (flush, commit, rollback, close) para poder verificar la secuencia
// que impone el `CommandContext`. No es durable.
use crate::errors::{CommandError, Result};
use crate::session::{Session, SessionFactory};
use serde_json::Value as JsonValue;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct KeyValueState {
    committed: BTreeMap<String, JsonValue>,
    journal: Vec<String>,
    fail_on_flush: bool,
}

/// Almacén compartido entre sesiones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    state: Arc<Mutex<KeyValueState>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, KeyValueState>> {
        self.state
            .lock()
            .map_err(|e| CommandError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    /// Valor confirmado para `key`.
    pub fn committed(&self, key: &str) -> Option<JsonValue> {
        self.lock().ok().and_then(|s| s.committed.get(key).cloned())
    }

    pub fn committed_len(&self) -> usize {
        self.lock().map(|s| s.committed.len()).unwrap_or(0)
    }

    /// Pasos registrados por las sesiones, en orden.
    pub fn journal(&self) -> Vec<String> {
        self.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut s) = self.lock() {
            s.journal.clear();
        }
    }

    /// Hace que el próximo flush de cualquier sesión falle.
    pub fn fail_next_flush(&self) {
        if let Ok(mut s) = self.lock() {
            s.fail_on_flush = true;
        }
    }

    fn record(&self, step: &str) {
        if let Ok(mut s) = self.lock() {
            s.journal.push(step.to_string());
        }
    }
}

/// Sesión transaccional sobre `InMemoryKeyValueStore`.
#[derive(Debug)]
pub struct KeyValueSession {
    store: InMemoryKeyValueStore,
    pending: HashMap<String, Option<JsonValue>>,
    flushed: HashMap<String, Option<JsonValue>>,
}

impl KeyValueSession {
    pub fn new(store: InMemoryKeyValueStore) -> Self {
        Self { store,
               pending: HashMap::new(),
               flushed: HashMap::new() }
    }

    pub fn put(&mut self, key: impl Into<String>, value: JsonValue) {
        self.pending.insert(key.into(), Some(value));
    }

    pub fn remove(&mut self, key: &str) {
        self.pending.insert(key.to_string(), None);
    }

    /// Lectura con visibilidad de lo escrito en esta misma sesión.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        if let Some(v) = self.pending.get(key).or_else(|| self.flushed.get(key)) {
            return v.clone();
        }
        self.store.committed(key)
    }
}

impl Session for KeyValueSession {
    fn flush(&mut self) -> Result<()> {
        {
            let mut state = self.store.lock()?;
            if state.fail_on_flush {
                state.fail_on_flush = false;
                state.journal.push("flush-failed".to_string());
                return Err(CommandError::Storage("flush rechazado por el store".to_string()));
            }
        }
        self.store.record("flush");
        self.flushed.extend(self.pending.drain());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = self.store.lock()?;
        for (key, value) in self.flushed.drain() {
            match value {
                Some(v) => state.committed.insert(key, v),
                None => state.committed.remove(&key),
            };
        }
        state.journal.push("commit".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        self.flushed.clear();
        self.store.record("rollback");
        Ok(())
    }

    fn close(&mut self) {
        self.store.record("close");
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Fábrica de `KeyValueSession` sobre un almacén compartido.
#[derive(Debug, Clone, Default)]
pub struct KeyValueSessionFactory {
    store: InMemoryKeyValueStore,
}

impl KeyValueSessionFactory {
    pub fn new(store: InMemoryKeyValueStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &InMemoryKeyValueStore {
        &self.store
    }
}

impl SessionFactory for KeyValueSessionFactory {
    fn session_type(&self) -> TypeId {
        TypeId::of::<KeyValueSession>()
    }

    fn open_session(&self) -> Result<Box<dyn Session>> {
        self.store.record("open");
        Ok(Box::new(KeyValueSession::new(self.store.clone())))
    }
}
