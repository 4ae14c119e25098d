// id_generator.rs
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Fuente de identificadores para entidades nuevas.
pub trait IdGenerator: Send + Sync {
  fn next_id(&self) -> String;
}

/// Identificadores UUID v4 (por defecto).
#[derive(Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
  fn next_id(&self) -> String {
    Uuid::new_v4().to_string()
  }
}

/// Identificadores numéricos crecientes; útil para pruebas con salida
/// legible.
#[derive(Debug)]
pub struct SequentialIdGenerator {
  prefix: String,
  next: AtomicU64,
}

impl SequentialIdGenerator {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self { prefix: prefix.into(), next: AtomicU64::new(1) }
  }
}

impl Default for SequentialIdGenerator {
  fn default() -> Self {
    Self::new("")
  }
}

impl IdGenerator for SequentialIdGenerator {
  fn next_id(&self) -> String {
    format!("{}{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
  }
}
