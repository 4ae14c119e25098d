// entity.rs
use crate::{DomainError, EntityKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Instancia genérica de entidad: identificador, tipo, revisión y un conjunto
/// mutable de campos. Es la unidad que la sesión registra, cachea y escribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
  pub id: String,
  pub kind: EntityKind,
  /// Revisión persistida (bloqueo optimista). 0 = aún no asignada.
  pub revision: i32,
  pub fields: Map<String, JsonValue>,
}

impl EntityRecord {
  /// Registro vacío sin id; la sesión asigna uno al insertarlo.
  pub fn new(kind: EntityKind) -> Self {
    Self { id: String::new(), kind, revision: 0, fields: Map::new() }
  }

  pub fn with_id(kind: EntityKind, id: impl Into<String>) -> Self {
    Self { id: id.into(), kind, revision: 0, fields: Map::new() }
  }

  pub fn with_field(mut self, field: &str, value: impl Into<JsonValue>) -> Self {
    self.set_field(field, value);
    self
  }

  pub fn set_field(&mut self, field: &str, value: impl Into<JsonValue>) {
    self.fields.insert(field.to_string(), value.into());
  }

  pub fn field(&self, field: &str) -> Option<&JsonValue> {
    self.fields.get(field)
  }

  /// Valor textual de un campo; `None` si falta, es nulo o no es texto.
  pub fn field_str(&self, field: &str) -> Option<&str> {
    if field == "id" {
      return Some(self.id.as_str());
    }
    self.fields.get(field).and_then(|v| v.as_str())
  }

  /// Instantánea del estado persistible usada para detectar cambios. No
  /// incluye la revisión: sólo los campos de negocio cuentan como cambio.
  pub fn persistent_state(&self) -> JsonValue {
    JsonValue::Object(self.fields.clone())
  }

  pub fn revision_next(&self) -> i32 {
    self.revision + 1
  }

  /// Convierte una entidad tipada en registro. Los campos `id` y `revision`
  /// del tipo se trasladan a la cabecera del registro.
  pub fn from_typed<T: TypedEntity>(entity: &T) -> Result<Self, DomainError> {
    let value = serde_json::to_value(entity)?;
    let JsonValue::Object(mut fields) = value else {
      return Err(DomainError::Serialization(format!("{} no se serializa como objeto", T::KIND)));
    };
    let id = match fields.remove("id") {
      Some(JsonValue::String(s)) => s,
      _ => String::new(),
    };
    let revision = fields.remove("revision").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    Ok(Self { id, kind: T::KIND, revision, fields })
  }

  /// Reconstruye la entidad tipada desde el registro.
  pub fn to_typed<T: TypedEntity>(&self) -> Result<T, DomainError> {
    if self.kind != T::KIND {
      return Err(DomainError::Validation(format!("se esperaba {} pero el registro es {}", T::KIND, self.kind)));
    }
    let mut fields = self.fields.clone();
    fields.insert("id".to_string(), JsonValue::String(self.id.clone()));
    fields.insert("revision".to_string(), JsonValue::from(self.revision));
    Ok(serde_json::from_value(JsonValue::Object(fields))?)
  }
}

/// Entidad con representación fuerte. Debe serializarse como objeto con los
/// campos `id` y `revision` además de sus campos propios.
pub trait TypedEntity: Serialize + DeserializeOwned {
  const KIND: EntityKind;

  fn id(&self) -> &str;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Sample {
    id: String,
    revision: i32,
    name: String,
    parent_id: Option<String>,
  }

  impl TypedEntity for Sample {
    const KIND: EntityKind = EntityKind::Execution;

    fn id(&self) -> &str {
      &self.id
    }
  }

  #[test]
  fn typed_conversion_moves_header_fields() {
    let s = Sample { id: "e1".into(), revision: 3, name: "main".into(), parent_id: None };
    let record = EntityRecord::from_typed(&s).unwrap();
    assert_eq!(record.id, "e1");
    assert_eq!(record.revision, 3);
    assert!(record.field("id").is_none());
    assert_eq!(record.field("name"), Some(&json!("main")));
    assert_eq!(record.to_typed::<Sample>().unwrap(), s);
  }

  #[test]
  fn wrong_kind_is_rejected() {
    let record = EntityRecord::with_id(EntityKind::Task, "t1");
    assert!(record.to_typed::<Sample>().is_err());
  }

  #[test]
  fn persistent_state_ignores_revision() {
    let mut a = EntityRecord::with_id(EntityKind::Task, "t1").with_field("name", "a");
    let before = a.persistent_state();
    a.revision = 7;
    assert_eq!(before, a.persistent_state());
    a.set_field("name", "b");
    assert_ne!(before, a.persistent_state());
  }
}
