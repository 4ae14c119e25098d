// criteria.rs
use crate::EntityRecord;
use serde::{Deserialize, Serialize};

/// Criterio de selección/borrado masivo: `field = value`. El campo `id` se
/// resuelve contra la cabecera del registro.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Criteria {
  pub field: String,
  pub value: String,
}

impl Criteria {
  pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
    Self { field: field.into(), value: value.into() }
  }

  pub fn matches(&self, record: &EntityRecord) -> bool {
    record.field_str(&self.field) == Some(self.value.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::EntityKind;

  #[test]
  fn matches_fields_and_id() {
    let r = EntityRecord::with_id(EntityKind::Task, "t1").with_field("proc_inst_id", "p1");
    assert!(Criteria::field_equals("proc_inst_id", "p1").matches(&r));
    assert!(Criteria::field_equals("id", "t1").matches(&r));
    assert!(!Criteria::field_equals("proc_inst_id", "p2").matches(&r));
    assert!(!Criteria::field_equals("execution_id", "p1").matches(&r));
  }
}
