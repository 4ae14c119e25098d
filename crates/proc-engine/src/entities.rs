// entities.rs
//
// Representación tipada de las entidades que escribe el motor. Cada tipo se
// convierte a `EntityRecord` para pasar por la sesión; los campos con
// nombre de columna FK (`proc_inst_id`, `execution_id`, ...) deben coincidir
// con las claves foráneas declaradas.
use chrono::{DateTime, Utc};
use proc_domain::{EntityKind, TypedEntity};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

macro_rules! typed_entity {
  ($ty:ty, $kind:expr) => {
    impl TypedEntity for $ty {
      const KIND: EntityKind = $kind;

      fn id(&self) -> &str {
        &self.id
      }
    }
  };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeploymentEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub deploy_time: Option<DateTime<Utc>>,
}
typed_entity!(DeploymentEntity, EntityKind::Deployment);

/// Recurso de un despliegue: el JSON de la definición de proceso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ByteArrayEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub deployment_id: Option<String>,
  pub bytes: JsonValue,
}
typed_entity!(ByteArrayEntity, EntityKind::ByteArray);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessDefinitionEntity {
  pub id: String,
  pub revision: i32,
  pub key: String,
  pub name: String,
  pub version: i32,
  pub deployment_id: Option<String>,
  pub resource_id: Option<String>,
}
typed_entity!(ProcessDefinitionEntity, EntityKind::ProcessDefinition);

/// Ejecución. La instancia de proceso es la ejecución raíz: su
/// `proc_inst_id` es su propio id y no tiene `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionEntity {
  pub id: String,
  pub revision: i32,
  pub proc_inst_id: Option<String>,
  pub parent_id: Option<String>,
  pub proc_def_id: Option<String>,
  pub business_key: Option<String>,
  pub activity_id: Option<String>,
  pub is_process_instance: bool,
  pub is_active: bool,
  pub start_time: Option<DateTime<Utc>>,
}
typed_entity!(ExecutionEntity, EntityKind::Execution);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActivityInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub proc_def_id: Option<String>,
  pub proc_inst_id: Option<String>,
  pub execution_id: Option<String>,
  pub activity_id: String,
  pub activity_name: Option<String>,
  pub activity_type: String,
  pub task_id: Option<String>,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
}
typed_entity!(ActivityInstanceEntity, EntityKind::ActivityInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub task_def_key: String,
  pub execution_id: Option<String>,
  pub proc_inst_id: Option<String>,
  pub proc_def_id: Option<String>,
  pub assignee: Option<String>,
  pub priority: i32,
  pub create_time: Option<DateTime<Utc>>,
}
typed_entity!(TaskEntity, EntityKind::Task);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IdentityLinkEntity {
  pub id: String,
  pub revision: i32,
  pub link_type: String,
  pub user_id: Option<String>,
  pub group_id: Option<String>,
  pub task_id: Option<String>,
  pub proc_inst_id: Option<String>,
  pub proc_def_id: Option<String>,
}
typed_entity!(IdentityLinkEntity, EntityKind::IdentityLink);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VariableInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub var_type: String,
  pub execution_id: Option<String>,
  pub proc_inst_id: Option<String>,
  pub value: JsonValue,
}
typed_entity!(VariableInstanceEntity, EntityKind::VariableInstance);

impl VariableInstanceEntity {
  /// Nombre del tipo de una variable a partir de su valor JSON.
  pub fn type_name(value: &JsonValue) -> &'static str {
    match value {
      JsonValue::Null => "null",
      JsonValue::Bool(_) => "boolean",
      JsonValue::Number(n) if n.is_i64() => "long",
      JsonValue::Number(_) => "double",
      JsonValue::String(_) => "string",
      JsonValue::Array(_) | JsonValue::Object(_) => "json",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricProcessInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub proc_inst_id: String,
  pub proc_def_id: Option<String>,
  pub business_key: Option<String>,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
  pub delete_reason: Option<String>,
}
typed_entity!(HistoricProcessInstanceEntity, EntityKind::HistoricProcessInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricActivityInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub proc_inst_id: Option<String>,
  pub execution_id: Option<String>,
  pub activity_id: String,
  pub activity_type: String,
  pub task_id: Option<String>,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
}
typed_entity!(HistoricActivityInstanceEntity, EntityKind::HistoricActivityInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricTaskInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub task_def_key: String,
  pub proc_inst_id: Option<String>,
  pub assignee: Option<String>,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
  pub delete_reason: Option<String>,
}
typed_entity!(HistoricTaskInstanceEntity, EntityKind::HistoricTaskInstance);

/// Entrada del log de una tarea; no lleva revisión ni se actualiza.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricTaskLogEntryEntity {
  pub id: String,
  pub revision: i32,
  pub task_id: String,
  pub proc_inst_id: Option<String>,
  pub log_type: String,
  pub user_id: Option<String>,
  pub time_stamp: Option<DateTime<Utc>>,
  pub data: JsonValue,
}
typed_entity!(HistoricTaskLogEntryEntity, EntityKind::HistoricTaskLogEntry);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricVariableInstanceEntity {
  pub id: String,
  pub revision: i32,
  pub name: String,
  pub var_type: String,
  pub proc_inst_id: Option<String>,
  pub execution_id: Option<String>,
  pub value: JsonValue,
  pub last_updated_time: Option<DateTime<Utc>>,
}
typed_entity!(HistoricVariableInstanceEntity, EntityKind::HistoricVariableInstance);

/// Cada cambio de valor de una variable (nivel de historia `full`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricDetailEntity {
  pub id: String,
  pub revision: i32,
  pub detail_type: String,
  pub name: String,
  pub proc_inst_id: Option<String>,
  pub execution_id: Option<String>,
  pub value: JsonValue,
  pub time: Option<DateTime<Utc>>,
}
typed_entity!(HistoricDetailEntity, EntityKind::HistoricDetail);

#[cfg(test)]
mod tests {
  use super::*;
  use proc_domain::EntityRecord;
  use serde_json::json;

  #[test]
  fn fk_fields_land_in_the_record() {
    let task = TaskEntity { id: "t1".into(),
                            name: "Revisar".into(),
                            task_def_key: "review".into(),
                            execution_id: Some("e2".into()),
                            proc_inst_id: Some("e1".into()),
                            ..Default::default() };
    let record = EntityRecord::from_typed(&task).unwrap();
    assert_eq!(record.kind, EntityKind::Task);
    assert_eq!(record.field_str("execution_id"), Some("e2"));
    assert_eq!(record.field_str("proc_inst_id"), Some("e1"));
    assert_eq!(record.to_typed::<TaskEntity>().unwrap(), task);
  }

  #[test]
  fn variable_type_names() {
    assert_eq!(VariableInstanceEntity::type_name(&json!(3)), "long");
    assert_eq!(VariableInstanceEntity::type_name(&json!(1.5)), "double");
    assert_eq!(VariableInstanceEntity::type_name(&json!({"a": 1})), "json");
    assert_eq!(VariableInstanceEntity::type_name(&json!("x")), "string");
  }
}
