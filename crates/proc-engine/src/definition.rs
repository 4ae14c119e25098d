// definition.rs
use proc_domain::DomainError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const START_EVENT_ID: &str = "start";
pub const END_EVENT_ID: &str = "end";

/// Tarea de usuario de un proceso lineal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTaskModel {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub assignee: Option<String>,
  #[serde(default)]
  pub candidate_groups: Vec<String>,
  #[serde(default = "default_priority")]
  pub priority: i32,
}

fn default_priority() -> i32 {
  50
}

impl UserTaskModel {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self { id: id.into(),
           name: name.into(),
           assignee: None,
           candidate_groups: Vec::new(),
           priority: default_priority() }
  }

  pub fn assignee(mut self, user: impl Into<String>) -> Self {
    self.assignee = Some(user.into());
    self
  }

  pub fn candidate_group(mut self, group: impl Into<String>) -> Self {
    self.candidate_groups.push(group.into());
    self
  }
}

/// Definición de proceso: inicio, tareas de usuario en secuencia y fin.
/// Se guarda como JSON en el recurso del despliegue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModel {
  pub key: String,
  pub name: String,
  pub tasks: Vec<UserTaskModel>,
}

fn valid_identifier(s: &str) -> bool {
  !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl ProcessModel {
  pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
    Self { key: key.into(), name: name.into(), tasks: Vec::new() }
  }

  pub fn user_task(mut self, task: UserTaskModel) -> Self {
    self.tasks.push(task);
    self
  }

  pub fn validate(&self) -> Result<(), DomainError> {
    if !valid_identifier(&self.key) {
      return Err(DomainError::Validation(format!("clave de proceso inválida: '{}'", self.key)));
    }
    if self.tasks.is_empty() {
      return Err(DomainError::Validation(format!("el proceso {} no tiene tareas", self.key)));
    }
    let mut seen = HashSet::new();
    for task in &self.tasks {
      if !valid_identifier(&task.id) || task.id == START_EVENT_ID || task.id == END_EVENT_ID {
        return Err(DomainError::Validation(format!("id de tarea inválido en {}: '{}'", self.key, task.id)));
      }
      if !seen.insert(task.id.as_str()) {
        return Err(DomainError::Validation(format!("tarea duplicada en {}: {}", self.key, task.id)));
      }
    }
    Ok(())
  }

  pub fn first_task(&self) -> Option<&UserTaskModel> {
    self.tasks.first()
  }

  pub fn task(&self, id: &str) -> Option<&UserTaskModel> {
    self.tasks.iter().find(|t| t.id == id)
  }

  /// Tarea siguiente a `id`; `None` si es la última (o no existe).
  pub fn next_task(&self, id: &str) -> Option<&UserTaskModel> {
    let position = self.tasks.iter().position(|t| t.id == id)?;
    self.tasks.get(position + 1)
  }

  pub fn from_json(value: &serde_json::Value) -> Result<Self, DomainError> {
    let model: ProcessModel = serde_json::from_value(value.clone())?;
    model.validate()?;
    Ok(model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn approval() -> ProcessModel {
    ProcessModel::new("approval", "Aprobación").user_task(UserTaskModel::new("draft", "Redactar"))
                                               .user_task(UserTaskModel::new("review", "Revisar").candidate_group("managers"))
  }

  #[test]
  fn navigation_is_linear() {
    let m = approval();
    assert_eq!(m.first_task().map(|t| t.id.as_str()), Some("draft"));
    assert_eq!(m.next_task("draft").map(|t| t.id.as_str()), Some("review"));
    assert!(m.next_task("review").is_none());
    assert!(m.next_task("missing").is_none());
  }

  #[test]
  fn invalid_models_are_rejected() {
    assert!(ProcessModel::new("", "x").user_task(UserTaskModel::new("a", "A")).validate().is_err());
    assert!(ProcessModel::new("k", "x").validate().is_err());
    let dup = ProcessModel::new("k", "x").user_task(UserTaskModel::new("a", "A"))
                                         .user_task(UserTaskModel::new("a", "B"));
    assert!(dup.validate().is_err());
    assert!(ProcessModel::new("k", "x").user_task(UserTaskModel::new("end", "E")).validate().is_err());
  }

  #[test]
  fn json_defaults_apply() {
    let m = ProcessModel::from_json(&json!({
      "key": "k",
      "name": "n",
      "tasks": [{"id": "a", "name": "A"}]
    })).unwrap();
    assert_eq!(m.tasks[0].priority, 50);
    assert!(m.tasks[0].candidate_groups.is_empty());
  }
}
