// managers.rs
//
// Gestores de entidades: traducen operaciones tipadas a registros de la
// sesión. No guardan estado; todo vive en la `DbSqlSession` de la
// transacción.
use crate::entities::{ExecutionEntity, IdentityLinkEntity, ProcessDefinitionEntity, TaskEntity,
                      VariableInstanceEntity};
use crate::history::HistoryManager;
use chrono::Utc;
use log::debug;
use proc_command::Result;
use proc_domain::{Criteria, EntityKind, EntityRecord, TypedEntity};
use proc_persistence::DbSqlSession;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::marker::PhantomData;

/// Operaciones genéricas sobre un tipo de entidad.
pub struct EntityManager<T> {
  _entity: PhantomData<fn() -> T>,
}

impl<T: TypedEntity> EntityManager<T> {
  pub const fn new() -> Self {
    Self { _entity: PhantomData }
  }

  /// Registra la entidad y devuelve la versión con id y revisión asignados.
  pub fn insert(&self, session: &mut DbSqlSession, entity: &T) -> Result<T> {
    let mut record = EntityRecord::from_typed(entity)?;
    record.id = session.insert(record.clone())?;
    if record.revision == 0 {
      record.revision = 1;
    }
    Ok(record.to_typed()?)
  }

  pub fn find_by_id(&self, session: &mut DbSqlSession, id: &str) -> Result<Option<T>> {
    match session.select_by_id(T::KIND, id)? {
      Some(record) => Ok(Some(record.to_typed()?)),
      None => Ok(None),
    }
  }

  pub fn update(&self, session: &mut DbSqlSession, entity: &T) -> Result<()> {
    session.update(EntityRecord::from_typed(entity)?)
  }

  pub fn delete(&self, session: &mut DbSqlSession, id: &str) -> Result<()> {
    session.delete_by_id(T::KIND, id)
  }

  pub fn find_by_field(&self, session: &mut DbSqlSession, field: &str, value: &str) -> Result<Vec<T>> {
    let rows = session.select_list(T::KIND, Some(&Criteria::field_equals(field, value)))?;
    rows.iter().map(|r| r.to_typed().map_err(Into::into)).collect()
  }

  pub fn find_all(&self, session: &mut DbSqlSession) -> Result<Vec<T>> {
    let rows = session.select_list(T::KIND, None)?;
    rows.iter().map(|r| r.to_typed().map_err(Into::into)).collect()
  }

  pub fn bulk_delete_by_field(&self, session: &mut DbSqlSession, field: &str, value: &str) -> Result<()> {
    session.bulk_delete(T::KIND, Criteria::field_equals(field, value))
  }
}

impl<T: TypedEntity> Default for EntityManager<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Tipos de trabajo/suscripción que cuelgan de una instancia de proceso y
/// se borran en bloque con ella.
const PROCESS_SCOPED_BULK_KINDS: [EntityKind; 6] = [EntityKind::EventSubscription,
                                                    EntityKind::Job,
                                                    EntityKind::TimerJob,
                                                    EntityKind::SuspendedJob,
                                                    EntityKind::DeadLetterJob,
                                                    EntityKind::ActivityInstance];

pub struct ExecutionEntityManager {
  entities: EntityManager<ExecutionEntity>,
}

impl ExecutionEntityManager {
  pub const fn new() -> Self {
    Self { entities: EntityManager::new() }
  }

  pub fn find_by_id(&self, session: &mut DbSqlSession, id: &str) -> Result<Option<ExecutionEntity>> {
    self.entities.find_by_id(session, id)
  }

  pub fn update(&self, session: &mut DbSqlSession, execution: &ExecutionEntity) -> Result<()> {
    self.entities.update(session, execution)
  }

  /// Crea la ejecución raíz. El id se genera antes de insertar porque
  /// `proc_inst_id` apunta a la propia fila.
  pub fn create_process_instance(&self,
                                 session: &mut DbSqlSession,
                                 definition: &ProcessDefinitionEntity,
                                 business_key: Option<String>)
                                 -> Result<ExecutionEntity> {
    let id = session.factory().id_generator().next_id();
    let instance = ExecutionEntity { id: id.clone(),
                                     revision: 0,
                                     proc_inst_id: Some(id),
                                     parent_id: None,
                                     proc_def_id: Some(definition.id.clone()),
                                     business_key,
                                     activity_id: None,
                                     is_process_instance: true,
                                     is_active: true,
                                     start_time: Some(Utc::now()) };
    self.entities.insert(session, &instance)
  }

  pub fn create_child_execution(&self,
                                session: &mut DbSqlSession,
                                parent: &ExecutionEntity,
                                activity_id: &str)
                                -> Result<ExecutionEntity> {
    let child = ExecutionEntity { proc_inst_id: parent.proc_inst_id.clone(),
                                  parent_id: Some(parent.id.clone()),
                                  proc_def_id: parent.proc_def_id.clone(),
                                  activity_id: Some(activity_id.to_string()),
                                  is_active: true,
                                  start_time: Some(Utc::now()),
                                  ..Default::default() };
    self.entities.insert(session, &child)
  }

  pub fn find_child_executions(&self, session: &mut DbSqlSession, parent_id: &str) -> Result<Vec<ExecutionEntity>> {
    self.entities.find_by_field(session, "parent_id", parent_id)
  }

  /// Todas las ejecuciones raíz, opcionalmente de una definición.
  pub fn find_process_instances(&self,
                                session: &mut DbSqlSession,
                                proc_def_id: Option<&str>)
                                -> Result<Vec<ExecutionEntity>> {
    let mut instances: Vec<ExecutionEntity> = match proc_def_id {
      Some(def) => self.entities.find_by_field(session, "proc_def_id", def)?,
      None => self.entities.find_all(session)?,
    };
    instances.retain(|e| e.is_process_instance);
    instances.sort_by(|a, b| (a.start_time, &a.id).cmp(&(b.start_time, &b.id)));
    Ok(instances)
  }

  /// Borra una instancia de proceso y todo lo que cuelga de ella:
  /// tareas (con sus vínculos), vínculos de la instancia, variables,
  /// trabajos y suscripciones, instancias de actividad, ejecuciones hijas
  /// de la más profunda a la raíz y finalmente la instancia.
  pub fn delete_process_instance_cascade(&self,
                                         session: &mut DbSqlSession,
                                         proc_inst_id: &str,
                                         delete_reason: Option<&str>,
                                         history: &HistoryManager)
                                         -> Result<()> {
    let instance = self.entities
                       .find_by_id(session, proc_inst_id)?
                       .filter(|e| e.is_process_instance)
                       .ok_or_else(|| proc_command::CommandError::NotFound(format!("instancia de proceso {}",
                                                                                   proc_inst_id)))?;
    let tasks = TaskEntityManager::new();
    for task in tasks.find_by_process_instance(session, proc_inst_id)? {
      tasks.delete_task(session, &task, delete_reason, history)?;
    }

    let links = EntityManager::<IdentityLinkEntity>::new();
    for link in links.find_by_field(session, "proc_inst_id", proc_inst_id)? {
      links.delete(session, &link.id)?;
    }

    let variables = EntityManager::<VariableInstanceEntity>::new();
    for variable in variables.find_by_field(session, "proc_inst_id", proc_inst_id)? {
      variables.delete(session, &variable.id)?;
    }

    history.record_open_activities_end(session, proc_inst_id)?;
    for kind in PROCESS_SCOPED_BULK_KINDS {
      session.bulk_delete(kind, Criteria::field_equals("proc_inst_id", proc_inst_id))?;
    }

    let mut executions = self.entities.find_by_field(session, "proc_inst_id", proc_inst_id)?;
    executions.retain(|e| e.id != instance.id);
    let depths = execution_depths(&executions, &instance.id);
    executions.sort_by(|a, b| depths.get(&b.id).cmp(&depths.get(&a.id)).then_with(|| a.id.cmp(&b.id)));
    for execution in &executions {
      self.entities.delete(session, &execution.id)?;
    }
    self.entities.delete(session, &instance.id)?;
    history.record_process_end(session, proc_inst_id, delete_reason)?;
    debug!("instancia {} borrada con {} ejecuciones hijas", proc_inst_id, executions.len());
    Ok(())
  }
}

impl Default for ExecutionEntityManager {
  fn default() -> Self {
    Self::new()
  }
}

/// Profundidad de cada ejecución bajo `root` siguiendo `parent_id`.
fn execution_depths(executions: &[ExecutionEntity], root: &str) -> HashMap<String, usize> {
  let parents: HashMap<&str, Option<&str>> =
    executions.iter().map(|e| (e.id.as_str(), e.parent_id.as_deref())).collect();
  let mut depths = HashMap::new();
  for execution in executions {
    let mut depth = 0;
    let mut current = execution.parent_id.as_deref();
    while let Some(parent) = current {
      depth += 1;
      if parent == root || depth > executions.len() {
        break;
      }
      current = parents.get(parent).copied().flatten();
    }
    depths.insert(execution.id.clone(), depth);
  }
  depths
}

pub struct TaskEntityManager {
  entities: EntityManager<TaskEntity>,
}

impl TaskEntityManager {
  pub const fn new() -> Self {
    Self { entities: EntityManager::new() }
  }

  pub fn insert(&self, session: &mut DbSqlSession, task: &TaskEntity) -> Result<TaskEntity> {
    self.entities.insert(session, task)
  }

  pub fn find_by_id(&self, session: &mut DbSqlSession, id: &str) -> Result<Option<TaskEntity>> {
    self.entities.find_by_id(session, id)
  }

  pub fn update(&self, session: &mut DbSqlSession, task: &TaskEntity) -> Result<()> {
    self.entities.update(session, task)
  }

  pub fn find_by_process_instance(&self, session: &mut DbSqlSession, proc_inst_id: &str) -> Result<Vec<TaskEntity>> {
    Ok(sorted(self.entities.find_by_field(session, "proc_inst_id", proc_inst_id)?))
  }

  pub fn find_by_assignee(&self, session: &mut DbSqlSession, assignee: &str) -> Result<Vec<TaskEntity>> {
    Ok(sorted(self.entities.find_by_field(session, "assignee", assignee)?))
  }

  pub fn find_all(&self, session: &mut DbSqlSession) -> Result<Vec<TaskEntity>> {
    Ok(sorted(self.entities.find_all(session)?))
  }

  /// Tareas con un vínculo `candidate` hacia el grupo.
  pub fn find_by_candidate_group(&self, session: &mut DbSqlSession, group: &str) -> Result<Vec<TaskEntity>> {
    let links = EntityManager::<IdentityLinkEntity>::new().find_by_field(session, "group_id", group)?;
    let mut out: Vec<TaskEntity> = Vec::new();
    for link in links.into_iter().filter(|l| l.link_type == "candidate") {
      let Some(task_id) = link.task_id.as_deref() else {
        continue;
      };
      if out.iter().any(|t| t.id == task_id) {
        continue;
      }
      if let Some(task) = self.entities.find_by_id(session, task_id)? {
        out.push(task);
      }
    }
    Ok(sorted(out))
  }

  pub fn add_candidate_group(&self, session: &mut DbSqlSession, task: &TaskEntity, group: &str) -> Result<()> {
    let link = IdentityLinkEntity { link_type: "candidate".to_string(),
                                    group_id: Some(group.to_string()),
                                    task_id: Some(task.id.clone()),
                                    ..Default::default() };
    EntityManager::<IdentityLinkEntity>::new().insert(session, &link)?;
    Ok(())
  }

  /// Borra la tarea y sus vínculos de identidad, cerrando su historia.
  pub fn delete_task(&self,
                     session: &mut DbSqlSession,
                     task: &TaskEntity,
                     delete_reason: Option<&str>,
                     history: &HistoryManager)
                     -> Result<()> {
    let links = EntityManager::<IdentityLinkEntity>::new();
    for link in links.find_by_field(session, "task_id", &task.id)? {
      links.delete(session, &link.id)?;
    }
    history.record_task_end(session, task, delete_reason)?;
    self.entities.delete(session, &task.id)
  }
}

impl Default for TaskEntityManager {
  fn default() -> Self {
    Self::new()
  }
}

fn sorted(mut tasks: Vec<TaskEntity>) -> Vec<TaskEntity> {
  tasks.sort_by(|a, b| (a.create_time, &a.id).cmp(&(b.create_time, &b.id)));
  tasks
}

pub struct VariableInstanceEntityManager {
  entities: EntityManager<VariableInstanceEntity>,
}

impl VariableInstanceEntityManager {
  pub const fn new() -> Self {
    Self { entities: EntityManager::new() }
  }

  pub fn find_by_execution(&self, session: &mut DbSqlSession, execution_id: &str) -> Result<Vec<VariableInstanceEntity>> {
    self.entities.find_by_field(session, "execution_id", execution_id)
  }

  /// Crea o actualiza la variable `name` en el ámbito de la ejecución.
  pub fn set_variable(&self,
                      session: &mut DbSqlSession,
                      execution: &ExecutionEntity,
                      name: &str,
                      value: JsonValue,
                      history: &HistoryManager)
                      -> Result<VariableInstanceEntity> {
    let existing = self.find_by_execution(session, &execution.id)?.into_iter().find(|v| v.name == name);
    let variable = match existing {
      Some(mut current) => {
        if current.value == value {
          return Ok(current);
        }
        current.var_type = VariableInstanceEntity::type_name(&value).to_string();
        current.value = value;
        self.entities.update(session, &current)?;
        current
      }
      None => {
        let created = VariableInstanceEntity { name: name.to_string(),
                                               var_type: VariableInstanceEntity::type_name(&value).to_string(),
                                               execution_id: Some(execution.id.clone()),
                                               proc_inst_id: execution.proc_inst_id.clone(),
                                               value,
                                               ..Default::default() };
        self.entities.insert(session, &created)?
      }
    };
    history.record_variable_update(session, &variable)?;
    Ok(variable)
  }

  /// Variables visibles desde la ejecución: las de la instancia de proceso
  /// con las locales encima.
  pub fn visible_variables(&self, session: &mut DbSqlSession, execution: &ExecutionEntity) -> Result<Map<String, JsonValue>> {
    let mut out = Map::new();
    if let Some(root) = execution.proc_inst_id.as_deref().filter(|root| *root != execution.id) {
      for v in self.find_by_execution(session, root)? {
        out.insert(v.name, v.value);
      }
    }
    for v in self.find_by_execution(session, &execution.id)? {
      out.insert(v.name, v.value);
    }
    Ok(out)
  }
}

impl Default for VariableInstanceEntityManager {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exec(id: &str, parent: Option<&str>) -> ExecutionEntity {
    ExecutionEntity { id: id.into(),
                      parent_id: parent.map(str::to_string),
                      proc_inst_id: Some("root".into()),
                      ..Default::default() }
  }

  #[test]
  fn depths_follow_parent_chain() {
    let executions = vec![exec("a", Some("root")), exec("b", Some("a")), exec("c", Some("b"))];
    let depths = execution_depths(&executions, "root");
    assert_eq!(depths["a"], 1);
    assert_eq!(depths["b"], 2);
    assert_eq!(depths["c"], 3);
  }

  #[test]
  fn broken_chains_terminate() {
    let executions = vec![exec("a", Some("b")), exec("b", Some("a"))];
    let depths = execution_depths(&executions, "root");
    assert!(depths["a"] <= 3);
  }
}
