// commands.rs
//
// Comandos del motor. Cada uno corre en un único `CommandContext`: todo lo
// que registra en la `DbSqlSession` se escribe en un solo flush al cerrar.
use crate::definition::{ProcessModel, UserTaskModel, END_EVENT_ID, START_EVENT_ID};
use crate::entities::{ActivityInstanceEntity, ByteArrayEntity, DeploymentEntity, ExecutionEntity,
                      HistoricActivityInstanceEntity, HistoricProcessInstanceEntity, HistoricTaskInstanceEntity,
                      HistoricTaskLogEntryEntity, HistoricVariableInstanceEntity, ProcessDefinitionEntity, TaskEntity};
use crate::history::HistoryManager;
use crate::managers::{EntityManager, ExecutionEntityManager, TaskEntityManager, VariableInstanceEntityManager};
use chrono::Utc;
use log::{debug, info};
use proc_command::{Command, CommandContext, CommandError, Result};
use proc_domain::DomainError;
use proc_persistence::DbSqlSession;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

const DEPLOYMENTS: EntityManager<DeploymentEntity> = EntityManager::new();
const RESOURCES: EntityManager<ByteArrayEntity> = EntityManager::new();
const DEFINITIONS: EntityManager<ProcessDefinitionEntity> = EntityManager::new();
const ACTIVITIES: EntityManager<ActivityInstanceEntity> = EntityManager::new();
const EXECUTIONS: ExecutionEntityManager = ExecutionEntityManager::new();
const TASKS: TaskEntityManager = TaskEntityManager::new();
const VARIABLES: VariableInstanceEntityManager = VariableInstanceEntityManager::new();

fn db(ctx: &mut CommandContext) -> Result<&mut DbSqlSession> {
  ctx.session::<DbSqlSession>()
}

fn not_found(what: &str, id: &str) -> CommandError {
  CommandError::NotFound(format!("{} {}", what, id))
}

fn latest_definition(session: &mut DbSqlSession, key: &str) -> Result<ProcessDefinitionEntity> {
  DEFINITIONS.find_by_field(session, "key", key)?
             .into_iter()
             .max_by_key(|d| d.version)
             .ok_or_else(|| not_found("definición de proceso", key))
}

fn load_model(session: &mut DbSqlSession, definition: &ProcessDefinitionEntity) -> Result<ProcessModel> {
  let resource_id = definition.resource_id
                              .as_deref()
                              .ok_or_else(|| CommandError::IllegalState(format!("{} sin recurso", definition.id)))?;
  let resource = RESOURCES.find_by_id(session, resource_id)?
                          .ok_or_else(|| not_found("recurso", resource_id))?;
  Ok(ProcessModel::from_json(&resource.bytes)?)
}

fn definition_of(session: &mut DbSqlSession, instance: &ExecutionEntity) -> Result<ProcessDefinitionEntity> {
  let def_id = instance.proc_def_id
                       .as_deref()
                       .ok_or_else(|| CommandError::IllegalState(format!("ejecución {} sin definición", instance.id)))?;
  DEFINITIONS.find_by_id(session, def_id)?
             .ok_or_else(|| not_found("definición de proceso", def_id))
}

/// Actividad instantánea (eventos de inicio y fin): empieza y termina en
/// el mismo momento.
fn record_instant_activity(session: &mut DbSqlSession,
                           history: &HistoryManager,
                           execution: &ExecutionEntity,
                           activity_id: &str,
                           activity_type: &str)
                           -> Result<ActivityInstanceEntity> {
  let now = Some(Utc::now());
  let activity = ActivityInstanceEntity { proc_def_id: execution.proc_def_id.clone(),
                                          proc_inst_id: execution.proc_inst_id.clone(),
                                          execution_id: Some(execution.id.clone()),
                                          activity_id: activity_id.to_string(),
                                          activity_type: activity_type.to_string(),
                                          start_time: now,
                                          end_time: now,
                                          ..Default::default() };
  let activity = ACTIVITIES.insert(session, &activity)?;
  history.record_activity_start(session, &activity)?;
  Ok(activity)
}

/// Crea la tarea de usuario, su instancia de actividad y sus vínculos de
/// candidatos.
fn enter_user_task(session: &mut DbSqlSession,
                   history: &HistoryManager,
                   execution: &ExecutionEntity,
                   model: &UserTaskModel)
                   -> Result<TaskEntity> {
  let now = Some(Utc::now());
  let task = TaskEntity { name: model.name.clone(),
                          task_def_key: model.id.clone(),
                          execution_id: Some(execution.id.clone()),
                          proc_inst_id: execution.proc_inst_id.clone(),
                          proc_def_id: execution.proc_def_id.clone(),
                          assignee: model.assignee.clone(),
                          priority: model.priority,
                          create_time: now,
                          ..Default::default() };
  let task = TASKS.insert(session, &task)?;
  history.record_task_created(session, &task)?;
  for group in &model.candidate_groups {
    TASKS.add_candidate_group(session, &task, group)?;
  }
  let activity = ActivityInstanceEntity { proc_def_id: execution.proc_def_id.clone(),
                                          proc_inst_id: execution.proc_inst_id.clone(),
                                          execution_id: Some(execution.id.clone()),
                                          activity_id: model.id.clone(),
                                          activity_name: Some(model.name.clone()),
                                          activity_type: "userTask".to_string(),
                                          task_id: Some(task.id.clone()),
                                          start_time: now,
                                          ..Default::default() };
  let activity = ACTIVITIES.insert(session, &activity)?;
  history.record_activity_start(session, &activity)?;
  Ok(task)
}

// -- despliegue --------------------------------------------------------------

/// Resultado de un despliegue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
  pub deployment: DeploymentEntity,
  pub definitions: Vec<ProcessDefinitionEntity>,
}

pub struct DeployCmd {
  pub name: String,
  pub models: Vec<ProcessModel>,
}

impl Command for DeployCmd {
  type Output = Deployment;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Deployment> {
    if self.models.is_empty() {
      return Err(CommandError::IllegalArgument("despliegue sin definiciones".to_string()));
    }
    for model in &self.models {
      model.validate()?;
    }
    let session = db(ctx)?;
    let deployment = DEPLOYMENTS.insert(session,
                                        &DeploymentEntity { name: self.name.clone(),
                                                            deploy_time: Some(Utc::now()),
                                                            ..Default::default() })?;
    let mut definitions = Vec::with_capacity(self.models.len());
    for model in &self.models {
      let bytes = serde_json::to_value(model).map_err(DomainError::from)?;
      let resource = RESOURCES.insert(session,
                                      &ByteArrayEntity { name: format!("{}.json", model.key),
                                                         deployment_id: Some(deployment.id.clone()),
                                                         bytes,
                                                         ..Default::default() })?;
      let version = DEFINITIONS.find_by_field(session, "key", &model.key)?
                               .iter()
                               .map(|d| d.version)
                               .max()
                               .unwrap_or(0)
                    + 1;
      let id = format!("{}:{}:{}", model.key, version, session.factory().id_generator().next_id());
      let definition = DEFINITIONS.insert(session,
                                          &ProcessDefinitionEntity { id,
                                                                     revision: 0,
                                                                     key: model.key.clone(),
                                                                     name: model.name.clone(),
                                                                     version,
                                                                     deployment_id: Some(deployment.id.clone()),
                                                                     resource_id: Some(resource.id) })?;
      info!("definición {} desplegada (versión {})", definition.key, definition.version);
      definitions.push(definition);
    }
    Ok(Deployment { deployment, definitions })
  }
}

pub struct ListProcessDefinitionsCmd {
  pub key: Option<String>,
}

impl Command for ListProcessDefinitionsCmd {
  type Output = Vec<ProcessDefinitionEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let mut definitions = match &self.key {
      Some(key) => DEFINITIONS.find_by_field(session, "key", key)?,
      None => DEFINITIONS.find_all(session)?,
    };
    definitions.sort_by(|a, b| (&a.key, a.version).cmp(&(&b.key, b.version)));
    Ok(definitions)
  }
}

// -- runtime -----------------------------------------------------------------

pub struct StartProcessInstanceCmd {
  pub process_definition_key: String,
  pub business_key: Option<String>,
  pub variables: Map<String, JsonValue>,
  pub history: HistoryManager,
}

impl Command for StartProcessInstanceCmd {
  type Output = ExecutionEntity;

  fn execute(&self, ctx: &mut CommandContext) -> Result<ExecutionEntity> {
    let session = db(ctx)?;
    let history = &self.history;
    let definition = latest_definition(session, &self.process_definition_key)?;
    let model = load_model(session, &definition)?;
    let first = model.first_task()
                     .ok_or_else(|| CommandError::IllegalState(format!("{} no tiene tareas", definition.id)))?;

    let instance = EXECUTIONS.create_process_instance(session, &definition, self.business_key.clone())?;
    history.record_process_start(session, &instance)?;
    record_instant_activity(session, history, &instance, START_EVENT_ID, "startEvent")?;
    for (name, value) in &self.variables {
      VARIABLES.set_variable(session, &instance, name, value.clone(), history)?;
    }

    let execution = EXECUTIONS.create_child_execution(session, &instance, &first.id)?;
    let task = enter_user_task(session, history, &execution, first)?;
    debug!("instancia {} iniciada en la tarea {}", instance.id, task.id);
    Ok(instance)
  }
}

/// Resultado de completar una tarea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
  pub process_ended: bool,
  pub next_task: Option<TaskEntity>,
}

pub struct CompleteTaskCmd {
  pub task_id: String,
  pub variables: Map<String, JsonValue>,
  pub history: HistoryManager,
}

impl Command for CompleteTaskCmd {
  type Output = TaskCompletion;

  fn execute(&self, ctx: &mut CommandContext) -> Result<TaskCompletion> {
    let session = db(ctx)?;
    let history = &self.history;
    let task = TASKS.find_by_id(session, &self.task_id)?
                    .ok_or_else(|| not_found("tarea", &self.task_id))?;
    let execution_id = task.execution_id
                           .clone()
                           .ok_or_else(|| CommandError::IllegalState(format!("tarea {} sin ejecución", task.id)))?;
    let mut execution = EXECUTIONS.find_by_id(session, &execution_id)?
                                  .ok_or_else(|| not_found("ejecución", &execution_id))?;
    let instance_id = execution.proc_inst_id.clone().unwrap_or_else(|| execution.id.clone());
    let instance = EXECUTIONS.find_by_id(session, &instance_id)?
                             .ok_or_else(|| not_found("instancia de proceso", &instance_id))?;

    for (name, value) in &self.variables {
      VARIABLES.set_variable(session, &instance, name, value.clone(), history)?;
    }
    for mut activity in ACTIVITIES.find_by_field(session, "task_id", &task.id)? {
      activity.end_time = Some(Utc::now());
      ACTIVITIES.update(session, &activity)?;
      history.record_activity_end(session, &activity)?;
    }
    TASKS.delete_task(session, &task, None, history)?;

    let definition = definition_of(session, &instance)?;
    let model = load_model(session, &definition)?;
    match model.next_task(&task.task_def_key) {
      Some(next) => {
        execution.activity_id = Some(next.id.clone());
        EXECUTIONS.update(session, &execution)?;
        let next_task = enter_user_task(session, history, &execution, next)?;
        Ok(TaskCompletion { process_ended: false, next_task: Some(next_task) })
      }
      None => {
        record_instant_activity(session, history, &execution, END_EVENT_ID, "endEvent")?;
        EXECUTIONS.delete_process_instance_cascade(session, &instance_id, None, history)?;
        info!("instancia {} finalizada", instance_id);
        Ok(TaskCompletion { process_ended: true, next_task: None })
      }
    }
  }
}

pub struct ClaimTaskCmd {
  pub task_id: String,
  pub user_id: String,
  pub history: HistoryManager,
}

impl Command for ClaimTaskCmd {
  type Output = TaskEntity;

  fn execute(&self, ctx: &mut CommandContext) -> Result<TaskEntity> {
    let session = db(ctx)?;
    let mut task = TASKS.find_by_id(session, &self.task_id)?
                        .ok_or_else(|| not_found("tarea", &self.task_id))?;
    match task.assignee.as_deref() {
      Some(current) if current == self.user_id => return Ok(task),
      Some(current) => {
        return Err(CommandError::IllegalState(format!("la tarea {} ya fue reclamada por {}", task.id, current)))
      }
      None => {}
    }
    task.assignee = Some(self.user_id.clone());
    TASKS.update(session, &task)?;
    self.history.record_task_assignee(session, &task)?;
    Ok(task)
  }
}

pub struct SetVariablesCmd {
  pub execution_id: String,
  pub variables: Map<String, JsonValue>,
  pub history: HistoryManager,
}

impl Command for SetVariablesCmd {
  type Output = ();

  fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
    let session = db(ctx)?;
    let execution = EXECUTIONS.find_by_id(session, &self.execution_id)?
                              .ok_or_else(|| not_found("ejecución", &self.execution_id))?;
    for (name, value) in &self.variables {
      VARIABLES.set_variable(session, &execution, name, value.clone(), &self.history)?;
    }
    Ok(())
  }
}

pub struct GetVariablesCmd {
  pub execution_id: String,
}

impl Command for GetVariablesCmd {
  type Output = Map<String, JsonValue>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let execution = EXECUTIONS.find_by_id(session, &self.execution_id)?
                              .ok_or_else(|| not_found("ejecución", &self.execution_id))?;
    VARIABLES.visible_variables(session, &execution)
  }
}

pub struct DeleteProcessInstanceCmd {
  pub proc_inst_id: String,
  pub delete_reason: String,
  pub history: HistoryManager,
}

impl Command for DeleteProcessInstanceCmd {
  type Output = ();

  fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
    let session = db(ctx)?;
    EXECUTIONS.delete_process_instance_cascade(session, &self.proc_inst_id, Some(&self.delete_reason), &self.history)
  }
}

pub struct ListProcessInstancesCmd {
  pub process_definition_key: Option<String>,
}

impl Command for ListProcessInstancesCmd {
  type Output = Vec<ExecutionEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let Some(key) = &self.process_definition_key else {
      return EXECUTIONS.find_process_instances(session, None);
    };
    let mut out = Vec::new();
    for definition in DEFINITIONS.find_by_field(session, "key", key)? {
      out.extend(EXECUTIONS.find_process_instances(session, Some(&definition.id))?);
    }
    out.sort_by(|a, b| (a.start_time, &a.id).cmp(&(b.start_time, &b.id)));
    Ok(out)
  }
}

/// Filtro de tareas; los criterios presentes se combinan con AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
  pub proc_inst_id: Option<String>,
  pub assignee: Option<String>,
  pub candidate_group: Option<String>,
}

impl TaskQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn process_instance(mut self, id: impl Into<String>) -> Self {
    self.proc_inst_id = Some(id.into());
    self
  }

  pub fn assignee(mut self, user: impl Into<String>) -> Self {
    self.assignee = Some(user.into());
    self
  }

  pub fn candidate_group(mut self, group: impl Into<String>) -> Self {
    self.candidate_group = Some(group.into());
    self
  }
}

pub struct ListTasksCmd {
  pub query: TaskQuery,
}

impl Command for ListTasksCmd {
  type Output = Vec<TaskEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let q = &self.query;
    let mut tasks = if let Some(group) = &q.candidate_group {
      TASKS.find_by_candidate_group(session, group)?
    } else if let Some(pid) = &q.proc_inst_id {
      TASKS.find_by_process_instance(session, pid)?
    } else if let Some(user) = &q.assignee {
      TASKS.find_by_assignee(session, user)?
    } else {
      TASKS.find_all(session)?
    };
    tasks.retain(|t| {
           q.proc_inst_id.as_ref().map_or(true, |p| t.proc_inst_id.as_ref() == Some(p))
           && q.assignee.as_ref().map_or(true, |a| t.assignee.as_ref() == Some(a))
         });
    Ok(tasks)
  }
}

// -- historia ----------------------------------------------------------------

pub struct HistoricProcessInstancesCmd {
  /// `Some(true)` sólo terminadas, `Some(false)` sólo en curso.
  pub finished: Option<bool>,
}

impl Command for HistoricProcessInstancesCmd {
  type Output = Vec<HistoricProcessInstanceEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let mut out = EntityManager::<HistoricProcessInstanceEntity>::new().find_all(session)?;
    if let Some(finished) = self.finished {
      out.retain(|h| h.end_time.is_some() == finished);
    }
    out.sort_by(|a, b| (a.start_time, &a.id).cmp(&(b.start_time, &b.id)));
    Ok(out)
  }
}

pub struct HistoricActivityInstancesCmd {
  pub proc_inst_id: String,
}

impl Command for HistoricActivityInstancesCmd {
  type Output = Vec<HistoricActivityInstanceEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let mut out = EntityManager::<HistoricActivityInstanceEntity>::new().find_by_field(session,
                                                                                        "proc_inst_id",
                                                                                        &self.proc_inst_id)?;
    // los eventos instantáneos empiezan y terminan a la vez: desempata el fin
    out.sort_by(|a, b| (a.start_time, a.end_time, &a.id).cmp(&(b.start_time, b.end_time, &b.id)));
    Ok(out)
  }
}

pub struct HistoricTaskInstancesCmd {
  pub proc_inst_id: Option<String>,
}

impl Command for HistoricTaskInstancesCmd {
  type Output = Vec<HistoricTaskInstanceEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let manager = EntityManager::<HistoricTaskInstanceEntity>::new();
    let mut out = match &self.proc_inst_id {
      Some(pid) => manager.find_by_field(session, "proc_inst_id", pid)?,
      None => manager.find_all(session)?,
    };
    out.sort_by(|a, b| (a.start_time, &a.id).cmp(&(b.start_time, &b.id)));
    Ok(out)
  }
}

pub struct HistoricVariableInstancesCmd {
  pub proc_inst_id: String,
}

impl Command for HistoricVariableInstancesCmd {
  type Output = Vec<HistoricVariableInstanceEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let mut out = EntityManager::<HistoricVariableInstanceEntity>::new().find_by_field(session,
                                                                                        "proc_inst_id",
                                                                                        &self.proc_inst_id)?;
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
  }
}

pub struct HistoricTaskLogCmd {
  pub task_id: String,
}

impl Command for HistoricTaskLogCmd {
  type Output = Vec<HistoricTaskLogEntryEntity>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    let session = db(ctx)?;
    let mut out = EntityManager::<HistoricTaskLogEntryEntity>::new().find_by_field(session, "task_id", &self.task_id)?;
    out.sort_by(|a, b| (a.time_stamp, &a.id).cmp(&(b.time_stamp, &b.id)));
    Ok(out)
  }
}

pub struct DeleteHistoricProcessInstanceCmd {
  pub proc_inst_id: String,
  pub history: HistoryManager,
}

impl Command for DeleteHistoricProcessInstanceCmd {
  type Output = ();

  fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
    let session = db(ctx)?;
    if EXECUTIONS.find_by_id(session, &self.proc_inst_id)?.is_some() {
      return Err(CommandError::IllegalState(format!("la instancia {} sigue en ejecución", self.proc_inst_id)));
    }
    if EntityManager::<HistoricProcessInstanceEntity>::new().find_by_id(session, &self.proc_inst_id)?
                                                            .is_none()
    {
      return Err(not_found("instancia histórica", &self.proc_inst_id));
    }
    self.history.delete_historic_process_instance(session, &self.proc_inst_id)
  }
}
