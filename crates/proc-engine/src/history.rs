// history.rs
use crate::entities::{ActivityInstanceEntity, ExecutionEntity, HistoricActivityInstanceEntity, HistoricDetailEntity,
                      HistoricProcessInstanceEntity, HistoricTaskInstanceEntity, HistoricTaskLogEntryEntity,
                      HistoricVariableInstanceEntity, TaskEntity, VariableInstanceEntity};
use crate::errors::EngineError;
use crate::managers::EntityManager;
use chrono::Utc;
use proc_command::Result;
use proc_domain::EntityKind;
use proc_persistence::DbSqlSession;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Cantidad de historia que se escribe. Cada nivel incluye los anteriores.
///
/// - `Activity`: instancias de proceso y de actividad.
/// - `Audit`: además tareas y último valor de cada variable.
/// - `Full`: además cada cambio de variable y el log de tareas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum HistoryLevel {
  None,
  Activity,
  #[default]
  Audit,
  Full,
}

impl HistoryLevel {
  pub fn name(&self) -> &'static str {
    match self {
      HistoryLevel::None => "none",
      HistoryLevel::Activity => "activity",
      HistoryLevel::Audit => "audit",
      HistoryLevel::Full => "full",
    }
  }

  pub fn is_at_least(self, level: HistoryLevel) -> bool {
    self >= level
  }
}

impl fmt::Display for HistoryLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for HistoryLevel {
  type Err = EngineError;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "none" => Ok(HistoryLevel::None),
      "activity" => Ok(HistoryLevel::Activity),
      "audit" => Ok(HistoryLevel::Audit),
      "full" => Ok(HistoryLevel::Full),
      other => Err(EngineError::Config(format!("nivel de historia desconocido: {}", other))),
    }
  }
}

/// Escribe las filas históricas según el nivel configurado. Las filas
/// históricas comparten id con su entidad de runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryManager {
  level: HistoryLevel,
}

const HISTORIC_PROCESSES: EntityManager<HistoricProcessInstanceEntity> = EntityManager::new();
const HISTORIC_ACTIVITIES: EntityManager<HistoricActivityInstanceEntity> = EntityManager::new();
const HISTORIC_TASKS: EntityManager<HistoricTaskInstanceEntity> = EntityManager::new();
const HISTORIC_VARIABLES: EntityManager<HistoricVariableInstanceEntity> = EntityManager::new();

impl HistoryManager {
  pub fn new(level: HistoryLevel) -> Self {
    Self { level }
  }

  pub fn level(&self) -> HistoryLevel {
    self.level
  }

  fn enabled(&self, level: HistoryLevel) -> bool {
    self.level != HistoryLevel::None && self.level.is_at_least(level)
  }

  pub fn record_process_start(&self, session: &mut DbSqlSession, instance: &ExecutionEntity) -> Result<()> {
    if !self.enabled(HistoryLevel::Activity) {
      return Ok(());
    }
    let historic = HistoricProcessInstanceEntity { id: instance.id.clone(),
                                                   proc_inst_id: instance.id.clone(),
                                                   proc_def_id: instance.proc_def_id.clone(),
                                                   business_key: instance.business_key.clone(),
                                                   start_time: instance.start_time,
                                                   ..Default::default() };
    HISTORIC_PROCESSES.insert(session, &historic)?;
    Ok(())
  }

  pub fn record_process_end(&self,
                            session: &mut DbSqlSession,
                            proc_inst_id: &str,
                            delete_reason: Option<&str>)
                            -> Result<()> {
    if !self.enabled(HistoryLevel::Activity) {
      return Ok(());
    }
    if let Some(mut historic) = HISTORIC_PROCESSES.find_by_id(session, proc_inst_id)? {
      historic.end_time = Some(Utc::now());
      historic.delete_reason = delete_reason.map(str::to_string);
      HISTORIC_PROCESSES.update(session, &historic)?;
    }
    Ok(())
  }

  pub fn record_activity_start(&self, session: &mut DbSqlSession, activity: &ActivityInstanceEntity) -> Result<()> {
    if !self.enabled(HistoryLevel::Activity) {
      return Ok(());
    }
    let historic = HistoricActivityInstanceEntity { id: activity.id.clone(),
                                                    revision: 0,
                                                    proc_inst_id: activity.proc_inst_id.clone(),
                                                    execution_id: activity.execution_id.clone(),
                                                    activity_id: activity.activity_id.clone(),
                                                    activity_type: activity.activity_type.clone(),
                                                    task_id: activity.task_id.clone(),
                                                    start_time: activity.start_time,
                                                    end_time: activity.end_time };
    HISTORIC_ACTIVITIES.insert(session, &historic)?;
    Ok(())
  }

  pub fn record_activity_end(&self, session: &mut DbSqlSession, activity: &ActivityInstanceEntity) -> Result<()> {
    if !self.enabled(HistoryLevel::Activity) {
      return Ok(());
    }
    if let Some(mut historic) = HISTORIC_ACTIVITIES.find_by_id(session, &activity.id)? {
      historic.end_time = activity.end_time.or_else(|| Some(Utc::now()));
      HISTORIC_ACTIVITIES.update(session, &historic)?;
    }
    Ok(())
  }

  /// Cierra en la historia las actividades que siguen abiertas al terminar
  /// una instancia.
  pub fn record_open_activities_end(&self, session: &mut DbSqlSession, proc_inst_id: &str) -> Result<()> {
    if !self.enabled(HistoryLevel::Activity) {
      return Ok(());
    }
    let now = Utc::now();
    for mut historic in HISTORIC_ACTIVITIES.find_by_field(session, "proc_inst_id", proc_inst_id)? {
      if historic.end_time.is_none() {
        historic.end_time = Some(now);
        HISTORIC_ACTIVITIES.update(session, &historic)?;
      }
    }
    Ok(())
  }

  pub fn record_task_created(&self, session: &mut DbSqlSession, task: &TaskEntity) -> Result<()> {
    if !self.enabled(HistoryLevel::Audit) {
      return Ok(());
    }
    let historic = HistoricTaskInstanceEntity { id: task.id.clone(),
                                                revision: 0,
                                                name: task.name.clone(),
                                                task_def_key: task.task_def_key.clone(),
                                                proc_inst_id: task.proc_inst_id.clone(),
                                                assignee: task.assignee.clone(),
                                                start_time: task.create_time,
                                                end_time: None,
                                                delete_reason: None };
    HISTORIC_TASKS.insert(session, &historic)?;
    self.record_task_log(session, task, "USER_TASK_CREATED", json!({"name": task.name}))
  }

  pub fn record_task_assignee(&self, session: &mut DbSqlSession, task: &TaskEntity) -> Result<()> {
    if !self.enabled(HistoryLevel::Audit) {
      return Ok(());
    }
    if let Some(mut historic) = HISTORIC_TASKS.find_by_id(session, &task.id)? {
      historic.assignee = task.assignee.clone();
      HISTORIC_TASKS.update(session, &historic)?;
    }
    self.record_task_log(session, task, "USER_TASK_ASSIGNEE_CHANGED", json!({"assignee": task.assignee}))
  }

  pub fn record_task_end(&self, session: &mut DbSqlSession, task: &TaskEntity, delete_reason: Option<&str>) -> Result<()> {
    if !self.enabled(HistoryLevel::Audit) {
      return Ok(());
    }
    if let Some(mut historic) = HISTORIC_TASKS.find_by_id(session, &task.id)? {
      historic.end_time = Some(Utc::now());
      historic.delete_reason = delete_reason.map(str::to_string);
      HISTORIC_TASKS.update(session, &historic)?;
    }
    let log_type = if delete_reason.is_some() { "USER_TASK_DELETED" } else { "USER_TASK_COMPLETED" };
    self.record_task_log(session, task, log_type, json!({"reason": delete_reason}))
  }

  fn record_task_log(&self,
                     session: &mut DbSqlSession,
                     task: &TaskEntity,
                     log_type: &str,
                     data: serde_json::Value)
                     -> Result<()> {
    if !self.enabled(HistoryLevel::Full) {
      return Ok(());
    }
    let entry = HistoricTaskLogEntryEntity { task_id: task.id.clone(),
                                             proc_inst_id: task.proc_inst_id.clone(),
                                             log_type: log_type.to_string(),
                                             user_id: task.assignee.clone(),
                                             time_stamp: Some(Utc::now()),
                                             data,
                                             ..Default::default() };
    EntityManager::<HistoricTaskLogEntryEntity>::new().insert(session, &entry)?;
    Ok(())
  }

  /// Último valor de la variable (audit) y, con `full`, un detalle por
  /// cambio.
  pub fn record_variable_update(&self, session: &mut DbSqlSession, variable: &VariableInstanceEntity) -> Result<()> {
    if !self.enabled(HistoryLevel::Audit) {
      return Ok(());
    }
    let now = Some(Utc::now());
    match HISTORIC_VARIABLES.find_by_id(session, &variable.id)? {
      Some(mut historic) => {
        historic.value = variable.value.clone();
        historic.var_type = variable.var_type.clone();
        historic.last_updated_time = now;
        HISTORIC_VARIABLES.update(session, &historic)?;
      }
      None => {
        let historic = HistoricVariableInstanceEntity { id: variable.id.clone(),
                                                        revision: 0,
                                                        name: variable.name.clone(),
                                                        var_type: variable.var_type.clone(),
                                                        proc_inst_id: variable.proc_inst_id.clone(),
                                                        execution_id: variable.execution_id.clone(),
                                                        value: variable.value.clone(),
                                                        last_updated_time: now };
        HISTORIC_VARIABLES.insert(session, &historic)?;
      }
    }
    if self.enabled(HistoryLevel::Full) {
      let detail = HistoricDetailEntity { detail_type: "VariableUpdate".to_string(),
                                          name: variable.name.clone(),
                                          proc_inst_id: variable.proc_inst_id.clone(),
                                          execution_id: variable.execution_id.clone(),
                                          value: variable.value.clone(),
                                          time: now,
                                          ..Default::default() };
      EntityManager::<HistoricDetailEntity>::new().insert(session, &detail)?;
    }
    Ok(())
  }

  /// Borra toda la historia de una instancia, independientemente del
  /// nivel configurado.
  pub fn delete_historic_process_instance(&self, session: &mut DbSqlSession, proc_inst_id: &str) -> Result<()> {
    for kind in [EntityKind::HistoricDetail,
                 EntityKind::HistoricVariableInstance,
                 EntityKind::HistoricTaskLogEntry,
                 EntityKind::HistoricTaskInstance,
                 EntityKind::HistoricActivityInstance]
    {
      session.bulk_delete(kind, proc_domain::Criteria::field_equals("proc_inst_id", proc_inst_id))?;
    }
    HISTORIC_PROCESSES.delete(session, proc_inst_id)
  }
}
