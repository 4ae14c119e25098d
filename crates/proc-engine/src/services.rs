// services.rs
//
// Fachadas públicas del motor. Cada método construye un comando y lo
// ejecuta a través del `CommandExecutor`, de modo que cada llamada es una
// transacción.
use crate::commands::{ClaimTaskCmd, CompleteTaskCmd, DeleteHistoricProcessInstanceCmd, DeleteProcessInstanceCmd,
                      DeployCmd, Deployment, GetVariablesCmd, HistoricActivityInstancesCmd,
                      HistoricProcessInstancesCmd, HistoricTaskInstancesCmd, HistoricTaskLogCmd,
                      HistoricVariableInstancesCmd, ListProcessDefinitionsCmd, ListProcessInstancesCmd, ListTasksCmd,
                      SetVariablesCmd, StartProcessInstanceCmd, TaskCompletion, TaskQuery};
use crate::definition::ProcessModel;
use crate::entities::{ExecutionEntity, HistoricActivityInstanceEntity, HistoricProcessInstanceEntity,
                      HistoricTaskInstanceEntity, HistoricTaskLogEntryEntity, HistoricVariableInstanceEntity,
                      ProcessDefinitionEntity, TaskEntity};
use crate::errors::Result;
use crate::history::HistoryManager;
use proc_command::CommandExecutor;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

#[derive(Clone)]
pub struct RepositoryService {
  executor: Arc<CommandExecutor>,
}

impl RepositoryService {
  pub fn new(executor: Arc<CommandExecutor>) -> Self {
    Self { executor }
  }

  pub fn deploy(&self, name: impl Into<String>, models: Vec<ProcessModel>) -> Result<Deployment> {
    Ok(self.executor.execute(&DeployCmd { name: name.into(), models })?)
  }

  pub fn process_definitions(&self) -> Result<Vec<ProcessDefinitionEntity>> {
    Ok(self.executor.execute(&ListProcessDefinitionsCmd { key: None })?)
  }

  /// Última versión desplegada de `key`, si existe.
  pub fn latest_process_definition(&self, key: &str) -> Result<Option<ProcessDefinitionEntity>> {
    let definitions = self.executor.execute(&ListProcessDefinitionsCmd { key: Some(key.to_string()) })?;
    Ok(definitions.into_iter().last())
  }
}

#[derive(Clone)]
pub struct RuntimeService {
  executor: Arc<CommandExecutor>,
  history: HistoryManager,
}

impl RuntimeService {
  pub fn new(executor: Arc<CommandExecutor>, history: HistoryManager) -> Self {
    Self { executor, history }
  }

  pub fn start_process_instance_by_key(&self,
                                       key: &str,
                                       business_key: Option<String>,
                                       variables: Map<String, JsonValue>)
                                       -> Result<ExecutionEntity> {
    Ok(self.executor.execute(&StartProcessInstanceCmd { process_definition_key: key.to_string(),
                                                        business_key,
                                                        variables,
                                                        history: self.history })?)
  }

  pub fn process_instances(&self, process_definition_key: Option<&str>) -> Result<Vec<ExecutionEntity>> {
    Ok(self.executor
           .execute(&ListProcessInstancesCmd { process_definition_key: process_definition_key.map(str::to_string) })?)
  }

  pub fn set_variables(&self, execution_id: &str, variables: Map<String, JsonValue>) -> Result<()> {
    Ok(self.executor.execute(&SetVariablesCmd { execution_id: execution_id.to_string(),
                                                variables,
                                                history: self.history })?)
  }

  pub fn set_variable(&self, execution_id: &str, name: &str, value: JsonValue) -> Result<()> {
    let mut variables = Map::new();
    variables.insert(name.to_string(), value);
    self.set_variables(execution_id, variables)
  }

  pub fn variables(&self, execution_id: &str) -> Result<Map<String, JsonValue>> {
    Ok(self.executor.execute(&GetVariablesCmd { execution_id: execution_id.to_string() })?)
  }

  pub fn delete_process_instance(&self, proc_inst_id: &str, delete_reason: &str) -> Result<()> {
    Ok(self.executor.execute(&DeleteProcessInstanceCmd { proc_inst_id: proc_inst_id.to_string(),
                                                         delete_reason: delete_reason.to_string(),
                                                         history: self.history })?)
  }
}

#[derive(Clone)]
pub struct TaskService {
  executor: Arc<CommandExecutor>,
  history: HistoryManager,
}

impl TaskService {
  pub fn new(executor: Arc<CommandExecutor>, history: HistoryManager) -> Self {
    Self { executor, history }
  }

  pub fn tasks(&self, query: TaskQuery) -> Result<Vec<TaskEntity>> {
    Ok(self.executor.execute(&ListTasksCmd { query })?)
  }

  pub fn claim(&self, task_id: &str, user_id: &str) -> Result<TaskEntity> {
    Ok(self.executor.execute(&ClaimTaskCmd { task_id: task_id.to_string(),
                                             user_id: user_id.to_string(),
                                             history: self.history })?)
  }

  pub fn complete(&self, task_id: &str, variables: Map<String, JsonValue>) -> Result<TaskCompletion> {
    Ok(self.executor.execute(&CompleteTaskCmd { task_id: task_id.to_string(),
                                                variables,
                                                history: self.history })?)
  }
}

#[derive(Clone)]
pub struct HistoryService {
  executor: Arc<CommandExecutor>,
  history: HistoryManager,
}

impl HistoryService {
  pub fn new(executor: Arc<CommandExecutor>, history: HistoryManager) -> Self {
    Self { executor, history }
  }

  pub fn process_instances(&self, finished: Option<bool>) -> Result<Vec<HistoricProcessInstanceEntity>> {
    Ok(self.executor.execute(&HistoricProcessInstancesCmd { finished })?)
  }

  pub fn activity_instances(&self, proc_inst_id: &str) -> Result<Vec<HistoricActivityInstanceEntity>> {
    Ok(self.executor.execute(&HistoricActivityInstancesCmd { proc_inst_id: proc_inst_id.to_string() })?)
  }

  pub fn task_instances(&self, proc_inst_id: Option<&str>) -> Result<Vec<HistoricTaskInstanceEntity>> {
    Ok(self.executor.execute(&HistoricTaskInstancesCmd { proc_inst_id: proc_inst_id.map(str::to_string) })?)
  }

  pub fn variable_instances(&self, proc_inst_id: &str) -> Result<Vec<HistoricVariableInstanceEntity>> {
    Ok(self.executor.execute(&HistoricVariableInstancesCmd { proc_inst_id: proc_inst_id.to_string() })?)
  }

  pub fn task_log(&self, task_id: &str) -> Result<Vec<HistoricTaskLogEntryEntity>> {
    Ok(self.executor.execute(&HistoricTaskLogCmd { task_id: task_id.to_string() })?)
  }

  pub fn delete_historic_process_instance(&self, proc_inst_id: &str) -> Result<()> {
    Ok(self.executor.execute(&DeleteHistoricProcessInstanceCmd { proc_inst_id: proc_inst_id.to_string(),
                                                                 history: self.history })?)
  }
}
