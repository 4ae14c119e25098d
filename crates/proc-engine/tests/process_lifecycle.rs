use proc_command::{Command, CommandContext, CommandError};
use proc_domain::EntityKind;
use proc_engine::commands::{DeleteProcessInstanceCmd, StartProcessInstanceCmd};
use proc_engine::{EngineError, HistoryLevel, HistoryManager, ProcessEngine, ProcessEngineConfig, ProcessModel,
                  TaskQuery, UserTaskModel};
use proc_persistence::{FlushOperation, InMemoryStore};
use serde_json::{json, Map, Value as JsonValue};

const RUNTIME_KINDS: [EntityKind; 5] = [EntityKind::Execution,
                                        EntityKind::Task,
                                        EntityKind::IdentityLink,
                                        EntityKind::VariableInstance,
                                        EntityKind::ActivityInstance];

fn engine(level: HistoryLevel) -> ProcessEngine {
  let config = ProcessEngineConfig::builder().history_level(level).build().unwrap();
  let engine = ProcessEngine::new(config).unwrap();
  engine.repository_service()
        .deploy("compras", vec![approval_model()])
        .expect("deploy");
  engine
}

fn approval_model() -> ProcessModel {
  ProcessModel::new("approval", "Aprobación de compra").user_task(UserTaskModel::new("draft", "Redactar pedido").assignee("ana"))
                                                       .user_task(UserTaskModel::new("review", "Revisar pedido").candidate_group("managers"))
}

fn vars(value: JsonValue) -> Map<String, JsonValue> {
  value.as_object().cloned().unwrap_or_default()
}

fn store(engine: &ProcessEngine) -> &InMemoryStore {
  engine.memory_store().expect("store en memoria")
}

fn runtime_rows(engine: &ProcessEngine) -> usize {
  RUNTIME_KINDS.iter().map(|k| store(engine).count(*k)).sum()
}

#[test]
fn linear_process_runs_to_completion() {
  let engine = engine(HistoryLevel::Audit);
  let runtime = engine.runtime_service();
  let tasks = engine.task_service();

  let instance = runtime.start_process_instance_by_key("approval", Some("PO-1".into()), vars(json!({"amount": 100})))
                        .unwrap();
  assert!(instance.is_process_instance);
  assert_eq!(instance.proc_inst_id.as_deref(), Some(instance.id.as_str()));

  let open = tasks.tasks(TaskQuery::new().process_instance(instance.id.clone())).unwrap();
  assert_eq!(open.len(), 1);
  assert_eq!(open[0].task_def_key, "draft");
  assert_eq!(open[0].assignee.as_deref(), Some("ana"));
  assert_eq!(tasks.tasks(TaskQuery::new().assignee("ana")).unwrap().len(), 1);

  let done = tasks.complete(&open[0].id, vars(json!({"approved": true}))).unwrap();
  assert!(!done.process_ended);
  let review = done.next_task.expect("segunda tarea");
  assert_eq!(review.task_def_key, "review");

  let candidates = tasks.tasks(TaskQuery::new().candidate_group("managers")).unwrap();
  assert_eq!(candidates.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec![review.id.as_str()]);
  assert_eq!(tasks.claim(&review.id, "luis").unwrap().assignee.as_deref(), Some("luis"));
  let err = tasks.claim(&review.id, "marta").unwrap_err();
  assert!(matches!(err, EngineError::Command(CommandError::IllegalState(_))));

  let visible = runtime.variables(&instance.id).unwrap();
  assert_eq!(visible.get("amount"), Some(&json!(100)));
  assert_eq!(visible.get("approved"), Some(&json!(true)));

  let done = tasks.complete(&review.id, Map::new()).unwrap();
  assert!(done.process_ended);
  assert!(runtime.process_instances(None).unwrap().is_empty());
  assert_eq!(runtime_rows(&engine), 0);

  let history = engine.history_service();
  let finished = history.process_instances(Some(true)).unwrap();
  assert_eq!(finished.len(), 1);
  assert_eq!(finished[0].business_key.as_deref(), Some("PO-1"));
  assert!(finished[0].delete_reason.is_none());
  let activities: Vec<String> = history.activity_instances(&instance.id)
                                       .unwrap()
                                       .into_iter()
                                       .map(|a| a.activity_id)
                                       .collect();
  assert_eq!(activities, vec!["start", "draft", "review", "end"]);
  assert!(history.activity_instances(&instance.id).unwrap().iter().all(|a| a.end_time.is_some()));
  let historic_tasks = history.task_instances(Some(&instance.id)).unwrap();
  assert_eq!(historic_tasks.len(), 2);
  assert!(historic_tasks.iter().all(|t| t.end_time.is_some() && t.delete_reason.is_none()));
  assert_eq!(history.variable_instances(&instance.id).unwrap().len(), 2);
  // el log de tareas sólo se escribe con historia completa
  assert!(history.task_log(&review.id).unwrap().is_empty());
}

#[test]
fn deleting_a_running_instance_keeps_its_history() {
  let engine = engine(HistoryLevel::Audit);
  let runtime = engine.runtime_service();
  let instance = runtime.start_process_instance_by_key("approval", None, vars(json!({"k": "v"}))).unwrap();
  runtime.delete_process_instance(&instance.id, "cancelado").unwrap();
  assert_eq!(runtime_rows(&engine), 0);

  let history = engine.history_service();
  let hpi = history.process_instances(None).unwrap();
  assert_eq!(hpi[0].delete_reason.as_deref(), Some("cancelado"));
  assert!(hpi[0].end_time.is_some());
  let tasks = history.task_instances(Some(&instance.id)).unwrap();
  assert_eq!(tasks[0].delete_reason.as_deref(), Some("cancelado"));

  history.delete_historic_process_instance(&instance.id).unwrap();
  assert!(history.process_instances(None).unwrap().is_empty());
  assert!(history.activity_instances(&instance.id).unwrap().is_empty());
  assert!(history.variable_instances(&instance.id).unwrap().is_empty());
}

#[test]
fn history_cannot_be_deleted_while_running() {
  let engine = engine(HistoryLevel::Audit);
  let instance = engine.runtime_service().start_process_instance_by_key("approval", None, Map::new()).unwrap();
  let err = engine.history_service().delete_historic_process_instance(&instance.id).unwrap_err();
  assert!(matches!(err, EngineError::Command(CommandError::IllegalState(_))));
}

#[test]
fn history_levels_control_what_is_written() {
  let none = engine(HistoryLevel::None);
  let instance = none.runtime_service().start_process_instance_by_key("approval", None, vars(json!({"a": 1}))).unwrap();
  assert!(none.history_service().process_instances(None).unwrap().is_empty());
  assert!(none.history_service().variable_instances(&instance.id).unwrap().is_empty());

  let activity = engine(HistoryLevel::Activity);
  let instance = activity.runtime_service().start_process_instance_by_key("approval", None, Map::new()).unwrap();
  assert_eq!(activity.history_service().process_instances(None).unwrap().len(), 1);
  assert_eq!(activity.history_service().activity_instances(&instance.id).unwrap().len(), 2);
  assert!(activity.history_service().task_instances(None).unwrap().is_empty());

  let full = engine(HistoryLevel::Full);
  let runtime = full.runtime_service();
  let instance = runtime.start_process_instance_by_key("approval", None, vars(json!({"n": 1}))).unwrap();
  runtime.set_variable(&instance.id, "n", json!(2)).unwrap();
  assert_eq!(store(&full).count(EntityKind::HistoricDetail), 2);
  let open = full.task_service().tasks(TaskQuery::new()).unwrap();
  let task = &open[0];
  full.task_service().complete(&task.id, Map::new()).unwrap();
  let log: Vec<String> = full.history_service()
                             .task_log(&task.id)
                             .unwrap()
                             .into_iter()
                             .map(|e| e.log_type)
                             .collect();
  assert_eq!(log, vec!["USER_TASK_CREATED", "USER_TASK_COMPLETED"]);
}

#[test]
fn redeploy_creates_a_new_version_used_by_new_instances() {
  let engine = engine(HistoryLevel::Activity);
  let repository = engine.repository_service();
  let v2 = ProcessModel::new("approval", "Aprobación v2").user_task(UserTaskModel::new("single", "Única"));
  let deployment = repository.deploy("compras-v2", vec![v2]).unwrap();
  assert_eq!(deployment.definitions[0].version, 2);
  assert_eq!(repository.latest_process_definition("approval").unwrap().map(|d| d.version), Some(2));
  assert_eq!(repository.process_definitions().unwrap().len(), 2);

  let instance = engine.runtime_service().start_process_instance_by_key("approval", None, Map::new()).unwrap();
  assert_eq!(instance.proc_def_id.as_deref(), Some(deployment.definitions[0].id.as_str()));
  let open = engine.task_service().tasks(TaskQuery::new()).unwrap();
  assert_eq!(open.len(), 1);
  assert!(engine.task_service().complete(&open[0].id, Map::new()).unwrap().process_ended);
}

#[test]
fn failures_leave_the_store_untouched() {
  let engine = engine(HistoryLevel::Audit);
  let before = store(&engine).total_rows();
  let err = engine.runtime_service().start_process_instance_by_key("missing", None, Map::new()).unwrap_err();
  assert!(err.is_not_found());
  assert!(engine.task_service().complete("nope", Map::new()).unwrap_err().is_not_found());
  let invalid = ProcessModel::new("bad key", "x").user_task(UserTaskModel::new("a", "A"));
  assert!(engine.repository_service().deploy("x", vec![invalid]).is_err());
  assert_eq!(store(&engine).total_rows(), before);
}

struct StartAndCancel {
  history: HistoryManager,
}

impl Command for StartAndCancel {
  type Output = String;

  fn execute(&self, ctx: &mut CommandContext) -> proc_command::Result<String> {
    let instance = ctx.execute_nested(&StartProcessInstanceCmd { process_definition_key: "approval".into(),
                                                                 business_key: None,
                                                                 variables: vars(json!({"x": 1})),
                                                                 history: self.history })?;
    ctx.execute_nested(&DeleteProcessInstanceCmd { proc_inst_id: instance.id.clone(),
                                                   delete_reason: "descartado".into(),
                                                   history: self.history })?;
    Ok(instance.id)
  }
}

#[test]
fn start_and_cancel_in_one_transaction_writes_only_history() {
  let engine = engine(HistoryLevel::Audit);
  store(&engine).clear_log();
  let history = HistoryManager::new(HistoryLevel::Audit);
  let id = engine.command_executor().execute(&StartAndCancel { history }).unwrap();

  let executed = store(&engine).executed_statements();
  assert!(!executed.is_empty());
  assert!(executed.iter().all(|st| st.kind.is_historic()), "{:?}", executed);
  assert!(executed.iter().all(|st| st.operation != FlushOperation::BulkDelete));
  assert_eq!(runtime_rows(&engine), 0);

  let hpi = engine.history_service().process_instances(Some(true)).unwrap();
  assert_eq!(hpi.len(), 1);
  assert_eq!(hpi[0].id, id);
  assert_eq!(hpi[0].delete_reason.as_deref(), Some("descartado"));
}
