// El mismo proceso contra SQLite: el orden del flush debe respetar las
// claves foráneas reales de las migraciones.
use proc_engine::{HistoryLevel, ProcessEngine, ProcessEngineConfig, ProcessModel, TaskQuery, UserTaskModel};
use serde_json::{json, Map};
use uuid::Uuid;

fn sqlite_engine() -> ProcessEngine {
  let path = std::env::temp_dir().join(format!("proc_engine_{}.db", Uuid::new_v4()));
  let config = ProcessEngineConfig::builder().database_url(path.to_string_lossy().to_string())
                                             .history_level(HistoryLevel::Full)
                                             .bulk_insert_max(3)
                                             .pool_size(2)
                                             .build()
                                             .unwrap();
  ProcessEngine::new(config).expect("engine sqlite")
}

#[test]
fn sqlite_process_round_trip() {
  if cfg!(feature = "pg") {
    return;
  }
  let engine = sqlite_engine();
  assert!(engine.memory_store().is_none());
  let model = ProcessModel::new("onboarding", "Alta de empleado").user_task(UserTaskModel::new("docs", "Documentación").candidate_group("rrhh"))
                                                                 .user_task(UserTaskModel::new("laptop", "Entregar equipo"));
  engine.repository_service().deploy("rrhh", vec![model]).unwrap();

  let runtime = engine.runtime_service();
  let mut vars = Map::new();
  vars.insert("empleado".into(), json!("Eva"));
  let instance = runtime.start_process_instance_by_key("onboarding", Some("EMP-7".into()), vars).unwrap();
  let other = runtime.start_process_instance_by_key("onboarding", None, Map::new()).unwrap();

  let tasks = engine.task_service();
  let docs = tasks.tasks(TaskQuery::new().process_instance(instance.id.clone())).unwrap();
  assert_eq!(docs.len(), 1);
  assert_eq!(tasks.tasks(TaskQuery::new().candidate_group("rrhh")).unwrap().len(), 2);

  let next = tasks.complete(&docs[0].id, Map::new()).unwrap().next_task.unwrap();
  assert!(tasks.complete(&next.id, Map::new()).unwrap().process_ended);
  runtime.delete_process_instance(&other.id, "duplicado").unwrap();
  assert!(runtime.process_instances(None).unwrap().is_empty());

  let history = engine.history_service();
  assert_eq!(history.process_instances(Some(true)).unwrap().len(), 2);
  assert_eq!(history.activity_instances(&instance.id).unwrap().len(), 4);
  assert_eq!(history.variable_instances(&instance.id).unwrap()[0].value, json!("Eva"));
  history.delete_historic_process_instance(&other.id).unwrap();
  assert_eq!(history.process_instances(None).unwrap().len(), 1);
}
