// Pruebas contra SQLite real (archivo temporal) con migraciones embebidas.
// Con la feature `pg` el backend es Postgres y estas pruebas se omiten.
use proc_command::CommandError;
use proc_domain::{Criteria, EntityDependencyOrder, EntityKind, EntityRecord};
use proc_persistence::{DatabaseDialect, DbSqlSessionFactory, DieselExecutorFactory, FlushOperation};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn temp_db_url(tag: &str) -> String {
  std::env::temp_dir().join(format!("proc_persistence_{}_{}.db", tag, Uuid::new_v4()))
                      .to_string_lossy()
                      .to_string()
}

fn sqlite_factory(tag: &str) -> DbSqlSessionFactory {
  let executors = DieselExecutorFactory::new(&temp_db_url(tag), 2).expect("pool sqlite");
  DbSqlSessionFactory::builder(DatabaseDialect::Sqlite).max_nr_of_statements_in_bulk_insert(2)
                                                       .executor_factory(Arc::new(executors))
                                                       .build()
                                                       .expect("factory")
}

#[test]
fn sqlite_round_trip_with_bulk_insert_update_and_delete() {
  if cfg!(feature = "pg") {
    return;
  }
  let factory = sqlite_factory("roundtrip");

  let mut s = factory.open_db_session().unwrap();
  s.insert(EntityRecord::with_id(EntityKind::Execution, "e1").with_field("name", "main")).unwrap();
  for id in ["t1", "t2", "t3"] {
    s.insert(EntityRecord::with_id(EntityKind::Task, id).with_field("execution_id", "e1")
                                                        .with_field("priority", 50))
     .unwrap();
  }
  s.flush().unwrap();
  s.commit().unwrap();
  let ops: Vec<FlushOperation> = s.flushed_statements().iter().map(|st| st.operation).collect();
  assert_eq!(ops, vec![FlushOperation::Insert, FlushOperation::BulkInsert, FlushOperation::BulkInsert]);
  s.close();

  let mut s = factory.open_db_session().unwrap();
  let tasks = s.select_list(EntityKind::Task, Some(&Criteria::field_equals("execution_id", "e1"))).unwrap();
  assert_eq!(tasks.len(), 3);
  assert_eq!(tasks[0].field("priority").and_then(|v| v.as_i64()), Some(50));
  s.entity_mut(EntityKind::Task, "t2").unwrap().unwrap().insert("priority".into(), json!(80));
  s.flush().unwrap();
  s.commit().unwrap();
  s.close();

  let mut s = factory.open_db_session().unwrap();
  let t2 = s.select_by_id(EntityKind::Task, "t2").unwrap().unwrap();
  assert_eq!(t2.revision, 2);
  assert_eq!(t2.field("priority").and_then(|v| v.as_i64()), Some(80));
  s.delete_by_id(EntityKind::Execution, "e1").unwrap();
  s.bulk_delete(EntityKind::Task, Criteria::field_equals("execution_id", "e1")).unwrap();
  s.flush().unwrap();
  s.commit().unwrap();
  s.close();

  let mut s = factory.open_db_session().unwrap();
  assert!(s.select_list(EntityKind::Task, None).unwrap().is_empty());
  assert!(s.select_by_id(EntityKind::Execution, "e1").unwrap().is_none());
  s.close();
}

#[test]
fn sqlite_rejects_a_plan_that_breaks_foreign_keys() {
  if cfg!(feature = "pg") {
    return;
  }
  let mut order = EntityDependencyOrder::standard().delete_order().to_vec();
  let t = order.iter().position(|k| *k == EntityKind::Task).unwrap();
  let e = order.iter().position(|k| *k == EntityKind::Execution).unwrap();
  order.swap(t, e);
  let executors = DieselExecutorFactory::new(&temp_db_url("fk"), 1).unwrap();
  let factory = DbSqlSessionFactory::builder(DatabaseDialect::Sqlite).dependency_order(EntityDependencyOrder::from_delete_order(order))
                                                                     .skip_order_validation()
                                                                     .executor_factory(Arc::new(executors))
                                                                     .build()
                                                                     .unwrap();
  let mut s = factory.open_db_session().unwrap();
  s.insert(EntityRecord::with_id(EntityKind::Execution, "e1")).unwrap();
  s.insert(EntityRecord::with_id(EntityKind::Task, "t1").with_field("execution_id", "e1")).unwrap();
  assert!(matches!(s.flush(), Err(CommandError::Storage(_))));
  s.rollback().unwrap();
  s.close();
}

#[test]
fn sqlite_prefixed_tables_are_created_on_demand() {
  if cfg!(feature = "pg") {
    return;
  }
  let executors = DieselExecutorFactory::new(&temp_db_url("prefix"), 2).unwrap();
  let factory = DbSqlSessionFactory::builder(DatabaseDialect::Sqlite).table_prefix("TENANT1_")
                                                                     .executor_factory(Arc::new(executors))
                                                                     .build()
                                                                     .unwrap();
  assert_eq!(factory.schema().layout(EntityKind::Deployment).unwrap().table, "TENANT1_ACT_RE_DEPLOYMENT");

  let mut s = factory.open_db_session().unwrap();
  s.insert(EntityRecord::with_id(EntityKind::Deployment, "d1").with_field("name", "pedidos")).unwrap();
  s.flush().unwrap();
  s.commit().unwrap();
  s.close();

  let mut s = factory.open_db_session().unwrap();
  let d = s.select_by_id(EntityKind::Deployment, "d1").unwrap().unwrap();
  assert_eq!(d.field_str("name"), Some("pedidos"));
  assert_eq!(d.revision, 1);
  s.close();
}
