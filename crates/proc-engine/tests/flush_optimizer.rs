use proc_domain::{Criteria, EntityKind, EntityRecord};
use proc_engine::ProcessFlushOptimizer;
use proc_persistence::{DatabaseDialect, DbSqlSession, DbSqlSessionFactory, FlushOperation, FlushStatement,
                       InMemoryExecutorFactory, InMemoryStore};
use std::sync::Arc;

fn setup() -> (DbSqlSessionFactory, InMemoryStore) {
  let store = InMemoryStore::new();
  let factory = DbSqlSessionFactory::builder(DatabaseDialect::H2).flush_optimizer(Arc::new(ProcessFlushOptimizer::default()))
                                                                 .executor_factory(Arc::new(InMemoryExecutorFactory::new(store.clone())))
                                                                 .build()
                                                                 .unwrap();
  (factory, store)
}

fn instance(id: &str) -> EntityRecord {
  EntityRecord::with_id(EntityKind::Execution, id).with_field("proc_inst_id", id)
}

fn activity(id: &str, proc_inst_id: &str) -> EntityRecord {
  EntityRecord::with_id(EntityKind::ActivityInstance, id).with_field("proc_inst_id", proc_inst_id)
                                                         .with_field("activity_id", "review")
}

fn run(mut s: DbSqlSession) -> Vec<FlushStatement> {
  s.flush().unwrap();
  s.commit().unwrap();
  let out = s.flushed_statements().to_vec();
  s.close();
  out
}

fn ops(stmts: &[FlushStatement]) -> Vec<(FlushOperation, EntityKind)> {
  stmts.iter().map(|s| (s.operation, s.kind)).collect()
}

#[test]
fn deleting_an_instance_drops_its_pending_activity_inserts() {
  let (factory, store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p1")).unwrap();
  s.insert(activity("a1", "p1")).unwrap();
  run(s);

  let mut s = factory.open_db_session().unwrap();
  s.insert(activity("a9", "p1")).unwrap();
  s.bulk_delete(EntityKind::ActivityInstance, Criteria::field_equals("proc_inst_id", "p1")).unwrap();
  s.delete_by_id(EntityKind::Execution, "p1").unwrap();
  let stmts = run(s);
  assert!(stmts.iter().all(|st| !st.references("a9")));
  assert_eq!(ops(&stmts),
             vec![(FlushOperation::BulkDelete, EntityKind::ActivityInstance),
                  (FlushOperation::Delete, EntityKind::Execution)]);
  assert_eq!(store.total_rows(), 0);
}

#[test]
fn bulk_delete_for_a_freshly_inserted_instance_is_dropped() {
  let (factory, store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p2")).unwrap();
  s.insert(activity("a1", "p2")).unwrap();
  s.bulk_delete(EntityKind::ActivityInstance, Criteria::field_equals("proc_inst_id", "p2")).unwrap();
  let stmts = run(s);
  assert_eq!(ops(&stmts), vec![(FlushOperation::Insert, EntityKind::Execution)]);
  // el efecto neto es el mismo que con el borrado masivo
  assert_eq!(store.count(EntityKind::ActivityInstance), 0);
  assert_eq!(store.count(EntityKind::Execution), 1);
}

#[test]
fn bulk_delete_for_a_stored_instance_is_kept() {
  let (factory, store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p3")).unwrap();
  s.insert(activity("a1", "p3")).unwrap();
  run(s);

  let mut s = factory.open_db_session().unwrap();
  s.bulk_delete(EntityKind::ActivityInstance, Criteria::field_equals("proc_inst_id", "p3")).unwrap();
  let stmts = run(s);
  assert_eq!(ops(&stmts), vec![(FlushOperation::BulkDelete, EntityKind::ActivityInstance)]);
  assert_eq!(store.count(EntityKind::ActivityInstance), 0);
}

#[test]
fn bulk_delete_on_a_non_execution_column_is_untouched() {
  let (factory, _store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p4")).unwrap();
  // activity_id no es FK hacia Execution aunque el valor coincida
  s.bulk_delete(EntityKind::ActivityInstance, Criteria::field_equals("activity_id", "p4")).unwrap();
  let stmts = run(s);
  assert_eq!(ops(&stmts),
             vec![(FlushOperation::Insert, EntityKind::Execution),
                  (FlushOperation::BulkDelete, EntityKind::ActivityInstance)]);
}

#[test]
fn other_instances_are_not_affected() {
  let (factory, store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("keep")).unwrap();
  s.insert(instance("gone")).unwrap();
  run(s);

  let mut s = factory.open_db_session().unwrap();
  s.insert(activity("k1", "keep")).unwrap();
  s.insert(activity("g1", "gone")).unwrap();
  s.delete_by_id(EntityKind::Execution, "gone").unwrap();
  let stmts = run(s);
  assert!(stmts.iter().any(|st| st.references("k1")));
  assert!(stmts.iter().all(|st| !st.references("g1")));
  assert_eq!(store.count(EntityKind::ActivityInstance), 1);
}

fn task(id: &str, proc_inst_id: &str) -> EntityRecord {
  EntityRecord::with_id(EntityKind::Task, id).with_field("proc_inst_id", proc_inst_id)
                                             .with_field("name", "Revisar")
}

#[test]
fn dropped_task_insert_takes_its_single_delete_along() {
  let (factory, store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p2")).unwrap();
  s.insert(task("t1", "p2")).unwrap();
  s.delete_by_id(EntityKind::Task, "t1").unwrap();
  s.bulk_delete(EntityKind::Task, Criteria::field_equals("proc_inst_id", "p2")).unwrap();
  let stmts = run(s);
  assert_eq!(ops(&stmts), vec![(FlushOperation::Insert, EntityKind::Execution)]);
  assert!(stmts.iter().all(|st| !st.references("t1")));
  assert_eq!(store.count(EntityKind::Task), 0);
}

#[test]
fn dropped_activity_insert_takes_its_single_delete_along() {
  let (factory, store) = setup();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p1")).unwrap();
  run(s);

  let mut s = factory.open_db_session().unwrap();
  s.insert(activity("a9", "p1")).unwrap();
  s.delete_by_id(EntityKind::ActivityInstance, "a9").unwrap();
  s.delete_by_id(EntityKind::Execution, "p1").unwrap();
  let stmts = run(s);
  assert_eq!(ops(&stmts), vec![(FlushOperation::Delete, EntityKind::Execution)]);
  assert_eq!(store.total_rows(), 0);
}

#[test]
fn applying_the_rules_twice_removes_nothing_more() {
  let store = InMemoryStore::new();
  let factory = DbSqlSessionFactory::builder(DatabaseDialect::H2).flush_optimizer(Arc::new(ProcessFlushOptimizer::default()))
                                                                 .flush_optimizer(Arc::new(ProcessFlushOptimizer::default()))
                                                                 .executor_factory(Arc::new(InMemoryExecutorFactory::new(store.clone())))
                                                                 .build()
                                                                 .unwrap();
  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("keep")).unwrap();
  s.insert(instance("gone")).unwrap();
  run(s);

  let mut s = factory.open_db_session().unwrap();
  s.insert(instance("p5")).unwrap();
  s.insert(task("t5", "p5")).unwrap();
  s.insert(task("t6", "keep")).unwrap();
  s.bulk_delete(EntityKind::Task, Criteria::field_equals("proc_inst_id", "p5")).unwrap();
  s.insert(activity("k1", "keep")).unwrap();
  s.insert(activity("g1", "gone")).unwrap();
  s.delete_by_id(EntityKind::Execution, "gone").unwrap();
  let stmts = run(s);
  assert_eq!(ops(&stmts),
             vec![(FlushOperation::Insert, EntityKind::Execution),
                  (FlushOperation::Insert, EntityKind::ActivityInstance),
                  (FlushOperation::Insert, EntityKind::Task),
                  (FlushOperation::Delete, EntityKind::Execution)]);
  assert!(stmts.iter().any(|st| st.references("t6")));
  assert!(stmts.iter().all(|st| !st.references("t5") && !st.references("g1")));
  assert_eq!(store.count(EntityKind::Task), 1);
  assert_eq!(store.count(EntityKind::ActivityInstance), 1);
}
