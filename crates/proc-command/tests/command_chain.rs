use proc_command::stubs::{InMemoryKeyValueStore, KeyValueSession, KeyValueSessionFactory};
use proc_command::{Command, CommandConfig, CommandContext, CommandError, CommandExecutor, CommandInterceptor,
                   ErasedCommand, Next, Result, TransactionState};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn executor_for(store: &InMemoryKeyValueStore) -> CommandExecutor {
  CommandExecutor::builder().session_factory(Arc::new(KeyValueSessionFactory::new(store.clone())))
                            .build()
}

struct Put {
  key: &'static str,
  value: i64,
}

impl Command for Put {
  type Output = ();

  fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
    ctx.session::<KeyValueSession>()?.put(self.key, json!(self.value));
    Ok(())
  }
}

struct PutThenFail;

impl Command for PutThenFail {
  type Output = ();

  fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
    ctx.session::<KeyValueSession>()?.put("lost", json!(1));
    Err(CommandError::Other("boom".into()))
  }
}

struct Get(&'static str);

impl Command for Get {
  type Output = Option<serde_json::Value>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    Ok(ctx.session::<KeyValueSession>()?.get(self.0))
  }
}

#[test]
fn successful_command_flushes_commits_and_closes_once() {
  let store = InMemoryKeyValueStore::new();
  let exec = executor_for(&store);
  exec.execute(&Put { key: "a", value: 1 }).expect("put");
  assert_eq!(store.committed("a"), Some(json!(1)));
  assert_eq!(store.journal(), vec!["open", "flush", "commit", "close"]);
}

#[test]
fn failing_command_rolls_back_and_propagates_original_error() {
  let store = InMemoryKeyValueStore::new();
  let exec = executor_for(&store);
  let err = exec.execute(&PutThenFail).unwrap_err();
  assert!(matches!(err, CommandError::Other(ref m) if m == "boom"));
  assert_eq!(store.committed("lost"), None);
  // sin flush: rollback y cierre
  assert_eq!(store.journal(), vec!["open", "rollback", "close"]);
}

#[test]
fn flush_failure_triggers_rollback() {
  let store = InMemoryKeyValueStore::new();
  let exec = executor_for(&store);
  store.fail_next_flush();
  let err = exec.execute(&Put { key: "x", value: 9 }).unwrap_err();
  assert!(matches!(err, CommandError::Storage(_)));
  assert_eq!(store.committed_len(), 0);
  assert_eq!(store.journal(), vec!["open", "flush-failed", "rollback", "close"]);
}

struct Outer;

impl Command for Outer {
  type Output = Option<serde_json::Value>;

  fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output> {
    ctx.execute_nested(&Put { key: "n", value: 5 })?;
    // lectura dentro de la misma sesión, aún sin flush
    ctx.execute_nested(&Get("n"))
  }
}

#[test]
fn nested_commands_share_the_session_and_flush_once() {
  let store = InMemoryKeyValueStore::new();
  let exec = executor_for(&store);
  assert_eq!(exec.execute(&Outer).unwrap(), Some(json!(5)));
  assert_eq!(store.journal().iter().filter(|s| *s == "flush").count(), 1);
}

#[test]
fn execute_in_reuses_context_unless_requires_new() {
  let store = InMemoryKeyValueStore::new();
  let exec = executor_for(&store);
  let mut ctx = CommandContext::new("manual", exec.session_factories().clone());

  exec.execute_in(&mut ctx, CommandConfig::default(), &Put { key: "shared", value: 1 })
      .unwrap();
  // reutilizado: nada confirmado todavía
  assert_eq!(store.committed("shared"), None);
  assert_eq!(ctx.open_session_count(), 1);

  exec.execute_in(&mut ctx, CommandConfig::default().transaction_requires_new(), &Put { key: "own", value: 2 })
      .unwrap();
  // contexto nuevo: confirmado de inmediato
  assert_eq!(store.committed("own"), Some(json!(2)));
  assert_eq!(store.committed("shared"), None);

  // la transacción abierta sobre el contexto reutilizado confirma al cerrar
  assert!(ctx.is_transaction_active());
  ctx.close(None).unwrap();
  assert_eq!(store.committed("shared"), Some(json!(1)));
}

struct ListenAndPut {
  seen: Arc<Mutex<Vec<&'static str>>>,
}

impl Command for ListenAndPut {
  type Output = ();

  fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
    let before = self.seen.clone();
    let after = self.seen.clone();
    ctx.add_transaction_listener(TransactionState::Committing,
                                 Box::new(move |_: &mut CommandContext| {
                                   before.lock().unwrap().push("committing");
                                   Ok(())
                                 }))?;
    ctx.add_transaction_listener(TransactionState::Committed,
                                 Box::new(move |_: &mut CommandContext| {
                                   after.lock().unwrap().push("committed");
                                   Ok(())
                                 }))?;
    ctx.session::<KeyValueSession>()?.put("k", json!(true));
    Ok(())
  }
}

#[test]
fn transaction_listeners_fire_around_commit() {
  let store = InMemoryKeyValueStore::new();
  let exec = executor_for(&store);
  let seen = Arc::new(Mutex::new(Vec::new()));
  exec.execute(&ListenAndPut { seen: seen.clone() }).unwrap();
  assert_eq!(*seen.lock().unwrap(), vec!["committing", "committed"]);
}

#[test]
fn transaction_listener_requires_active_transaction() {
  let store = InMemoryKeyValueStore::new();
  let exec = CommandExecutor::builder().session_factory(Arc::new(KeyValueSessionFactory::new(store.clone())))
                                       .without_transactions()
                                       .build();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let err = exec.execute(&ListenAndPut { seen }).unwrap_err();
  assert!(matches!(err, CommandError::IllegalState(_)));
}

struct Counting(Arc<AtomicUsize>);

impl CommandInterceptor for Counting {
  fn execute(&self,
             config: &CommandConfig,
             command: &mut dyn ErasedCommand,
             context: Option<&mut CommandContext>,
             next: Next<'_>)
             -> Result<()> {
    self.0.fetch_add(1, Ordering::SeqCst);
    next.execute(config, command, context)
  }
}

#[test]
fn custom_interceptors_wrap_every_command() {
  let store = InMemoryKeyValueStore::new();
  let pre = Arc::new(AtomicUsize::new(0));
  let post = Arc::new(AtomicUsize::new(0));
  let exec = CommandExecutor::builder().session_factory(Arc::new(KeyValueSessionFactory::new(store.clone())))
                                       .pre_interceptor(Arc::new(Counting(pre.clone())))
                                       .post_interceptor(Arc::new(Counting(post.clone())))
                                       .build();
  exec.execute(&Put { key: "a", value: 1 }).unwrap();
  exec.execute(&Get("a")).unwrap();
  assert_eq!(pre.load(Ordering::SeqCst), 2);
  assert_eq!(post.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_session_type_is_illegal_state() {
  let exec = CommandExecutor::builder().build();
  let err = exec.execute(&Get("a")).unwrap_err();
  assert!(matches!(err, CommandError::IllegalState(_)));
}
