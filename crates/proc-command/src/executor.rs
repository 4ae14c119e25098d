// Archivo: executor.rs
// Propósito: punto de entrada para ejecutar comandos a través de la cadena
// de interceptores.
use crate::command::{Command, CommandConfig, CommandSlot};
use crate::context::CommandContext;
use crate::errors::Result;
use crate::interceptors::{CommandContextInterceptor, CommandInterceptor, CommandInvoker, LogInterceptor, Next,
                          TransactionContextInterceptor};
use crate::session::{SessionFactories, SessionFactory};
use crate::transaction::{StandaloneTransactionContextFactory, TransactionContextFactory};
use std::sync::Arc;

/// Ejecutor de comandos. Inmutable y compartible entre hilos; cada
/// ejecución abre su propio contexto salvo que se reutilice uno existente.
#[derive(Clone)]
pub struct CommandExecutor {
    chain: Arc<Vec<Arc<dyn CommandInterceptor>>>,
    default_config: CommandConfig,
    factories: Arc<SessionFactories>,
}

impl CommandExecutor {
    pub fn builder() -> CommandExecutorBuilder {
        CommandExecutorBuilder::new()
    }

    pub fn default_config(&self) -> CommandConfig {
        self.default_config
    }

    pub fn session_factories(&self) -> &Arc<SessionFactories> {
        &self.factories
    }

    /// Ejecuta `command` con la configuración por defecto.
    pub fn execute<C: Command + ?Sized>(&self, command: &C) -> Result<C::Output> {
        self.execute_with_config(self.default_config, command)
    }

    pub fn execute_with_config<C: Command + ?Sized>(&self, config: CommandConfig, command: &C) -> Result<C::Output> {
        let mut slot = CommandSlot::new(command);
        Next::new(&self.chain).execute(&config, &mut slot, None)?;
        slot.into_output()
    }

    /// Ejecuta `command` pasando un contexto existente a la cadena. Con la
    /// configuración por defecto el contexto se reutiliza; con
    /// `RequiresNew` se abre uno nuevo con su propia transacción.
    pub fn execute_in<C: Command + ?Sized>(&self,
                                           context: &mut CommandContext,
                                           config: CommandConfig,
                                           command: &C)
                                           -> Result<C::Output> {
        let mut slot = CommandSlot::new(command);
        Next::new(&self.chain).execute(&config, &mut slot, Some(context))?;
        slot.into_output()
    }
}

/// Construye la cadena de interceptores y el registro de fábricas.
pub struct CommandExecutorBuilder {
    factories: SessionFactories,
    pre: Vec<Arc<dyn CommandInterceptor>>,
    post: Vec<Arc<dyn CommandInterceptor>>,
    transactions: Option<Arc<dyn TransactionContextFactory>>,
    default_config: CommandConfig,
}

impl CommandExecutorBuilder {
    pub fn new() -> Self {
        Self { factories: SessionFactories::new(),
               pre: Vec::new(),
               post: Vec::new(),
               transactions: Some(Arc::new(StandaloneTransactionContextFactory)),
               default_config: CommandConfig::default() }
    }

    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factories.register(factory);
        self
    }

    pub fn pre_interceptor(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.pre.push(interceptor);
        self
    }

    pub fn post_interceptor(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.post.push(interceptor);
        self
    }

    pub fn transaction_context_factory(mut self, factory: Arc<dyn TransactionContextFactory>) -> Self {
        self.transactions = Some(factory);
        self
    }

    /// Sin contexto de transacción las sesiones se cierran sin confirmar.
    pub fn without_transactions(mut self) -> Self {
        self.transactions = None;
        self
    }

    pub fn default_config(mut self, config: CommandConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn build(self) -> CommandExecutor {
        let factories = Arc::new(self.factories);
        let mut chain: Vec<Arc<dyn CommandInterceptor>> = self.pre;
        chain.push(Arc::new(LogInterceptor));
        chain.push(Arc::new(CommandContextInterceptor::new(factories.clone())));
        if let Some(tx) = self.transactions {
            chain.push(Arc::new(TransactionContextInterceptor::new(tx)));
        }
        chain.extend(self.post);
        chain.push(Arc::new(CommandInvoker));
        CommandExecutor { chain: Arc::new(chain),
                          default_config: self.default_config,
                          factories }
    }
}

impl Default for CommandExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
