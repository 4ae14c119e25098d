// Archivo: interceptors.rs
// Propósito: cadena de interceptores que envuelve cada comando.
//
// Orden por defecto: interceptores propios previos → `LogInterceptor` →
// `CommandContextInterceptor` → `TransactionContextInterceptor` →
// interceptores propios posteriores → `CommandInvoker`.
use crate::command::{CommandConfig, ErasedCommand, TransactionPropagation};
use crate::context::CommandContext;
use crate::errors::{CommandError, Result};
use crate::session::SessionFactories;
use crate::transaction::{TransactionCommandContextCloseListener, TransactionContextFactory};
use log::{debug, error};
use std::sync::Arc;

/// Eslabón de la cadena. Recibe el contexto actual (si existe) y decide si
/// delegar en `next`.
pub trait CommandInterceptor: Send + Sync {
    fn execute(&self,
               config: &CommandConfig,
               command: &mut dyn ErasedCommand,
               context: Option<&mut CommandContext>,
               next: Next<'_>)
               -> Result<()>;
}

/// Resto de la cadena a partir del interceptor actual.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn CommandInterceptor>],
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn CommandInterceptor>]) -> Self {
        Self { rest: chain }
    }

    pub fn execute(self,
                   config: &CommandConfig,
                   command: &mut dyn ErasedCommand,
                   context: Option<&mut CommandContext>)
                   -> Result<()> {
        match self.rest.split_first() {
            Some((head, tail)) => head.execute(config, command, context, Next { rest: tail }),
            None => Err(CommandError::IllegalState("la cadena de interceptores no termina en un invoker".to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct LogInterceptor;

impl CommandInterceptor for LogInterceptor {
    fn execute(&self,
               config: &CommandConfig,
               command: &mut dyn ErasedCommand,
               context: Option<&mut CommandContext>,
               next: Next<'_>)
               -> Result<()> {
        let name = command.name().to_string();
        debug!("--- starting {} ---", name);
        let outcome = next.execute(config, command, context);
        debug!("--- {} finished ---", name);
        outcome
    }
}

/// Abre (o reutiliza) el `CommandContext` y lo cierra al terminar.
pub struct CommandContextInterceptor {
    factories: Arc<SessionFactories>,
}

impl CommandContextInterceptor {
    pub fn new(factories: Arc<SessionFactories>) -> Self {
        Self { factories }
    }
}

impl CommandInterceptor for CommandContextInterceptor {
    fn execute(&self,
               config: &CommandConfig,
               command: &mut dyn ErasedCommand,
               context: Option<&mut CommandContext>,
               next: Next<'_>)
               -> Result<()> {
        let reuse = config.context_reuse_possible && config.transaction_propagation == TransactionPropagation::Required;
        if let Some(existing) = context {
            if reuse && !existing.is_closed() {
                debug!("reutilizando el contexto de {} para {}", existing.command_name(), command.name());
                let previous = existing.is_reused();
                existing.set_reused(true);
                let outcome = next.execute(config, command, Some(&mut *existing));
                existing.set_reused(previous);
                return outcome;
            }
        }

        let mut fresh = CommandContext::new(command.name(), self.factories.clone());
        match next.execute(config, command, Some(&mut fresh)) {
            Ok(()) => fresh.close(None),
            Err(e) => {
                error!("comando {} fallido: {}", fresh.command_name(), e);
                if let Err(close_err) = fresh.close(Some(&e)) {
                    error!("cierre tras fallo de {} devolvió: {}", fresh.command_name(), close_err);
                }
                Err(e)
            }
        }
    }
}

/// Abre un contexto de transacción si el contexto de comando aún no tiene
/// uno y lo enlaza con su ciclo de cierre.
pub struct TransactionContextInterceptor {
    factory: Arc<dyn TransactionContextFactory>,
}

impl TransactionContextInterceptor {
    pub fn new(factory: Arc<dyn TransactionContextFactory>) -> Self {
        Self { factory }
    }
}

impl CommandInterceptor for TransactionContextInterceptor {
    fn execute(&self,
               config: &CommandConfig,
               command: &mut dyn ErasedCommand,
               context: Option<&mut CommandContext>,
               next: Next<'_>)
               -> Result<()> {
        let Some(ctx) = context else {
            return Err(CommandError::IllegalState(format!("{} sin contexto de comando", command.name())));
        };
        if !ctx.is_transaction_active() {
            let transaction = self.factory.open_transaction_context();
            ctx.add_close_listener(Box::new(TransactionCommandContextCloseListener::new(transaction)));
            ctx.set_transaction_active(true);
        }
        next.execute(config, command, Some(ctx))
    }
}

/// Último eslabón: ejecuta el comando en el contexto.
#[derive(Debug, Default)]
pub struct CommandInvoker;

impl CommandInterceptor for CommandInvoker {
    fn execute(&self,
               _config: &CommandConfig,
               command: &mut dyn ErasedCommand,
               context: Option<&mut CommandContext>,
               _next: Next<'_>)
               -> Result<()> {
        let ctx = context.ok_or_else(|| CommandError::IllegalState(format!("{} sin contexto de comando", command.name())))?;
        command.run(ctx)
    }
}
