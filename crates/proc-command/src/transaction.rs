// Archivo: transaction.rs
// Propósito: contexto de transacción y listeners asociados.
//
// El contexto de transacción confirma o revierte las sesiones abiertas del
// `CommandContext`. Lo registra `TransactionContextInterceptor` como
// listener de cierre: confirma tras el flush y revierte en un fallo.
use crate::context::{CommandContext, CommandContextCloseListener};
use crate::errors::Result;
use log::{debug, error};

/// Fases de una transacción en las que se pueden registrar listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

/// Callback disparado en una fase de la transacción. Un error en
/// `Committing` aborta la confirmación; en las demás fases sólo se registra.
pub trait TransactionListener: Send {
    fn execute(&self, context: &mut CommandContext) -> Result<()>;
}

impl<F> TransactionListener for F where F: Fn(&mut CommandContext) -> Result<()> + Send
{
    fn execute(&self, context: &mut CommandContext) -> Result<()> {
        self(context)
    }
}

pub trait TransactionContext: Send {
    fn commit(&mut self, context: &mut CommandContext) -> Result<()>;

    fn rollback(&mut self, context: &mut CommandContext) -> Result<()>;
}

pub trait TransactionContextFactory: Send + Sync {
    fn open_transaction_context(&self) -> Box<dyn TransactionContext>;
}

/// Transacción local: cada sesión gestiona la suya y el contexto las
/// confirma o revierte en orden de apertura.
#[derive(Debug, Default)]
pub struct StandaloneTransactionContext;

impl TransactionContext for StandaloneTransactionContext {
    fn commit(&mut self, context: &mut CommandContext) -> Result<()> {
        debug!("confirmando transacción de {}", context.command_name());
        context.fire_transaction_event(TransactionState::Committing)?;
        context.commit_sessions()?;
        if let Err(e) = context.fire_transaction_event(TransactionState::Committed) {
            error!("listener post-commit de {} falló: {}", context.command_name(), e);
        }
        Ok(())
    }

    fn rollback(&mut self, context: &mut CommandContext) -> Result<()> {
        debug!("revirtiendo transacción de {}", context.command_name());
        if let Err(e) = context.fire_transaction_event(TransactionState::RollingBack) {
            error!("listener pre-rollback de {} falló: {}", context.command_name(), e);
        }
        let outcome = context.rollback_sessions();
        if let Err(e) = context.fire_transaction_event(TransactionState::RolledBack) {
            error!("listener post-rollback de {} falló: {}", context.command_name(), e);
        }
        outcome
    }
}

#[derive(Debug, Default)]
pub struct StandaloneTransactionContextFactory;

impl TransactionContextFactory for StandaloneTransactionContextFactory {
    fn open_transaction_context(&self) -> Box<dyn TransactionContext> {
        Box::new(StandaloneTransactionContext)
    }
}

/// Enlaza el ciclo de cierre del contexto con la transacción.
pub struct TransactionCommandContextCloseListener {
    transaction: Box<dyn TransactionContext>,
}

impl TransactionCommandContextCloseListener {
    pub fn new(transaction: Box<dyn TransactionContext>) -> Self {
        Self { transaction }
    }
}

impl CommandContextCloseListener for TransactionCommandContextCloseListener {
    fn after_sessions_flush(&mut self, context: &mut CommandContext) -> Result<()> {
        self.transaction.commit(context)
    }

    fn close_failure(&mut self, context: &mut CommandContext) {
        if let Err(e) = self.transaction.rollback(context) {
            error!("rollback de {} falló: {}", context.command_name(), e);
        }
        context.set_transaction_active(false);
    }

    fn closed(&mut self, context: &mut CommandContext) {
        context.set_transaction_active(false);
    }
}
