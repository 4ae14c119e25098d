// Archivo: lib.rs
// Propósito: exponer la capa de comandos: unidad de trabajo, contexto,
// sesiones, cadena de interceptores y transacciones.
pub mod command;
pub mod context;
pub mod errors;
pub mod executor;
pub mod interceptors;
pub mod session;
pub mod stubs;
pub mod transaction;

pub use command::{Command, CommandConfig, CommandSlot, ErasedCommand, TransactionPropagation};
pub use context::{CommandContext, CommandContextCloseListener};
pub use errors::{CommandError, Result};
pub use executor::{CommandExecutor, CommandExecutorBuilder};
pub use interceptors::{CommandContextInterceptor, CommandInterceptor, CommandInvoker, LogInterceptor, Next,
                       TransactionContextInterceptor};
pub use session::{Session, SessionFactories, SessionFactory};
pub use transaction::{StandaloneTransactionContext, StandaloneTransactionContextFactory, TransactionContext,
                      TransactionContextFactory, TransactionListener, TransactionState};
