// Archivo: command.rs
// Propósito: definir la unidad de trabajo (`Command`) y su configuración de
// ejecución.
use crate::context::CommandContext;
use crate::errors::{CommandError, Result};

/// Operación lógica del motor ejecutada dentro de un único límite
/// transaccional. Todo acceso a sesiones pasa por el `CommandContext`.
pub trait Command {
    type Output;

    /// Nombre usado en los logs de la cadena de interceptores.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn execute(&self, context: &mut CommandContext) -> Result<Self::Output>;
}

/// Propagación de la transacción cuando ya existe un contexto activo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPropagation {
    /// Participa de la transacción en curso si la hay; si no, abre una.
    #[default]
    Required,
    /// Abre siempre un contexto y una transacción nuevos.
    RequiresNew,
}

/// Opciones con las que la cadena ejecuta un comando.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    pub context_reuse_possible: bool,
    pub transaction_propagation: TransactionPropagation,
}

impl CommandConfig {
    pub fn transaction_requires_new(self) -> Self {
        Self { context_reuse_possible: false,
               transaction_propagation: TransactionPropagation::RequiresNew }
    }

    pub fn with_context_reuse(self, possible: bool) -> Self {
        Self { context_reuse_possible: possible,
               ..self }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { context_reuse_possible: true,
               transaction_propagation: TransactionPropagation::Required }
    }
}

/// Vista sin tipo de un comando para que los interceptores sean objetos
/// (`dyn`). El resultado queda guardado en la propia ranura.
pub trait ErasedCommand {
    fn name(&self) -> &str;

    fn run(&mut self, context: &mut CommandContext) -> Result<()>;
}

/// Ranura que envuelve un `Command` tipado y captura su salida.
pub struct CommandSlot<'a, C: Command + ?Sized> {
    command: &'a C,
    output: Option<C::Output>,
}

impl<'a, C: Command + ?Sized> CommandSlot<'a, C> {
    pub fn new(command: &'a C) -> Self {
        Self { command, output: None }
    }

    /// Devuelve la salida producida; error si la cadena no llegó al invoker.
    pub fn into_output(self) -> Result<C::Output> {
        let name = self.command.name().to_string();
        self.output
            .ok_or_else(|| CommandError::IllegalState(format!("el comando {} no produjo resultado", name)))
    }
}

impl<C: Command + ?Sized> ErasedCommand for CommandSlot<'_, C> {
    fn name(&self) -> &str {
        self.command.name()
    }

    fn run(&mut self, context: &mut CommandContext) -> Result<()> {
        self.output = Some(self.command.execute(context)?);
        Ok(())
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_drop_module_path_and_generics() {
        assert_eq!(short_type_name("proc_engine::cmd::StartProcessCmd"), "StartProcessCmd");
        assert_eq!(short_type_name("a::b::Wrapper<c::D>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn requires_new_disables_reuse() {
        let cfg = CommandConfig::default().transaction_requires_new();
        assert!(!cfg.context_reuse_possible);
        assert_eq!(cfg.transaction_propagation, TransactionPropagation::RequiresNew);
    }
}
