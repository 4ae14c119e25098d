// entity_kind.rs
use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conjunto cerrado de tipos de registro persistible.
///
/// Cada variante corresponde a una tabla. El orden de declaración no tiene
/// significado para el flush; el orden de inserción/borrado lo define
/// `EntityDependencyOrder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
  Property,
  ByteArray,
  Deployment,
  ProcessDefinition,
  ProcessDefinitionInfo,
  Execution,
  ActivityInstance,
  Task,
  IdentityLink,
  VariableInstance,
  EventSubscription,
  Job,
  TimerJob,
  SuspendedJob,
  DeadLetterJob,
  HistoryJob,
  EventLogEntry,
  Comment,
  Attachment,
  HistoricProcessInstance,
  HistoricActivityInstance,
  HistoricTaskInstance,
  HistoricTaskLogEntry,
  HistoricIdentityLink,
  HistoricVariableInstance,
  HistoricDetail,
}

const ALL_KINDS: [EntityKind; 26] = [EntityKind::Property,
                                     EntityKind::ByteArray,
                                     EntityKind::Deployment,
                                     EntityKind::ProcessDefinition,
                                     EntityKind::ProcessDefinitionInfo,
                                     EntityKind::Execution,
                                     EntityKind::ActivityInstance,
                                     EntityKind::Task,
                                     EntityKind::IdentityLink,
                                     EntityKind::VariableInstance,
                                     EntityKind::EventSubscription,
                                     EntityKind::Job,
                                     EntityKind::TimerJob,
                                     EntityKind::SuspendedJob,
                                     EntityKind::DeadLetterJob,
                                     EntityKind::HistoryJob,
                                     EntityKind::EventLogEntry,
                                     EntityKind::Comment,
                                     EntityKind::Attachment,
                                     EntityKind::HistoricProcessInstance,
                                     EntityKind::HistoricActivityInstance,
                                     EntityKind::HistoricTaskInstance,
                                     EntityKind::HistoricTaskLogEntry,
                                     EntityKind::HistoricIdentityLink,
                                     EntityKind::HistoricVariableInstance,
                                     EntityKind::HistoricDetail];

impl EntityKind {
  /// Todos los tipos conocidos, en orden de declaración.
  pub fn all() -> &'static [EntityKind] {
    &ALL_KINDS
  }

  /// Nombre lógico usado para construir los identificadores de sentencia
  /// (`insertExecution`, `bulkDeleteTask`, ...).
  pub fn name(&self) -> &'static str {
    match self {
      EntityKind::Property => "Property",
      EntityKind::ByteArray => "ByteArray",
      EntityKind::Deployment => "Deployment",
      EntityKind::ProcessDefinition => "ProcessDefinition",
      EntityKind::ProcessDefinitionInfo => "ProcessDefinitionInfo",
      EntityKind::Execution => "Execution",
      EntityKind::ActivityInstance => "ActivityInstance",
      EntityKind::Task => "Task",
      EntityKind::IdentityLink => "IdentityLink",
      EntityKind::VariableInstance => "VariableInstance",
      EntityKind::EventSubscription => "EventSubscription",
      EntityKind::Job => "Job",
      EntityKind::TimerJob => "TimerJob",
      EntityKind::SuspendedJob => "SuspendedJob",
      EntityKind::DeadLetterJob => "DeadLetterJob",
      EntityKind::HistoryJob => "HistoryJob",
      EntityKind::EventLogEntry => "EventLogEntry",
      EntityKind::Comment => "Comment",
      EntityKind::Attachment => "Attachment",
      EntityKind::HistoricProcessInstance => "HistoricProcessInstance",
      EntityKind::HistoricActivityInstance => "HistoricActivityInstance",
      EntityKind::HistoricTaskInstance => "HistoricTaskInstance",
      EntityKind::HistoricTaskLogEntry => "HistoricTaskLogEntry",
      EntityKind::HistoricIdentityLink => "HistoricIdentityLink",
      EntityKind::HistoricVariableInstance => "HistoricVariableInstance",
      EntityKind::HistoricDetail => "HistoricDetail",
    }
  }

  /// Nombre de tabla sin prefijo.
  pub fn table_name(&self) -> &'static str {
    match self {
      EntityKind::Property => "ACT_GE_PROPERTY",
      EntityKind::ByteArray => "ACT_GE_BYTEARRAY",
      EntityKind::Deployment => "ACT_RE_DEPLOYMENT",
      EntityKind::ProcessDefinition => "ACT_RE_PROCDEF",
      EntityKind::ProcessDefinitionInfo => "ACT_PROCDEF_INFO",
      EntityKind::Execution => "ACT_RU_EXECUTION",
      EntityKind::ActivityInstance => "ACT_RU_ACTINST",
      EntityKind::Task => "ACT_RU_TASK",
      EntityKind::IdentityLink => "ACT_RU_IDENTITYLINK",
      EntityKind::VariableInstance => "ACT_RU_VARIABLE",
      EntityKind::EventSubscription => "ACT_RU_EVENT_SUBSCR",
      EntityKind::Job => "ACT_RU_JOB",
      EntityKind::TimerJob => "ACT_RU_TIMER_JOB",
      EntityKind::SuspendedJob => "ACT_RU_SUSPENDED_JOB",
      EntityKind::DeadLetterJob => "ACT_RU_DEADLETTER_JOB",
      EntityKind::HistoryJob => "ACT_RU_HISTORY_JOB",
      EntityKind::EventLogEntry => "ACT_EVT_LOG",
      EntityKind::Comment => "ACT_HI_COMMENT",
      EntityKind::Attachment => "ACT_HI_ATTACHMENT",
      EntityKind::HistoricProcessInstance => "ACT_HI_PROCINST",
      EntityKind::HistoricActivityInstance => "ACT_HI_ACTINST",
      EntityKind::HistoricTaskInstance => "ACT_HI_TASKINST",
      EntityKind::HistoricTaskLogEntry => "ACT_HI_TSK_LOG",
      EntityKind::HistoricIdentityLink => "ACT_HI_IDENTITYLINK",
      EntityKind::HistoricVariableInstance => "ACT_HI_VARINST",
      EntityKind::HistoricDetail => "ACT_HI_DETAIL",
    }
  }

  pub fn is_historic(&self) -> bool {
    matches!(self,
             EntityKind::HistoricProcessInstance
             | EntityKind::HistoricActivityInstance
             | EntityKind::HistoricTaskInstance
             | EntityKind::HistoricTaskLogEntry
             | EntityKind::HistoricIdentityLink
             | EntityKind::HistoricVariableInstance
             | EntityKind::HistoricDetail
             | EntityKind::Comment
             | EntityKind::Attachment)
  }

  /// Los registros tipo log no llevan revisión: nunca se actualizan y su
  /// borrado no participa del bloqueo optimista.
  pub fn has_revision(&self) -> bool {
    !matches!(self, EntityKind::EventLogEntry | EntityKind::HistoricTaskLogEntry)
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for EntityKind {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ALL_KINDS.iter()
             .copied()
             .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
             .ok_or_else(|| DomainError::Validation(format!("Tipo de entidad desconocido: {}", s)))
  }
}
