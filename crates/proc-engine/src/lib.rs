//! proc-engine: motor de procesos lineales sobre la capa de comandos y la
//! sesión de persistencia.
//!
//! Los servicios (`RepositoryService`, `RuntimeService`, `TaskService`,
//! `HistoryService`) ejecutan comandos; los comandos usan los gestores de
//! entidades sobre la `DbSqlSession` de la transacción, y
//! `ProcessFlushOptimizer` recorta el trabajo redundante antes del flush.
pub mod commands;
mod config;
pub mod definition;
mod engine;
pub mod entities;
mod errors;
mod history;
pub mod managers;
mod optimizer;
mod services;

pub use commands::{Deployment, TaskCompletion, TaskQuery};
pub use config::{ProcessEngineConfig, ProcessEngineConfigBuilder};
pub use definition::{ProcessModel, UserTaskModel};
pub use engine::ProcessEngine;
pub use errors::{EngineError, Result};
pub use history::{HistoryLevel, HistoryManager};
pub use optimizer::ProcessFlushOptimizer;
pub use services::{HistoryService, RepositoryService, RuntimeService, TaskService};
