//! proc-domain: modelo de datos persistible del motor de procesos.
//!
//! Define el conjunto cerrado de tipos de entidad (`EntityKind`), las claves
//! foráneas declaradas entre ellos, el orden de dependencias usado por el
//! flush y la representación genérica de una entidad (`EntityRecord`).
mod criteria;
mod dependency_order;
mod entity;
mod entity_kind;
mod errors;
mod foreign_keys;

pub use criteria::Criteria;
pub use dependency_order::EntityDependencyOrder;
pub use entity::{EntityRecord, TypedEntity};
pub use entity_kind::EntityKind;
pub use errors::DomainError;
pub use foreign_keys::{ForeignKey, ForeignKeys};
