//! Cognitive core: tool orchestration, intent economy, causal memory, and
//! evolution policy for an autonomous agent runtime.
//!
//! `Core` (see [`core`]) wires every subsystem together; embedding
//! processes construct one `Core` at boot, register their [`orchestrator::Capability`]
//! implementations, and drive the [`autonomy::AutonomyController`] loop
//! through [`runtime::spawn`]. Everything outside this crate — HTTP
//! façades, concrete tool bodies, message brokers — is an external
//! collaborator behind the `ingress`/`egress` surfaces.

pub mod autonomy;
pub mod canon;
pub mod cml;
pub mod config;
pub mod core;
pub mod economy;
pub mod egress;
pub mod error;
pub mod evolution;
pub mod ingress;
pub mod intent_stack;
pub mod model;
pub mod observer;
pub mod orchestrator;
pub mod runtime;
pub mod trust;

pub use core::Core;
pub use error::{CoreError, CoreResult};
