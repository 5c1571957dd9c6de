//! ## Jobs
//!
//! Templates built from upstream jobs, the registry that owns them and the notifications it
//! emits when the set of live jobs changes.
pub mod events;
pub mod id_factory;
pub mod registry;
pub mod template;

pub use events::{RegistryEvent, RegistryHooks};
pub use id_factory::JobIdFactory;
pub use registry::{BlockSubmitter, JobRegistry, ShareResult};
pub use template::{JobTemplate, MiningNotify, Solution};
