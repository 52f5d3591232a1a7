//! `sandbox-manager`: session lifecycle orchestration and the outward
//! JSON/HTTP front-end.

pub mod container;
pub mod dispatch;
pub mod http;
pub mod manager;
pub mod orphan;
pub mod reaper;
pub mod registry;

pub use container::{BollardRuntime, ContainerHandle, ContainerRuntime, ContainerSpec, RuntimeError};
pub use manager::SandboxManager;
pub use registry::SessionRegistry;
