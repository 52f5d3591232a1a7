//! `sandbox-agent`: the PID-1 process inside each sandbox. Serves the
//! local exec/file/pip_install HTTP API the manager dispatches to.

pub mod exec;
pub mod files;
pub mod http;
pub mod state;

pub use state::AgentState;
