//! dapctl-dap: Debug Adapter Protocol session engine.
//!
//! Speaks DAP to a debug adapter over stdio or TCP, multiplexes requests
//! and responses, drives the session lifecycle and keeps breakpoints in
//! sync with every running session.

pub mod adapter;
pub mod breakpoints;
pub mod capabilities;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sessions;
pub mod thread;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export key types for convenience.
pub use adapter::{AdapterConfiguration, Configuration, SessionsTasksProvider, Task};
pub use breakpoints::{Breakpoint, BreakpointId, BreakpointKind, Breakpoints, BreakpointsEvent};
pub use capabilities::DapCapabilities;
pub use client::{Client, ClientListener};
pub use error::DapError;
pub use session::{
    LaunchOptions, Session, SessionEvent, SessionId, SessionListener, SessionState, StopReason,
};
pub use sessions::{Sessions, SessionsEvent};
pub use thread::Thread;
pub use transport::Transport;
