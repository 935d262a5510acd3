//! Volume-plugin transport.
//!
//! [`server::PluginServer`] speaks the container engine's plugin protocol
//! (HTTP POST with JSON bodies) over a unix socket.

pub mod server;

pub use server::{DEFAULT_SOCKET_PATH, PluginServer, dispatch};
