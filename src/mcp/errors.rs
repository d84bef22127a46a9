//! Error kinds for the provider connection stack.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while launching, talking to, or invoking tools on a provider.
#[derive(Debug, Error)]
pub enum McpError {
    /// The provider executable could not be started, or exited before it
    /// announced an endpoint.
    #[error("failed to spawn provider '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// No endpoint line appeared on the provider's stdout in time.
    #[error("provider did not announce an endpoint within {timeout:?}")]
    EndpointTimeout { timeout: Duration },

    /// The websocket handshake against the announced endpoint failed.
    #[error("failed to connect to endpoint '{endpoint}': {reason}")]
    Connect { endpoint: String, reason: String },

    /// Operation attempted before connect, after disconnect, or after the
    /// provider process went away.
    #[error("not connected to a provider")]
    NotConnected,

    /// The connection dropped while a read was pending.
    #[error("channel closed")]
    Closed,

    /// A second consumer tried to wait on the channel while one was already waiting.
    #[error("another reader is already waiting on the channel")]
    ReaderBusy,

    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered a discovery call with an error envelope, or sent
    /// something that is not a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The provider reported an error for a tool invocation.
    #[error("remote tool error: {0}")]
    RemoteTool(String),

    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}
