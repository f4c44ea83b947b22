//! Error taxonomy surfaced to users of the compiler.
//!
//! Every pass returns `Result<_, CompileError>`. The compile driver is the
//! only place that prints a diagnostic and chooses a process exit code;
//! passes themselves never recover from an error, they just propagate it.

use thiserror::Error;

/// The single error type threaded through every pass.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Bad/unknown names, duplicate definitions, malformed expressions,
    /// conflicting signal widths on an interface.
    #[error("specification error: {message}")]
    SpecError { message: String },

    /// Fan-out/fan-in mismatch, unresolved topology endpoint, a unicast
    /// linkpoint driving more than one link.
    #[error("topology error: {message}")]
    TopologyError { message: String },

    /// A disconnected port that is required to be driven, or a cycle
    /// discovered while answering a latency query.
    #[error("routing error: {message}")]
    RoutingError { message: String },

    /// An interconnect vertex that the multiway-cut solver could not trace
    /// back to any clock source.
    #[error("clock error: {message}")]
    ClockError { message: String },

    /// A field a sink requires is neither produced upstream nor defaulted,
    /// and strict mode is active.
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// A cyclic parameter definition (`a := b`, `b := a`).
    #[error("parameter cycle: {}", path.join(" -> "))]
    ParamCycle { path: Vec<String> },

    /// An IR invariant failed to hold after the pass that is supposed to
    /// establish it. Always a bug in this compiler, never a user-facing
    /// condition.
    #[error("internal invariant violated: {invariant}")]
    InternalInvariant { invariant: &'static str },
}

impl CompileError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::InternalInvariant { .. } => 2,
            _ => 1,
        }
    }

    pub fn spec(message: impl Into<String>) -> Self {
        CompileError::SpecError {
            message: message.into(),
        }
    }

    pub fn topology(message: impl Into<String>) -> Self {
        CompileError::TopologyError {
            message: message.into(),
        }
    }

    pub fn routing(message: impl Into<String>) -> Self {
        CompileError::RoutingError {
            message: message.into(),
        }
    }

    pub fn clock(message: impl Into<String>) -> Self {
        CompileError::ClockError {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CompileError::ProtocolError {
            message: message.into(),
        }
    }

    pub fn internal(invariant: &'static str) -> Self {
        CompileError::InternalInvariant { invariant }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
