//! Node error taxonomy.
use thiserror::Error;

/// Coarse-grained error kinds returned by the core's synchronous entry points.
///
/// Asynchronous failures travel exclusively through [`crate::output::Event`] and never
/// appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Caller violated a precondition on an entry point.
    #[error("bad parameter: {0}")]
    BadParam(&'static str),

    /// A fixed-size pool (node slots, sockets, resolution entries) is exhausted.
    #[error("no resources available: {0}")]
    NoResources(&'static str),

    /// Operation issued in a state that does not permit it.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A peer asserted a VMAC already in use; fatal for the affected sub-component.
    #[error("duplicated vmac asserted by peer")]
    DuplicatedVmac,

    /// Connect failure, TLS error, or unexpected close, reported verbatim.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportError(_))
    }
}
