use std::net::SocketAddr;

/// Errors raised by the elector and its transport adapter.
///
/// Reliable-link variants (`Basic`, `Stable`) treat [`ElectorError::IncompleteSend`]
/// and [`ElectorError::SocketClosed`] as fatal and propagate them out of the
/// dispatcher; lossy-link variants (`ExpiringLinks`, `Alerting`) log and continue.
#[derive(Debug, thiserror::Error)]
pub enum ElectorError {
    #[error("datagram to {dest} was only partially sent ({sent} of {total} bytes)")]
    IncompleteSend {
        dest: SocketAddr,
        sent: usize,
        total: usize,
    },

    #[error("transport socket is closed")]
    SocketClosed,

    #[error("malformed message from {src}: {reason}")]
    Malformed { src: SocketAddr, reason: String },

    #[error("message from unknown peer {src}")]
    UnknownPeer { src: SocketAddr },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ElectorError {
    /// Whether this is one of the transport-level failures that reliable
    /// variants treat as fatal, as opposed to a per-datagram decoding
    /// problem (`Malformed`) that's always worth just logging and moving on.
    pub fn is_fatal_transport_error(&self) -> bool {
        matches!(
            self,
            ElectorError::IncompleteSend { .. } | ElectorError::SocketClosed | ElectorError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ElectorError>;
