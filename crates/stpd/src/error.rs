//! Error types for stpd.
//!
//! Configuration errors are reported synchronously before anything is
//! committed. Protocol-level anomalies (malformed frames, unexpected events)
//! never surface as errors; they are logged and counted instead.

use thiserror::Error;

/// Result type alias for stpd operations.
pub type StpResult<T> = Result<T, StpError>;

/// Errors that can occur in the spanning tree engine.
#[derive(Debug, Error)]
pub enum StpError {
    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// No bridge exists for the VLAN.
    #[error("Bridge for VLAN {vlan} not found")]
    BridgeNotFound {
        /// The bridge VLAN.
        vlan: u16,
    },

    /// A bridge already exists for the VLAN.
    #[error("Bridge for VLAN {vlan} already exists")]
    BridgeExists {
        /// The bridge VLAN.
        vlan: u16,
    },

    /// Port is not attached to the bridge.
    #[error("Port {ifindex} not found on bridge {vlan}")]
    PortNotFound {
        /// The bridge VLAN.
        vlan: u16,
        /// The port interface index.
        ifindex: u32,
    },

    /// Port is already attached to the bridge.
    #[error("Port {ifindex} already attached to bridge {vlan}")]
    PortExists {
        /// The bridge VLAN.
        vlan: u16,
        /// The port interface index.
        ifindex: u32,
    },

    /// Hardware control operation failed.
    #[error("Hardware operation failed: {operation}: {message}")]
    Hardware {
        /// The operation that failed (e.g., "set_port_state", "flush_fdb").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Packet transmit or receive failed.
    #[error("Packet I/O failed on port {ifindex}: {message}")]
    PacketIo {
        /// The port interface index.
        ifindex: u32,
        /// Error message.
        message: String,
    },

    /// The bridge actor has stopped.
    #[error("Bridge {vlan} is not running")]
    ChannelClosed {
        /// The bridge VLAN.
        vlan: u16,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl StpError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a hardware error.
    pub fn hardware(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hardware {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a packet I/O error.
    pub fn packet_io(ifindex: u32, message: impl Into<String>) -> Self {
        Self::PacketIo {
            ifindex,
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StpError::Hardware { .. } | StpError::PacketIo { .. })
    }
}
