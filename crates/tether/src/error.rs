// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the client conductor.
//!
//! Errors fall in two groups:
//!
//! - **Transient** (`ChannelFull`): the caller may retry the same operation.
//! - **Latched**: everything else. A latched error is recorded once on the
//!   async command or resource handle it belongs to and is never retried
//!   automatically.
//!
//! `Error` is `Clone` so that a latched failure can be handed to every poll of
//! the same async command. I/O errors are shared through an `Arc` for that reason.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Error codes carried by driver error responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unclassified driver-side failure.
    GenericError,
    /// Channel string rejected by the driver.
    InvalidChannel,
    /// Remove issued for a subscription the driver does not know.
    UnknownSubscription,
    /// Remove issued for a publication the driver does not know.
    UnknownPublication,
    /// Endpoint could not be bound or resolved.
    ChannelEndpointError,
    /// Remove issued for a counter the driver does not know.
    UnknownCounter,
    /// Command type id not understood by the driver.
    UnknownCommandTypeId,
    /// Command record could not be decoded.
    MalformedCommand,
    /// Operation not supported by this driver.
    NotSupported,
    /// Host name in the channel could not be resolved.
    UnknownHost,
    /// Driver is temporarily out of a resource; a later add may succeed.
    ResourceTemporarilyUnavailable,
    /// Not enough storage for the log buffer.
    StorageSpace,
    /// Code this client version does not recognise.
    Unknown(i32),
}

impl ErrorCode {
    /// Decode a wire error code.
    #[must_use]
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::GenericError,
            1 => Self::InvalidChannel,
            2 => Self::UnknownSubscription,
            3 => Self::UnknownPublication,
            4 => Self::ChannelEndpointError,
            5 => Self::UnknownCounter,
            6 => Self::UnknownCommandTypeId,
            7 => Self::MalformedCommand,
            8 => Self::NotSupported,
            9 => Self::UnknownHost,
            10 => Self::ResourceTemporarilyUnavailable,
            11 => Self::StorageSpace,
            other => Self::Unknown(other),
        }
    }

    /// Encode to the wire value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::GenericError => 0,
            Self::InvalidChannel => 1,
            Self::UnknownSubscription => 2,
            Self::UnknownPublication => 3,
            Self::ChannelEndpointError => 4,
            Self::UnknownCounter => 5,
            Self::UnknownCommandTypeId => 6,
            Self::MalformedCommand => 7,
            Self::NotSupported => 8,
            Self::UnknownHost => 9,
            Self::ResourceTemporarilyUnavailable => 10,
            Self::StorageSpace => 11,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenericError => write!(f, "GENERIC_ERROR"),
            Self::InvalidChannel => write!(f, "INVALID_CHANNEL"),
            Self::UnknownSubscription => write!(f, "UNKNOWN_SUBSCRIPTION"),
            Self::UnknownPublication => write!(f, "UNKNOWN_PUBLICATION"),
            Self::ChannelEndpointError => write!(f, "CHANNEL_ENDPOINT_ERROR"),
            Self::UnknownCounter => write!(f, "UNKNOWN_COUNTER"),
            Self::UnknownCommandTypeId => write!(f, "UNKNOWN_COMMAND_TYPE_ID"),
            Self::MalformedCommand => write!(f, "MALFORMED_COMMAND"),
            Self::NotSupported => write!(f, "NOT_SUPPORTED"),
            Self::UnknownHost => write!(f, "UNKNOWN_HOST"),
            Self::ResourceTemporarilyUnavailable => write!(f, "RESOURCE_TEMPORARILY_UNAVAILABLE"),
            Self::StorageSpace => write!(f, "STORAGE_SPACE"),
            Self::Unknown(code) => write!(f, "UNKNOWN_CODE({code})"),
        }
    }
}

/// Errors returned by conductor operations.
#[derive(Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Command channel
    // ========================================================================
    /// Client-to-driver channel has no space for the command. Retry later.
    ChannelFull,
    /// Encoded record exceeds the channel's maximum message length.
    MessageTooLarge { length: usize, max: usize },
    /// Broadcast receiver was overrun by the driver and lost responses.
    BroadcastLapped,

    // ========================================================================
    // Driver outcomes
    // ========================================================================
    /// Driver rejected the command.
    DriverError { code: ErrorCode, message: String },
    /// Driver missed its liveness window, or a command went unanswered for
    /// longer than the driver timeout.
    DriverTimeout { elapsed_ms: i64, timeout_ms: i64 },
    /// Driver asked this client to terminate.
    ClientTimeout,
    /// Conductor was not serviced within the inter-service timeout.
    ServiceIntervalExceeded { elapsed_ns: i64, timeout_ns: i64 },

    // ========================================================================
    // Resources
    // ========================================================================
    /// Announced log buffer exists but its metadata is invalid.
    ResourceMapping(String),
    /// Operation on a resource handle that has been closed.
    AlreadyClosed,
    /// Operation on a client that has been closed.
    ClientClosed,

    // ========================================================================
    // Bootstrap
    // ========================================================================
    /// Shared CnC region carries a version this client cannot use.
    CncVersionMismatch { expected: i32, actual: i32 },
    /// Driver has not finished initialising the CnC region.
    CncNotReady,
    /// Caller supplied an invalid argument or the shared layout is corrupt.
    InvalidArgument(String),
    /// I/O error with underlying cause.
    Io(Arc<io::Error>),
}

impl Error {
    /// Whether the same operation may succeed if retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelFull | Self::CncNotReady)
    }

    /// Whether the error fails every pending command and live resource at once.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DriverTimeout { .. }
                | Self::ClientTimeout
                | Self::ServiceIntervalExceeded { .. }
                | Self::ClientClosed
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelFull => write!(f, "Command channel full"),
            Self::MessageTooLarge { length, max } => {
                write!(f, "Message too large: {length} bytes exceeds maximum {max}")
            }
            Self::BroadcastLapped => write!(f, "Unable to keep up with driver broadcast"),
            Self::DriverError { code, message } => {
                write!(f, "Driver error: code={code} message={message}")
            }
            Self::DriverTimeout {
                elapsed_ms,
                timeout_ms,
            } => write!(
                f,
                "Driver timeout: no response for {elapsed_ms}ms (timeout {timeout_ms}ms)"
            ),
            Self::ClientTimeout => write!(f, "Driver requested client termination"),
            Self::ServiceIntervalExceeded {
                elapsed_ns,
                timeout_ns,
            } => write!(
                f,
                "Conductor service interval exceeded: {elapsed_ns}ns > {timeout_ns}ns"
            ),
            Self::ResourceMapping(msg) => write!(f, "Resource mapping failed: {msg}"),
            Self::AlreadyClosed => write!(f, "Resource already closed"),
            Self::ClientClosed => write!(f, "Client closed"),
            Self::CncVersionMismatch { expected, actual } => write!(
                f,
                "CnC version mismatch: client={} driver={}",
                crate::cnc::format_version(*expected),
                crate::cnc::format_version(*actual)
            ),
            Self::CncNotReady => write!(f, "CnC region not yet initialised by driver"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Result type for conductor operations.
pub type Result<T> = std::result::Result<T, Error>;
