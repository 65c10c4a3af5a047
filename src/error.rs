//! Custom error types for the camera engine.
//!
//! This module defines the primary error type, `CameraError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized way to handle
//! the different failure families a busy, stateful camera can produce.
//!
//! ## Error Hierarchy
//!
//! Device-originated errors fall into five classes, each its own variant so
//! callers can match on them without inspecting raw codes:
//!
//! - **`Busy`**: transient. The device rejected the call because it is mid
//!   operation. Bounded retry is appropriate.
//! - **`Combination`**: state-dependent. The command is invalid for the
//!   current device state (e.g. a physical dial position), not invalid in
//!   isolation. Triggers capability re-negotiation, not a plain retry.
//! - **`NotConnected`**: communication or timeout at the link level. Never
//!   retried silently.
//! - **`Parameter`**: invalid parameter or unsupported call. Fatal for that
//!   call only; session state is unaffected.
//! - **`Fatal`**: hardware fault, internal fault, out-of-memory. The session
//!   moves to its error state and requires an explicit reset.
//!
//! Every device-originated variant carries an [`ErrorRecord`] with the raw
//! result code and the `(api_code, error_code)` pair from the vendor's
//! last-error call, so diagnostics never lose the original codes.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type CamResult<T> = std::result::Result<T, CameraError>;

/// Raw device diagnostics attached to every device-originated failure.
///
/// `result` is the signed return value of the failing vendor call;
/// `api_code` and `error_code` come from the vendor's separate
/// "get last error" call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Signed result code returned by the failing call (0 = success).
    pub result: i32,
    /// Vendor API code from the last-error query.
    pub api_code: i32,
    /// Vendor error code from the last-error query.
    pub error_code: i32,
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "result={} api=0x{:04X} err=0x{:04X}",
            self.result, self.api_code, self.error_code
        )
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum CameraError {
    #[error("Device busy after {attempts} attempts during {operation} ({record})")]
    Busy {
        operation: &'static str,
        attempts: u32,
        record: ErrorRecord,
    },

    #[error("Command invalid for current device state during {operation} ({record})")]
    Combination {
        operation: &'static str,
        record: ErrorRecord,
    },

    #[error("Device not connected or link timed out during {operation} ({record})")]
    NotConnected {
        operation: &'static str,
        record: ErrorRecord,
    },

    #[error("Invalid or unsupported parameter during {operation} ({record})")]
    Parameter {
        operation: &'static str,
        record: ErrorRecord,
    },

    #[error("Fatal device error during {operation} ({record})")]
    Fatal {
        operation: &'static str,
        record: ErrorRecord,
    },

    #[error("Timed out waiting for image readiness after {attempts} polls")]
    AcquireTimeout { attempts: u32 },

    #[error("Requested exposure of {requested}s exceeds {max}s and device is not bulb capable")]
    ExposureOutOfRange { requested: f64, max: f64 },

    #[error("Capture rejected: exposure engine is in state {state:?}, not Idle")]
    NotIdle { state: crate::exposure::ExposureState },

    #[error("Invalid exposure request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Timed out waiting for the capture to finish")]
    CaptureWaitTimeout,

    #[error("No open session")]
    NoSession,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("RAW decode error: {0}")]
    Decode(#[from] crate::decode::DecodeError),
}

impl CameraError {
    /// Raw device diagnostics, when this error originated from a device call.
    pub fn record(&self) -> Option<ErrorRecord> {
        match self {
            CameraError::Busy { record, .. }
            | CameraError::Combination { record, .. }
            | CameraError::NotConnected { record, .. }
            | CameraError::Parameter { record, .. }
            | CameraError::Fatal { record, .. } => Some(*record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_codes() {
        let err = CameraError::Fatal {
            operation: "set_shutter_speed",
            record: ErrorRecord {
                result: -1,
                api_code: 0x0102,
                error_code: 0x100C,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("set_shutter_speed"));
        assert!(msg.contains("0x0102"));
        assert!(msg.contains("0x100C"));
    }

    #[test]
    fn test_record_accessor() {
        let record = ErrorRecord {
            result: -1,
            api_code: 1,
            error_code: 2,
        };
        let err = CameraError::Busy {
            operation: "set_sensitivity",
            attempts: 3,
            record,
        };
        assert_eq!(err.record(), Some(record));
        assert_eq!(CameraError::AcquireTimeout { attempts: 30 }.record(), None);
    }
}
