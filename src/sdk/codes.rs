//! Vendor result and error code families.
//!
//! The command SDK returns a signed `i32` from every call (0 = success) and
//! exposes detail through a separate last-error query yielding an
//! `(api_code, error_code)` pair. The error codes below are the fixed families
//! the engine must classify; anything else is treated as unknown and fatal.

/// Successful call.
pub const RC_COMPLETE: i32 = 0;
/// Generic failure; consult the last-error pair for detail.
pub const RC_ERROR: i32 = -1;

/// Command issued out of protocol sequence.
pub const ERR_SEQUENCE: i32 = 0x1001;
/// A parameter value was rejected.
pub const ERR_INVALID_PARAM: i32 = 0x1002;
/// The call is not supported by this model.
pub const ERR_UNSUPPORTED: i32 = 0x1003;
/// Device is busy with a prior operation.
pub const ERR_BUSY: i32 = 0x1004;
/// Autofocus did not converge in time.
pub const ERR_AF_TIMEOUT: i32 = 0x1005;
/// The release/shoot operation itself failed.
pub const ERR_SHOOT: i32 = 0x1006;
/// Device-side frame buffer is full.
pub const ERR_FRAME_BUFFER_FULL: i32 = 0x1007;
/// Link-level communication failure or timeout.
pub const ERR_COMMUNICATION: i32 = 0x1008;
/// Command invalid for the current device state (dial position etc.).
pub const ERR_COMBINATION: i32 = 0x1009;
/// Write to device media failed.
pub const ERR_WRITE: i32 = 0x100A;
/// Device media is full.
pub const ERR_MEDIA_FULL: i32 = 0x100B;
/// Hardware fault reported by the device.
pub const ERR_HARDWARE: i32 = 0x100C;
/// Internal fault in the vendor library.
pub const ERR_INTERNAL: i32 = 0x100D;
/// Vendor library ran out of memory.
pub const ERR_NO_MEMORY: i32 = 0x100E;

/// Retry/escalation class of a device error, decoupled from control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; bounded retry with backoff is appropriate.
    Retryable,
    /// Invalid for current device state; re-negotiate capabilities first.
    StateDependent,
    /// Link down or timed out; surface as not-connected, never retry silently.
    NotConnected,
    /// Invalid/unsupported parameter; fatal for this call only.
    Parameter,
    /// Hardware/internal/out-of-memory; always escalate.
    Fatal,
}

/// Classify a vendor error code into its retry/escalation class.
///
/// Sequence errors are grouped with busy: both mean "the device was not ready
/// for this command yet" and clear on their own. Everything unrecognized is
/// fatal rather than retryable.
pub fn classify(error_code: i32) -> ErrorClass {
    match error_code {
        ERR_BUSY | ERR_SEQUENCE => ErrorClass::Retryable,
        ERR_COMBINATION => ErrorClass::StateDependent,
        ERR_COMMUNICATION => ErrorClass::NotConnected,
        ERR_INVALID_PARAM | ERR_UNSUPPORTED => ErrorClass::Parameter,
        ERR_AF_TIMEOUT | ERR_SHOOT | ERR_FRAME_BUFFER_FULL | ERR_WRITE | ERR_MEDIA_FULL
        | ERR_HARDWARE | ERR_INTERNAL | ERR_NO_MEMORY => ErrorClass::Fatal,
        _ => ErrorClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_and_sequence_are_retryable() {
        assert_eq!(classify(ERR_BUSY), ErrorClass::Retryable);
        assert_eq!(classify(ERR_SEQUENCE), ErrorClass::Retryable);
    }

    #[test]
    fn test_combination_is_state_dependent() {
        assert_eq!(classify(ERR_COMBINATION), ErrorClass::StateDependent);
    }

    #[test]
    fn test_unknown_codes_are_fatal() {
        assert_eq!(classify(0x7FFF), ErrorClass::Fatal);
        assert_eq!(classify(0), ErrorClass::Fatal);
    }
}
