// src/abi/result.rs
//! ABI-safe result encoding for values crossing the user/kernel boundary.

use crate::errors::{ErrorCode, KernelError};

/// A single `i64` carrying either a non-negative success value or a negated
/// error code, the same convention [`crate::abi::ring::RingResult::status`]
/// uses. This is the return-value shape for the `notify` syscall itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct CompactResult(i64);

impl CompactResult {
    /// Wraps a non-negative success value.
    #[must_use]
    pub const fn ok(value: i64) -> Self {
        debug_assert!(value >= 0);
        Self(value)
    }

    /// Wraps an error code as a negative value.
    #[must_use]
    pub const fn err(code: ErrorCode) -> Self {
        Self(code.as_negative_status() as i64)
    }

    /// Whether this result represents success.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// The raw encoded value, as crossed over the ABI boundary.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Decodes into a `Result`. The error code is reconstructed from the
    /// magnitude; codes that do not map back to a known `ErrorCode` decode
    /// to `ErrorCode::InvalidParameter` rather than panicking.
    #[must_use]
    pub fn into_result(self) -> Result<u64, KernelError> {
        if self.0 >= 0 {
            Ok(self.0 as u64)
        } else {
            Err(KernelError::new(decode_negated(self.0)))
        }
    }
}

impl From<Result<u64, ErrorCode>> for CompactResult {
    fn from(value: Result<u64, ErrorCode>) -> Self {
        match value {
            Ok(v) => Self::ok(v as i64),
            Err(code) => Self::err(code),
        }
    }
}

fn decode_negated(raw: i64) -> ErrorCode {
    match (-raw) as u16 {
        0x0001 => ErrorCode::InvalidParameter,
        0x0002 => ErrorCode::OutOfMemory,
        0x0003 => ErrorCode::Timeout,
        0x0004 => ErrorCode::NotImplemented,
        0x0005 => ErrorCode::Busy,
        0x0006 => ErrorCode::PermissionDenied,
        0x0100 => ErrorCode::OperationsInvalidInput,
        0x0200 => ErrorCode::StorageFileNotFound,
        0x0201 => ErrorCode::StorageDescriptorInvalid,
        0x0202 => ErrorCode::StorageIoError,
        0x0203 => ErrorCode::StorageTableFull,
        0x0300 => ErrorCode::HardwareTimerTableFull,
        0x0301 => ErrorCode::HardwareTimerNotFound,
        0x0302 => ErrorCode::HardwareDeviceNotImplemented,
        0x0400 => ErrorCode::NetworkUnreachable,
        0x0401 => ErrorCode::NetworkInvalidSocket,
        0x0500 => ErrorCode::WorkflowDependencyFailed,
        0x0501 => ErrorCode::WorkflowNotFound,
        0x0502 => ErrorCode::WorkflowRetryExhausted,
        0x0600 => ErrorCode::ProcessTableFull,
        0x0601 => ErrorCode::ProcessNotFound,
        0x0602 => ErrorCode::ProcessWatchdogKilled,
        _ => ErrorCode::InvalidParameter,
    }
}

const _: () = {
    assert!(core::mem::size_of::<CompactResult>() == core::mem::size_of::<i64>());
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_round_trips() {
        let result = CompactResult::ok(42);
        assert!(result.is_ok());
        assert_eq!(result.into_result().unwrap(), 42);
    }

    #[test]
    fn err_round_trips_code() {
        let result = CompactResult::err(ErrorCode::StorageFileNotFound);
        assert!(!result.is_ok());
        assert_eq!(result.into_result().unwrap_err().code(), ErrorCode::StorageFileNotFound);
    }

    #[test]
    fn err_round_trips_process_band_code() {
        let result = CompactResult::err(ErrorCode::ProcessNotFound);
        assert_eq!(result.into_result().unwrap_err().code(), ErrorCode::ProcessNotFound);
    }
}
