// src/errors/mod.rs
//! Unified error taxonomy for the kernel core.
//!
//! Every subsystem (decks, routing table, workflow engine, scheduler) reports
//! failures through [`KernelError`], a small tagged union over the four
//! classes described below. 16-bit [`ErrorCode`]s are partitioned by prefix
//! so a code alone identifies which subsystem raised it.

use core::fmt;

/// Severity attached to a logged error, mirrored on stdout/serial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; no action required.
    Info,
    /// Recoverable condition worth surfacing.
    Warning,
    /// An operation failed.
    Error,
    /// The kernel cannot continue safely.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        })
    }
}

/// 16-bit error codes, partitioned by prefix: `0x00xx` generic, `0x01xx`
/// Operations, `0x02xx` Storage, `0x03xx` Hardware, `0x04xx` Network,
/// `0x05xx` workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // --- 0x00xx: generic ---
    /// A validated argument was out of range or malformed.
    InvalidParameter = 0x0001,
    /// The kernel heap or a fixed-size table is exhausted.
    OutOfMemory = 0x0002,
    /// An operation did not complete before its deadline.
    Timeout = 0x0003,
    /// The event type or operation is not handled by any deck.
    NotImplemented = 0x0004,
    /// A resource is temporarily unavailable; retry-eligible.
    Busy = 0x0005,
    /// The caller lacks permission for the requested operation.
    PermissionDenied = 0x0006,

    // --- 0x01xx: Operations deck ---
    /// Operations deck payload failed validation (size, alignment).
    OperationsInvalidInput = 0x0100,

    // --- 0x02xx: Storage deck ---
    /// No tagged file matches the given path or descriptor.
    StorageFileNotFound = 0x0200,
    /// The file-descriptor table slot referenced is not open.
    StorageDescriptorInvalid = 0x0201,
    /// The tag filesystem collaborator reported an I/O failure.
    StorageIoError = 0x0202,
    /// The file-descriptor table has no free slots.
    StorageTableFull = 0x0203,

    // --- 0x03xx: Hardware deck ---
    /// The fixed 64-slot timer table has no free entry.
    HardwareTimerTableFull = 0x0300,
    /// Referenced a timer id that does not exist.
    HardwareTimerNotFound = 0x0301,
    /// A device operation was requested against an unimplemented device.
    HardwareDeviceNotImplemented = 0x0302,

    // --- 0x04xx: Network deck ---
    /// No route to the requested peer.
    NetworkUnreachable = 0x0400,
    /// The socket handle referenced does not exist.
    NetworkInvalidSocket = 0x0401,

    // --- 0x05xx: workflow engine ---
    /// A node's dependency failed, and `ErrorPolicy::Skip` propagated it.
    WorkflowDependencyFailed = 0x0500,
    /// The workflow id does not match any registered workflow.
    WorkflowNotFound = 0x0501,
    /// Retry count exhausted `retry_config.max` without success.
    WorkflowRetryExhausted = 0x0502,

    // --- 0x06xx: process lifecycle / scheduler ---
    /// The fixed-size process table has no free slot.
    ProcessTableFull = 0x0600,
    /// Referenced a pid that does not exist.
    ProcessNotFound = 0x0601,
    /// The watchdog killed a process idle past its syscall deadline.
    ProcessWatchdogKilled = 0x0602,
}

impl ErrorCode {
    /// Returns the signed, negated form used as `RingResult.status`.
    #[must_use]
    pub const fn as_negative_status(self) -> i32 {
        -(self as i32)
    }

    /// Classifies the code into one of the four kernel error classes.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::InvalidParameter
            | Self::NotImplemented
            | Self::PermissionDenied
            | Self::OperationsInvalidInput => ErrorClass::Validation,

            Self::Timeout
            | Self::Busy
            | Self::StorageIoError
            | Self::NetworkUnreachable
            | Self::HardwareTimerTableFull => ErrorClass::Transient,

            Self::StorageFileNotFound
            | Self::StorageDescriptorInvalid
            | Self::StorageTableFull
            | Self::HardwareTimerNotFound
            | Self::HardwareDeviceNotImplemented
            | Self::NetworkInvalidSocket
            | Self::WorkflowDependencyFailed
            | Self::WorkflowNotFound
            | Self::WorkflowRetryExhausted
            | Self::ProcessTableFull
            | Self::ProcessNotFound
            | Self::ProcessWatchdogKilled => ErrorClass::Permanent,

            Self::OutOfMemory => ErrorClass::Fatal,
        }
    }

    /// Whether retry policy should consider this code retry-eligible.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", *self as u16)
    }
}

/// The four-tier error taxonomy: validation errors never change state,
/// transient errors are retry-eligible, permanent errors are not, and fatal
/// errors panic the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected at a syscall or deck boundary; no state change occurred.
    Validation,
    /// Timeout, busy, unreachable — eligible for the workflow retry policy.
    Transient,
    /// Not found, invalid descriptor, invalid operation — never retried.
    Permanent,
    /// Kernel exception or unhandled kernel-space page fault — triggers panic.
    Fatal,
}

/// Top-level kernel error: a code plus the class it was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    code: ErrorCode,
}

impl KernelError {
    /// Wraps a code into a `KernelError`.
    #[must_use]
    pub const fn new(code: ErrorCode) -> Self {
        Self { code }
    }

    /// The underlying error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// The error's class (validation/transient/permanent/fatal).
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.code.class()
    }

    /// Whether the workflow engine's retry policy should consider this code.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

impl From<ErrorCode> for KernelError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.code, self.code.class())
    }
}

/// Kernel-wide `Result` alias.
pub type KernelResult<T> = core::result::Result<T, KernelError>;

/// Gives a static human-readable explanation for an error, independent of
/// any particular occurrence.
pub trait ErrorContext {
    /// A short, static description of what this error means.
    fn context(&self) -> &'static str;
}

impl ErrorContext for ErrorCode {
    fn context(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "a validated argument was out of range or malformed",
            Self::OutOfMemory => "the kernel heap or a fixed-size table is exhausted",
            Self::Timeout => "the operation did not complete before its deadline",
            Self::NotImplemented => "no deck handles this event type",
            Self::Busy => "the resource is temporarily unavailable",
            Self::PermissionDenied => "the caller lacks permission for this operation",
            Self::OperationsInvalidInput => "operations deck payload failed validation",
            Self::StorageFileNotFound => "no tagged file matches the given path or descriptor",
            Self::StorageDescriptorInvalid => "the file-descriptor slot referenced is not open",
            Self::StorageIoError => "the tag filesystem collaborator reported an I/O failure",
            Self::StorageTableFull => "the file-descriptor table has no free slots",
            Self::HardwareTimerTableFull => "the 64-slot timer table has no free entry",
            Self::HardwareTimerNotFound => "referenced a timer id that does not exist",
            Self::HardwareDeviceNotImplemented => "the device is a stub in this core",
            Self::NetworkUnreachable => "no route to the requested peer",
            Self::NetworkInvalidSocket => "the socket handle referenced does not exist",
            Self::WorkflowDependencyFailed => "a dependency failed and Skip propagated the error",
            Self::WorkflowNotFound => "the workflow id does not match any registered workflow",
            Self::WorkflowRetryExhausted => "retry count exhausted max_retries without success",
            Self::ProcessTableFull => "the process table has no free slot",
            Self::ProcessNotFound => "referenced a pid that does not exist",
            Self::ProcessWatchdogKilled => "the watchdog killed a process idle past its syscall deadline",
        }
    }
}

impl ErrorContext for KernelError {
    fn context(&self) -> &'static str {
        self.code.context()
    }
}

/// A fixed-capacity UTF-8 message buffer, avoiding a heap allocation for the
/// common case of a short formatted error description.
#[derive(Clone, Copy)]
pub struct ErrorMessage {
    bytes: [u8; 128],
    len: u8,
}

impl ErrorMessage {
    /// An empty message.
    pub const EMPTY: Self = Self { bytes: [0; 128], len: 0 };

    /// Builds a message from a static string, truncating to 127 bytes.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        let mut bytes = [0u8; 128];
        let truncated = &s.as_bytes()[..s.len().min(127)];
        bytes[..truncated.len()].copy_from_slice(truncated);
        Self { bytes, len: truncated.len() as u8 }
    }

    /// The message as a `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Debug for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral record attached to a failed routing entry or workflow node:
/// what failed, in which deck, on which event/workflow, and when. Logged and
/// copied (not owned long-term) into the `RingResult`'s error fields.
#[derive(Debug, Clone, Copy)]
pub struct ErrorRecord {
    /// The error code.
    pub code: ErrorCode,
    /// Severity for log formatting.
    pub severity: Severity,
    /// 1-based deck prefix that raised the error, if any.
    pub deck_prefix: Option<u8>,
    /// The in-flight event, if this error is tied to one.
    pub event_id: Option<u64>,
    /// The owning workflow, if any.
    pub workflow_id: Option<u64>,
    /// TSC timestamp at the moment of the error.
    pub timestamp: u64,
    /// Free-form context message.
    pub message: ErrorMessage,
}

impl ErrorRecord {
    /// Builds a new record, deriving severity and message from `code`.
    #[must_use]
    pub fn new(code: ErrorCode, timestamp: u64) -> Self {
        let severity = match code.class() {
            ErrorClass::Validation => Severity::Warning,
            ErrorClass::Transient => Severity::Warning,
            ErrorClass::Permanent => Severity::Error,
            ErrorClass::Fatal => Severity::Fatal,
        };
        Self {
            code,
            severity,
            deck_prefix: None,
            event_id: None,
            workflow_id: None,
            timestamp,
            message: ErrorMessage::from_str(code.context()),
        }
    }

    /// Attaches the deck prefix that raised this error.
    #[must_use]
    pub fn with_deck(mut self, prefix: u8) -> Self {
        self.deck_prefix = Some(prefix);
        self
    }

    /// Attaches the event id this error is tied to.
    #[must_use]
    pub fn with_event(mut self, event_id: u64) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Attaches the workflow id this error is tied to.
    #[must_use]
    pub fn with_workflow(mut self, workflow_id: u64) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Emits this record through the `log` facade at the level matching
    /// `severity`, so every deck/workflow/scheduler failure lands on the
    /// same annotated stream regardless of which subsystem raised it.
    pub fn log(&self) {
        match self.severity {
            Severity::Info => log::info!("{self}"),
            Severity::Warning => log::warn!("{self}"),
            Severity::Error => log::error!("{self}"),
            Severity::Fatal => log::error!("FATAL: {self}"),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} - {}", self.severity, self.code, self.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_status_round_trips_the_code() {
        let code = ErrorCode::StorageFileNotFound;
        assert_eq!(code.as_negative_status(), -(0x0200));
    }

    #[test]
    fn transient_classification_matches_retry_eligibility() {
        assert!(ErrorCode::Timeout.is_transient());
        assert!(!ErrorCode::StorageFileNotFound.is_transient());
    }

    #[test]
    fn error_record_derives_context_message() {
        let record = ErrorRecord::new(ErrorCode::WorkflowNotFound, 42).with_workflow(7);
        assert_eq!(record.workflow_id, Some(7));
        assert!(record.message.as_str().contains("workflow id"));
    }

    #[test]
    fn fatal_class_is_out_of_memory_only() {
        assert_eq!(ErrorCode::OutOfMemory.class(), ErrorClass::Fatal);
        assert_ne!(ErrorCode::Timeout.class(), ErrorClass::Fatal);
    }
}
