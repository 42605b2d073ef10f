// src/abi/notify.rs
//! The single syscall's argument and return shapes.
//!
//! The source this core is drawn from packs five operation bits into one
//! flags word and allows callers to combine them. That is modeled here as a
//! sum type instead: `NotifyOp` is an enum, not a bitmask, so invalid
//! combinations are rejected at the type boundary rather than at runtime.

/// The operation requested by a `notify` call. Exactly one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOp {
    /// Drain the caller's event ring, validate and insert each event.
    Submit,
    /// Block cooperatively until `completion_ready` is set, then clear it.
    Wait,
    /// Report whether the named workflow has reached a terminal state.
    Poll,
    /// Yield the CPU immediately with no other side effect.
    Yield,
    /// Mark the caller Zombie and yield; the scheduler reaps it.
    Exit,
}

impl NotifyOp {
    /// Decodes the legacy bitmask representation, rejecting anything but a
    /// single set bit. This is the only place a bitmask value is accepted,
    /// at the ABI boundary; everywhere else in the kernel uses `NotifyOp`.
    #[must_use]
    pub const fn from_single_bit(bits: u32) -> Option<Self> {
        match bits {
            0b0_0001 => Some(Self::Submit),
            0b0_0010 => Some(Self::Wait),
            0b0_0100 => Some(Self::Poll),
            0b0_1000 => Some(Self::Yield),
            0b1_0000 => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Arguments to the single syscall: a workflow id and the requested
/// operation. Register convention at the ABI boundary is argument one for
/// the workflow id, argument two for the (decoded) operation.
#[derive(Debug, Clone, Copy)]
pub struct NotifyArgs {
    /// Target workflow. Ignored by `Yield`/`Exit`.
    pub workflow_id: u64,
    /// The single requested operation.
    pub op: NotifyOp,
}

/// The outcome of a `notify` call, encoded as a `CompactResult` at the ABI
/// boundary (non-negative on success, negated error code otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// `Submit`: number of events drained and inserted.
    Submitted(u32),
    /// `Wait`: returned after `completion_ready` was observed and cleared.
    Woken,
    /// `Poll`: `0` workflow Completed, `1` still in progress.
    Status(u8),
    /// `Yield`/`Exit`: acknowledged.
    Acknowledged,
}

impl NotifyOutcome {
    /// Encodes the outcome into the raw return value used by `CompactResult`.
    #[must_use]
    pub const fn into_raw(self) -> i64 {
        match self {
            Self::Submitted(n) => n as i64,
            Self::Woken | Self::Acknowledged => 0,
            Self::Status(s) => s as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bit_decodes_to_matching_op() {
        assert_eq!(NotifyOp::from_single_bit(0b0001), Some(NotifyOp::Submit));
        assert_eq!(NotifyOp::from_single_bit(0b10000), Some(NotifyOp::Exit));
    }

    #[test]
    fn combined_bits_are_rejected() {
        assert_eq!(NotifyOp::from_single_bit(0b0011), None);
        assert_eq!(NotifyOp::from_single_bit(0), None);
    }

    #[test]
    fn outcome_encodes_submit_count() {
        assert_eq!(NotifyOutcome::Submitted(7).into_raw(), 7);
        assert_eq!(NotifyOutcome::Status(1).into_raw(), 1);
    }
}
