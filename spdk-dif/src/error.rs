//! Error types for spdk-dif

use std::ffi::NulError;

use crate::dif::{ContextError, DifError};
use crate::sequencer::Step;

/// Result type for spdk-dif operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for spdk-dif operations.
///
/// Every variant that reaches [`DifApp::run`](crate::DifApp::run) aborts the
/// run. Failures that only affect one namespace are reported through
/// [`SequenceFailure`](crate::sequencer::SequenceFailure) instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Environment initialization failed
    #[error("environment initialization failed: {0}")]
    EnvInit(String),

    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// String contains null byte
    #[error("String contains null byte")]
    NulError(#[from] NulError),

    /// Controller probe failed
    #[error("controller probe failed: {0}")]
    Probe(String),

    /// Probe finished without attaching anything
    #[error("no NVMe controllers found")]
    NoControllers,

    /// I/O queue pair allocation failed
    #[error("I/O queue pair allocation failed")]
    QpairAlloc,

    /// Buffer allocation failed
    #[error("Memory allocation failed ({0} bytes)")]
    MemoryAlloc(usize),

    /// Command could not be queued
    #[error("command submission failed: {0}")]
    Submit(String),

    /// Command completed with an NVMe error status
    #[error("NVMe error: SCT={sct:#x} SC={sc:#x} ({status})")]
    NvmeError {
        /// Status code type
        sct: u8,
        /// Status code
        sc: u8,
        /// Human-readable status
        status: &'static str,
    },

    /// Protection context could not be built from namespace parameters
    #[error("protection context: {0}")]
    Context(#[from] ContextError),

    /// Protection information generation or verification failed
    #[error(transparent)]
    Dif(#[from] DifError),

    /// A step of a namespace's write cycle failed and aborted the run
    #[error("controller {ctrlr} NS {nsid}: {step} failed: {source}")]
    Sequence {
        /// Controller name
        ctrlr: String,
        /// Namespace ID
        nsid: u32,
        /// Step that failed
        step: Step,
        /// Underlying error
        source: Box<Error>,
    },

    /// Completion was dropped without being signalled
    #[error("Operation cancelled")]
    Cancelled,

    /// Poll budget exhausted while waiting on a completion
    #[error("timed out after {polls} completion polls")]
    Timeout {
        /// Number of polls made before giving up
        polls: u64,
    },

    /// OS error with errno
    #[error("OS error: {0}")]
    Os(i32),
}

impl Error {
    /// Create an OS error from errno
    pub fn from_errno(errno: i32) -> Self {
        Error::Os(errno)
    }

    /// Create from SPDK return code (negative errno)
    pub fn from_rc(rc: i32) -> Self {
        if rc < 0 { Error::Os(-rc) } else { Error::Os(rc) }
    }

    /// NVMe error for a completion status.
    pub fn nvme(sct: u8, sc: u8) -> Self {
        Error::NvmeError {
            sct,
            sc,
            status: nvme_status_name(sct, sc),
        }
    }
}

/// Name of an NVMe completion status.
pub fn nvme_status_name(sct: u8, sc: u8) -> &'static str {
    match (sct, sc) {
        (0x0, 0x00) => "SUCCESS",
        (0x0, 0x01) => "INVALID OPCODE",
        (0x0, 0x02) => "INVALID FIELD",
        (0x0, 0x04) => "DATA TRANSFER ERROR",
        (0x0, 0x06) => "INTERNAL DEVICE ERROR",
        (0x0, 0x07) => "ABORTED - BY REQUEST",
        (0x0, 0x0b) => "INVALID NAMESPACE OR FORMAT",
        (0x0, 0x80) => "LBA OUT OF RANGE",
        (0x0, 0x81) => "CAPACITY EXCEEDED",
        (0x0, 0x82) => "NAMESPACE NOT READY",
        (0x2, 0x80) => "WRITE FAULTS",
        (0x2, 0x81) => "UNRECOVERED READ ERROR",
        (0x2, 0x82) => "END-TO-END GUARD CHECK ERROR",
        (0x2, 0x83) => "END-TO-END APPLICATION TAG CHECK ERROR",
        (0x2, 0x84) => "END-TO-END REFERENCE TAG CHECK ERROR",
        (0x2, 0x85) => "COMPARE FAILURE",
        (0x2, 0x86) => "ACCESS DENIED",
        (0x2, 0x87) => "DEALLOCATED OR UNWRITTEN BLOCK",
        _ => "UNKNOWN",
    }
}
