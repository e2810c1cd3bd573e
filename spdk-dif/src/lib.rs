//! End-to-end data protection over NVMe namespaces.
//!
//! Discovers NVMe controllers, derives each namespace's protection
//! information (T10 DIF) parameters, writes random blocks carrying PI, reads
//! them back and verifies guard, application tag and reference tag on the
//! host.
//!
//! # Quick Start
//!
//! ```
//! use spdk_dif::sim::SimDiscovery;
//! use spdk_dif::{DifApp, Result};
//!
//! fn main() -> Result<()> {
//!     let summary = DifApp::builder()
//!         .io_blocks(4)
//!         .lba(0x100)
//!         .poll_limit(1_000_000)
//!         .run(SimDiscovery::demo())?;
//!     assert_eq!(summary.exit_code(), 0);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`app`] - Run entry point and builder
//! - [`dif`] - Protection information codec (CRC16 guard, generate/verify)
//! - [`profile`] - Per-namespace protection parameters
//! - [`registry`] - Attached controllers and namespaces
//! - [`sequencer`] - Write/read/verify state machine
//! - [`device`] - Backend traits (discovery, controller, queue)
//! - [`complete`] - Callback-to-future utilities
//! - [`sim`] - In-memory controllers
//! - `spdk` - SPDK user-space NVMe backend (feature `spdk`)
//! - [`error`] - Error types

pub mod app;
pub mod complete;
pub mod device;
pub mod dif;
pub mod error;
pub mod profile;
pub mod registry;
pub mod sequencer;
pub mod sim;
#[cfg(feature = "spdk")]
pub mod spdk;

// Re-exports
pub use app::{DifApp, DifAppBuilder, RunSummary};
pub use complete::{CompletionReceiver, CompletionSender, PollLimit, completion, poll_until};
pub use device::{Discovery, IoQueue, IoRequest, NvmeDevice, ProbeFilter};
pub use error::{Error, Result};
pub use profile::{NamespaceEntry, NsCapabilities};
pub use registry::DeviceRegistry;
pub use sequencer::{IoSequencer, SequenceFailure, SequencerOpts, Step};
