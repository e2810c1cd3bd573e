//! Run entry point.
//!
//! [`DifApp`] and [`DifAppBuilder`] tie the pieces together: discover
//! controllers, derive namespace profiles, then write, read back and verify
//! protected blocks on every eligible namespace.
//!
//! # Example
//!
//! ```
//! use spdk_dif::sim::SimDiscovery;
//! use spdk_dif::{DifApp, Result};
//!
//! fn main() -> Result<()> {
//!     let summary = DifApp::builder()
//!         .name("dif_demo")
//!         .io_blocks(2)
//!         .run(SimDiscovery::demo())?;
//!     println!("{} of {} namespaces verified", summary.passed, summary.tested);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use crate::complete::PollLimit;
use crate::device::{Discovery, ProbeFilter};
use crate::error::Result;
use crate::registry::DeviceRegistry;
use crate::sequencer::{IoSequencer, SequencerOpts, SequencerReport};

/// Protected I/O demonstration.
///
/// This type doesn't hold state - use [`DifApp::builder()`] to configure and
/// run.
pub struct DifApp {
    _private: (),
}

impl DifApp {
    /// Create a new application builder.
    pub fn builder() -> DifAppBuilder {
        DifAppBuilder::new()
    }
}

/// Counts from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Namespaces that went through a write/read cycle
    pub tested: usize,
    /// Sequences whose read-back verified
    pub passed: usize,
    /// Sequences that failed on read or verify
    pub failed: usize,
    /// Namespaces skipped as ineligible
    pub skipped: usize,
}

impl RunSummary {
    fn from_report(report: &SequencerReport) -> Self {
        Self {
            tested: report.sequences.len(),
            passed: report.passed(),
            failed: report.failed(),
            skipped: report.skipped,
        }
    }

    /// No sequence failed.
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit status for this run.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Builder for configuring and running a [`DifApp`].
#[cfg_attr(not(feature = "spdk"), allow(dead_code))]
pub struct DifAppBuilder {
    name: Option<String>,
    shm_id: Option<i32>,
    mem_size_mb: Option<i32>,
    no_huge: bool,
    filter: ProbeFilter,
    opts: SequencerOpts,
}

impl DifAppBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self {
            name: None,
            shm_id: None,
            mem_size_mb: None,
            no_huge: false,
            filter: ProbeFilter::all(),
            opts: SequencerOpts::default(),
        }
    }

    /// Set the application name.
    ///
    /// Used for hugepage file names when running against SPDK.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the shared memory ID for multi-process mode.
    ///
    /// Use -1 to disable shared memory (single process).
    pub fn shm_id(mut self, id: i32) -> Self {
        self.shm_id = Some(id);
        self
    }

    /// Set the amount of hugepage memory to reserve in MB.
    pub fn mem_size_mb(mut self, mb: i32) -> Self {
        self.mem_size_mb = Some(mb);
        self
    }

    /// Disable hugepage allocation (use regular memory).
    pub fn no_huge(mut self, no_huge: bool) -> Self {
        self.no_huge = no_huge;
        self
    }

    /// Only attach the controller at `traddr`.
    pub fn traddr(mut self, traddr: &str) -> Self {
        self.filter = ProbeFilter::traddr(traddr);
        self
    }

    /// Blocks per write/read. Defaults to 1.
    pub fn io_blocks(mut self, blocks: u32) -> Self {
        self.opts.io_blocks = blocks;
        self
    }

    /// Starting LBA; also seeds the reference tag. Defaults to 0.
    pub fn lba(mut self, lba: u64) -> Self {
        self.opts.lba = lba;
        self
    }

    /// Application tag and mask carried in each command.
    pub fn app_tag(mut self, app_tag: u16, mask: u16) -> Self {
        self.opts.app_tag = app_tag;
        self.opts.apptag_mask = mask;
        self
    }

    /// Give up on a completion after `polls` queue polls.
    pub fn poll_limit(mut self, polls: u64) -> Self {
        self.opts.poll_limit.max_polls = Some(polls);
        self
    }

    /// Give up on a completion after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.poll_limit.timeout = Some(timeout);
        self
    }

    /// Run against controllers found by `discovery`.
    ///
    /// Every controller is detached before this returns, on success and on
    /// error alike.
    pub fn run<D: Discovery>(self, mut discovery: D) -> Result<RunSummary> {
        log::info!("Initializing NVMe Controllers");
        let registry = DeviceRegistry::probe(&mut discovery, &self.filter)?;
        log::info!("Initialization complete.");

        let report = IoSequencer::new(&registry, self.opts)?.run()?;
        let summary = RunSummary::from_report(&report);
        log::info!(
            "{} namespace(s) tested: {} passed, {} failed, {} skipped",
            summary.tested,
            summary.passed,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    /// Initialize the SPDK environment and run against local controllers.
    #[cfg(feature = "spdk")]
    pub fn run_spdk(self) -> Result<RunSummary> {
        let mut env = crate::spdk::SpdkEnv::builder().no_huge(self.no_huge);
        if let Some(name) = &self.name {
            env = env.name(name);
        }
        if let Some(shm_id) = self.shm_id {
            env = env.shm_id(shm_id);
        }
        if let Some(mb) = self.mem_size_mb {
            env = env.mem_size_mb(mb);
        }
        let env = env.build()?;

        let result = self.run(crate::spdk::SpdkDiscovery::new(&env));
        drop(env);
        result
    }
}

impl Default for DifAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dif::DifType;
    use crate::error::Error;
    use crate::sequencer::Step;
    use crate::sim::{Faults, SimControllerConfig, SimDiscovery, SimNamespace};

    #[test]
    fn test_demo_topology() {
        let summary = DifApp::builder().run(SimDiscovery::demo()).unwrap();
        assert_eq!(
            summary,
            RunSummary {
                tested: 2,
                passed: 2,
                failed: 0,
                skipped: 2,
            }
        );
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_failed_sequence_sets_exit_code() {
        let discovery = SimDiscovery::new().controller(
            SimControllerConfig::new("sim0", "model", "serial").namespace(
                SimNamespace::protected(1, 512, 8, DifType::Type1).with_faults(Faults {
                    corrupt_read: Some(0),
                    ..Faults::default()
                }),
            ),
        );
        let summary = DifApp::builder().run(discovery).unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!summary.success());
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_no_controllers() {
        let result = DifApp::builder().run(SimDiscovery::new());
        assert!(matches!(result, Err(Error::NoControllers)));
    }

    #[test]
    fn test_traddr_filter() {
        let summary = DifApp::builder()
            .traddr("0000:00:05.0")
            .run(SimDiscovery::demo())
            .unwrap();
        assert_eq!(summary.tested, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn test_detached_on_fatal_error() {
        let discovery = SimDiscovery::new().controller(
            SimControllerConfig::new("sim0", "model", "serial").namespace(
                SimNamespace::protected(1, 512, 8, DifType::Type1).with_faults(Faults {
                    write_error: true,
                    ..Faults::default()
                }),
            ),
        );
        let stats = discovery.stats_handle();
        let result = DifApp::builder().run(discovery);
        assert!(matches!(
            result,
            Err(Error::Sequence {
                step: Step::WriteCompletion,
                ..
            })
        ));
        assert_eq!(stats.borrow().attached, 1);
        assert_eq!(stats.borrow().detached, 1);
    }
}
