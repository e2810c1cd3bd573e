//! SPDK backend.
//!
//! Implements the collaborator traits of [`device`](crate::device) on top of
//! the SPDK user-space NVMe driver. Needs the `spdk` cargo feature, an SPDK
//! install visible to pkg-config, hugepages and devices bound to a userspace
//! driver (`scripts/setup.sh`).
//!
//! ```text
//! SpdkEnv          spdk_env_init / spdk_env_fini
//!   SpdkDiscovery  spdk_nvme_probe
//!     SpdkController   one attached controller, detached on drop
//!       SpdkQueue      I/O queue pair, freed on drop
//!       DmaBuf         spdk_dma_zmalloc memory
//! ```
//!
//! # Example
//!
//! ```no_run
//! use spdk_dif::DifApp;
//! use spdk_dif::spdk::{SpdkDiscovery, SpdkEnv};
//!
//! let env = SpdkEnv::builder().name("dif_demo").shm_id(0).build()?;
//! let summary = DifApp::builder().run(SpdkDiscovery::new(&env))?;
//! std::process::exit(summary.exit_code());
//! # Ok::<(), spdk_dif::Error>(())
//! ```

mod controller;
mod dma;
mod env;
mod qpair;

pub use controller::{SpdkController, SpdkDiscovery};
pub use dma::DmaBuf;
pub use env::{SpdkEnv, SpdkEnvBuilder};
pub use qpair::SpdkQueue;
