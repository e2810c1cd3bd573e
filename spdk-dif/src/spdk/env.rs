//! SPDK environment (DPDK, hugepages, PCI access).

use std::ffi::{CString, c_void};
use std::marker::PhantomData;

use spdk_dif_sys::*;

use crate::error::{Error, Result};

/// Initialized SPDK environment.
///
/// Only one may exist per process. The environment is torn down when this
/// is dropped, so every controller, queue and buffer must be gone by then.
pub struct SpdkEnv {
    _marker: PhantomData<*mut ()>, // !Send + !Sync
}

impl SpdkEnv {
    /// Create a new environment builder.
    pub fn builder() -> SpdkEnvBuilder {
        SpdkEnvBuilder::new()
    }
}

impl Drop for SpdkEnv {
    fn drop(&mut self) {
        unsafe { spdk_env_fini() };
    }
}

/// Builder for [`SpdkEnv`].
#[derive(Debug, Default, Clone)]
pub struct SpdkEnvBuilder {
    name: Option<String>,
    shm_id: Option<i32>,
    mem_size_mb: Option<i32>,
    no_huge: bool,
}

impl SpdkEnvBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the process name, used for hugepage file names.
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

    /// Back DMA memory with regular pages instead of hugepages.
    pub fn no_huge(mut self, no_huge: bool) -> Self {
        self.no_huge = no_huge;
        self
    }

    /// Initialize the environment.
    pub fn build(self) -> Result<SpdkEnv> {
        let name = CString::new(self.name.as_deref().unwrap_or("spdk_dif_demo"))?;
        let env_context = if self.no_huge {
            Some(CString::new("--no-huge")?)
        } else {
            None
        };

        let rc = unsafe {
            let mut opts: spdk_env_opts = std::mem::zeroed();
            opts.opts_size = std::mem::size_of::<spdk_env_opts>();
            spdk_env_opts_init(&mut opts);

            opts.name = name.as_ptr();
            if let Some(shm_id) = self.shm_id {
                opts.shm_id = shm_id;
            }
            if let Some(mem_size) = self.mem_size_mb {
                opts.mem_size = mem_size;
            }
            if let Some(ref ctx) = env_context {
                opts.env_context = ctx.as_ptr() as *mut c_void;
            }

            spdk_env_init(&opts)
        };

        if rc < 0 {
            return Err(Error::EnvInit(format!(
                "Unable to initialize SPDK env (rc {})",
                rc
            )));
        }
        Ok(SpdkEnv {
            _marker: PhantomData,
        })
    }
}
