//! Controller discovery and attach.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::NonNull;

use spdk_dif_sys::*;

use crate::device::{AttachEvent, ControllerInfo, Discovery, NvmeDevice, ProbeFilter};
use crate::dif::DifType;
use crate::error::{Error, Result};
use crate::profile::NsCapabilities;

use super::dma::DmaBuf;
use super::env::SpdkEnv;
use super::qpair::SpdkQueue;

// Byte offsets into the identify data structures
const CDATA_SN: usize = 4;
const CDATA_SN_LEN: usize = 20;
const CDATA_MN: usize = 24;
const CDATA_MN_LEN: usize = 40;
const NSDATA_DPS: usize = 29;
/// DPS bit: PI transferred as the first eight bytes of metadata
const DPS_MD_START: u8 = 1 << 3;

/// An attached NVMe controller.
///
/// Dropping it detaches the controller.
///
/// # Thread Safety
///
/// `!Send + !Sync` - controller operations must remain on the thread that
/// probed it.
pub struct SpdkController {
    ptr: NonNull<spdk_nvme_ctrlr>,
    _marker: PhantomData<*mut ()>,
}

impl SpdkController {
    fn info(&self, trid: &spdk_nvme_transport_id) -> ControllerInfo {
        let cdata = unsafe { spdk_nvme_ctrlr_get_data(self.ptr.as_ptr()) } as *const u8;
        let field = |offset: usize, len: usize| {
            let bytes = unsafe { std::slice::from_raw_parts(cdata.add(offset), len) };
            ascii_field(bytes)
        };

        ControllerInfo {
            traddr: c_field(&trid.traddr),
            model: field(CDATA_MN, CDATA_MN_LEN),
            serial: field(CDATA_SN, CDATA_SN_LEN),
        }
    }

    /// Capabilities of every namespace slot, active or not.
    fn namespaces(&self) -> Vec<NsCapabilities> {
        let num_ns = unsafe { spdk_nvme_ctrlr_get_num_ns(self.ptr.as_ptr()) };
        (1..=num_ns)
            .filter_map(|nsid| {
                let ns = unsafe { spdk_nvme_ctrlr_get_ns(self.ptr.as_ptr(), nsid) };
                NonNull::new(ns).map(|ns| ns_capabilities(nsid, ns))
            })
            .collect()
    }

    pub(crate) fn as_ptr(&self) -> *mut spdk_nvme_ctrlr {
        self.ptr.as_ptr()
    }
}

fn ns_capabilities(nsid: u32, ns: NonNull<spdk_nvme_ns>) -> NsCapabilities {
    let ns = ns.as_ptr();
    let active = unsafe { spdk_nvme_ns_is_active(ns) };
    if !active {
        return NsCapabilities {
            id: nsid,
            active,
            sector_size: 0,
            md_size: 0,
            extended_lba: false,
            pi_first: false,
            pi_type: DifType::Disable,
            pi_supported: false,
            size: 0,
        };
    }

    unsafe {
        let flags = spdk_nvme_ns_get_flags(ns);
        let nsdata = spdk_nvme_ns_get_data(ns) as *const u8;
        let dps = *nsdata.add(NSDATA_DPS);

        NsCapabilities {
            id: nsid,
            active,
            sector_size: spdk_nvme_ns_get_extended_sector_size(ns),
            md_size: spdk_nvme_ns_get_md_size(ns),
            extended_lba: spdk_nvme_ns_supports_extended_lba(ns),
            pi_first: dps & DPS_MD_START != 0,
            pi_type: DifType::try_from(spdk_nvme_ns_get_pi_type(ns) as u8)
                .unwrap_or(DifType::Disable),
            pi_supported: flags & spdk_nvme_ns_flags_SPDK_NVME_NS_DPS_PI_SUPPORTED != 0,
            size: spdk_nvme_ns_get_size(ns),
        }
    }
}

/// Fixed-width, space-padded identify string.
fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

/// NUL-terminated transport ID field.
fn c_field(field: &[std::ffi::c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl NvmeDevice for SpdkController {
    type Buf = DmaBuf;
    type Queue = SpdkQueue;

    fn alloc_buf(&self, len: usize) -> Result<DmaBuf> {
        DmaBuf::zeroed(len)
    }

    fn alloc_io_queue(&self) -> Result<SpdkQueue> {
        let qpair = unsafe {
            spdk_nvme_ctrlr_alloc_io_qpair(self.ptr.as_ptr(), std::ptr::null(), 0)
        };
        NonNull::new(qpair)
            .map(|qpair| SpdkQueue::new(self, qpair))
            .ok_or(Error::QpairAlloc)
    }
}

impl Drop for SpdkController {
    fn drop(&mut self) {
        unsafe {
            spdk_nvme_detach(self.ptr.as_ptr());
        }
    }
}

/// Local PCIe discovery through `spdk_nvme_probe()`.
pub struct SpdkDiscovery<'env> {
    _env: &'env SpdkEnv,
}

impl<'env> SpdkDiscovery<'env> {
    /// Discovery within an initialized environment.
    pub fn new(env: &'env SpdkEnv) -> Self {
        Self { _env: env }
    }
}

struct ProbeCtx<'a> {
    filter: &'a ProbeFilter,
    on_attach: &'a mut dyn FnMut(AttachEvent<SpdkController>),
}

unsafe extern "C" fn probe_cb(
    cb_ctx: *mut c_void,
    trid: *const spdk_nvme_transport_id,
    _opts: *mut spdk_nvme_ctrlr_opts,
) -> bool {
    let ctx = unsafe { &*(cb_ctx as *const ProbeCtx<'_>) };
    let traddr = c_field(unsafe { &(*trid).traddr });
    if !ctx.filter.matches(&traddr) {
        return false;
    }
    log::info!("Attaching to {}", traddr);
    true
}

unsafe extern "C" fn attach_cb(
    cb_ctx: *mut c_void,
    trid: *const spdk_nvme_transport_id,
    ctrlr: *mut spdk_nvme_ctrlr,
    _opts: *const spdk_nvme_ctrlr_opts,
) {
    let ctx = unsafe { &mut *(cb_ctx as *mut ProbeCtx<'_>) };
    let Some(ptr) = NonNull::new(ctrlr) else {
        return;
    };
    let controller = SpdkController {
        ptr,
        _marker: PhantomData,
    };

    let info = controller.info(unsafe { &*trid });
    let namespaces = controller.namespaces();
    (ctx.on_attach)(AttachEvent {
        info,
        controller,
        namespaces,
    });
}

impl Discovery for SpdkDiscovery<'_> {
    type Controller = SpdkController;

    fn probe(
        &mut self,
        filter: &ProbeFilter,
        on_attach: &mut dyn FnMut(AttachEvent<SpdkController>),
    ) -> Result<()> {
        let mut ctx = ProbeCtx { filter, on_attach };

        // A null transport ID probes the local PCIe bus
        let rc = unsafe {
            spdk_nvme_probe(
                std::ptr::null(),
                &mut ctx as *mut ProbeCtx<'_> as *mut c_void,
                Some(probe_cb),
                Some(attach_cb),
                None,
            )
        };

        if rc != 0 {
            return Err(Error::Probe(format!("spdk_nvme_probe() failed (rc {})", rc)));
        }
        Ok(())
    }
}
