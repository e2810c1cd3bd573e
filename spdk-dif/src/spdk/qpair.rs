//! I/O queue pair with protection-information commands.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::NonNull;

use spdk_dif_sys::*;

use crate::complete::{CompletionSender, completion};
use crate::device::{IoBuffers, IoCompletion, IoQueue, IoRequest};
use crate::error::{Error, Result};

use super::controller::SpdkController;
use super::dma::DmaBuf;

/// A command in flight: its buffers and where to report completion.
struct InFlight {
    tx: CompletionSender<IoBuffers<DmaBuf>>,
    buffers: IoBuffers<DmaBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Write,
    Read,
}

/// NVMe I/O queue pair.
///
/// Must not outlive the controller it was allocated from.
///
/// # Thread Safety
///
/// `!Send + !Sync` - qpair must stay on the allocating thread.
pub struct SpdkQueue {
    qpair: NonNull<spdk_nvme_qpair>,
    ctrlr: NonNull<spdk_nvme_ctrlr>,
    _marker: PhantomData<*mut ()>,
}

impl SpdkQueue {
    pub(crate) fn new(ctrlr: &SpdkController, qpair: NonNull<spdk_nvme_qpair>) -> Self {
        Self {
            qpair,
            // Non-null: taken from a live controller handle
            ctrlr: unsafe { NonNull::new_unchecked(ctrlr.as_ptr()) },
            _marker: PhantomData,
        }
    }

    fn submit(&self, op: Op, nsid: u32, req: IoRequest<DmaBuf>) -> Result<IoCompletion<DmaBuf>> {
        let ns = unsafe { spdk_nvme_ctrlr_get_ns(self.ctrlr.as_ptr(), nsid) };
        if ns.is_null() {
            return Err(Error::InvalidArgument(format!("namespace {} not found", nsid)));
        }

        let IoRequest {
            lba,
            num_blocks,
            data,
            metadata,
            dif_flags,
            app_tag,
            apptag_mask,
        } = req;
        let (tx, rx) = completion();
        let mut cmd = Box::new(InFlight {
            tx,
            buffers: IoBuffers { data, metadata },
        });
        let payload = cmd.buffers.data.as_mut_ptr() as *mut c_void;
        let md = cmd
            .buffers
            .metadata
            .as_mut()
            .map_or(std::ptr::null_mut(), |md| md.as_mut_ptr() as *mut c_void);
        let cb_arg = Box::into_raw(cmd) as *mut c_void;

        let rc = unsafe {
            match op {
                Op::Write => spdk_nvme_ns_cmd_write_with_md(
                    ns,
                    self.qpair.as_ptr(),
                    payload,
                    md,
                    lba,
                    num_blocks,
                    Some(io_complete),
                    cb_arg,
                    dif_flags.bits(),
                    apptag_mask,
                    app_tag,
                ),
                Op::Read => spdk_nvme_ns_cmd_read_with_md(
                    ns,
                    self.qpair.as_ptr(),
                    payload,
                    md,
                    lba,
                    num_blocks,
                    Some(io_complete),
                    cb_arg,
                    dif_flags.bits(),
                    apptag_mask,
                    app_tag,
                ),
            }
        };

        if rc != 0 {
            // The callback will never run; reclaim the command
            drop(unsafe { Box::from_raw(cb_arg as *mut InFlight) });
            return Err(Error::Submit(format!(
                "{:?} of {} block(s) at LBA {}: {}",
                op,
                num_blocks,
                lba,
                Error::from_rc(rc)
            )));
        }
        Ok(rx)
    }
}

impl IoQueue for SpdkQueue {
    type Buf = DmaBuf;

    fn write(&self, nsid: u32, req: IoRequest<DmaBuf>) -> Result<IoCompletion<DmaBuf>> {
        self.submit(Op::Write, nsid, req)
    }

    fn read(&self, nsid: u32, req: IoRequest<DmaBuf>) -> Result<IoCompletion<DmaBuf>> {
        self.submit(Op::Read, nsid, req)
    }

    fn process_completions(&self, max_completions: u32) -> Result<u32> {
        let rc = unsafe { spdk_nvme_qpair_process_completions(self.qpair.as_ptr(), max_completions) };
        if rc < 0 {
            return Err(Error::from_rc(rc));
        }
        Ok(rc as u32)
    }
}

impl Drop for SpdkQueue {
    fn drop(&mut self) {
        unsafe {
            spdk_nvme_ctrlr_free_io_qpair(self.qpair.as_ptr());
        }
    }
}

/// C callback for NVMe I/O completion.
unsafe extern "C" fn io_complete(ctx: *mut c_void, cpl: *const spdk_nvme_cpl) {
    let InFlight { tx, buffers } = *unsafe { Box::from_raw(ctx as *mut InFlight) };

    // SCT is in bits 9:11 and SC in bits 1:8 of the status field
    let status_raw = unsafe { (*cpl).__bindgen_anon_1.status_raw };
    let sct = ((status_raw >> 9) & 0x7) as u8;
    let sc = ((status_raw >> 1) & 0xff) as u8;

    if sct == 0 && sc == 0 {
        tx.success(buffers);
    } else {
        tx.error(Error::nvme(sct, sc));
    }
}
