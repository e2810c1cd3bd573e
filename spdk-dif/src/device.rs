//! Device-facing collaborator traits.
//!
//! The sequencer never talks to hardware directly. A backend provides:
//!
//! - [`Discovery`] - enumerates controllers and reports each attach
//! - [`NvmeDevice`] - one attached controller: buffers and I/O queues
//! - [`IoQueue`] - command submission and completion reaping
//!
//! Buffers move into a submitted command and come back in its completion,
//! so a buffer is never reachable from two places at once. If the command
//! fails the backend drops the buffers.

use crate::complete::CompletionReceiver;
use crate::dif::DifFlags;
use crate::error::Result;
use crate::profile::NsCapabilities;

/// Byte buffer usable as a transfer target.
pub trait IoBuf: AsRef<[u8]> + AsMut<[u8]> {}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IoBuf for T {}

/// A read or write addressing a logical block range.
#[derive(Debug)]
pub struct IoRequest<B> {
    /// Starting logical block address
    pub lba: u64,
    /// Number of blocks
    pub num_blocks: u32,
    /// Data buffer; holds metadata too when the namespace is extended-LBA
    pub data: B,
    /// Separate metadata buffer
    pub metadata: Option<B>,
    /// Protection checks the device should enforce
    pub dif_flags: DifFlags,
    /// Application tag the device checks against
    pub app_tag: u16,
    /// Application tag mask
    pub apptag_mask: u16,
}

impl<B> IoRequest<B> {
    /// Give the buffers back.
    pub fn into_buffers(self) -> IoBuffers<B> {
        IoBuffers {
            data: self.data,
            metadata: self.metadata,
        }
    }
}

/// Buffers returned by a successful completion.
#[derive(Debug)]
pub struct IoBuffers<B> {
    pub data: B,
    pub metadata: Option<B>,
}

/// Completion future of one submitted command.
pub type IoCompletion<B> = CompletionReceiver<IoBuffers<B>>;

/// Submission/completion queue bound to one controller.
pub trait IoQueue {
    /// Buffer type accepted by the queue
    type Buf: IoBuf;

    /// Submit a write. Exactly one completion is delivered per command.
    fn write(&self, nsid: u32, req: IoRequest<Self::Buf>) -> Result<IoCompletion<Self::Buf>>;

    /// Submit a read. Exactly one completion is delivered per command.
    fn read(&self, nsid: u32, req: IoRequest<Self::Buf>) -> Result<IoCompletion<Self::Buf>>;

    /// Reap finished commands, firing their completions.
    ///
    /// `max_completions` of 0 means no limit. Returns the number reaped.
    fn process_completions(&self, max_completions: u32) -> Result<u32>;
}

/// One attached controller.
pub trait NvmeDevice {
    /// Transfer buffer type
    type Buf: IoBuf;
    /// I/O queue type
    type Queue: IoQueue<Buf = Self::Buf>;

    /// Allocate a zeroed transfer buffer of `len` bytes.
    fn alloc_buf(&self, len: usize) -> Result<Self::Buf>;

    /// Allocate an I/O queue pair.
    fn alloc_io_queue(&self) -> Result<Self::Queue>;
}

/// Identity of an attached controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    /// Transport address (PCI BDF, IP, ...)
    pub traddr: String,
    /// Model number
    pub model: String,
    /// Serial number
    pub serial: String,
}

impl ControllerInfo {
    /// Display name: model and serial, padded/truncated to 20 columns.
    pub fn name(&self) -> String {
        format!("{:<20.20} ({:<20.20})", self.model, self.serial)
    }
}

/// One controller reported by [`Discovery::probe`].
pub struct AttachEvent<C> {
    pub info: ControllerInfo,
    pub controller: C,
    pub namespaces: Vec<NsCapabilities>,
}

/// Restricts which controllers a probe attaches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeFilter {
    /// Only attach the controller at this transport address
    pub traddr: Option<String>,
}

impl ProbeFilter {
    /// Attach everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Attach only `traddr`.
    pub fn traddr(traddr: &str) -> Self {
        Self {
            traddr: Some(traddr.to_string()),
        }
    }

    pub fn matches(&self, traddr: &str) -> bool {
        self.traddr.as_deref().is_none_or(|want| want == traddr)
    }
}

/// Controller enumeration.
pub trait Discovery {
    /// Controller handle produced by this backend
    type Controller: NvmeDevice;

    /// Enumerate controllers, invoking `on_attach` synchronously for each one
    /// that passes `filter`.
    fn probe(
        &mut self,
        filter: &ProbeFilter,
        on_attach: &mut dyn FnMut(AttachEvent<Self::Controller>),
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_name_columns() {
        let info = ControllerInfo {
            traddr: "0000:00:04.0".to_string(),
            model: "QEMU NVMe Ctrl with a very long model".to_string(),
            serial: "12340".to_string(),
        };
        assert_eq!(info.name(), "QEMU NVMe Ctrl with  (12340               )");
    }

    #[test]
    fn test_probe_filter() {
        assert!(ProbeFilter::all().matches("0000:00:04.0"));
        let filter = ProbeFilter::traddr("0000:00:04.0");
        assert!(filter.matches("0000:00:04.0"));
        assert!(!filter.matches("0000:00:05.0"));
    }
}
