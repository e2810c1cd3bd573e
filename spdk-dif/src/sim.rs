//! In-memory NVMe controllers.
//!
//! A software stand-in for the device side: it attaches controllers with a
//! configurable namespace layout, stores written blocks, enforces the
//! protection checks requested on each command the way a controller does,
//! and delivers completions only when its queue is polled. [`Faults`] inject
//! error statuses, stalls and in-flight corruption.
//!
//! # Example
//!
//! ```
//! use spdk_dif::dif::DifType;
//! use spdk_dif::sim::{SimControllerConfig, SimDiscovery, SimNamespace};
//! use spdk_dif::DifApp;
//!
//! let discovery = SimDiscovery::new().controller(
//!     SimControllerConfig::new("0000:00:04.0", "SIM NVMe Ctrl", "SIM0001")
//!         .namespace(SimNamespace::protected(1, 512, 8, DifType::Type1)),
//! );
//! let summary = DifApp::builder().run(discovery)?;
//! assert!(summary.success());
//! # Ok::<(), spdk_dif::Error>(())
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::complete::{CompletionSender, completion};
use crate::device::{
    AttachEvent, ControllerInfo, Discovery, IoBuffers, IoCompletion, IoQueue, IoRequest,
    NvmeDevice, ProbeFilter,
};
use crate::dif::{
    self, DifContext, DifContextParams, DifError, DifErrorKind, DifType, PiLocation,
};
use crate::error::{Error, Result};
use crate::profile::NsCapabilities;

/// NVMe status code types used by the simulator.
const SCT_GENERIC: u8 = 0x0;
const SCT_MEDIA: u8 = 0x2;

/// Counters shared by everything one [`SimDiscovery`] creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub attached: u32,
    pub detached: u32,
    pub queues_live: u32,
    pub buffers_live: u32,
    /// Highest number of buffers alive at once
    pub buffers_peak: u32,
    /// Writes that reached the media
    pub writes: u32,
    /// Reads that returned data
    pub reads: u32,
}

type Stats = Rc<RefCell<SimStats>>;

/// Host-memory transfer buffer. Counts itself in [`SimStats`].
pub struct SimBuf {
    bytes: Vec<u8>,
    stats: Stats,
}

impl SimBuf {
    fn zeroed(len: usize, stats: &Stats) -> Self {
        let mut s = stats.borrow_mut();
        s.buffers_live += 1;
        s.buffers_peak = s.buffers_peak.max(s.buffers_live);
        Self {
            bytes: vec![0; len],
            stats: stats.clone(),
        }
    }
}

impl AsRef<[u8]> for SimBuf {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsMut<[u8]> for SimBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for SimBuf {
    fn drop(&mut self) {
        self.stats.borrow_mut().buffers_live -= 1;
    }
}

impl fmt::Debug for SimBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBuf")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Misbehaviour injected into one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Writes complete with an internal device error
    pub write_error: bool,
    /// Reads complete with an unrecovered read error
    pub read_error: bool,
    /// Flip the low bit of this data-buffer byte after a read passes the
    /// device-side checks
    pub corrupt_read: Option<usize>,
    /// Writes never complete
    pub stall_writes: bool,
    /// Reads never complete
    pub stall_reads: bool,
    /// Queue polls a command waits before completing
    pub latency: u32,
}

/// Namespace layout and faults for a simulated controller.
#[derive(Debug, Clone)]
pub struct SimNamespace {
    pub caps: NsCapabilities,
    pub faults: Faults,
}

impl SimNamespace {
    /// Extended-LBA namespace formatted with protection information at the
    /// tail of the metadata.
    pub fn protected(id: u32, data_size: u32, md_size: u32, pi_type: DifType) -> Self {
        Self {
            caps: NsCapabilities {
                id,
                active: true,
                sector_size: data_size + md_size,
                md_size,
                extended_lba: true,
                pi_first: false,
                pi_type,
                pi_supported: pi_type != DifType::Disable,
                size: 1 << 30,
            },
            faults: Faults::default(),
        }
    }

    /// Namespace without metadata.
    pub fn unprotected(id: u32, data_size: u32) -> Self {
        Self {
            caps: NsCapabilities {
                id,
                active: true,
                sector_size: data_size,
                md_size: 0,
                extended_lba: false,
                pi_first: false,
                pi_type: DifType::Disable,
                pi_supported: false,
                size: 1 << 30,
            },
            faults: Faults::default(),
        }
    }

    /// Protected namespace with metadata in a separate buffer.
    pub fn separate(id: u32, data_size: u32, md_size: u32, pi_type: DifType) -> Self {
        let mut ns = Self::protected(id, data_size, md_size, pi_type);
        ns.caps.sector_size = data_size;
        ns.caps.extended_lba = false;
        ns
    }

    /// Inactive namespace slot.
    pub fn inactive(id: u32) -> Self {
        let mut ns = Self::unprotected(id, 512);
        ns.caps.active = false;
        ns
    }

    /// Put the PI tuple in the first eight bytes of the metadata.
    pub fn pi_first(mut self) -> Self {
        self.caps.pi_first = true;
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    fn data_block_size(&self) -> u32 {
        if self.caps.extended_lba {
            self.caps.sector_size - self.caps.md_size
        } else {
            self.caps.sector_size
        }
    }

    fn num_blocks(&self) -> u64 {
        self.caps.size / u64::from(self.data_block_size())
    }
}

/// One simulated controller to attach.
#[derive(Debug, Clone)]
pub struct SimControllerConfig {
    pub info: ControllerInfo,
    pub namespaces: Vec<SimNamespace>,
    /// I/O queue pair allocation fails
    pub fail_io_queue: bool,
    /// Buffer allocation fails
    pub fail_alloc: bool,
}

impl SimControllerConfig {
    pub fn new(traddr: &str, model: &str, serial: &str) -> Self {
        Self {
            info: ControllerInfo {
                traddr: traddr.to_string(),
                model: model.to_string(),
                serial: serial.to_string(),
            },
            namespaces: Vec::new(),
            fail_io_queue: false,
            fail_alloc: false,
        }
    }

    pub fn namespace(mut self, ns: SimNamespace) -> Self {
        self.namespaces.push(ns);
        self
    }
}

struct NsState {
    ns: SimNamespace,
    /// Written blocks by LBA: data followed by metadata
    blocks: RefCell<HashMap<u64, Vec<u8>>>,
}

struct CtrlState {
    namespaces: Vec<NsState>,
    fail_io_queue: bool,
    fail_alloc: bool,
    stats: Stats,
}

impl CtrlState {
    fn namespace(&self, nsid: u32) -> Option<&NsState> {
        self.namespaces
            .iter()
            .find(|n| n.ns.caps.id == nsid && n.ns.caps.active)
    }
}

/// An attached simulated controller. Dropping it counts as a detach.
pub struct SimController {
    state: Rc<CtrlState>,
}

impl NvmeDevice for SimController {
    type Buf = SimBuf;
    type Queue = SimQueue;

    fn alloc_buf(&self, len: usize) -> Result<SimBuf> {
        if self.state.fail_alloc || len == 0 {
            return Err(Error::MemoryAlloc(len));
        }
        Ok(SimBuf::zeroed(len, &self.state.stats))
    }

    fn alloc_io_queue(&self) -> Result<SimQueue> {
        if self.state.fail_io_queue {
            return Err(Error::QpairAlloc);
        }
        self.state.stats.borrow_mut().queues_live += 1;
        Ok(SimQueue {
            state: self.state.clone(),
            pending: RefCell::new(VecDeque::new()),
        })
    }
}

impl Drop for SimController {
    fn drop(&mut self) {
        self.state.stats.borrow_mut().detached += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Write,
    Read,
}

struct Pending {
    op: Op,
    nsid: u32,
    req: IoRequest<SimBuf>,
    tx: CompletionSender<IoBuffers<SimBuf>>,
    due: u32,
    stalled: bool,
}

/// Queue pair of a [`SimController`]. Commands execute when reaped.
pub struct SimQueue {
    state: Rc<CtrlState>,
    pending: RefCell<VecDeque<Pending>>,
}

impl SimQueue {
    fn submit(&self, op: Op, nsid: u32, req: IoRequest<SimBuf>) -> Result<IoCompletion<SimBuf>> {
        let (tx, rx) = completion();
        let (due, stalled) = match self.state.namespace(nsid) {
            Some(n) => {
                let stalled = match op {
                    Op::Write => n.ns.faults.stall_writes,
                    Op::Read => n.ns.faults.stall_reads,
                };
                (n.ns.faults.latency, stalled)
            }
            None => (0, false),
        };
        self.pending.borrow_mut().push_back(Pending {
            op,
            nsid,
            req,
            tx,
            due,
            stalled,
        });
        Ok(rx)
    }

    fn execute(&self, cmd: Pending) {
        let Pending {
            op, nsid, req, tx, ..
        } = cmd;
        let result = match self.state.namespace(nsid) {
            None => Err(Error::nvme(SCT_GENERIC, 0x0b)),
            Some(ns) => match op {
                Op::Write => ns.write(req, &self.state.stats),
                Op::Read => ns.read(req, &self.state.stats),
            },
        };
        tx.complete(result);
    }
}

impl IoQueue for SimQueue {
    type Buf = SimBuf;

    fn write(&self, nsid: u32, req: IoRequest<SimBuf>) -> Result<IoCompletion<SimBuf>> {
        self.submit(Op::Write, nsid, req)
    }

    fn read(&self, nsid: u32, req: IoRequest<SimBuf>) -> Result<IoCompletion<SimBuf>> {
        self.submit(Op::Read, nsid, req)
    }

    fn process_completions(&self, max_completions: u32) -> Result<u32> {
        let mut ready = Vec::new();
        {
            let mut pending = self.pending.borrow_mut();
            let mut i = 0;
            while i < pending.len() {
                if max_completions != 0 && ready.len() as u32 >= max_completions {
                    break;
                }
                let cmd = &mut pending[i];
                if cmd.stalled {
                    i += 1;
                } else if cmd.due > 0 {
                    cmd.due -= 1;
                    i += 1;
                } else if let Some(cmd) = pending.remove(i) {
                    ready.push(cmd);
                }
            }
        }

        let reaped = ready.len() as u32;
        for cmd in ready {
            self.execute(cmd);
        }
        Ok(reaped)
    }
}

impl Drop for SimQueue {
    fn drop(&mut self) {
        self.state.stats.borrow_mut().queues_live -= 1;
    }
}

fn pi_status(err: DifError) -> Error {
    match err {
        DifError::Mismatch(m) => match m.kind {
            DifErrorKind::Guard => Error::nvme(SCT_MEDIA, 0x82),
            DifErrorKind::AppTag => Error::nvme(SCT_MEDIA, 0x83),
            DifErrorKind::RefTag => Error::nvme(SCT_MEDIA, 0x84),
        },
        _ => invalid_field(),
    }
}

fn invalid_field() -> Error {
    Error::nvme(SCT_GENERIC, 0x02)
}

impl NsState {
    fn check_range(&self, req: &IoRequest<SimBuf>) -> Result<()> {
        let caps = &self.ns.caps;
        let end = req.lba.checked_add(u64::from(req.num_blocks));
        if req.num_blocks == 0 || end.is_none_or(|end| end > self.ns.num_blocks()) {
            return Err(Error::nvme(SCT_GENERIC, 0x80));
        }

        let n = req.num_blocks as usize;
        if req.data.as_ref().len() != n * caps.sector_size as usize {
            return Err(invalid_field());
        }
        let separate_md = !caps.extended_lba && caps.md_size > 0;
        match (&req.metadata, separate_md) {
            (Some(md), true) if md.as_ref().len() == n * caps.md_size as usize => Ok(()),
            (None, false) => Ok(()),
            _ => Err(invalid_field()),
        }
    }

    /// Device-side protection check, as requested by the command's flags.
    fn check_pi(&self, req: &IoRequest<SimBuf>) -> Result<()> {
        if req.dif_flags.is_empty() {
            return Ok(());
        }
        let caps = &self.ns.caps;
        let ctx = DifContext::new(DifContextParams {
            block_size: caps.sector_size,
            md_size: caps.md_size,
            md_interleave: caps.extended_lba,
            pi_location: if caps.pi_first {
                PiLocation::Head
            } else {
                PiLocation::Tail
            },
            dif_type: caps.pi_type,
            dif_flags: req.dif_flags,
            init_ref_tag: req.lba as u32,
            app_tag: req.app_tag,
            apptag_mask: req.apptag_mask,
            start_block: 0,
            guard_seed: 0,
        })
        .map_err(|_| invalid_field())?;

        let checked = match &req.metadata {
            Some(md) => dif::verify_separate(req.data.as_ref(), md.as_ref(), &ctx),
            None => dif::verify(req.data.as_ref(), &ctx),
        };
        checked.map_err(pi_status)
    }

    fn write(&self, req: IoRequest<SimBuf>, stats: &Stats) -> Result<IoBuffers<SimBuf>> {
        if self.ns.faults.write_error {
            return Err(Error::nvme(SCT_GENERIC, 0x06));
        }
        self.check_range(&req)?;
        self.check_pi(&req)?;

        let caps = &self.ns.caps;
        let sector = caps.sector_size as usize;
        let md_size = caps.md_size as usize;
        let mut blocks = self.blocks.borrow_mut();
        for i in 0..req.num_blocks as usize {
            let mut stored = req.data.as_ref()[i * sector..(i + 1) * sector].to_vec();
            if let Some(md) = &req.metadata {
                stored.extend_from_slice(&md.as_ref()[i * md_size..(i + 1) * md_size]);
            }
            blocks.insert(req.lba + i as u64, stored);
        }
        stats.borrow_mut().writes += 1;
        Ok(req.into_buffers())
    }

    fn read(&self, mut req: IoRequest<SimBuf>, stats: &Stats) -> Result<IoBuffers<SimBuf>> {
        if self.ns.faults.read_error {
            return Err(Error::nvme(SCT_MEDIA, 0x81));
        }
        self.check_range(&req)?;

        let caps = &self.ns.caps;
        let sector = caps.sector_size as usize;
        let md_size = caps.md_size as usize;
        // Unwritten blocks read back as zero data with all-ones metadata
        let data_len = self.ns.data_block_size() as usize;
        let blocks = self.blocks.borrow();
        for i in 0..req.num_blocks as usize {
            let stored = blocks.get(&(req.lba + i as u64));
            let data = &mut req.data.as_mut()[i * sector..(i + 1) * sector];
            match stored {
                Some(block) => data.copy_from_slice(&block[..sector]),
                None => {
                    data[..data_len].fill(0);
                    data[data_len..].fill(0xff);
                }
            }
            if let Some(md) = req.metadata.as_mut() {
                let md = &mut md.as_mut()[i * md_size..(i + 1) * md_size];
                match stored {
                    Some(block) => md.copy_from_slice(&block[sector..]),
                    None => md.fill(0xff),
                }
            }
        }
        drop(blocks);

        self.check_pi(&req)?;

        if let Some(offset) = self.ns.faults.corrupt_read {
            let data = req.data.as_mut();
            let len = data.len();
            data[offset % len] ^= 0x01;
        }
        stats.borrow_mut().reads += 1;
        Ok(req.into_buffers())
    }
}

/// Discovery over a fixed set of simulated controllers.
pub struct SimDiscovery {
    controllers: Vec<SimControllerConfig>,
    probe_error: Option<String>,
    stats: Stats,
}

impl SimDiscovery {
    /// Discovery that finds nothing until controllers are added.
    pub fn new() -> Self {
        Self {
            controllers: Vec::new(),
            probe_error: None,
            stats: Rc::new(RefCell::new(SimStats::default())),
        }
    }

    /// A small mixed topology: protected, unprotected, inactive and
    /// separate-metadata namespaces across two controllers.
    pub fn demo() -> Self {
        let latency = Faults {
            latency: 2,
            ..Faults::default()
        };
        Self::new()
            .controller(
                SimControllerConfig::new("0000:00:04.0", "SIM NVMe Ctrl", "SIM0001")
                    .namespace(
                        SimNamespace::protected(1, 4096, 8, DifType::Type1).with_faults(latency),
                    )
                    .namespace(SimNamespace::unprotected(2, 512))
                    .namespace(SimNamespace::inactive(3))
                    .namespace(SimNamespace::separate(4, 512, 8, DifType::Type1)),
            )
            .controller(
                SimControllerConfig::new("0000:00:05.0", "SIM NVMe Ctrl", "SIM0002").namespace(
                    SimNamespace::protected(1, 512, 16, DifType::Type3)
                        .pi_first()
                        .with_faults(latency),
                ),
            )
    }

    pub fn controller(mut self, config: SimControllerConfig) -> Self {
        self.controllers.push(config);
        self
    }

    /// Make [`probe`](Discovery::probe) fail with `reason`.
    pub fn fail_probe(mut self, reason: &str) -> Self {
        self.probe_error = Some(reason.to_string());
        self
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SimStats {
        *self.stats.borrow()
    }

    /// Live counters, for observing after the discovery has been consumed.
    pub fn stats_handle(&self) -> Rc<RefCell<SimStats>> {
        self.stats.clone()
    }
}

impl Default for SimDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery for SimDiscovery {
    type Controller = SimController;

    fn probe(
        &mut self,
        filter: &ProbeFilter,
        on_attach: &mut dyn FnMut(AttachEvent<SimController>),
    ) -> Result<()> {
        if let Some(reason) = &self.probe_error {
            return Err(Error::Probe(reason.clone()));
        }

        for config in &self.controllers {
            if !filter.matches(&config.info.traddr) {
                continue;
            }
            log::info!("Attaching to {}", config.info.traddr);

            let state = CtrlState {
                namespaces: config
                    .namespaces
                    .iter()
                    .map(|ns| NsState {
                        ns: ns.clone(),
                        blocks: RefCell::new(HashMap::new()),
                    })
                    .collect(),
                fail_io_queue: config.fail_io_queue,
                fail_alloc: config.fail_alloc,
                stats: self.stats.clone(),
            };
            self.stats.borrow_mut().attached += 1;

            on_attach(AttachEvent {
                info: config.info.clone(),
                controller: SimController {
                    state: Rc::new(state),
                },
                namespaces: config.namespaces.iter().map(|ns| ns.caps.clone()).collect(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complete::{PollLimit, poll_until};
    use crate::dif::DifFlags;

    fn attach_one(ns: SimNamespace) -> (SimDiscovery, SimController) {
        let mut discovery = SimDiscovery::new()
            .controller(SimControllerConfig::new("sim0", "model", "serial").namespace(ns));
        let mut attached = None;
        discovery
            .probe(&ProbeFilter::all(), &mut |event| attached = Some(event.controller))
            .unwrap();
        (discovery, attached.unwrap())
    }

    fn request(buf: SimBuf, lba: u64, num_blocks: u32, flags: DifFlags) -> IoRequest<SimBuf> {
        IoRequest {
            lba,
            num_blocks,
            data: buf,
            metadata: None,
            dif_flags: flags,
            app_tag: 0,
            apptag_mask: 0xffff,
        }
    }

    fn wait(queue: &SimQueue, rx: IoCompletion<SimBuf>) -> Result<IoBuffers<SimBuf>> {
        poll_until(
            rx,
            || queue.process_completions(0).map(|_| ()),
            PollLimit::polls(16),
        )
    }

    #[test]
    fn test_write_then_read_returns_data() {
        let (_discovery, ctrlr) = attach_one(SimNamespace::protected(1, 512, 8, DifType::Type1));
        let queue = ctrlr.alloc_io_queue().unwrap();

        let mut buf = ctrlr.alloc_buf(520).unwrap();
        buf.as_mut()[..512].fill(0x5a);
        let rx = queue.write(1, request(buf, 3, 1, DifFlags::empty())).unwrap();
        wait(&queue, rx).unwrap();

        let buf = ctrlr.alloc_buf(520).unwrap();
        let rx = queue.read(1, request(buf, 3, 1, DifFlags::empty())).unwrap();
        let out = wait(&queue, rx).unwrap();
        assert!(out.data.as_ref()[..512].iter().all(|&b| b == 0x5a));
    }

    #[test]
    fn test_device_rejects_bad_guard_on_write() {
        let (_discovery, ctrlr) = attach_one(SimNamespace::protected(1, 512, 8, DifType::Type1));
        let queue = ctrlr.alloc_io_queue().unwrap();
        let mut buf = ctrlr.alloc_buf(520).unwrap();
        buf.as_mut()[..2].copy_from_slice(&[1, 2]);

        let rx = queue.write(1, request(buf, 0, 1, DifFlags::GUARD_CHECK)).unwrap();
        match wait(&queue, rx) {
            Err(Error::NvmeError { sct: 2, sc: 0x82, .. }) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_out_of_range_lba() {
        let (_discovery, ctrlr) = attach_one(SimNamespace::protected(1, 512, 8, DifType::Type1));
        let queue = ctrlr.alloc_io_queue().unwrap();
        let buf = ctrlr.alloc_buf(520).unwrap();
        let rx = queue
            .read(1, request(buf, u64::MAX, 1, DifFlags::empty()))
            .unwrap();
        assert!(matches!(wait(&queue, rx), Err(Error::NvmeError { sc: 0x80, .. })));
    }

    #[test]
    fn test_unknown_namespace() {
        let (_discovery, ctrlr) = attach_one(SimNamespace::protected(1, 512, 8, DifType::Type1));
        let queue = ctrlr.alloc_io_queue().unwrap();
        let buf = ctrlr.alloc_buf(520).unwrap();
        let rx = queue.read(9, request(buf, 0, 1, DifFlags::empty())).unwrap();
        assert!(matches!(wait(&queue, rx), Err(Error::NvmeError { sc: 0x0b, .. })));
    }

    #[test]
    fn test_latency_delays_completion() {
        let ns = SimNamespace::protected(1, 512, 8, DifType::Type1).with_faults(Faults {
            latency: 3,
            ..Faults::default()
        });
        let (_discovery, ctrlr) = attach_one(ns);
        let queue = ctrlr.alloc_io_queue().unwrap();
        let buf = ctrlr.alloc_buf(520).unwrap();
        let _rx = queue.write(1, request(buf, 0, 1, DifFlags::empty())).unwrap();

        assert_eq!(queue.process_completions(0).unwrap(), 0);
        assert_eq!(queue.process_completions(0).unwrap(), 0);
        assert_eq!(queue.process_completions(0).unwrap(), 0);
        assert_eq!(queue.process_completions(0).unwrap(), 1);
    }

    #[test]
    fn test_stalled_write_times_out() {
        let ns = SimNamespace::protected(1, 512, 8, DifType::Type1).with_faults(Faults {
            stall_writes: true,
            ..Faults::default()
        });
        let (_discovery, ctrlr) = attach_one(ns);
        let queue = ctrlr.alloc_io_queue().unwrap();
        let buf = ctrlr.alloc_buf(520).unwrap();
        let rx = queue.write(1, request(buf, 0, 1, DifFlags::empty())).unwrap();
        assert!(matches!(wait(&queue, rx), Err(Error::Timeout { polls: 16 })));
    }

    #[test]
    fn test_resources_counted() {
        let (discovery, ctrlr) = attach_one(SimNamespace::protected(1, 512, 8, DifType::Type1));
        {
            let _queue = ctrlr.alloc_io_queue().unwrap();
            let _a = ctrlr.alloc_buf(16).unwrap();
            let _b = ctrlr.alloc_buf(16).unwrap();
            let stats = discovery.stats();
            assert_eq!(stats.queues_live, 1);
            assert_eq!(stats.buffers_live, 2);
        }
        drop(ctrlr);
        let stats = discovery.stats();
        assert_eq!(stats.attached, 1);
        assert_eq!(stats.detached, 1);
        assert_eq!(stats.queues_live, 0);
        assert_eq!(stats.buffers_live, 0);
        assert_eq!(stats.buffers_peak, 2);
    }

    #[test]
    fn test_probe_filter_and_failure() {
        let mut discovery = SimDiscovery::demo();
        let mut seen = Vec::new();
        discovery
            .probe(&ProbeFilter::traddr("0000:00:05.0"), &mut |event| {
                seen.push(event.info.traddr.clone())
            })
            .unwrap();
        assert_eq!(seen, vec!["0000:00:05.0".to_string()]);

        let mut failing = SimDiscovery::demo().fail_probe("transport down");
        let result = failing.probe(&ProbeFilter::all(), &mut |_| {});
        assert!(matches!(result, Err(Error::Probe(_))));
    }
}
