//! Write, read back and verify protected blocks on each namespace.
//!
//! Every eligible namespace gets one [`IoSequence`]:
//!
//! ```text
//! Idle -> WriteSubmitted -> WriteAcked -> ReadSubmitted -> ReadAcked -> Released
//! ```
//!
//! Namespaces are handled strictly one after another, in registry order.
//! Failures before the read (allocation, context, generate, the write itself)
//! abort the whole run. A failed read or a failed verification only fails its
//! own sequence, and the run moves on to the next namespace.

use std::fmt;

use rand::Rng;

use crate::complete::{PollLimit, poll_until};
use crate::device::{IoBuffers, IoCompletion, IoQueue, IoRequest, NvmeDevice};
use crate::dif::{self, DifContext, DifError};
use crate::error::{Error, Result};
use crate::profile::NamespaceEntry;
use crate::registry::DeviceRegistry;

/// Where a sequence is in its write/read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqState {
    Idle,
    WriteSubmitted,
    WriteAcked,
    ReadSubmitted,
    ReadAcked,
    Released,
}

/// Step of a sequence whose failure aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    QueueAlloc,
    BufferAlloc,
    Context,
    Generate,
    WriteSubmit,
    WriteCompletion,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::QueueAlloc => f.write_str("I/O queue allocation"),
            Step::BufferAlloc => f.write_str("buffer allocation"),
            Step::Context => f.write_str("protection context setup"),
            Step::Generate => f.write_str("protection information generation"),
            Step::WriteSubmit => f.write_str("write submission"),
            Step::WriteCompletion => f.write_str("write completion"),
        }
    }
}

/// Outcome recorded by the completion side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Pending,
    WriteDone,
    ReadDone,
    Failed,
}

/// Why a sequence failed without aborting the run.
#[derive(Debug, thiserror::Error)]
pub enum SequenceFailure {
    #[error("read failed: {0}")]
    Read(#[source] Error),

    #[error("verification failed: {0}")]
    Verify(#[source] DifError),
}

/// Parameters shared by all sequences of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerOpts {
    /// Blocks per write/read
    pub io_blocks: u32,
    /// Starting LBA; also seeds the reference tag
    pub lba: u64,
    pub app_tag: u16,
    pub apptag_mask: u16,
    /// Bound on each completion wait
    pub poll_limit: PollLimit,
}

impl Default for SequencerOpts {
    fn default() -> Self {
        Self {
            io_blocks: 1,
            lba: 0,
            app_tag: 0,
            apptag_mask: 0xffff,
            poll_limit: PollLimit::unbounded(),
        }
    }
}

/// One write/read/verify cycle against a namespace.
#[derive(Debug)]
pub struct IoSequence<'a> {
    entry: &'a NamespaceEntry,
    ctx: DifContext,
    state: SeqState,
    completion: Completion,
    failure: Option<SequenceFailure>,
}

impl<'a> IoSequence<'a> {
    /// Start a sequence in [`SeqState::Idle`].
    pub fn new(entry: &'a NamespaceEntry, opts: &SequencerOpts) -> Result<Self> {
        let ctx = entry.dif_context(opts.lba, opts.app_tag, opts.apptag_mask)?;
        Ok(Self {
            entry,
            ctx,
            state: SeqState::Idle,
            completion: Completion::Pending,
            failure: None,
        })
    }

    pub fn entry(&self) -> &NamespaceEntry {
        self.entry
    }

    pub fn context(&self) -> &DifContext {
        &self.ctx
    }

    pub fn state(&self) -> SeqState {
        self.state
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    pub fn failure(&self) -> Option<&SequenceFailure> {
        self.failure.as_ref()
    }

    fn advance(&mut self, next: SeqState) {
        log::debug!(
            "Namespace {}: {:?} -> {:?}",
            self.entry.nsid,
            self.state,
            next
        );
        self.state = next;
    }

    fn fail(&mut self, failure: SequenceFailure) {
        log::error!("Namespace {}: {}", self.entry.nsid, failure);
        self.completion = Completion::Failed;
        self.failure = Some(failure);
    }

    /// Fill payload with random bytes, zero the metadata and generate PI.
    fn protect<B: AsRef<[u8]> + AsMut<[u8]>>(&self, buffers: &mut IoBuffers<B>) -> Result<()> {
        let mut rng = rand::thread_rng();
        let payload = self.ctx.data_block_size();
        for block in buffers.data.as_mut().chunks_exact_mut(self.ctx.block_size()) {
            rng.fill(&mut block[..payload]);
            block[payload..].fill(0);
        }

        match buffers.metadata.as_mut() {
            Some(md) => {
                md.as_mut().fill(0);
                dif::generate_separate(buffers.data.as_ref(), md.as_mut(), &self.ctx)?;
            }
            None => dif::generate(buffers.data.as_mut(), &self.ctx)?,
        }
        Ok(())
    }

    fn check<B: AsRef<[u8]>>(
        &self,
        buffers: &IoBuffers<B>,
    ) -> std::result::Result<(), DifError> {
        match &buffers.metadata {
            Some(md) => dif::verify_separate(buffers.data.as_ref(), md.as_ref(), &self.ctx),
            None => dif::verify(buffers.data.as_ref(), &self.ctx),
        }
    }

    fn request<B>(&self, opts: &SequencerOpts, buffers: IoBuffers<B>) -> IoRequest<B> {
        IoRequest {
            lba: opts.lba,
            num_blocks: opts.io_blocks,
            data: buffers.data,
            metadata: buffers.metadata,
            dif_flags: self.entry.dif_flags,
            app_tag: opts.app_tag,
            apptag_mask: opts.apptag_mask,
        }
    }

    fn into_report(self) -> SequenceReport {
        SequenceReport {
            ctrlr: self.entry.ctrlr,
            nsid: self.entry.nsid,
            completion: self.completion,
            failure: self.failure,
        }
    }
}

/// Result of one finished sequence.
#[derive(Debug)]
pub struct SequenceReport {
    pub ctrlr: usize,
    pub nsid: u32,
    pub completion: Completion,
    pub failure: Option<SequenceFailure>,
}

impl SequenceReport {
    pub fn passed(&self) -> bool {
        self.completion == Completion::ReadDone
    }
}

/// Everything the sequencer did in one run.
#[derive(Debug, Default)]
pub struct SequencerReport {
    /// Finished sequences in registry order
    pub sequences: Vec<SequenceReport>,
    /// Namespaces not eligible for protected I/O
    pub skipped: usize,
}

impl SequencerReport {
    pub fn passed(&self) -> usize {
        self.sequences.iter().filter(|s| s.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.sequences.len() - self.passed()
    }
}

/// Wait for one command, reaping completions on `queue` meanwhile.
fn wait<Q: IoQueue>(
    queue: &Q,
    rx: IoCompletion<Q::Buf>,
    limit: PollLimit,
) -> Result<IoBuffers<Q::Buf>> {
    poll_until(rx, || queue.process_completions(0).map(|_| ()), limit)
}

/// Drives an [`IoSequence`] over every registered namespace.
pub struct IoSequencer<'r, C> {
    registry: &'r DeviceRegistry<C>,
    opts: SequencerOpts,
}

impl<'r, C: NvmeDevice> IoSequencer<'r, C> {
    pub fn new(registry: &'r DeviceRegistry<C>, opts: SequencerOpts) -> Result<Self> {
        if opts.io_blocks == 0 {
            return Err(Error::InvalidArgument(
                "I/O size must be at least one block".to_string(),
            ));
        }
        Ok(Self { registry, opts })
    }

    /// Run a sequence on each eligible namespace, in registry order.
    pub fn run(&self) -> Result<SequencerReport> {
        let mut report = SequencerReport::default();

        for entry in self.registry.namespaces() {
            if let Some(reason) = entry.ineligibility() {
                log::info!(
                    "Controller {}: Skipping NS {}: {}",
                    self.registry.controller_of(entry).name,
                    entry.nsid,
                    reason
                );
                report.skipped += 1;
                continue;
            }
            report.sequences.push(self.run_one(entry)?);
        }
        Ok(report)
    }

    fn alloc_buffers(&self, dev: &C, entry: &NamespaceEntry) -> Result<IoBuffers<C::Buf>> {
        let blocks = self.opts.io_blocks as usize;
        let data = dev.alloc_buf(blocks * entry.block_size as usize)?;
        let metadata = if entry.md_interleave || entry.md_size == 0 {
            None
        } else {
            Some(dev.alloc_buf(blocks * entry.md_size as usize)?)
        };
        Ok(IoBuffers { data, metadata })
    }

    /// Run one namespace from `Idle` to `Released`.
    pub fn run_one(&self, entry: &NamespaceEntry) -> Result<SequenceReport> {
        let ctrlr = self.registry.controller_of(entry);
        let limit = self.opts.poll_limit;
        let fatal = move |step: Step| {
            move |source: Error| Error::Sequence {
                ctrlr: ctrlr.name.clone(),
                nsid: entry.nsid,
                step,
                source: Box::new(source),
            }
        };

        let queue = ctrlr
            .handle
            .alloc_io_queue()
            .map_err(fatal(Step::QueueAlloc))?;
        let mut buffers = self
            .alloc_buffers(&ctrlr.handle, entry)
            .map_err(fatal(Step::BufferAlloc))?;
        let mut seq = IoSequence::new(entry, &self.opts).map_err(fatal(Step::Context))?;
        seq.protect(&mut buffers).map_err(fatal(Step::Generate))?;

        log::info!(
            "Controller {}: writing {} block(s) at LBA {} to NS {}",
            ctrlr.name,
            self.opts.io_blocks,
            self.opts.lba,
            entry.nsid
        );
        let rx = queue
            .write(entry.nsid, seq.request(&self.opts, buffers))
            .map_err(fatal(Step::WriteSubmit))?;
        seq.advance(SeqState::WriteSubmitted);
        let written = wait(&queue, rx, limit).map_err(fatal(Step::WriteCompletion))?;
        seq.completion = Completion::WriteDone;
        seq.advance(SeqState::WriteAcked);
        drop(written);

        let buffers = self
            .alloc_buffers(&ctrlr.handle, entry)
            .map_err(fatal(Step::BufferAlloc))?;
        let read = queue
            .read(entry.nsid, seq.request(&self.opts, buffers))
            .and_then(|rx| {
                seq.advance(SeqState::ReadSubmitted);
                wait(&queue, rx, limit)
            });
        match read {
            Ok(buffers) => {
                seq.advance(SeqState::ReadAcked);
                match seq.check(&buffers) {
                    Ok(()) => {
                        seq.completion = Completion::ReadDone;
                        log::info!(
                            "Controller {}: NS {} protection information verified",
                            ctrlr.name,
                            entry.nsid
                        );
                    }
                    Err(err) => seq.fail(SequenceFailure::Verify(err)),
                }
            }
            Err(err) => seq.fail(SequenceFailure::Read(err)),
        }

        drop(queue);
        seq.advance(SeqState::Released);
        Ok(seq.into_report())
    }
}
