//! Protection information parameters for one I/O.

use std::fmt;

/// Size of the protection information tuple: guard, app tag, ref tag.
pub const PI_SIZE: usize = 8;

/// Application tag value that turns off checking for a block
pub(crate) const ESCAPE_APP_TAG: u16 = 0xffff;

/// End-to-end protection type the namespace was formatted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DifType {
    /// Protection information disabled
    Disable = 0,
    /// Type 1: reference tag follows the LBA
    Type1 = 1,
    /// Type 2: reference tag follows the LBA, seeded by the command
    Type2 = 2,
    /// Type 3: reference tag is opaque to the device
    Type3 = 3,
}

impl DifType {
    /// Whether the reference tag must be unique per block.
    pub fn increments_ref_tag(self) -> bool {
        matches!(self, DifType::Type1 | DifType::Type2)
    }
}

impl TryFrom<u8> for DifType {
    type Error = ContextError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DifType::Disable),
            1 => Ok(DifType::Type1),
            2 => Ok(DifType::Type2),
            3 => Ok(DifType::Type3),
            other => Err(ContextError::InvalidPiType(other)),
        }
    }
}

impl fmt::Display for DifType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifType::Disable => f.write_str("none"),
            DifType::Type1 => f.write_str("type1"),
            DifType::Type2 => f.write_str("type2"),
            DifType::Type3 => f.write_str("type3"),
        }
    }
}

/// Where the protection information sits inside the metadata region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiLocation {
    /// First eight bytes of the metadata
    Head,
    /// Last eight bytes of the metadata
    Tail,
}

bitflags::bitflags! {
    /// Which protection fields are generated and checked.
    ///
    /// Bit positions match the NVMe PRCHK bits of the I/O command flags, so
    /// the value can be handed to the device as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DifFlags: u32 {
        /// Check the reference tag
        const REFTAG_CHECK = 1 << 26;
        /// Check the application tag
        const APPTAG_CHECK = 1 << 27;
        /// Check the CRC guard
        const GUARD_CHECK = 1 << 28;
    }
}

/// Reasons a [`DifContext`] cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Block size of zero
    #[error("block size must be > 0")]
    ZeroBlockSize,

    /// Checks requested on a format without metadata
    #[error("checks {0:?} requested but metadata size is 0")]
    NoMetadata(DifFlags),

    /// Metadata cannot hold the protection information tuple
    #[error("metadata size {0} cannot hold protection information")]
    MetadataTooSmall(u32),

    /// Interleaved block leaves no room for data
    #[error("block size {block_size} leaves no data with {md_size} bytes of metadata")]
    BlockTooSmall {
        /// Extended block size
        block_size: u32,
        /// Metadata size
        md_size: u32,
    },

    /// Checks requested with protection disabled
    #[error("checks {0:?} requested but protection type is none")]
    ChecksWithoutType(DifFlags),

    /// Application tag equal to the all-ones escape value
    #[error("application tag 0xffff disables checking and cannot be generated")]
    EscapeAppTag,

    /// Reserved protection type value
    #[error("invalid protection type {0}")]
    InvalidPiType(u8),
}

/// Inputs for [`DifContext::new`].
#[derive(Debug, Clone)]
pub struct DifContextParams {
    /// Block size in bytes, including metadata when interleaved
    pub block_size: u32,
    /// Metadata bytes per block
    pub md_size: u32,
    /// Metadata is inline with data (extended LBA)
    pub md_interleave: bool,
    /// Position of the PI tuple within the metadata
    pub pi_location: PiLocation,
    /// Protection type
    pub dif_type: DifType,
    /// Enabled checks
    pub dif_flags: DifFlags,
    /// Reference tag of block 0 before the starting offset is applied
    pub init_ref_tag: u32,
    /// Application tag value
    pub app_tag: u16,
    /// Bits of the application tag that are compared
    pub apptag_mask: u16,
    /// Block offset of this buffer within the I/O
    pub start_block: u64,
    /// Initial CRC value
    pub guard_seed: u16,
}

impl Default for DifContextParams {
    fn default() -> Self {
        Self {
            block_size: 512,
            md_size: 0,
            md_interleave: true,
            pi_location: PiLocation::Tail,
            dif_type: DifType::Disable,
            dif_flags: DifFlags::empty(),
            init_ref_tag: 0,
            app_tag: 0,
            apptag_mask: 0xffff,
            start_block: 0,
            guard_seed: 0,
        }
    }
}

/// Validated protection parameters for one buffer.
///
/// Immutable once built. Use the same context for [`generate`](super::generate)
/// and [`verify`](super::verify) of a given buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifContext {
    block_size: usize,
    md_size: usize,
    md_interleave: bool,
    pi_location: PiLocation,
    dif_type: DifType,
    dif_flags: DifFlags,
    init_ref_tag: u32,
    app_tag: u16,
    apptag_mask: u16,
    start_block: u64,
    guard_seed: u16,
    data_block_size: usize,
    pi_offset: usize,
}

impl DifContext {
    /// Validate `params` and build a context.
    pub fn new(params: DifContextParams) -> Result<Self, ContextError> {
        let DifContextParams {
            block_size,
            md_size,
            md_interleave,
            pi_location,
            dif_type,
            dif_flags,
            init_ref_tag,
            app_tag,
            apptag_mask,
            start_block,
            guard_seed,
        } = params;

        if block_size == 0 {
            return Err(ContextError::ZeroBlockSize);
        }
        if md_interleave && block_size <= md_size {
            return Err(ContextError::BlockTooSmall {
                block_size,
                md_size,
            });
        }
        if !dif_flags.is_empty() {
            if md_size == 0 {
                return Err(ContextError::NoMetadata(dif_flags));
            }
            if (md_size as usize) < PI_SIZE {
                return Err(ContextError::MetadataTooSmall(md_size));
            }
            if dif_type == DifType::Disable {
                return Err(ContextError::ChecksWithoutType(dif_flags));
            }
            // Blocks carrying this tag would skip verification entirely
            if dif_flags.contains(DifFlags::APPTAG_CHECK) && app_tag == ESCAPE_APP_TAG {
                return Err(ContextError::EscapeAppTag);
            }
        }

        let block_size = block_size as usize;
        let md_size = md_size as usize;
        let data_block_size = if md_interleave {
            block_size - md_size
        } else {
            block_size
        };
        let pi_offset = match pi_location {
            PiLocation::Head => 0,
            PiLocation::Tail => md_size.saturating_sub(PI_SIZE),
        };

        Ok(Self {
            block_size,
            md_size,
            md_interleave,
            pi_location,
            dif_type,
            dif_flags,
            init_ref_tag,
            app_tag,
            apptag_mask,
            start_block,
            guard_seed,
            data_block_size,
            pi_offset,
        })
    }

    /// Bytes per block as transferred in the data buffer.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Metadata bytes per block.
    pub fn md_size(&self) -> usize {
        self.md_size
    }

    /// Whether metadata is inline with data.
    pub fn md_interleave(&self) -> bool {
        self.md_interleave
    }

    pub fn pi_location(&self) -> PiLocation {
        self.pi_location
    }

    pub fn dif_type(&self) -> DifType {
        self.dif_type
    }

    pub fn dif_flags(&self) -> DifFlags {
        self.dif_flags
    }

    pub fn init_ref_tag(&self) -> u32 {
        self.init_ref_tag
    }

    pub fn app_tag(&self) -> u16 {
        self.app_tag
    }

    pub fn apptag_mask(&self) -> u16 {
        self.apptag_mask
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn guard_seed(&self) -> u16 {
        self.guard_seed
    }

    /// Payload bytes per block.
    pub fn data_block_size(&self) -> usize {
        self.data_block_size
    }

    /// Offset of the PI tuple within the metadata region.
    pub fn pi_offset(&self) -> usize {
        self.pi_offset
    }

    /// Bytes of an interleaved block covered by the guard: the data and any
    /// metadata in front of the PI tuple.
    pub fn guard_interval(&self) -> usize {
        self.data_block_size + self.pi_offset
    }

    /// Reference tag expected in block `index` of the buffer.
    pub fn ref_tag(&self, index: usize) -> u32 {
        if self.dif_type.increments_ref_tag() {
            let offset = self.start_block.wrapping_add(index as u64);
            self.init_ref_tag.wrapping_add(offset as u32)
        } else {
            self.init_ref_tag
        }
    }

    /// Number of whole blocks in a data buffer of `len` bytes.
    pub fn num_blocks(&self, len: usize) -> Result<usize, super::DifError> {
        if len == 0 || len % self.block_size != 0 {
            return Err(super::DifError::Misaligned {
                len,
                unit: self.block_size,
            });
        }
        Ok(len / self.block_size)
    }

    /// Lay `payload` out as extended blocks with zeroed metadata.
    ///
    /// `payload` must be a whole, non-zero number of data blocks.
    pub fn interleave(&self, payload: &[u8]) -> Result<Vec<u8>, super::DifError> {
        if !self.md_interleave {
            return Err(super::DifError::Layout { interleaved: false });
        }
        let unit = self.data_block_size;
        if payload.is_empty() || payload.len() % unit != 0 {
            return Err(super::DifError::Misaligned {
                len: payload.len(),
                unit,
            });
        }
        let mut buf = vec![0u8; payload.len() / unit * self.block_size];
        for (block, data) in buf
            .chunks_exact_mut(self.block_size)
            .zip(payload.chunks_exact(unit))
        {
            block[..unit].copy_from_slice(data);
        }
        Ok(buf)
    }
}
