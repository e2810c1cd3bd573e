//! End-to-end data protection (T10 DIF / DIX).
//!
//! Each logical block carries an 8-byte protection information tuple in its
//! metadata region:
//!
//! ```text
//! ┌──────────────────────────────┬─────────────────────────────┐
//! │ data (data_block_size bytes) │ metadata (md_size bytes)    │
//! └──────────────────────────────┴─────────────────────────────┘
//!                                  PI tuple at Head or Tail:
//!                                  ┌───────┬─────────┬─────────┐
//!                                  │ guard │ app tag │ ref tag │
//!                                  │  u16  │   u16   │   u32   │
//!                                  └───────┴─────────┴─────────┘
//! ```
//!
//! With interleaved metadata (extended LBA) the metadata follows each block's
//! data in the same buffer; otherwise it lives in a separate buffer (DIX).
//!
//! # Example
//!
//! ```
//! use spdk_dif::dif::{self, DifContext, DifContextParams, DifFlags, DifType};
//!
//! let ctx = DifContext::new(DifContextParams {
//!     block_size: 512 + 8,
//!     md_size: 8,
//!     dif_type: DifType::Type1,
//!     dif_flags: DifFlags::GUARD_CHECK | DifFlags::REFTAG_CHECK,
//!     ..Default::default()
//! })?;
//!
//! let mut buf = ctx.interleave(&[0xab; 1024])?;
//! dif::generate(&mut buf, &ctx)?;
//! dif::verify(&buf, &ctx)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod codec;
mod context;
mod crc;

pub use codec::{
    DifError, DifErrorKind, DifMismatch, generate, generate_separate, verify, verify_separate,
};
pub use context::{
    ContextError, DifContext, DifContextParams, DifFlags, DifType, PI_SIZE, PiLocation,
};
pub use crc::crc16_t10dif;
