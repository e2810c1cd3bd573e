//! Generate and verify protection information in block buffers.

use std::fmt;

use super::context::{DifContext, DifFlags, DifType, ESCAPE_APP_TAG, PI_SIZE};
use super::crc::crc16_t10dif;

/// Which protection field failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DifErrorKind {
    /// CRC guard
    Guard,
    /// Application tag
    AppTag,
    /// Reference tag
    RefTag,
}

impl fmt::Display for DifErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifErrorKind::Guard => f.write_str("guard"),
            DifErrorKind::AppTag => f.write_str("application tag"),
            DifErrorKind::RefTag => f.write_str("reference tag"),
        }
    }
}

/// First protection mismatch found in a buffer.
///
/// For the guard, `expected` is the guard recorded in the metadata and
/// `actual` the CRC of the data as it is now. For the tags, `expected` is the
/// value derived from the [`DifContext`] and `actual` what the metadata holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} mismatch at block {block}: expected {expected:#x}, actual {actual:#x}")]
pub struct DifMismatch {
    pub kind: DifErrorKind,
    pub expected: u64,
    pub actual: u64,
    /// Index of the block within the buffer
    pub block: usize,
}

/// Codec failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DifError {
    /// Buffer is not a whole, non-zero number of blocks
    #[error("misaligned buffer length {len} ({unit}-byte blocks)")]
    Misaligned {
        /// Buffer length
        len: usize,
        /// Block size the length must be a multiple of
        unit: usize,
    },

    /// Separate metadata buffer does not match the data buffer
    #[error("metadata buffer is {len} bytes, expected {expected}")]
    MetadataLength {
        /// Metadata buffer length
        len: usize,
        /// Length implied by the data buffer
        expected: usize,
    },

    /// Interleaved entry point used with a separate-metadata context, or
    /// the other way round
    #[error("metadata layout mismatch (context interleaved: {interleaved})")]
    Layout {
        /// Layout of the context
        interleaved: bool,
    },

    /// Stored protection information does not match
    #[error(transparent)]
    Mismatch(#[from] DifMismatch),
}

/// Protection information tuple as laid out on the media (big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pi {
    guard: u16,
    app_tag: u16,
    ref_tag: u32,
}

impl Pi {
    fn read(field: &[u8]) -> Self {
        Self {
            guard: u16::from_be_bytes([field[0], field[1]]),
            app_tag: u16::from_be_bytes([field[2], field[3]]),
            ref_tag: u32::from_be_bytes([field[4], field[5], field[6], field[7]]),
        }
    }
}

/// Block source for the guard: the data followed by the metadata bytes in
/// front of the PI tuple. Interleaved blocks pass an empty `md_prefix`.
fn block_guard(ctx: &DifContext, data: &[u8], md_prefix: &[u8]) -> u16 {
    crc16_t10dif(crc16_t10dif(ctx.guard_seed(), data), md_prefix)
}

fn write_pi(field: &mut [u8], ctx: &DifContext, guard: u16, index: usize) {
    let flags = ctx.dif_flags();
    if flags.contains(DifFlags::GUARD_CHECK) {
        field[0..2].copy_from_slice(&guard.to_be_bytes());
    }
    if flags.contains(DifFlags::APPTAG_CHECK) {
        field[2..4].copy_from_slice(&ctx.app_tag().to_be_bytes());
    }
    if flags.contains(DifFlags::REFTAG_CHECK) {
        field[4..8].copy_from_slice(&ctx.ref_tag(index).to_be_bytes());
    }
}

/// All-ones tags turn checking off for a block. Only honoured when the codec
/// owns the application tag, which a context never sets to the escape value.
fn is_escaped(ctx: &DifContext, pi: &Pi) -> bool {
    if !ctx.dif_flags().contains(DifFlags::APPTAG_CHECK) || pi.app_tag != ESCAPE_APP_TAG {
        return false;
    }
    match ctx.dif_type() {
        DifType::Type3 => pi.ref_tag == 0xffff_ffff,
        _ => true,
    }
}

fn check_pi(
    ctx: &DifContext,
    pi: &Pi,
    index: usize,
    guard: impl FnOnce() -> u16,
) -> Result<(), DifMismatch> {
    if is_escaped(ctx, pi) {
        return Ok(());
    }
    let flags = ctx.dif_flags();

    if flags.contains(DifFlags::GUARD_CHECK) {
        let computed = guard();
        if computed != pi.guard {
            return Err(DifMismatch {
                kind: DifErrorKind::Guard,
                expected: pi.guard.into(),
                actual: computed.into(),
                block: index,
            });
        }
    }

    if flags.contains(DifFlags::APPTAG_CHECK) {
        let mask = ctx.apptag_mask();
        let expected = ctx.app_tag() & mask;
        let actual = pi.app_tag & mask;
        if expected != actual {
            return Err(DifMismatch {
                kind: DifErrorKind::AppTag,
                expected: expected.into(),
                actual: actual.into(),
                block: index,
            });
        }
    }

    if flags.contains(DifFlags::REFTAG_CHECK) {
        let expected = ctx.ref_tag(index);
        if expected != pi.ref_tag {
            return Err(DifMismatch {
                kind: DifErrorKind::RefTag,
                expected: expected.into(),
                actual: pi.ref_tag.into(),
                block: index,
            });
        }
    }

    Ok(())
}

fn require_layout(ctx: &DifContext, interleaved: bool) -> Result<(), DifError> {
    if ctx.md_interleave() != interleaved {
        return Err(DifError::Layout {
            interleaved: ctx.md_interleave(),
        });
    }
    Ok(())
}

/// Write protection information into every block of an extended-LBA buffer.
///
/// Only the fields enabled in the context's flags are written; the rest of
/// the metadata is left untouched.
pub fn generate(buf: &mut [u8], ctx: &DifContext) -> Result<(), DifError> {
    require_layout(ctx, true)?;
    ctx.num_blocks(buf.len())?;
    if ctx.dif_flags().is_empty() {
        return Ok(());
    }

    let interval = ctx.guard_interval();
    for (index, block) in buf.chunks_exact_mut(ctx.block_size()).enumerate() {
        let (covered, rest) = block.split_at_mut(interval);
        let guard = block_guard(ctx, covered, &[]);
        write_pi(&mut rest[..PI_SIZE], ctx, guard, index);
    }
    Ok(())
}

/// Check the protection information of every block of an extended-LBA
/// buffer, stopping at the first mismatch.
pub fn verify(buf: &[u8], ctx: &DifContext) -> Result<(), DifError> {
    require_layout(ctx, true)?;
    ctx.num_blocks(buf.len())?;
    if ctx.dif_flags().is_empty() {
        return Ok(());
    }

    let interval = ctx.guard_interval();
    for (index, block) in buf.chunks_exact(ctx.block_size()).enumerate() {
        let (covered, rest) = block.split_at(interval);
        let pi = Pi::read(&rest[..PI_SIZE]);
        check_pi(ctx, &pi, index, || block_guard(ctx, covered, &[]))?;
    }
    Ok(())
}

fn separate_blocks(data: &[u8], md: &[u8], ctx: &DifContext) -> Result<usize, DifError> {
    require_layout(ctx, false)?;
    let num_blocks = ctx.num_blocks(data.len())?;
    let expected = num_blocks * ctx.md_size();
    if md.len() != expected {
        return Err(DifError::MetadataLength {
            len: md.len(),
            expected,
        });
    }
    Ok(num_blocks)
}

/// Write protection information into a separate metadata buffer.
///
/// `md` holds `md_size` bytes for each block of `data`.
pub fn generate_separate(data: &[u8], md: &mut [u8], ctx: &DifContext) -> Result<(), DifError> {
    separate_blocks(data, md, ctx)?;
    if ctx.dif_flags().is_empty() {
        return Ok(());
    }

    let pi_offset = ctx.pi_offset();
    for (index, (block, meta)) in data
        .chunks_exact(ctx.block_size())
        .zip(md.chunks_exact_mut(ctx.md_size()))
        .enumerate()
    {
        let (prefix, rest) = meta.split_at_mut(pi_offset);
        let guard = block_guard(ctx, block, prefix);
        write_pi(&mut rest[..PI_SIZE], ctx, guard, index);
    }
    Ok(())
}

/// Check protection information held in a separate metadata buffer.
pub fn verify_separate(data: &[u8], md: &[u8], ctx: &DifContext) -> Result<(), DifError> {
    separate_blocks(data, md, ctx)?;
    if ctx.dif_flags().is_empty() {
        return Ok(());
    }

    let pi_offset = ctx.pi_offset();
    for (index, (block, meta)) in data
        .chunks_exact(ctx.block_size())
        .zip(md.chunks_exact(ctx.md_size()))
        .enumerate()
    {
        let (prefix, rest) = meta.split_at(pi_offset);
        let pi = Pi::read(&rest[..PI_SIZE]);
        check_pi(ctx, &pi, index, || block_guard(ctx, block, prefix))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, RngCore, SeedableRng};

    use super::*;
    use crate::dif::{ContextError, DifContextParams, PiLocation};

    const ALL_CHECKS: DifFlags = DifFlags::GUARD_CHECK
        .union(DifFlags::APPTAG_CHECK)
        .union(DifFlags::REFTAG_CHECK);

    fn ctx(md_size: u32, location: PiLocation, dif_type: DifType, flags: DifFlags) -> DifContext {
        DifContext::new(DifContextParams {
            block_size: 512 + md_size,
            md_size,
            pi_location: location,
            dif_type,
            dif_flags: flags,
            init_ref_tag: 0x1000,
            app_tag: 0x5a5a,
            ..Default::default()
        })
        .unwrap()
    }

    fn random_blocks(rng: &mut StdRng, ctx: &DifContext, blocks: usize) -> Vec<u8> {
        let mut payload = vec![0u8; blocks * ctx.data_block_size()];
        rng.fill_bytes(&mut payload);
        ctx.interleave(&payload).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let cases = [
            (8, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK),
            (8, PiLocation::Head, DifType::Type1, ALL_CHECKS),
            (16, PiLocation::Tail, DifType::Type2, ALL_CHECKS),
            (16, PiLocation::Head, DifType::Type3, ALL_CHECKS),
            (64, PiLocation::Tail, DifType::Type3, DifFlags::APPTAG_CHECK),
        ];
        for (md_size, location, dif_type, flags) in cases {
            let ctx = ctx(md_size, location, dif_type, flags);
            let blocks = rng.gen_range(1..8);
            let mut buf = random_blocks(&mut rng, &ctx, blocks);
            generate(&mut buf, &ctx).unwrap();
            assert_eq!(verify(&buf, &ctx), Ok(()), "{md_size} {location:?} {dif_type}");
        }
    }

    #[test]
    fn test_payload_tamper_reports_guard_at_block() {
        let mut rng = StdRng::seed_from_u64(11);
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, ALL_CHECKS);
        for _ in 0..32 {
            let mut buf = random_blocks(&mut rng, &ctx, 6);
            generate(&mut buf, &ctx).unwrap();

            let block = rng.gen_range(0..6);
            let byte = rng.gen_range(0..ctx.data_block_size());
            buf[block * ctx.block_size() + byte] ^= rng.gen_range(1..=255u8);

            match verify(&buf, &ctx) {
                Err(DifError::Mismatch(m)) => {
                    assert_eq!(m.kind, DifErrorKind::Guard);
                    assert_eq!(m.block, block);
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_misaligned_lengths() {
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK);
        for len in [0, 1, 519, 521, 1039] {
            let mut buf = vec![0u8; len];
            let expected = Err(DifError::Misaligned { len, unit: 520 });
            assert_eq!(generate(&mut buf, &ctx), expected);
            assert_eq!(verify(&buf, &ctx), expected);
        }
    }

    #[test]
    fn test_interleave_requires_whole_payload_blocks() {
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK);
        assert_eq!(
            ctx.interleave(&[0u8; 100]),
            Err(DifError::Misaligned { len: 100, unit: 512 })
        );
        assert_eq!(ctx.interleave(&[1u8; 1024]).unwrap().len(), 1040);
    }

    #[test]
    fn test_first_failure_only() {
        let mut rng = StdRng::seed_from_u64(3);
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK);
        let mut buf = random_blocks(&mut rng, &ctx, 8);
        generate(&mut buf, &ctx).unwrap();

        buf[2 * ctx.block_size() + 10] ^= 0xff;
        buf[5 * ctx.block_size() + 10] ^= 0xff;

        match verify(&buf, &ctx) {
            Err(DifError::Mismatch(m)) => assert_eq!(m.block, 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_4k_type1_guard_scenario() {
        let ctx = DifContext::new(DifContextParams {
            block_size: 4096 + 8,
            md_size: 8,
            md_interleave: true,
            dif_type: DifType::Type1,
            dif_flags: DifFlags::GUARD_CHECK,
            ..Default::default()
        })
        .unwrap();

        let mut payload = vec![0u8; 4096];
        StdRng::seed_from_u64(42).fill_bytes(&mut payload);
        let mut buf = ctx.interleave(&payload).unwrap();
        generate(&mut buf, &ctx).unwrap();

        assert_eq!(buf.len(), 4104);
        let guard = crc16_t10dif(0, &payload);
        assert_eq!(&buf[4096..4098], &guard.to_be_bytes());
        assert_eq!(verify(&buf, &ctx), Ok(()));

        buf[1234] ^= 0x10;
        let flipped = crc16_t10dif(0, &buf[..4096]);
        assert_eq!(
            verify(&buf, &ctx),
            Err(DifError::Mismatch(DifMismatch {
                kind: DifErrorKind::Guard,
                expected: guard.into(),
                actual: flipped.into(),
                block: 0,
            }))
        );
    }

    #[test]
    fn test_app_tag_mismatch_respects_mask() {
        let mut rng = StdRng::seed_from_u64(5);
        let writer = ctx(8, PiLocation::Tail, DifType::Type1, DifFlags::APPTAG_CHECK);
        let mut buf = random_blocks(&mut rng, &writer, 2);
        generate(&mut buf, &writer).unwrap();

        let reader = DifContext::new(DifContextParams {
            block_size: 520,
            md_size: 8,
            dif_type: DifType::Type1,
            dif_flags: DifFlags::APPTAG_CHECK,
            app_tag: 0x5aff,
            apptag_mask: 0xff00,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(verify(&buf, &reader), Ok(()));

        let strict = DifContext::new(DifContextParams {
            apptag_mask: 0xffff,
            app_tag: 0x5aff,
            block_size: 520,
            md_size: 8,
            dif_type: DifType::Type1,
            dif_flags: DifFlags::APPTAG_CHECK,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            verify(&buf, &strict),
            Err(DifError::Mismatch(DifMismatch {
                kind: DifErrorKind::AppTag,
                expected: 0x5aff,
                actual: 0x5a5a,
                block: 0,
            }))
        );
    }

    #[test]
    fn test_swapped_blocks_report_ref_tag() {
        let mut rng = StdRng::seed_from_u64(9);
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, ALL_CHECKS);
        let mut buf = random_blocks(&mut rng, &ctx, 4);
        generate(&mut buf, &ctx).unwrap();

        let bs = ctx.block_size();
        let (head, tail) = buf.split_at_mut(2 * bs);
        head[bs..2 * bs].swap_with_slice(&mut tail[..bs]);

        assert_eq!(
            verify(&buf, &ctx),
            Err(DifError::Mismatch(DifMismatch {
                kind: DifErrorKind::RefTag,
                expected: 0x1001,
                actual: 0x1002,
                block: 1,
            }))
        );
    }

    #[test]
    fn test_type3_ref_tag_constant() {
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = ctx(8, PiLocation::Head, DifType::Type3, DifFlags::REFTAG_CHECK);
        let mut buf = random_blocks(&mut rng, &ctx, 3);
        generate(&mut buf, &ctx).unwrap();

        for block in buf.chunks_exact(ctx.block_size()) {
            assert_eq!(&block[512 + 4..512 + 8], &0x1000u32.to_be_bytes());
        }
    }

    #[test]
    fn test_start_block_offsets_ref_tag() {
        let mut rng = StdRng::seed_from_u64(2);
        let ctx = DifContext::new(DifContextParams {
            block_size: 520,
            md_size: 8,
            dif_type: DifType::Type1,
            dif_flags: DifFlags::REFTAG_CHECK,
            init_ref_tag: 10,
            start_block: 5,
            ..Default::default()
        })
        .unwrap();
        let mut buf = random_blocks(&mut rng, &ctx, 2);
        generate(&mut buf, &ctx).unwrap();
        assert_eq!(&buf[516..520], &15u32.to_be_bytes());
        assert_eq!(&buf[1036..1040], &16u32.to_be_bytes());
    }

    #[test]
    fn test_escape_app_tag_skips_block() {
        let mut rng = StdRng::seed_from_u64(4);
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, ALL_CHECKS);
        let mut buf = random_blocks(&mut rng, &ctx, 2);
        generate(&mut buf, &ctx).unwrap();

        buf[0] ^= 0xff;
        buf[514..516].copy_from_slice(&[0xff, 0xff]);
        assert_eq!(verify(&buf, &ctx), Ok(()));
    }

    #[test]
    fn test_all_ones_app_tag_cannot_hide_tampering() {
        let params = DifContextParams {
            block_size: 520,
            md_size: 8,
            dif_type: DifType::Type1,
            dif_flags: DifFlags::GUARD_CHECK | DifFlags::APPTAG_CHECK,
            app_tag: 0xffff,
            ..Default::default()
        };
        assert_eq!(
            DifContext::new(params.clone()).unwrap_err(),
            ContextError::EscapeAppTag
        );

        // Without the app tag check the all-ones tag is just data
        let ctx = DifContext::new(DifContextParams {
            dif_flags: DifFlags::GUARD_CHECK,
            ..params
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let mut buf = random_blocks(&mut rng, &ctx, 2);
        generate(&mut buf, &ctx).unwrap();
        buf[600] ^= 0x01;
        match verify(&buf, &ctx) {
            Err(DifError::Mismatch(m)) => {
                assert_eq!(m.kind, DifErrorKind::Guard);
                assert_eq!(m.block, 1);
            }
            other => panic!("expected guard mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_all_ones_app_tag_ignored_without_app_tag_check() {
        let mut rng = StdRng::seed_from_u64(4);
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK);
        let mut buf = random_blocks(&mut rng, &ctx, 1);
        generate(&mut buf, &ctx).unwrap();

        buf[0] ^= 0xff;
        buf[514..516].copy_from_slice(&[0xff, 0xff]);
        assert!(matches!(verify(&buf, &ctx), Err(DifError::Mismatch(_))));
    }

    #[test]
    fn test_no_checks_verifies_trivially() {
        let ctx = DifContext::new(DifContextParams {
            block_size: 520,
            md_size: 8,
            ..Default::default()
        })
        .unwrap();
        let mut buf = vec![0xa5u8; 1040];
        generate(&mut buf, &ctx).unwrap();
        assert!(buf.iter().all(|&b| b == 0xa5));
        buf[3] = 0;
        assert_eq!(verify(&buf, &ctx), Ok(()));
    }

    #[test]
    fn test_generate_leaves_disabled_fields() {
        let ctx = ctx(8, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK);
        let mut buf = ctx.interleave(&[7u8; 512]).unwrap();
        buf[514..520].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        generate(&mut buf, &ctx).unwrap();
        assert_eq!(&buf[514..520], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_tail_guard_covers_leading_metadata() {
        let ctx = ctx(16, PiLocation::Tail, DifType::Type1, DifFlags::GUARD_CHECK);
        let mut buf = ctx.interleave(&[3u8; 512]).unwrap();
        generate(&mut buf, &ctx).unwrap();

        buf[512] ^= 1;
        match verify(&buf, &ctx) {
            Err(DifError::Mismatch(m)) => assert_eq!(m.kind, DifErrorKind::Guard),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_interleaved_entry_rejects_separate_context() {
        let ctx = DifContext::new(DifContextParams {
            block_size: 512,
            md_size: 8,
            md_interleave: false,
            dif_type: DifType::Type1,
            dif_flags: DifFlags::GUARD_CHECK,
            ..Default::default()
        })
        .unwrap();
        let mut buf = vec![0u8; 512];
        assert_eq!(
            generate(&mut buf, &ctx),
            Err(DifError::Layout { interleaved: false })
        );
    }

    fn separate_ctx(location: PiLocation) -> DifContext {
        DifContext::new(DifContextParams {
            block_size: 512,
            md_size: 16,
            md_interleave: false,
            pi_location: location,
            dif_type: DifType::Type1,
            dif_flags: ALL_CHECKS,
            init_ref_tag: 7,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_separate_round_trip_and_tamper() {
        let mut rng = StdRng::seed_from_u64(13);
        for location in [PiLocation::Head, PiLocation::Tail] {
            let ctx = separate_ctx(location);
            let mut data = vec![0u8; 4 * 512];
            rng.fill_bytes(&mut data);
            let mut md = vec![0u8; 4 * 16];
            generate_separate(&data, &mut md, &ctx).unwrap();
            assert_eq!(verify_separate(&data, &md, &ctx), Ok(()));

            data[3 * 512 + 1] ^= 0x80;
            match verify_separate(&data, &md, &ctx) {
                Err(DifError::Mismatch(m)) => {
                    assert_eq!(m.kind, DifErrorKind::Guard);
                    assert_eq!(m.block, 3);
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_separate_metadata_length_checked() {
        let ctx = separate_ctx(PiLocation::Tail);
        let data = vec![0u8; 1024];
        let mut md = vec![0u8; 16];
        assert_eq!(
            generate_separate(&data, &mut md, &ctx),
            Err(DifError::MetadataLength {
                len: 16,
                expected: 32
            })
        );
    }
}
