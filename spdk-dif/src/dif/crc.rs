//! CRC16 guard used by T10 DIF.
//!
//! Polynomial 0x8BB7, MSB-first, no reflection and no final xor
//! (catalogued as CRC-16/T10-DIF).

use crc::{CRC_16_T10_DIF, Crc};

static T10_DIF: Crc<u16> = Crc::<u16>::new(&CRC_16_T10_DIF);

/// Continue a T10 DIF CRC from `seed` over `buf`.
///
/// Feeding a buffer in pieces gives the same result as feeding it whole:
/// `crc16_t10dif(crc16_t10dif(s, a), b) == crc16_t10dif(s, a ++ b)`.
pub fn crc16_t10dif(seed: u16, buf: &[u8]) -> u16 {
    let mut digest = T10_DIF.digest_with_initial(seed);
    digest.update(buf);
    digest.finalize()
}
