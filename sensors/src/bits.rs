//! Two's-complement handling for the raw register fields. The devices pack
//! signed values at widths the host has no native type for (12, 20 and 24
//! bits), so every raw count goes through [`sign_extend`] before arithmetic.

/// Interprets the low `width` bits of `value` as a two's-complement number.
///
/// `width` must be below 32. Bits above `width` are ignored by callers, which
/// assemble the field MSB-first before extending.
pub fn sign_extend(value: u32, width: u32) -> i32 {
    debug_assert!(width > 0 && width < 32);
    if value & (1 << (width - 1)) != 0 {
        value as i32 - (1 << width)
    } else {
        value as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_iff_top_bit_set() {
        for width in [12u32, 16, 20, 24] {
            let top = 1u32 << (width - 1);
            assert_eq!(sign_extend(top, width), -(top as i32));
            assert_eq!(sign_extend(top - 1, width), (top - 1) as i32);
            assert_eq!(sign_extend(0, width), 0);
        }
    }

    #[test]
    fn round_trips_representable_values() {
        for width in [12u32, 16, 20, 24] {
            let mask = (1u64 << width) - 1;
            for x in [-5i64, -1, 0, 1, 7, -(1i64 << (width - 1)), (1i64 << (width - 1)) - 1] {
                let packed = (x as u64 & mask) as u32;
                assert_eq!(sign_extend(packed, width) as i64, x);
            }
        }
    }
}
