//! Masked views of a register word.
//!
//! A mask selects a bit field of a 32-bit word. Values are right-aligned: the field is shifted
//! down by the position of the mask's lowest set bit on read, and up by the same amount on write.
//! Non-contiguous masks are allowed, but the selected bits are *not* packed together, so a value
//! only round-trips if it has no bits where the shifted mask has holes.

/// The position of the lowest set bit of `mask`. A zero mask has no field and shifts by 32.
#[must_use]
pub fn shift(mask: u32) -> u32 {
    mask.trailing_zeros()
}

/// The mask moved down to bit zero, i.e. the bits a right-aligned value may use
#[must_use]
pub fn field_width(mask: u32) -> u32 {
    mask.checked_shr(shift(mask)).unwrap_or(0)
}

/// Extract the field selected by `mask` from `raw`, right-aligned
#[must_use]
pub fn masked_read(raw: u32, mask: u32) -> u32 {
    (raw & mask).checked_shr(shift(mask)).unwrap_or(0)
}

/// Insert `value` into the field selected by `mask`, keeping every other bit of `raw`
#[must_use]
pub fn masked_write(raw: u32, mask: u32, value: u32) -> u32 {
    (raw & !mask) | or_term(mask, value)
}

/// The `(and, or)` pair an endpoint-side RMW needs to perform [`masked_write`] atomically
#[must_use]
pub fn rmw_terms(mask: u32, value: u32) -> (u32, u32) {
    (!mask, or_term(mask, value))
}

fn or_term(mask: u32, value: u32) -> u32 {
    value.checked_shl(shift(mask)).unwrap_or(0) & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    macro_rules! test_masked {
        ($name:ident, $mask:literal, $raw:literal, $read:literal) => {
            paste! {
                #[test]
                fn [<test_read_ $name>]() {
                    assert_eq!(masked_read($raw, $mask), $read);
                }

                #[test]
                fn [<test_write_ $name>]() {
                    let written = masked_write(0, $mask, $read);
                    assert_eq!(written, $raw & $mask);
                    assert_eq!(masked_read(written, $mask), $read);
                }
            }
        };
    }

    test_masked!(full, 0xffff_ffff, 0x8765_4321, 0x8765_4321);
    test_masked!(low_byte, 0x0000_00ff, 0x8765_4321, 0x21);
    test_masked!(high_nibble, 0xf000_0000, 0x8765_4321, 0x8);
    test_masked!(middle, 0x000f_f000, 0x8765_4321, 0x54);
    test_masked!(single_bit, 0x0000_0100, 0x0000_0300, 0x1);
    test_masked!(nibbles, 0x0f0f_0f0f, 0x0123_4567, 0x0103_0507);

    #[test]
    fn test_shift() {
        assert_eq!(shift(0x0f0f_0f0f), 0);
        assert_eq!(shift(0x0000_0100), 8);
        assert_eq!(shift(0x8000_0000), 31);
        assert_eq!(shift(0), 32);
    }

    #[test]
    fn test_field_width() {
        assert_eq!(field_width(0x000f_f000), 0xff);
        assert_eq!(field_width(0), 0);
    }

    #[test]
    fn test_write_keeps_other_bits() {
        assert_eq!(masked_write(0x0123_4567, 0x0f0f_0f0f, 0x090b_0d0f), 0x092b_4d6f);
        assert_eq!(masked_write(0xffff_ffff, 0x0000_ff00, 0x12), 0xffff_12ff);
    }

    #[test]
    fn test_nibble_fixture_sequence() {
        let mask = 0x0f0f_0f0f;
        let raw = 0x0123_4567;
        assert_eq!(masked_read(raw, mask), 0x0103_0507);
        let raw = masked_write(raw, mask, 0x090b_0d0f);
        assert_eq!(raw, 0x092b_4d6f);
        assert_eq!(masked_read(raw, mask), 0x090b_0d0f);
        assert_eq!(masked_read(0x8765_4321, mask), 0x0705_0301);
    }

    #[test]
    fn test_rmw_terms_match_local_write() {
        let (and_term, or_term) = rmw_terms(0x000f_f000, 0xab);
        let raw = 0x1234_5678;
        assert_eq!((raw & and_term) | or_term, masked_write(raw, 0x000f_f000, 0xab));
    }

    #[test]
    fn test_zero_mask_selects_nothing() {
        assert_eq!(masked_read(0xffff_ffff, 0), 0);
        assert_eq!(masked_write(0x1234_5678, 0, 0xffff_ffff), 0x1234_5678);
    }
}
