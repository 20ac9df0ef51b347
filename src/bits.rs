/// Set bit `bit` of `x` on if `toggle` is true, otherwise off.
pub fn bit(bit: u32, x: u32, toggle: bool) -> u32 {
    if toggle {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u32, x: u32) -> bool {
    (x >> bit) & 1 == 1
}

/// Pack `flags` into a word, `flags[i]` landing on bit `i`.
pub fn pack(flags: &[bool]) -> u32 {
    flags
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &f)| bit(i as u32, acc, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        assert_eq!(bit(3, 0, true), 0b1000);
        assert_eq!(bit(3, 0b1010, false), 0b0010);
        assert!(test_bit(1, 0b10));
        assert!(!test_bit(0, 0b10));
    }

    #[test]
    fn pack_orders_low_bit_first() {
        assert_eq!(pack(&[true, false, true]), 0b101);
        assert_eq!(pack(&[]), 0);
    }
}
