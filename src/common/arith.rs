//! Big-endian unsigned integer arithmetic over byte buffers, 16 bits at a time.
//!
//! Used to compute bucket midpoints and random targets inside a bucket's range.
//! Buffers of unequal length are treated as zero-extended on the left, and
//! results are always padded to a whole number of words.

use std::cmp::Ordering;

use rand::{rngs::OsRng, Rng, RngCore};

const WORD_SIZE: usize = 2;

/// Returns `a + b`, one word wider than the widest operand only if the addition overflowed.
pub fn add(a: &[u8], b: &[u8]) -> Vec<u8> {
    let width = width(a, b);
    let (a, b) = (words(a, width), words(b, width));

    let mut result = vec![0_u16; a.len()];
    let mut carry = 0_u32;

    for i in (0..a.len()).rev() {
        let sum = a[i] as u32 + b[i] as u32 + carry;

        result[i] = (sum & 0xffff) as u16;
        carry = sum >> 16;
    }

    if carry > 0 {
        result.insert(0, carry as u16);
    }

    to_bytes(&result)
}

/// Returns `a - b`, assuming `a >= b`.
pub fn sub(a: &[u8], b: &[u8]) -> Vec<u8> {
    let width = width(a, b);
    let (a, b) = (words(a, width), words(b, width));

    let mut result = vec![0_u16; a.len()];
    let mut borrow = 0_u32;

    for i in (0..a.len()).rev() {
        let difference = 0x1_0000 + a[i] as u32 - b[i] as u32 - borrow;

        result[i] = (difference & 0xffff) as u16;
        borrow = if difference < 0x1_0000 { 1 } else { 0 };
    }

    to_bytes(&result)
}

/// Returns `a >> 1`.
pub fn shr(a: &[u8]) -> Vec<u8> {
    let a = words(a, width(a, &[]));

    let mut result = Vec::with_capacity(a.len());
    let mut carry = 0_u16;

    for word in a {
        result.push((word >> 1) | (carry << 15));
        carry = word & 1;
    }

    to_bytes(&result)
}

/// Three-way compare of `a` and `b` as unsigned integers.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    let width = a.len().max(b.len());

    padded(a, width).cmp(&padded(b, width))
}

/// Returns a random value `r` such that `a <= r <= b`, assuming `a <= b`.
///
/// Words are drawn from the most significant one down, each within the range
/// still allowed by whichever bound the value so far sits on. Once neither bound
/// constrains the rest, the remaining bytes are filled from [OsRng].
pub fn random(a: &[u8], b: &[u8]) -> Vec<u8> {
    let width = width(a, b);
    let (low, high) = (words(a, width), words(b, width));

    let mut rng = OsRng;
    let mut result = vec![0_u16; low.len()];

    let mut on_low = true;
    let mut on_high = true;

    for i in 0..result.len() {
        if !on_low && !on_high {
            let mut rest = vec![0_u8; (result.len() - i) * WORD_SIZE];
            rng.fill_bytes(&mut rest);

            for (word, chunk) in result[i..].iter_mut().zip(rest.chunks_exact(WORD_SIZE)) {
                *word = u16::from_be_bytes([chunk[0], chunk[1]]);
            }

            break;
        }

        let min = if on_low { low[i] } else { 0 };
        let max = if on_high { high[i] } else { u16::MAX };

        let word = rng.gen_range(min..=max);

        on_low = on_low && word == min;
        on_high = on_high && word == max;

        result[i] = word;
    }

    to_bytes(&result)
}

fn width(a: &[u8], b: &[u8]) -> usize {
    let width = a.len().max(b.len());

    width + width % WORD_SIZE
}

fn padded(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut padded = vec![0_u8; width - bytes.len()];
    padded.extend_from_slice(bytes);

    padded
}

fn words(bytes: &[u8], width: usize) -> Vec<u16> {
    padded(bytes, width)
        .chunks_exact(WORD_SIZE)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect()
}

fn to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn add_with_carry() {
        assert_eq!(add(&hex("0001ffffffff"), &hex("0001")), hex("000200000000"));
        assert_eq!(
            add(&hex("000123456789"), &hex("000123456789")),
            hex("0002468acf12")
        );
    }

    #[test]
    fn add_overflow_widens() {
        assert_eq!(add(&hex("ffffffff"), &hex("0001")), hex("000100000000"));
        assert_eq!(add(&[0xff; 20], &[0xff; 20]).len(), 22);
        assert_eq!(add(&[0x7f; 20], &[0x7f; 20]).len(), 20);
    }

    #[test]
    fn sub_with_borrow() {
        assert_eq!(
            sub(&hex("000123456789"), &hex("000123456789")),
            hex("000000000000")
        );
        assert_eq!(
            sub(&hex("0005124ab125"), &hex("000123456789")),
            hex("0003ef05499c")
        );
    }

    #[test]
    fn add_sub_round_trip() {
        for _ in 0..100 {
            let mut a: [u8; 20] = rand::random();
            let mut b: [u8; 20] = rand::random();

            if compare(&a, &b) == Ordering::Less {
                std::mem::swap(&mut a, &mut b);
            }

            assert_eq!(add(&sub(&a, &b), &b), a.to_vec());
        }
    }

    #[test]
    fn shift_right() {
        assert_eq!(shr(&hex("000100000000")), hex("000080000000"));
        assert_eq!(shr(&hex("12345678")), hex("091a2b3c"));
    }

    #[test]
    fn compare_values() {
        assert_eq!(compare(&hex("12345678"), &hex("12345678")), Ordering::Equal);
        assert_eq!(compare(&hex("12345678"), &hex("12355678")), Ordering::Less);
        assert_eq!(
            compare(&hex("13345678"), &hex("12359999")),
            Ordering::Greater
        );

        let zero = hex("00000000000000000000000000000000000000000000");
        let id = hex("3444b337cc50b002736f0ba1e1af1c0e430474e2");
        let small = hex("00000000000000000000000000000000800000000000");

        assert_eq!(compare(&zero, &id), Ordering::Less);
        assert_eq!(compare(&id, &small), Ordering::Greater);
        assert_eq!(compare(&small, &id), Ordering::Less);
    }

    #[test]
    fn compare_is_reflexive_and_antisymmetric() {
        for _ in 0..100 {
            let a: [u8; 20] = rand::random();
            let b: [u8; 20] = rand::random();

            assert_eq!(compare(&a, &a), Ordering::Equal);
            assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
        }
    }

    #[test]
    fn random_within_bounds() {
        let a = hex("13345678");
        let b = hex("15359999");

        for _ in 0..1000 {
            let r = random(&a, &b);

            assert_ne!(compare(&a, &r), Ordering::Greater);
            assert_ne!(compare(&r, &b), Ordering::Greater);
        }
    }

    #[test]
    fn random_within_random_bounds() {
        for _ in 0..1000 {
            let mut a: [u8; 20] = rand::random();
            let mut b: [u8; 20] = rand::random();

            if compare(&a, &b) == Ordering::Greater {
                std::mem::swap(&mut a, &mut b);
            }
            // Share a prefix so the bounds constrain more than the first word.
            b[..4].copy_from_slice(&a[..4]);
            if compare(&a, &b) == Ordering::Greater {
                std::mem::swap(&mut a, &mut b);
            }

            let r = random(&a, &b);

            assert_ne!(compare(&a, &r), Ordering::Greater);
            assert_ne!(compare(&r, &b), Ordering::Greater);
        }
    }

    #[test]
    fn random_degenerate_range() {
        let a = hex("3444b337cc50b002736f0ba1e1af1c0e430474e2");

        assert_eq!(random(&a, &a), a);
    }
}
