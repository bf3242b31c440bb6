//! Base62 encoding and random base62 strings.
//!
//! Leading zero bytes are encoded as leading `'0'` characters so that
//! decoding restores the exact input.

use crate::error::{PolicyError, PolicyResult};
use crate::generator::random_runes;
use rand::rngs::OsRng;

/// The base62 alphabet.
pub const ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const BASE: u32 = 62;

/// Encode bytes as base62.
#[must_use]
pub fn encode(input: &[u8]) -> String {
    let alphabet = ALPHABET.as_bytes();
    let zeros = input.iter().take_while(|b| **b == 0).count();

    // Little-endian base62 digits of the non-zero tail.
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 4 / 3 + 1);
    for &byte in &input[zeros..] {
        let mut carry = u32::from(byte);
        for digit in &mut digits {
            carry += u32::from(*digit) << 8;
            *digit = (carry % BASE) as u8;
            carry /= BASE;
        }
        while carry > 0 {
            digits.push((carry % BASE) as u8);
            carry /= BASE;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('0').take(zeros));
    out.extend(digits.iter().rev().map(|d| char::from(alphabet[usize::from(*d)])));
    out
}

/// Decode a base62 string produced by [`encode`].
///
/// # Errors
///
/// Returns [`PolicyError::InvalidBase62`] on characters outside [`ALPHABET`].
pub fn decode(input: &str) -> PolicyResult<Vec<u8>> {
    let zeros = input.chars().take_while(|c| *c == '0').count();

    // Little-endian base256 bytes of the non-zero tail.
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for c in input.chars().skip(zeros) {
        let mut carry = digit_value(c).ok_or(PolicyError::InvalidBase62(c))?;
        for byte in &mut bytes {
            carry += u32::from(*byte) * BASE;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}

/// A random base62 string of `length` characters from the OS random source.
///
/// # Errors
///
/// Returns an error if the random source fails.
pub fn random(length: usize) -> PolicyResult<String> {
    let alphabet: Vec<char> = ALPHABET.chars().collect();
    Ok(random_runes(&mut OsRng, &alphabet, length)?.into_iter().collect())
}

fn digit_value(c: char) -> Option<u32> {
    match c {
        '0'..='9' => Some(c as u32 - '0' as u32),
        'A'..='Z' => Some(c as u32 - 'A' as u32 + 10),
        'a'..='z' => Some(c as u32 - 'a' as u32 + 36),
        _ => None,
    }
}
