//! VNC Authentication: DES challenge/response with the VNC-specific
//! per-byte bit reversal of the password key.
//!
//! RFC 6143 leaves the exact key derivation to "the VNC authentication
//! scheme", which in every real implementation (including the original this
//! crate is descended from) reverses the bit order of each byte of the
//! (zero-padded) password before using it as a DES key. See
//! <https://www.vidarholen.net/contents/junk/vnc.html> for the historical
//! explanation: the original VNC server fed the password through a DES
//! library that expected LSB-first key bits.

use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::RngCore;

use crate::error::{Result, VncError};

/// Derives the 8-byte DES key from a password of 0–8 bytes: truncate to 8
/// bytes, zero-pad if shorter, then reverse the bit order within each byte.
fn derive_key(password: &[u8]) -> [u8; 8] {
    let mut key = [0u8; 8];
    let n = password.len().min(8);
    key[..n].copy_from_slice(&password[..n]);
    for byte in &mut key {
        *byte = byte.reverse_bits();
    }
    key
}

/// Encrypts a 16-byte challenge as two independent 8-byte ECB blocks under
/// the VNC-derived key for `password`.
pub fn encrypt_challenge(challenge: &[u8; 16], password: &[u8]) -> [u8; 16] {
    let key = derive_key(password);
    let cipher = Des::new_from_slice(&key).expect("DES key is always exactly 8 bytes");

    let mut out = *challenge;
    let (block0, block1) = out.split_at_mut(8);
    cipher.encrypt_block(block0.into());
    cipher.encrypt_block(block1.into());
    out
}

/// Generates a cryptographically random 16-byte challenge.
pub fn generate_challenge() -> [u8; 16] {
    let mut challenge = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Verifies a client's 16-byte response against the expected DES encryption
/// of `challenge` under `password`, in constant time with respect to the
/// response contents (so a timing side-channel cannot leak how many leading
/// bytes of a guessed response were correct).
pub fn verify(challenge: &[u8; 16], response: &[u8; 16], password: &[u8]) -> bool {
    let expected = encrypt_challenge(challenge, password);
    constant_time_eq(&expected, response)
}

fn constant_time_eq(a: &[u8; 16], b: &[u8; 16]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Truncates/zero-pads an arbitrary-length password to the 0–8 byte range
/// the RFB wire format expects, per §6 of the spec.
pub fn normalize_password(password: &[u8]) -> Vec<u8> {
    let n = password.len().min(8);
    let mut buf = vec![0u8; 8];
    buf[..n].copy_from_slice(&password[..n]);
    buf
}

/// Strips leading/trailing ASCII whitespace, matching the original source's
/// `bytes.TrimSpace` treatment of the `.rfbpasswd` file contents.
pub fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &bytes[s..=e],
        _ => &[],
    }
}

/// Reads the password file at `path`, trimming surrounding ASCII whitespace.
/// Returns [`VncError::Internal`] if the file cannot be read.
pub fn read_password_file(path: &std::path::Path) -> Result<Vec<u8>> {
    let contents = std::fs::read(path)
        .map_err(|e| VncError::internal(format!("reading password file {path:?}: {e}")))?;
    Ok(trim_ascii_whitespace(&contents).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario 3 from the spec's end-to-end test table: password "abc"
    // zero-padded to `61 62 63 00 00 00 00 00`, reversed-bit key
    // `86 46 c6 00 00 00 00 00`.
    #[test]
    fn derives_key_with_reversed_bit_order() {
        let key = derive_key(b"abc");
        assert_eq!(key, [0x86, 0x46, 0xc6, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn verify_succeeds_for_matching_password() {
        let challenge = [0u8; 16];
        let response = encrypt_challenge(&challenge, b"abc");
        assert!(verify(&challenge, &response, b"abc"));
    }

    #[test]
    fn verify_fails_for_wrong_password() {
        let challenge = [0u8; 16];
        let response = encrypt_challenge(&challenge, b"abc");
        assert!(!verify(&challenge, &response, b"xyz"));
    }

    #[test]
    fn verify_fails_for_passwords_differing_only_after_padding() {
        let challenge = [0xAAu8; 16];
        let response = encrypt_challenge(&challenge, b"secret1");
        assert!(!verify(&challenge, &response, b"secret2"));
    }

    #[test]
    fn password_longer_than_eight_bytes_is_truncated() {
        let key_long = derive_key(b"123456789999");
        let key_short = derive_key(b"12345678");
        assert_eq!(key_long, key_short);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(trim_ascii_whitespace(b"  secret\n"), b"secret");
        assert_eq!(trim_ascii_whitespace(b"   \t\n"), b"");
    }

    #[test]
    fn challenge_generation_is_not_constant() {
        let a = generate_challenge();
        let b = generate_challenge();
        assert_ne!(a, b, "two random challenges collided, check the RNG wiring");
    }
}
