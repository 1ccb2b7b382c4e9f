//! Secure random number generation.
//!
//! Uses the operating system's cryptographic random source via `rand`.

use rand::RngCore;

/// Length of the generated CSRF secret in bytes.
pub const SECRET_LEN: usize = 32;

/// Fill a buffer with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Generate a fresh secret of [`SECRET_LEN`] bytes.
pub fn random_secret() -> Vec<u8> {
    let mut buf = vec![0u8; SECRET_LEN];
    fill_random(&mut buf);
    buf
}
