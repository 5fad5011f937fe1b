//! API key generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of a generated API key in alphanumeric characters. 48 characters
/// over a 62-symbol alphabet carries ~285 bits of entropy.
pub const API_KEY_LEN: usize = 48;

/// Generate a fresh opaque API key.
pub fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}
