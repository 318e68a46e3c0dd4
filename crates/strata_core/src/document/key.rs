//! Document key rules.

use crate::error::{CoreError, CoreResult};
use crate::types::{TickGenerator, MAX_TICK};

/// Longest accepted key, in bytes.
pub const MAX_KEY_LENGTH: usize = 254;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '_' | '-' | ':' | '.' | '@' | '(' | ')' | '+' | ',' | '=' | ';' | '$' | '!' | '*' | '\''
                | '%'
        )
}

/// Checks that `key` is non-empty, short enough and uses only allowed characters.
///
/// # Errors
///
/// Returns `InvalidDocumentKey` otherwise.
pub fn validate_key(key: &str) -> CoreResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || !key.chars().all(is_key_char) {
        return Err(CoreError::InvalidDocumentKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Generates a key from the tick generator.
pub fn generate_key(ticks: &TickGenerator) -> String {
    ticks.next().to_string()
}

/// Advances the tick generator past a numeric user key so generated keys
/// never collide with it.
pub fn track_key(ticks: &TickGenerator, key: &str) {
    if let Ok(value) = key.parse::<u64>() {
        if value <= MAX_TICK {
            ticks.track(value);
        }
    }
}
