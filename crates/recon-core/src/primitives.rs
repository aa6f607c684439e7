//! # Engine Primitives
//!
//! Hardcoded constants for the recon engine.
//! These are compiled into the binary and are immutable at runtime;
//! tunable limits live in `EngineConfig`.

/// Transform name that selects every applicable registered transform.
pub const WILDCARD: &str = "*";

/// Separator between steps of a traversal expression.
pub const TRAVERSE_SEPARATOR: char = '|';

/// Default noise threshold when a wildcard filter does not name one.
pub const DEFAULT_NOISE_THRESHOLD: u32 = 10;

/// Interval between "still running" notices for a transform, in seconds.
pub const PROGRESS_INTERVAL_SECS: u64 = 10;

/// Magic bytes for the recon binary session format header.
pub const MAGIC_BYTES: &[u8; 4] = b"RECN";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a selector expression.
pub const MAX_SELECTOR_LENGTH: usize = 4096;

/// Maximum number of steps in one traversal pipeline.
pub const MAX_TRAVERSAL_STEPS: usize = 64;

/// Maximum number of node specs accepted by a single upsert batch.
pub const MAX_BATCH_LENGTH: usize = 100_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"RECN");
    }

    #[test]
    fn default_noise_threshold_is_ten() {
        assert_eq!(DEFAULT_NOISE_THRESHOLD, 10);
    }
}
