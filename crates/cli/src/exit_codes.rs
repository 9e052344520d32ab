//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `sfill` exit codes.
//! Exit codes are part of the shell contract: schedulers and scripts rely
//! on them.
//!
//! | Code | Meaning                                                    |
//! |------|------------------------------------------------------------|
//! | 0    | Success                                                    |
//! | 1    | General error (unspecified)                                |
//! | 2    | Usage error (bad arguments)                                |
//! | 3    | Invalid configuration                                      |
//! | 4    | I/O or decode error reading targets or datasets            |
//! | 5    | One or more patches failed to apply                        |
//! | 6    | `--strict` and the run left LOW-tier or unmatched sources  |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config could not be parsed or failed validation, or names an unknown
/// dataset.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Target snapshot or dataset file unreadable or malformed; output file
/// not writable.
pub const EXIT_IO: u8 = 4;

/// The run completed but at least one patch was not applied.
pub const EXIT_PATCH_FAILURES: u8 = 5;

/// `--strict` only: some matches are LOW tier or some sources stayed
/// unmatched.
pub const EXIT_STRICT_UNRESOLVED: u8 = 6;

/// Map a linkage error onto its exit code.
pub fn linkage_exit_code(err: &solarfill_linkage::LinkageError) -> u8 {
    use solarfill_linkage::LinkageError;
    match err {
        LinkageError::ConfigParse(_)
        | LinkageError::ConfigValidation(_)
        | LinkageError::UnknownDataset(_) => EXIT_INVALID_CONFIG,
        LinkageError::MissingColumn { .. } | LinkageError::Decode { .. } | LinkageError::Io(_) => {
            EXIT_IO
        }
    }
}
