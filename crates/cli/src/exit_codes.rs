//! CLI Exit Code Registry
//!
//! Single source of truth for `mend` exit codes. Scripts that loop
//! `mend run` / `mend drive` rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 1    | General error (invariant violation, I/O, interrupted)     |
//! | 2    | Usage error (bad arguments, unreadable input file)        |
//! | 3    | Job file invalid, or store lacks a required capability    |
//! | 4    | Store unavailable (cannot open, cannot enumerate)         |
//! | 5    | Batch finished, but some candidates failed                |
//! | 6    | Migration already completed (`drive --fail-if-completed`) |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above

use mendkit_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing input file.
pub const EXIT_USAGE: u8 = 2;

/// Job file failed to parse or validate, or asks for a capability the store
/// does not have.
pub const EXIT_CONFIG_INVALID: u8 = 3;

/// The database could not be opened or enumerated.
pub const EXIT_STORE_UNAVAILABLE: u8 = 4;

/// The batch ran to the end but at least one candidate ended in `error`.
/// The report is still written.
pub const EXIT_CANDIDATE_ERRORS: u8 = 5;

/// `drive --fail-if-completed` on a migration that already finished.
pub const EXIT_ALREADY_COMPLETED: u8 = 6;

/// Map a run-level library error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::MissingCapability { .. } => EXIT_CONFIG_INVALID,
        ReconError::SourceUnavailable { .. } => EXIT_STORE_UNAVAILABLE,
        ReconError::InvariantViolation(_) | ReconError::Interrupted(_) => EXIT_ERROR,
    }
}
