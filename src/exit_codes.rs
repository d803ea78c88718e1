//! Exit code constants for the planrun CLI.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Run completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `VALIDATION` | Malformed plan file or duplicate plan id |
//! | 9 | `LOCK_HELD` | Another process holds the workspace lock |
//! | 70 | `EXECUTOR_FAILURE` | Run reached a terminal failed state |

/// Type-safe exit codes. The numeric values are part of the public CLI
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Run completed successfully.
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// General/internal failure.
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Invalid CLI arguments or configuration.
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Malformed plan file, duplicate plan id, or unresolvable plan.
    pub const VALIDATION: ExitCode = ExitCode(3);

    /// Another process holds the workspace lock.
    pub const LOCK_HELD: ExitCode = ExitCode(9);

    /// The run ended in a terminal failed state.
    pub const EXECUTOR_FAILURE: ExitCode = ExitCode(70);

    /// Numeric value for `std::process::exit()`.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_values_are_stable() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::INTERNAL.as_i32(), 1);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::VALIDATION.as_i32(), 3);
        assert_eq!(ExitCode::LOCK_HELD.as_i32(), 9);
        assert_eq!(ExitCode::EXECUTOR_FAILURE.as_i32(), 70);
    }

    #[test]
    fn round_trips_through_i32() {
        assert_eq!(ExitCode::from_i32(9), ExitCode::LOCK_HELD);
        assert_eq!(ExitCode::from(70), ExitCode::EXECUTOR_FAILURE);
    }
}
