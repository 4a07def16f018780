//! Exit codes produced by generated wrappers and guest shells.

/// The pidfile lock could not be taken, or the record could not be written.
pub const PIDFILE_LOCK_FAILED: i32 = 122;
/// The pidfile lock could not be taken, or the record could not be removed.
pub const PIDFILE_UNLOCK_FAILED: i32 = 123;
/// The command did not finish in time.
pub const TIMEOUT: i32 = 124;
pub const PERMISSION_DENIED: i32 = 126;
pub const COMMAND_NOT_FOUND: i32 = 127;
/// Interrupted by `SIGINT`.
pub const INTERRUPTED: i32 = 130;
/// Interrupted by `SIGTERM`.
pub const TERMINATED: i32 = 143;

/// A short explanation of the well-known codes.
pub fn describe(code: i32) -> Option<&'static str> {
    match code {
        PIDFILE_LOCK_FAILED => Some("failed to record the running action in the pidfile"),
        PIDFILE_UNLOCK_FAILED => Some("failed to remove the pidfile record of the action"),
        TIMEOUT => Some("the command timed out"),
        PERMISSION_DENIED => Some("permission denied, the command is not executable"),
        COMMAND_NOT_FOUND => Some("command not found"),
        INTERRUPTED => Some("interrupted by SIGINT"),
        TERMINATED => Some("terminated by SIGTERM"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_codes() {
        assert_eq!(describe(127), Some("command not found"));
        assert!(describe(122).is_some());
        assert!(describe(0).is_none());
        assert!(describe(1).is_none());
    }
}
