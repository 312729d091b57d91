//! Connection state transition table
//!
//! Every state change the session commits goes through [`next_state`].
//! Inputs that have no row in the table are rejected and leave the state
//! untouched.

use common::ConnectionState;
use std::fmt;

use ConnectionState::{Connected, ConnectionFailed, Disconnected, PermissionRequested};

/// Input driving a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The transport opened the device
    OpenSucceeded,
    /// The transport could not open the device
    OpenFailed,
    /// The host needs consent before the device can be opened
    PermissionNeeded,
    /// The user refused consent
    PermissionDenied,
    /// A device left the bus
    Detached,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::OpenSucceeded => "open-succeeded",
            Trigger::OpenFailed => "open-failed",
            Trigger::PermissionNeeded => "permission-needed",
            Trigger::PermissionDenied => "permission-denied",
            Trigger::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// (from, trigger, to)
pub const TRANSITIONS: &[(ConnectionState, Trigger, ConnectionState)] = &[
    (Disconnected, Trigger::OpenSucceeded, Connected),
    (Disconnected, Trigger::PermissionNeeded, PermissionRequested),
    (Disconnected, Trigger::OpenFailed, ConnectionFailed),
    (Disconnected, Trigger::Detached, Disconnected),
    (PermissionRequested, Trigger::OpenSucceeded, Connected),
    (PermissionRequested, Trigger::OpenFailed, ConnectionFailed),
    (PermissionRequested, Trigger::PermissionDenied, ConnectionFailed),
    // A different instance of the model needs consent; the old request is replaced
    (PermissionRequested, Trigger::PermissionNeeded, PermissionRequested),
    (PermissionRequested, Trigger::Detached, Disconnected),
    (Connected, Trigger::Detached, Disconnected),
    (ConnectionFailed, Trigger::OpenSucceeded, Connected),
    (ConnectionFailed, Trigger::PermissionNeeded, PermissionRequested),
    (ConnectionFailed, Trigger::OpenFailed, ConnectionFailed),
    (ConnectionFailed, Trigger::Detached, Disconnected),
];

/// Look up the state reached from `from` on `trigger`
pub fn next_state(from: ConnectionState, trigger: Trigger) -> Option<ConnectionState> {
    TRANSITIONS
        .iter()
        .find(|(state, input, _)| *state == from && *input == trigger)
        .map(|(_, _, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ConnectionState; 4] =
        [Disconnected, PermissionRequested, Connected, ConnectionFailed];

    #[test]
    fn test_detach_always_resets() {
        for state in ALL_STATES {
            assert_eq!(next_state(state, Trigger::Detached), Some(Disconnected));
        }
    }

    #[test]
    fn test_connect_paths() {
        assert_eq!(next_state(Disconnected, Trigger::OpenSucceeded), Some(Connected));
        assert_eq!(
            next_state(Disconnected, Trigger::PermissionNeeded),
            Some(PermissionRequested)
        );
        assert_eq!(
            next_state(PermissionRequested, Trigger::OpenSucceeded),
            Some(Connected)
        );
        assert_eq!(
            next_state(PermissionRequested, Trigger::PermissionDenied),
            Some(ConnectionFailed)
        );
        assert_eq!(
            next_state(PermissionRequested, Trigger::OpenFailed),
            Some(ConnectionFailed)
        );
    }

    #[test]
    fn test_failed_state_can_retry() {
        assert_eq!(next_state(ConnectionFailed, Trigger::OpenSucceeded), Some(Connected));
        assert_eq!(
            next_state(ConnectionFailed, Trigger::PermissionNeeded),
            Some(PermissionRequested)
        );
    }

    #[test]
    fn test_rejected_inputs() {
        // Permission decisions only make sense while a request is outstanding
        assert_eq!(next_state(Disconnected, Trigger::PermissionDenied), None);
        assert_eq!(next_state(Connected, Trigger::PermissionDenied), None);
        assert_eq!(next_state(ConnectionFailed, Trigger::PermissionDenied), None);

        // An open session is never reopened or failed by an open outcome
        assert_eq!(next_state(Connected, Trigger::OpenSucceeded), None);
        assert_eq!(next_state(Connected, Trigger::OpenFailed), None);
        assert_eq!(next_state(Connected, Trigger::PermissionNeeded), None);
    }

    #[test]
    fn test_table_has_no_duplicate_rows() {
        for (i, (from, trigger, _)) in TRANSITIONS.iter().enumerate() {
            let duplicates = TRANSITIONS[i + 1..]
                .iter()
                .filter(|(f, t, _)| f == from && t == trigger)
                .count();
            assert_eq!(duplicates, 0, "duplicate row for {} on {}", from, trigger);
        }
    }
}
