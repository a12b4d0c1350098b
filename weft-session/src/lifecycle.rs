//! Session lifecycle state machine

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Handshaking,
    Active,
    Disconnected,
    Expired,
    Closed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 5] = [
        LifecycleState::Handshaking,
        LifecycleState::Active,
        LifecycleState::Disconnected,
        LifecycleState::Expired,
        LifecycleState::Closed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Expired | LifecycleState::Closed)
    }

    /// Whether a client may reattach to a session in this state.
    pub fn is_resumable(self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    HandshakeCompleted,
    /// Transport ended without a close request.
    TransportLost,
    Reattached,
    LifetimeElapsed,
    /// Explicit close from either side, or a fatal internal error.
    CloseRequested,
}

/// Next state, or `None` if `event` is not allowed in `state`.
pub fn transition(state: LifecycleState, event: LifecycleEvent) -> Option<LifecycleState> {
    use LifecycleEvent::*;
    use LifecycleState::*;

    match (state, event) {
        (Handshaking, HandshakeCompleted) => Some(Active),
        (Active, TransportLost) => Some(Disconnected),
        // a client may reconnect before the old socket is noticed dead
        (Active | Disconnected, Reattached) => Some(Active),
        (Disconnected, LifetimeElapsed) => Some(Expired),
        (Handshaking | Active | Disconnected, CloseRequested) => Some(Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleEvent::*;
    use LifecycleState::*;

    #[test]
    fn test_reconnect_path() {
        let state = transition(Handshaking, HandshakeCompleted).unwrap();
        let state = transition(state, TransportLost).unwrap();
        assert_eq!(state, Disconnected);
        assert_eq!(transition(state, Reattached), Some(Active));
        assert_eq!(transition(state, LifetimeElapsed), Some(Expired));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in [Expired, Closed] {
            assert!(state.is_terminal());
            for event in [HandshakeCompleted, TransportLost, Reattached, LifetimeElapsed, CloseRequested] {
                assert_eq!(transition(state, event), None);
            }
        }
    }

    #[test]
    fn test_active_sessions_do_not_expire() {
        assert_eq!(transition(Active, LifetimeElapsed), None);
        assert_eq!(transition(Active, CloseRequested), Some(Closed));
    }
}
