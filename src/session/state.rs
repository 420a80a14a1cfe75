//! Session lifecycle transitions
//!
//! Pure function of (state, input, policy). The driver feeds it and carries
//! out the returned action; nothing here touches the transport.

use crate::types::{ConnectionType, SessionState};

/// Inputs that can move a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    OpenRequested,
    CloseRequested,
    Connected,
    ConnectionFailed,
    Disconnected,
    AdvertisementSeen,
}

/// Transport call the driver must make after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Connect,
    Disconnect,
}

/// Reconnection policy applied to transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub automatic_reconnection: bool,
    pub connection_type: ConnectionType,
}

/// Result of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub action: Option<SessionAction>,
}

/// Next state for `input`, or `None` when the input is ignored in `state`.
pub fn transition(state: SessionState, input: SessionInput, policy: Policy) -> Option<Transition> {
    use SessionAction::*;
    use SessionInput::*;
    use SessionState::*;

    let lost = if policy.automatic_reconnection { OpenPark } else { Closed };
    let to = |next, action| Some(Transition { next, action });

    match (state, input) {
        (Closed, OpenRequested) => match policy.connection_type {
            ConnectionType::Direct => to(Opening, Some(Connect)),
            ConnectionType::OnAdvertisement => to(OpenPark, None),
        },
        (OpenPark, AdvertisementSeen) => to(Opening, Some(Connect)),
        (OpenPark, CloseRequested) => to(Closed, None),
        (Opening, Connected) => to(Open, None),
        (Opening, ConnectionFailed | Disconnected) => to(lost, None),
        (Open, Disconnected) => to(lost, None),
        (Opening | Open, CloseRequested) => to(Closing, Some(Disconnect)),
        // A connect that completes after close was requested is torn down again
        (Closing, Connected) => to(Closing, Some(Disconnect)),
        (Closing, Disconnected | ConnectionFailed) => to(Closed, None),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionInput::*;
    use SessionState::*;

    const RECONNECT: Policy = Policy { automatic_reconnection: true, connection_type: ConnectionType::Direct };
    const NO_RECONNECT: Policy = Policy { automatic_reconnection: false, connection_type: ConnectionType::Direct };

    fn next(state: SessionState, input: SessionInput, policy: Policy) -> Option<SessionState> {
        transition(state, input, policy).map(|t| t.next)
    }

    #[test]
    fn direct_open_connects() {
        let t = transition(Closed, OpenRequested, RECONNECT).unwrap();
        assert_eq!(t, Transition { next: Opening, action: Some(SessionAction::Connect) });
        assert_eq!(next(Opening, Connected, RECONNECT), Some(Open));
    }

    #[test]
    fn advertisement_open_parks_first() {
        let policy = Policy { automatic_reconnection: false, connection_type: ConnectionType::OnAdvertisement };
        assert_eq!(transition(Closed, OpenRequested, policy), Some(Transition { next: OpenPark, action: None }));
        assert_eq!(
            transition(OpenPark, AdvertisementSeen, policy),
            Some(Transition { next: Opening, action: Some(SessionAction::Connect) })
        );
    }

    #[test]
    fn link_loss_follows_reconnection_policy() {
        assert_eq!(next(Open, Disconnected, RECONNECT), Some(OpenPark));
        assert_eq!(next(Open, Disconnected, NO_RECONNECT), Some(Closed));
        assert_eq!(next(Opening, ConnectionFailed, RECONNECT), Some(OpenPark));
        assert_eq!(next(Opening, ConnectionFailed, NO_RECONNECT), Some(Closed));
    }

    #[test]
    fn explicit_close_never_parks() {
        let t = transition(Open, CloseRequested, RECONNECT).unwrap();
        assert_eq!(t, Transition { next: Closing, action: Some(SessionAction::Disconnect) });
        assert_eq!(next(Closing, Disconnected, RECONNECT), Some(Closed));
        assert_eq!(next(OpenPark, CloseRequested, RECONNECT), Some(Closed));
        assert_eq!(
            transition(Closing, Connected, RECONNECT).unwrap().action,
            Some(SessionAction::Disconnect)
        );
    }

    #[test]
    fn irrelevant_inputs_are_ignored() {
        assert_eq!(next(Closed, Disconnected, RECONNECT), None);
        assert_eq!(next(Closed, AdvertisementSeen, RECONNECT), None);
        assert_eq!(next(Open, OpenRequested, RECONNECT), None);
        assert_eq!(next(Open, AdvertisementSeen, RECONNECT), None);
        assert_eq!(next(Closed, CloseRequested, RECONNECT), None);
    }
}
