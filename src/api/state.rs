/// Radio state shared by the central and the peripheral manager.
///
/// Every state other than `PoweredOn` makes radio operations meaningless; the
/// driver rejects requests issued in them with a failure event.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ManagerState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl ManagerState {
    pub fn is_powered_on(self) -> bool {
        self == ManagerState::PoweredOn
    }

    /// `unknown -> resetting -> {unsupported | unauthorized | poweredOff | poweredOn}`,
    /// `poweredOn <-> poweredOff`, and a powered radio may go back to resetting.
    pub fn can_transition_to(self, next: ManagerState) -> bool {
        use ManagerState::*;
        match (self, next) {
            (Unknown, Resetting) => true,
            (Resetting, Unsupported | Unauthorized | PoweredOff | PoweredOn) => true,
            (PoweredOn, PoweredOff) | (PoweredOff, PoweredOn) => true,
            (PoweredOn | PoweredOff, Resetting) => true,
            _ => false,
        }
    }
}

/// Link state of a remote peripheral.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_state_machine() {
        use ManagerState::*;
        assert!(Unknown.can_transition_to(Resetting));
        assert!(!Unknown.can_transition_to(PoweredOn));
        assert!(Resetting.can_transition_to(Unauthorized));
        assert!(PoweredOn.can_transition_to(PoweredOff));
        assert!(PoweredOff.can_transition_to(PoweredOn));
        assert!(!Unsupported.can_transition_to(PoweredOn));
        assert!(!PoweredOn.can_transition_to(PoweredOn));
    }

    #[test]
    fn link_loss_skips_disconnecting() {
        use ConnectionState::*;
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnecting.can_transition_to(Connected));
    }
}
