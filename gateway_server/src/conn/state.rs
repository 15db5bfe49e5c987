//! Connection lifecycle state machine:
//! `Idle -> Connecting -> Connected -> Disconnecting -> Idle`. Replaces
//! the source's `callback_trigger` boolean invariant — whether the
//! connected callback has fired without a matching disconnected
//! callback is now just `state == Connected`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnState::Connected)
    }
}
