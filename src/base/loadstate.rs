/// The current state of an upgrade-aware request.
/// Loosely follows net/base/load_states.h, restricted to the phases this
/// crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The request is idle.
    #[default]
    Idle,

    /// Resolving the HTTPS record for the request host.
    ResolvingHttpsRecord,

    /// Waiting for redirect sinks to confirm the upgrade.
    WaitingForRedirectConfirmation,

    /// Connecting to the host (TCP handshake).
    Connecting,

    /// A connection was handed to the caller.
    Connected,
}

impl LoadState {
    /// Returns true while the request still has work outstanding.
    pub fn is_active(self) -> bool {
        !matches!(self, LoadState::Idle | LoadState::Connected)
    }
}
