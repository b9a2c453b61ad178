use serde::Serialize;

/// Lifecycle of one client connection
///
/// ```text
/// Idle -> Connecting -> Active -> Closing -> Idle
///   \________\____________\_________\-------> Closed
/// ```
///
/// `Closed` is terminal: the connection has been removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum ConnectionState {
    /// No upstream session and none pending
    #[default]
    Idle,

    /// Upstream open in progress
    Connecting,

    /// Upstream session open and owned by the connection
    Active,

    /// Upstream session being torn down
    Closing,

    /// Transport disconnected
    Closed,
}

impl ConnectionState {
    /// Check if idle
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if an upstream open is pending
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Check if an upstream session is open
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the connection is gone
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// A session exists or is on its way
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    /// State name (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Active => "Active",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,

            (Idle, Connecting) => true,
            (Connecting, Active) | (Connecting, Idle) | (Connecting, Closing) => true,
            (Active, Closing) | (Active, Idle) => true,
            (Closing, Idle) => true,

            // Re-entering the same state is a no-op
            (a, b) if *a == b => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
