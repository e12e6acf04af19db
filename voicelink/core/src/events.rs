//! Transport Events
//!
//! Everything the transport can report to the engine. The transport is a
//! "dumb" pipe: it opens the socket, detects frame boundaries and forwards
//! what happened, one event at a time. The engine decides what it means.

/// Events from the transport to the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection to the service was established
    Connected,

    /// The connection was lost or closed
    Disconnected,

    /// A text frame arrived
    Text(String),

    /// A binary frame arrived
    Binary(Vec<u8>),

    /// The transport hit an error; a `Disconnected` usually follows
    Error(String),
}

impl TransportEvent {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Error(_) => "error",
        }
    }
}
