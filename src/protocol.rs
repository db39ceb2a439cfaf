//! Session protocol identifiers for accepted connections.
//!
//! A connection starts as HTTP/1.1 (cleartext or TLS) and may upgrade to
//! HTTP/2 exactly once, when the peer's protocol settings are observed.

/// Protocol negotiated for a connection session.
///
/// The trailing `C` marks the cleartext variant; the bare form runs over
/// TLS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionProtocol {
    /// HTTP/1.1 over TLS.
    H1,
    /// HTTP/1.1 cleartext.
    H1C,
    /// HTTP/2 over TLS.
    H2,
    /// HTTP/2 cleartext.
    H2C,
}

impl SessionProtocol {
    /// Returns `true` when the session runs over TLS.
    #[must_use]
    pub const fn is_tls(self) -> bool { matches!(self, Self::H1 | Self::H2) }

    /// Returns `true` for the multiplexing HTTP/2 variants.
    #[must_use]
    pub const fn is_multiplex(self) -> bool { matches!(self, Self::H2 | Self::H2C) }

    /// The HTTP/2 protocol this HTTP/1.1 session upgrades to.
    ///
    /// Returns `None` when the session is already HTTP/2; upgrading is a
    /// one-way transition.
    #[must_use]
    pub const fn upgraded(self) -> Option<Self> {
        match self {
            Self::H1 => Some(Self::H2),
            Self::H1C => Some(Self::H2C),
            Self::H2 | Self::H2C => None,
        }
    }
}

impl std::fmt::Display for SessionProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1 => "h1",
            Self::H1C => "h1c",
            Self::H2 => "h2",
            Self::H2C => "h2c",
        })
    }
}
