//! Close-code taxonomy for the realtime socket.
//!
//! The server (or the transport layer itself) closes connections with a small
//! fixed set of codes. Codes are classified into [`CloseCategory`] buckets
//! purely for observability; the only code that changes behavior is
//! [`CloseCode::Unauthorized`], which suppresses automatic reconnection and
//! leaves re-authentication to the host application.

use std::fmt;

/// Wire value for a protocol-error close.
pub const CODE_PROTOCOL_ERROR: u16 = 1002;
/// Wire value for an internal-server-error close.
pub const CODE_INTERNAL_ERROR: u16 = 1011;
/// Wire value for a TLS-handshake-failure close.
pub const CODE_TLS_HANDSHAKE_FAILURE: u16 = 1015;
/// Wire value for a heartbeat/idle-timeout close.
pub const CODE_TIMEOUT: u16 = 3008;
/// Wire value for an unauthorized close.
pub const CODE_UNAUTHORIZED: u16 = 3401;
/// Wire value for a bad-gateway close.
pub const CODE_BAD_GATEWAY: u16 = 3502;

/// Known close codes for the realtime socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// TLS handshake never completed.
    TlsHandshakeFailure,
    /// The connection idled past the heartbeat window.
    Timeout,
    /// A malformed frame or protocol violation.
    ProtocolError,
    /// The server hit an internal error.
    InternalError,
    /// The token was rejected. Non-retryable.
    Unauthorized,
    /// An upstream hop failed.
    BadGateway,
    /// Any code outside the known set.
    Unknown(u16),
}

/// Observability bucket for a close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCategory {
    /// Client-side or on-path network failure.
    NetworkError,
    /// The server or an upstream dependency failed.
    ServerError,
    /// Anything else.
    Unknown,
}

impl CloseCode {
    /// Map a wire close code to the known set.
    #[must_use]
    pub fn from_u16(code: u16) -> Self {
        match code {
            CODE_TLS_HANDSHAKE_FAILURE => Self::TlsHandshakeFailure,
            CODE_TIMEOUT => Self::Timeout,
            CODE_PROTOCOL_ERROR => Self::ProtocolError,
            CODE_INTERNAL_ERROR => Self::InternalError,
            CODE_UNAUTHORIZED => Self::Unauthorized,
            CODE_BAD_GATEWAY => Self::BadGateway,
            other => Self::Unknown(other),
        }
    }

    /// The wire value for this code.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::TlsHandshakeFailure => CODE_TLS_HANDSHAKE_FAILURE,
            Self::Timeout => CODE_TIMEOUT,
            Self::ProtocolError => CODE_PROTOCOL_ERROR,
            Self::InternalError => CODE_INTERNAL_ERROR,
            Self::Unauthorized => CODE_UNAUTHORIZED,
            Self::BadGateway => CODE_BAD_GATEWAY,
            Self::Unknown(other) => other,
        }
    }

    /// Telemetry bucket for this code.
    #[must_use]
    pub fn category(self) -> CloseCategory {
        match self {
            Self::TlsHandshakeFailure | Self::Timeout | Self::ProtocolError => {
                CloseCategory::NetworkError
            }
            Self::InternalError | Self::BadGateway => CloseCategory::ServerError,
            Self::Unauthorized | Self::Unknown(_) => CloseCategory::Unknown,
        }
    }

    /// Whether this code must suppress automatic reconnection.
    #[must_use]
    pub fn is_unauthorized(self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl CloseCategory {
    /// Label used for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }
}

/// Why a connection closed: the wire code plus any detail the transport had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close code, mapped to the known set.
    pub code: CloseCode,
    /// Free-form detail (server reason text or local error description).
    pub detail: Option<String>,
}

impl CloseReason {
    /// Build a reason from a wire close code and optional reason text.
    #[must_use]
    pub fn from_wire(code: u16, detail: Option<String>) -> Self {
        Self {
            code: CloseCode::from_u16(code),
            detail,
        }
    }

    /// A reason for a connection that dropped without any close frame.
    #[must_use]
    pub fn stream_ended() -> Self {
        Self {
            code: CloseCode::Unknown(0),
            detail: Some("stream ended without close frame".into()),
        }
    }

    /// A reason synthesized when the heartbeat window expires locally.
    #[must_use]
    pub fn heartbeat_timeout() -> Self {
        Self {
            code: CloseCode::Timeout,
            detail: Some("no traffic within heartbeat window".into()),
        }
    }

    /// A reason synthesized from a failed connection attempt.
    #[must_use]
    pub fn connect_failure(detail: impl Into<String>) -> Self {
        Self {
            code: CloseCode::Unknown(0),
            detail: Some(detail.into()),
        }
    }

    /// A reason for a handshake rejected with an auth-related HTTP status.
    #[must_use]
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            code: CloseCode::Unauthorized,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.code, self.code.as_u16())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_codes() {
        for code in [
            CODE_TLS_HANDSHAKE_FAILURE,
            CODE_TIMEOUT,
            CODE_PROTOCOL_ERROR,
        ] {
            assert_eq!(
                CloseCode::from_u16(code).category(),
                CloseCategory::NetworkError
            );
        }
    }

    #[test]
    fn server_error_codes() {
        for code in [CODE_INTERNAL_ERROR, CODE_BAD_GATEWAY] {
            assert_eq!(
                CloseCode::from_u16(code).category(),
                CloseCategory::ServerError
            );
        }
    }

    #[test]
    fn unrecognized_codes_land_in_unknown() {
        let code = CloseCode::from_u16(4444);
        assert_eq!(code, CloseCode::Unknown(4444));
        assert_eq!(code.category(), CloseCategory::Unknown);
        assert_eq!(code.as_u16(), 4444);
    }

    #[test]
    fn only_unauthorized_suppresses_reconnect() {
        for code in [
            CODE_TLS_HANDSHAKE_FAILURE,
            CODE_TIMEOUT,
            CODE_PROTOCOL_ERROR,
            CODE_INTERNAL_ERROR,
            CODE_BAD_GATEWAY,
            4444,
        ] {
            assert!(!CloseCode::from_u16(code).is_unauthorized());
        }
        assert!(CloseCode::from_u16(CODE_UNAUTHORIZED).is_unauthorized());
    }

    #[test]
    fn wire_roundtrip() {
        for code in [
            CODE_TLS_HANDSHAKE_FAILURE,
            CODE_TIMEOUT,
            CODE_PROTOCOL_ERROR,
            CODE_INTERNAL_ERROR,
            CODE_UNAUTHORIZED,
            CODE_BAD_GATEWAY,
        ] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn display_includes_detail() {
        let reason = CloseReason::from_wire(CODE_UNAUTHORIZED, Some("token expired".into()));
        let text = reason.to_string();
        assert!(text.contains("Unauthorized"));
        assert!(text.contains("token expired"));
    }
}
