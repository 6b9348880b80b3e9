//! Library error type and its condition taxonomy.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The single structured error type returned by every fallible operation.
///
/// Native-call failures are trapped at the backend boundary and surfaced
/// here with the failing call name and the OS error code, so callers can
/// branch on precise conditions instead of parsing strings.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller passed a bad value (compression level out of range,
    /// zero-sized region, unknown monitor index, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The display server cannot be reached or no display is attached.
    #[error("display unavailable: {0}")]
    DisplayUnavailable(String),

    /// The server reports a pixel depth the library does not handle.
    #[error("unsupported pixel depth: {0} bpp")]
    UnsupportedDepth(u8),

    /// A native OS call reported failure.
    #[error("{call} failed{}: {detail}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    NativeCallFailed {
        /// Name of the OS call that failed, e.g. `"XGetImage"` or `"BitBlt"`.
        call: &'static str,
        /// OS error code when one is available (XError serial, `GetLastError`).
        code: Option<i64>,
        /// Human-readable description from the OS or the binding layer.
        detail: String,
    },

    /// The MIT-SHM probe failed; the XCB backend falls back to `GetImage`.
    #[error("MIT-SHM unavailable: {0}")]
    ShmUnavailable(String),

    /// Deflate or file I/O failure while producing a PNG.
    #[error("encoder error: {0}")]
    Encoder(#[from] std::io::Error),

    /// The session was closed; no further captures are possible.
    #[error("session is closed")]
    SessionClosed,
}

/// Discriminant-only view of [`Error`], handy for matching and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    DisplayUnavailable,
    UnsupportedDepth,
    NativeCallFailed,
    ShmUnavailable,
    Encoder,
    SessionClosed,
}

impl Error {
    /// Shorthand for a [`Error::NativeCallFailed`] without an OS code.
    pub(crate) fn native(call: &'static str, detail: impl Into<String>) -> Self {
        Error::NativeCallFailed {
            call,
            code: None,
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`Error::NativeCallFailed`] carrying an OS code.
    pub(crate) fn native_code(
        call: &'static str,
        code: i64,
        detail: impl Into<String>,
    ) -> Self {
        Error::NativeCallFailed {
            call,
            code: Some(code),
            detail: detail.into(),
        }
    }

    /// The condition kind carried by this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::DisplayUnavailable(_) => ErrorKind::DisplayUnavailable,
            Error::UnsupportedDepth(_) => ErrorKind::UnsupportedDepth,
            Error::NativeCallFailed { .. } => ErrorKind::NativeCallFailed,
            Error::ShmUnavailable(_) => ErrorKind::ShmUnavailable,
            Error::Encoder(_) => ErrorKind::Encoder,
            Error::SessionClosed => ErrorKind::SessionClosed,
        }
    }

    /// Whether the session is unusable after this error.
    ///
    /// Non-terminal errors leave the session consistent; the save
    /// orchestrator keeps iterating over the remaining monitors.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DisplayUnavailable | ErrorKind::UnsupportedDepth | ErrorKind::SessionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_call_message_includes_code() {
        let err = Error::native_code("BitBlt", 5, "access denied");
        assert_eq!(err.to_string(), "BitBlt failed (code 5): access denied");
        assert_eq!(err.kind(), ErrorKind::NativeCallFailed);
        assert!(!err.is_terminal());
    }

    #[test]
    fn terminal_kinds() {
        assert!(Error::SessionClosed.is_terminal());
        assert!(Error::DisplayUnavailable("no X server".into()).is_terminal());
        assert!(Error::UnsupportedDepth(16).is_terminal());
        assert!(!Error::ShmUnavailable("probe failed".into()).is_terminal());
        assert!(!Error::InvalidArgument("level 12".into()).is_terminal());
    }
}
