//! Capture configuration passed to [`crate::Session::open`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options recognised when opening a capture session.
///
/// Platform-specific fields are silently ignored on other platforms, so a
/// single options value can be built once and used everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// PNG compression strength used by the encoder, 0..=9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// X server display name, e.g. `":0.0"` (Linux only). When absent the
    /// ambient `DISPLAY` environment variable is used.
    #[serde(default)]
    pub display: Option<String>,
    /// Maximum number of physical displays to enumerate (macOS only).
    #[serde(default = "default_max_displays")]
    pub max_displays: u32,
    /// Include the mouse cursor in captures where the platform supports
    /// cursor compositing; a silent no-op elsewhere.
    #[serde(default)]
    pub with_cursor: bool,
    /// Capture backend to use (Linux only).
    #[serde(default)]
    pub backend: LinuxBackend,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
            display: None,
            max_displays: default_max_displays(),
            with_cursor: false,
            backend: LinuxBackend::default(),
        }
    }
}

impl CaptureOptions {
    /// Validates option values before a session is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(Error::InvalidArgument(format!(
                "compression level {} not in 0..=9",
                self.compression_level
            )));
        }
        if self.max_displays == 0 {
            return Err(Error::InvalidArgument(
                "max_displays must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Which Linux capture path to use. `Default` selects XCB with the MIT-SHM
/// fast path and automatic fallback to plain `GetImage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinuxBackend {
    #[default]
    Default,
    #[serde(rename = "xshmgetimage")]
    XShmGetImage,
    #[serde(rename = "xgetimage")]
    XGetImage,
    Xlib,
}

impl FromStr for LinuxBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(LinuxBackend::Default),
            "xshmgetimage" => Ok(LinuxBackend::XShmGetImage),
            "xgetimage" => Ok(LinuxBackend::XGetImage),
            "xlib" => Ok(LinuxBackend::Xlib),
            other => Err(Error::InvalidArgument(format!(
                "unknown backend {other:?}, expected default|xshmgetimage|xgetimage|xlib"
            ))),
        }
    }
}

fn default_compression_level() -> u32 {
    6
}

fn default_max_displays() -> u32 {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = CaptureOptions::default();
        assert_eq!(opts.compression_level, 6);
        assert_eq!(opts.max_displays, 32);
        assert!(!opts.with_cursor);
        assert!(opts.display.is_none());
        assert_eq!(opts.backend, LinuxBackend::Default);
        opts.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut opts = CaptureOptions {
            compression_level: 12,
            ..Default::default()
        };
        assert_eq!(
            opts.validate().unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
        opts.compression_level = 9;
        opts.max_displays = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn backend_parsing() {
        assert_eq!(
            "xshmgetimage".parse::<LinuxBackend>().unwrap(),
            LinuxBackend::XShmGetImage
        );
        assert_eq!(
            "XGetImage".parse::<LinuxBackend>().unwrap(),
            LinuxBackend::XGetImage
        );
        assert_eq!("xlib".parse::<LinuxBackend>().unwrap(), LinuxBackend::Xlib);
        assert_eq!(
            "default".parse::<LinuxBackend>().unwrap(),
            LinuxBackend::Default
        );
        assert!("wayland".parse::<LinuxBackend>().is_err());
    }
}
