//! Capture backends with platform-specific implementations.
//!
//! Each backend fulfils the same contract: enumerate monitors (virtual
//! monitor first), grab an arbitrary rectangle as BGRA pixels, release
//! native handles on close. The facade holds one [`PlatformBackend`]
//! variant and dispatches exhaustively.

#[cfg(target_os = "linux")]
pub(crate) mod linux;
#[cfg(target_os = "macos")]
pub(crate) mod macos;
#[cfg(target_os = "windows")]
pub(crate) mod windows;

use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::options::CaptureOptions;
use crate::screenshot::Screenshot;

#[cfg(target_os = "linux")]
use crate::options::LinuxBackend;

/// Contract every capture backend implements.
pub(crate) trait Backend {
    /// Ordered monitor list with the virtual monitor at index 0. Cached
    /// after the first enumeration for the life of the session.
    fn monitors(&mut self) -> Result<&[Monitor]>;

    /// Grabs `region`, which may be any rectangle, not necessarily a
    /// reported monitor. Off-screen pixels are whatever the OS fills in.
    fn grab(&mut self, region: Monitor) -> Result<Screenshot>;

    /// Releases native handles in reverse acquisition order. Idempotent.
    fn close(&mut self);
}

/// Closed variant over the compiled-in backend implementations.
pub(crate) enum PlatformBackend {
    #[cfg(target_os = "linux")]
    XcbShm(linux::xcb_shm::XcbShmBackend),
    #[cfg(target_os = "linux")]
    Xcb(linux::xcb::XcbBackend),
    #[cfg(target_os = "linux")]
    Xlib(linux::xlib::XlibBackend),
    #[cfg(target_os = "macos")]
    Quartz(macos::QuartzBackend),
    #[cfg(target_os = "windows")]
    Gdi(windows::GdiBackend),
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    Unsupported(std::convert::Infallible),
}

impl PlatformBackend {
    /// Constructs the backend matching the host OS and the options.
    pub(crate) fn open(options: &CaptureOptions) -> Result<PlatformBackend> {
        options.validate()?;

        #[cfg(target_os = "linux")]
        {
            let display = linux::resolve_display(options);
            return Ok(match options.backend {
                LinuxBackend::Default | LinuxBackend::XShmGetImage => PlatformBackend::XcbShm(
                    linux::xcb_shm::XcbShmBackend::open(display.as_deref(), options.with_cursor)?,
                ),
                LinuxBackend::XGetImage => PlatformBackend::Xcb(linux::xcb::XcbBackend::open(
                    display.as_deref(),
                    options.with_cursor,
                )?),
                LinuxBackend::Xlib => PlatformBackend::Xlib(linux::xlib::XlibBackend::open(
                    display.as_deref(),
                    options.with_cursor,
                )?),
            });
        }

        #[cfg(target_os = "macos")]
        {
            return Ok(PlatformBackend::Quartz(macos::QuartzBackend::open(
                options.max_displays,
                options.with_cursor,
            )?));
        }

        #[cfg(target_os = "windows")]
        {
            return Ok(PlatformBackend::Gdi(windows::GdiBackend::open()?));
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            let _ = options;
            Err(Error::DisplayUnavailable(
                "no capture backend for this platform".into(),
            ))
        }
    }
}

impl Backend for PlatformBackend {
    fn monitors(&mut self) -> Result<&[Monitor]> {
        match self {
            #[cfg(target_os = "linux")]
            PlatformBackend::XcbShm(b) => b.monitors(),
            #[cfg(target_os = "linux")]
            PlatformBackend::Xcb(b) => b.monitors(),
            #[cfg(target_os = "linux")]
            PlatformBackend::Xlib(b) => b.monitors(),
            #[cfg(target_os = "macos")]
            PlatformBackend::Quartz(b) => b.monitors(),
            #[cfg(target_os = "windows")]
            PlatformBackend::Gdi(b) => b.monitors(),
            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
            PlatformBackend::Unsupported(never) => match *never {},
        }
    }

    fn grab(&mut self, region: Monitor) -> Result<Screenshot> {
        check_region(&region)?;
        match self {
            #[cfg(target_os = "linux")]
            PlatformBackend::XcbShm(b) => b.grab(region),
            #[cfg(target_os = "linux")]
            PlatformBackend::Xcb(b) => b.grab(region),
            #[cfg(target_os = "linux")]
            PlatformBackend::Xlib(b) => b.grab(region),
            #[cfg(target_os = "macos")]
            PlatformBackend::Quartz(b) => b.grab(region),
            #[cfg(target_os = "windows")]
            PlatformBackend::Gdi(b) => b.grab(region),
            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
            PlatformBackend::Unsupported(never) => match *never {},
        }
    }

    fn close(&mut self) {
        match self {
            #[cfg(target_os = "linux")]
            PlatformBackend::XcbShm(b) => b.close(),
            #[cfg(target_os = "linux")]
            PlatformBackend::Xcb(b) => b.close(),
            #[cfg(target_os = "linux")]
            PlatformBackend::Xlib(b) => b.close(),
            #[cfg(target_os = "macos")]
            PlatformBackend::Quartz(b) => b.close(),
            #[cfg(target_os = "windows")]
            PlatformBackend::Gdi(b) => b.close(),
            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
            PlatformBackend::Unsupported(never) => match *never {},
        }
    }
}

/// Shared edge-case policy: zero-area rectangles are the caller's fault.
pub(crate) fn check_region(region: &Monitor) -> Result<()> {
    if region.width == 0 || region.height == 0 {
        return Err(Error::InvalidArgument(format!(
            "cannot capture a zero-area region ({}x{} at {},{})",
            region.width, region.height, region.left, region.top
        )));
    }
    Ok(())
}
