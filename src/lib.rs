//! sct - cross-platform screen capture
//!
//! Captures raster screenshots of one or more physical displays through
//! the host's native readback primitives (XCB with MIT-SHM or `GetImage`,
//! legacy Xlib, Quartz on macOS, GDI on Windows) and encodes them as PNG
//! with a pure in-process encoder.
//!
//! ```no_run
//! let session = sct::open(sct::CaptureOptions::default())?;
//! for monitor in session.monitors()? {
//!     println!("{monitor}");
//! }
//! let shot = session.grab_monitor(1)?;
//! sct::png::save("monitor-1.png", shot.raw(), shot.size(), 6)?;
//! # Ok::<(), sct::Error>(())
//! ```

mod capture;
mod error;
mod monitor;
mod options;
pub mod png;
mod save;
mod screenshot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::capture::{Backend, PlatformBackend};

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::monitor::Monitor;
pub use crate::options::{CaptureOptions, LinuxBackend};
pub use crate::save::{Save, SaveOutput, SaveRequest};
pub use crate::screenshot::{ArrayInterface, Screenshot};

/// Opens a capture session with the given options.
pub fn open(options: CaptureOptions) -> Result<Session> {
    Session::open(options)
}

/// One capture session: owns the native handles and the monitor list for
/// its lifetime.
///
/// Calls on a single session are serialised by an internal lock, so a
/// session can be shared across threads; independent sessions capture
/// concurrently. Handles are released by [`Session::close`] (idempotent)
/// or on drop, whichever comes first.
pub struct Session {
    backend: Mutex<PlatformBackend>,
    closed: AtomicBool,
    compression_level: u32,
}

impl Session {
    /// Validates `options`, picks the backend for the host OS and opens
    /// the native display handles.
    pub fn open(options: CaptureOptions) -> Result<Session> {
        let backend = PlatformBackend::open(&options)?;
        debug!(level = options.compression_level, "session opened");
        Ok(Session {
            backend: Mutex::new(backend),
            closed: AtomicBool::new(false),
            compression_level: options.compression_level,
        })
    }

    /// The ordered monitor list: index 0 is the virtual monitor (bounding
    /// box of all physical monitors), indices 1.. are physical monitors in
    /// OS-reported order.
    pub fn monitors(&self) -> Result<Vec<Monitor>> {
        let mut backend = self.lock()?;
        Ok(backend.monitors()?.to_vec())
    }

    /// Captures an arbitrary rectangle in global coordinates.
    ///
    /// The rectangle does not have to match a monitor; pixels outside
    /// every display are filled by the OS (typically black). Zero-area
    /// rectangles fail with `InvalidArgument`.
    pub fn grab(&self, region: Monitor) -> Result<Screenshot> {
        let mut backend = self.lock()?;
        backend.grab(region)
    }

    /// Captures monitor `index` as reported by [`Session::monitors`].
    /// Index 0 is the virtual monitor spanning all displays.
    pub fn grab_monitor(&self, index: usize) -> Result<Screenshot> {
        let mut backend = self.lock()?;
        let monitors = backend.monitors()?;
        let region = *monitors.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "monitor {index} does not exist ({} available)",
                monitors.len()
            ))
        })?;
        backend.grab(region)
    }

    /// PNG compression level this session was opened with.
    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// Runs captures for `request` and writes PNG files, yielding each
    /// resolved path (or in-memory PNG in no-file mode) lazily.
    pub fn save(&self, request: SaveRequest) -> Save<'_> {
        Save::new(self, request, None)
    }

    /// Like [`Session::save`], invoking `callback` with each resolved path
    /// right before the file is written.
    pub fn save_with<'a, F>(&'a self, request: SaveRequest, callback: F) -> Save<'a>
    where
        F: FnMut(&std::path::Path) + 'a,
    {
        Save::new(self, request, Some(Box::new(callback)))
    }

    /// Forces scaled (Retina) capture on macOS; a no-op elsewhere.
    pub fn set_scaled_capture(&self, scaled: bool) -> Result<()> {
        let mut backend = self.lock()?;
        #[cfg(target_os = "macos")]
        match &mut *backend {
            PlatformBackend::Quartz(quartz) => quartz.set_scaled_capture(scaled),
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = (scaled, &mut backend);
        }
        Ok(())
    }

    /// Releases every native handle. Safe to call more than once; further
    /// captures fail with `SessionClosed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut backend) = self.backend.lock() {
            backend.close();
        }
        debug!("session closed");
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PlatformBackend>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.backend
            .lock()
            .map_err(|_| Error::native("session lock", "a capture thread panicked"))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn session_is_shareable() {
        assert_send_sync::<Session>();
    }

    #[cfg(target_os = "linux")]
    fn session() -> Option<Session> {
        if std::env::var("DISPLAY").is_err() {
            return None;
        }
        Session::open(CaptureOptions::default()).ok()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn close_twice_then_grab_fails() {
        let Some(session) = session() else { return };
        session.close();
        session.close();
        let err = session.grab(Monitor::new(0, 0, 8, 8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
        assert_eq!(session.monitors().unwrap_err().kind(), ErrorKind::SessionClosed);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn grab_monitor_checks_index() {
        let Some(session) = session() else { return };
        let count = session.monitors().unwrap().len();
        let err = session.grab_monitor(count + 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn independent_sessions_capture_concurrently() {
        if std::env::var("DISPLAY").is_err() {
            return;
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let session = Session::open(CaptureOptions::default()).unwrap();
                    session.grab(Monitor::new(0, 0, 32, 32)).unwrap()
                })
            })
            .collect();
        for handle in handles {
            let shot = handle.join().unwrap();
            assert_eq!(shot.raw().len(), 32 * 32 * 4);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn all_linux_backends_honour_the_contract() {
        if std::env::var("DISPLAY").is_err() {
            return;
        }
        for backend in [
            LinuxBackend::Default,
            LinuxBackend::XShmGetImage,
            LinuxBackend::XGetImage,
            LinuxBackend::Xlib,
        ] {
            let session = Session::open(CaptureOptions {
                backend,
                ..Default::default()
            })
            .unwrap();
            let monitors = session.monitors().unwrap();
            assert!(monitors.len() >= 2, "{backend:?}");
            let shot = session.grab(Monitor::new(10, 20, 100, 50)).unwrap();
            assert_eq!(shot.raw().len(), 100 * 50 * 4, "{backend:?}");
            assert_eq!(shot.pos(), (10, 20));
        }
    }
}
