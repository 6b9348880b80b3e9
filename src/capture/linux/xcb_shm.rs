//! Default Linux backend: XCB with the MIT-SHM zero-copy fast path.
//!
//! A SysV shared-memory segment is attached to the X server once and
//! reused across captures; the server writes pixels straight into it and
//! only one copy is made into the returned screenshot. When MIT-SHM is
//! missing or any SHM call fails at runtime, the backend falls back to
//! plain `GetImage` for the rest of the session and records the reason.

use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::shm;
use x11rb::protocol::xproto::ImageFormat;
use x11rb::rust_connection::RustConnection;

use super::CursorCompositor;
use crate::capture::Backend;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::screenshot::Screenshot;

/// Outcome of the MIT-SHM availability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShmProbe {
    /// Not probed yet.
    #[allow(dead_code)]
    Unknown,
    /// Extension negotiated; the fast path is in use.
    Available,
    /// Probe or a later SHM call failed; `GetImage` is used instead.
    Unavailable(String),
}

/// An attached SysV segment. The id is marked `IPC_RMID` right after
/// attach, so the segment disappears once both sides detach.
struct ShmSegment {
    seg: shm::Seg,
    ptr: *mut u8,
    size: usize,
}

pub(crate) struct XcbShmBackend {
    conn: Option<RustConnection>,
    screen_num: usize,
    root: u32,
    cursor: CursorCompositor,
    monitors: Option<Vec<Monitor>>,
    segment: Option<ShmSegment>,
    probe: ShmProbe,
}

// The raw segment pointer is only dereferenced behind &mut self, and the
// session facade serialises all access.
unsafe impl Send for XcbShmBackend {}

impl XcbShmBackend {
    pub(crate) fn open(display: Option<&str>, with_cursor: bool) -> Result<XcbShmBackend> {
        let (conn, screen_num) = super::connect(display)?;
        let root = conn.setup().roots[screen_num].root;
        let cursor = CursorCompositor::probe(&conn, with_cursor);

        let probe = match shm::query_version(&conn)
            .map_err(|e| e.to_string())
            .and_then(|cookie| cookie.reply().map_err(|e| e.to_string()))
        {
            Ok(_) => ShmProbe::Available,
            Err(reason) => {
                warn!(%reason, "MIT-SHM probe failed, using GetImage");
                ShmProbe::Unavailable(reason)
            }
        };

        let mut backend = XcbShmBackend {
            conn: Some(conn),
            screen_num,
            root,
            cursor,
            monitors: None,
            segment: None,
            probe,
        };

        // Size the segment for the largest possible on-screen grab up
        // front; arbitrary bigger regions grow it on demand.
        if backend.probe == ShmProbe::Available {
            let virt = backend.monitors().ok().and_then(|m| m.first().copied());
            if let Some(virt) = virt {
                let bytes = virt.area() as usize * 4;
                let conn = backend.conn.as_ref().ok_or(Error::SessionClosed)?;
                if let Err(e) = Self::ensure_capacity(conn, &mut backend.segment, bytes) {
                    backend.disable_shm(e.to_string());
                }
            }
        }

        debug!(screen_num, probe = ?backend.probe, "XCB SHM backend ready");
        Ok(backend)
    }

    /// Current probe state, including the recorded fallback reason.
    #[allow(dead_code)]
    pub(crate) fn shm_state(&self) -> &ShmProbe {
        &self.probe
    }

    fn conn(&self) -> Result<&RustConnection> {
        self.conn.as_ref().ok_or(Error::SessionClosed)
    }

    /// Creates or grows the shared segment so it can hold `bytes`.
    fn ensure_capacity(
        conn: &RustConnection,
        segment: &mut Option<ShmSegment>,
        bytes: usize,
    ) -> Result<()> {
        if segment.as_ref().is_some_and(|s| s.size >= bytes) {
            return Ok(());
        }
        Self::release_segment(conn, segment);

        let shm_id = unsafe { libc::shmget(libc::IPC_PRIVATE, bytes, libc::IPC_CREAT | 0o600) };
        if shm_id < 0 {
            return Err(Error::ShmUnavailable(format!(
                "shmget failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let ptr = unsafe { libc::shmat(shm_id, std::ptr::null(), 0) };
        if ptr == usize::MAX as *mut libc::c_void {
            unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };
            return Err(Error::ShmUnavailable(format!(
                "shmat failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        // Mark for removal now so the segment cannot outlive its users.
        unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };

        let seg = conn
            .generate_id()
            .map_err(|e| Error::ShmUnavailable(format!("cannot allocate XID: {e}")))?;
        let attach = shm::attach(conn, seg, shm_id as u32, false)
            .map_err(|e| e.to_string())
            .and_then(|cookie| cookie.check().map_err(|e| e.to_string()));
        if let Err(reason) = attach {
            unsafe { libc::shmdt(ptr) };
            return Err(Error::ShmUnavailable(format!("ShmAttach failed: {reason}")));
        }

        debug!(bytes, "shared-memory segment attached");
        *segment = Some(ShmSegment {
            seg,
            ptr: ptr as *mut u8,
            size: bytes,
        });
        Ok(())
    }

    fn release_segment(conn: &RustConnection, segment: &mut Option<ShmSegment>) {
        if let Some(seg) = segment.take() {
            let _ = shm::detach(conn, seg.seg);
            let _ = conn.flush();
            unsafe { libc::shmdt(seg.ptr as *const libc::c_void) };
        }
    }

    /// Drops the fast path for the rest of the session.
    fn disable_shm(&mut self, reason: String) {
        if let Some(conn) = self.conn.as_ref() {
            Self::release_segment(conn, &mut self.segment);
        }
        self.probe = ShmProbe::Unavailable(reason);
    }

    fn grab_shm(&mut self, region: &Monitor) -> Result<Vec<u8>> {
        let needed = region.area() as usize * 4;
        let conn = self.conn.as_ref().ok_or(Error::SessionClosed)?;
        Self::ensure_capacity(conn, &mut self.segment, needed)?;
        let seg = self.segment.as_ref().expect("segment just ensured");

        let reply = shm::get_image(
            conn,
            self.root,
            region.left as i16,
            region.top as i16,
            region.width as u16,
            region.height as u16,
            !0,
            ImageFormat::Z_PIXMAP.into(),
            seg.seg,
            0,
        )
        .map_err(|e| Error::ShmUnavailable(format!("ShmGetImage failed: {e}")))?
        .reply()
        .map_err(|e| Error::ShmUnavailable(format!("ShmGetImage failed: {e}")))?;

        if (reply.size as usize) < needed {
            return Err(Error::ShmUnavailable(format!(
                "ShmGetImage wrote {} bytes, expected {needed}",
                reply.size
            )));
        }

        let mut data = unsafe { std::slice::from_raw_parts(seg.ptr, needed) }.to_vec();
        super::normalize_depth(&mut data, reply.depth, region)?;
        Ok(data)
    }
}

impl Backend for XcbShmBackend {
    fn monitors(&mut self) -> Result<&[Monitor]> {
        if self.monitors.is_none() {
            let conn = self.conn()?;
            let physical = super::enumerate_monitors(conn, self.screen_num)?;
            self.monitors = Some(Monitor::with_virtual(physical));
        }
        Ok(self.monitors.as_deref().unwrap_or_default())
    }

    fn grab(&mut self, region: Monitor) -> Result<Screenshot> {
        let mut data = if self.probe == ShmProbe::Available {
            match self.grab_shm(&region) {
                Ok(data) => Some(data),
                Err(Error::SessionClosed) => return Err(Error::SessionClosed),
                Err(err @ Error::UnsupportedDepth(_)) => return Err(err),
                Err(err) => {
                    warn!(%err, "SHM capture failed, falling back to GetImage");
                    self.disable_shm(err.to_string());
                    None
                }
            }
        } else {
            None
        };

        let conn = self.conn.as_ref().ok_or(Error::SessionClosed)?;
        let data = match data.take() {
            Some(data) => data,
            None => super::get_image_bgra(conn, self.root, &region)?,
        };

        let mut data = data;
        self.cursor.composite(conn, &mut data, &region);
        Screenshot::from_bgra(data, region)
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            Self::release_segment(&conn, &mut self.segment);
            debug!("XCB SHM backend closed");
        }
    }
}

impl Drop for XcbShmBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Option<XcbShmBackend> {
        if std::env::var("DISPLAY").is_err() {
            return None;
        }
        XcbShmBackend::open(None, false).ok()
    }

    #[test]
    fn grab_works_with_or_without_shm() {
        let Some(mut b) = backend() else { return };
        match b.shm_state() {
            ShmProbe::Available | ShmProbe::Unavailable(_) => {}
            ShmProbe::Unknown => panic!("probe must run at construction"),
        }
        let shot = b.grab(Monitor::new(0, 0, 64, 32)).unwrap();
        assert_eq!(shot.raw().len(), 64 * 32 * 4);
    }

    #[test]
    fn segment_grows_on_demand_and_releases() {
        if std::env::var("DISPLAY").is_err() {
            return;
        }
        let Ok((conn, _)) = crate::capture::linux::connect(None) else {
            return;
        };
        let mut segment = None;
        if XcbShmBackend::ensure_capacity(&conn, &mut segment, 4096).is_err() {
            return; // server without MIT-SHM
        }
        assert!(segment.as_ref().unwrap().size >= 4096);
        // A bigger request replaces the segment; a smaller one reuses it.
        XcbShmBackend::ensure_capacity(&conn, &mut segment, 64 * 1024).unwrap();
        let grown = segment.as_ref().unwrap().size;
        assert!(grown >= 64 * 1024);
        XcbShmBackend::ensure_capacity(&conn, &mut segment, 1024).unwrap();
        assert_eq!(segment.as_ref().unwrap().size, grown);
        XcbShmBackend::release_segment(&conn, &mut segment);
        assert!(segment.is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let Some(mut b) = backend() else { return };
        b.close();
        b.close();
        assert_eq!(
            b.grab(Monitor::new(0, 0, 4, 4)).unwrap_err().kind(),
            crate::ErrorKind::SessionClosed
        );
    }
}
