//! XCB capture backend using plain `GetImage`.
//!
//! Functionally identical to the Xlib backend but speaks the XCB protocol
//! through `x11rb`; error trapping rides on the reply/error discriminator,
//! so no process-wide handler is needed.

use tracing::debug;
use x11rb::connection::Connection;
use x11rb::rust_connection::RustConnection;

use super::CursorCompositor;
use crate::capture::Backend;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::screenshot::Screenshot;

pub(crate) struct XcbBackend {
    conn: Option<RustConnection>,
    screen_num: usize,
    root: u32,
    cursor: CursorCompositor,
    monitors: Option<Vec<Monitor>>,
}

impl XcbBackend {
    pub(crate) fn open(display: Option<&str>, with_cursor: bool) -> Result<XcbBackend> {
        let (conn, screen_num) = super::connect(display)?;
        let root = conn.setup().roots[screen_num].root;
        let cursor = CursorCompositor::probe(&conn, with_cursor);
        debug!(screen_num, "XCB GetImage backend ready");
        Ok(XcbBackend {
            conn: Some(conn),
            screen_num,
            root,
            cursor,
            monitors: None,
        })
    }

    fn conn(&self) -> Result<&RustConnection> {
        self.conn.as_ref().ok_or(Error::SessionClosed)
    }
}

impl Backend for XcbBackend {
    fn monitors(&mut self) -> Result<&[Monitor]> {
        if self.monitors.is_none() {
            let conn = self.conn()?;
            let physical = super::enumerate_monitors(conn, self.screen_num)?;
            self.monitors = Some(Monitor::with_virtual(physical));
        }
        Ok(self.monitors.as_deref().unwrap_or_default())
    }

    fn grab(&mut self, region: Monitor) -> Result<Screenshot> {
        let conn = self.conn()?;
        let mut data = super::get_image_bgra(conn, self.root, &region)?;
        self.cursor.composite(conn, &mut data, &region);
        Screenshot::from_bgra(data, region)
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("XCB connection closed");
        }
    }
}

impl Drop for XcbBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Option<XcbBackend> {
        // Skip on display-less machines (CI, headless servers).
        if std::env::var("DISPLAY").is_err() {
            return None;
        }
        XcbBackend::open(None, false).ok()
    }

    #[test]
    fn monitor_list_has_virtual_first() {
        let Some(mut b) = backend() else { return };
        let monitors = b.monitors().unwrap().to_vec();
        assert!(monitors.len() >= 2);
        let bbox = Monitor::bounding_box(&monitors[1..]).unwrap();
        assert_eq!(monitors[0], bbox);
        for m in &monitors[1..] {
            assert!(monitors[0].area() >= m.area());
        }
    }

    #[test]
    fn grab_matches_requested_geometry() {
        let Some(mut b) = backend() else { return };
        let region = Monitor::new(10, 20, 100, 50);
        let shot = b.grab(region).unwrap();
        assert_eq!(shot.raw().len(), 100 * 50 * 4);
        assert_eq!(shot.pos(), (10, 20));
        assert_eq!(shot.size(), (100, 50));
    }

    #[test]
    fn grab_after_close_fails() {
        let Some(mut b) = backend() else { return };
        b.close();
        b.close();
        let err = b.grab(Monitor::new(0, 0, 4, 4)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SessionClosed);
    }
}
