//! Linux capture backends (X11).
//!
//! Three backends share this module's plumbing: the default XCB path with
//! the MIT-SHM fast path ([`xcb_shm`]), the plain XCB `GetImage` path
//! ([`xcb`]), and the legacy Xlib path ([`xlib`]). Monitor enumeration via
//! Xrandr CRTCs and XFixes cursor compositing are common to the XCB pair.

pub(crate) mod xcb;
pub(crate) mod xcb_shm;
pub(crate) mod xlib;

use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as RandrConnectionExt;
use x11rb::protocol::xfixes::ConnectionExt as XfixesConnectionExt;
use x11rb::protocol::xproto::{ConnectionExt, ImageFormat, Window};
use x11rb::rust_connection::RustConnection;

use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::options::CaptureOptions;

/// The display name to connect to: the explicit option first, the ambient
/// `DISPLAY` variable otherwise.
pub(crate) fn resolve_display(options: &CaptureOptions) -> Option<String> {
    options
        .display
        .clone()
        .or_else(|| std::env::var("DISPLAY").ok())
}

/// Opens an XCB connection to `display`.
pub(super) fn connect(display: Option<&str>) -> Result<(RustConnection, usize)> {
    x11rb::connect(display).map_err(|e| {
        Error::DisplayUnavailable(format!(
            "cannot open X display {}: {e}",
            display.unwrap_or("(default)")
        ))
    })
}

/// Enumerates physical monitors through the Xrandr CRTC list, in CRTC
/// order. Disabled CRTCs (zero area or no outputs) are skipped. When no
/// CRTC qualifies the root window geometry stands in as a single monitor.
pub(super) fn enumerate_monitors(
    conn: &RustConnection,
    screen_num: usize,
) -> Result<Vec<Monitor>> {
    let screen = &conn.setup().roots[screen_num];
    let resources = conn
        .randr_get_screen_resources_current(screen.root)
        .map_err(|e| Error::native("RRGetScreenResourcesCurrent", e.to_string()))?
        .reply()
        .map_err(|e| Error::native("RRGetScreenResourcesCurrent", e.to_string()))?;

    let mut monitors = Vec::new();
    for crtc in &resources.crtcs {
        let info = conn
            .randr_get_crtc_info(*crtc, resources.config_timestamp)
            .map_err(|e| Error::native("RRGetCrtcInfo", e.to_string()))?
            .reply()
            .map_err(|e| Error::native("RRGetCrtcInfo", e.to_string()))?;
        if info.width == 0 || info.height == 0 || info.outputs.is_empty() {
            continue;
        }
        // Rotation is already folded into the reported width/height.
        monitors.push(Monitor::new(
            info.x as i32,
            info.y as i32,
            info.width as u32,
            info.height as u32,
        ));
    }

    if monitors.is_empty() {
        debug!("no enabled CRTC, falling back to the root window geometry");
        monitors.push(Monitor::new(
            0,
            0,
            screen.width_in_pixels as u32,
            screen.height_in_pixels as u32,
        ));
    }

    Ok(monitors)
}

/// One `GetImage` round-trip for `region`, normalised to BGRA.
pub(super) fn get_image_bgra(
    conn: &RustConnection,
    root: Window,
    region: &Monitor,
) -> Result<Vec<u8>> {
    let reply = conn
        .get_image(
            ImageFormat::Z_PIXMAP,
            root,
            region.left as i16,
            region.top as i16,
            region.width as u16,
            region.height as u16,
            !0,
        )
        .map_err(|e| Error::native("GetImage", e.to_string()))?
        .reply()
        .map_err(|e| Error::native("GetImage", e.to_string()))?;

    let mut data = reply.data;
    normalize_depth(&mut data, reply.depth, region)?;
    Ok(data)
}

/// Validates the server depth and forces the padding byte of 24-bit BGRx
/// pixels to an opaque alpha. 16-bit and paletted servers are rejected.
pub(super) fn normalize_depth(data: &mut [u8], depth: u8, region: &Monitor) -> Result<()> {
    match depth {
        32 => {}
        24 => {
            // BGRx: the fourth byte is undefined padding, not alpha.
            for px in data.chunks_exact_mut(4) {
                px[3] = 0xFF;
            }
        }
        other => return Err(Error::UnsupportedDepth(other)),
    }
    let expected = region.width as usize * region.height as usize * 4;
    if data.len() != expected {
        return Err(Error::native(
            "GetImage",
            format!("server returned {} bytes, expected {expected}", data.len()),
        ));
    }
    Ok(())
}

/// XFixes-based cursor compositing, probed once per session.
pub(super) struct CursorCompositor {
    enabled: bool,
}

impl CursorCompositor {
    /// Negotiates the XFixes extension when the caller asked for the
    /// cursor. An absent extension downgrades to a silent no-op.
    pub(super) fn probe(conn: &RustConnection, wanted: bool) -> CursorCompositor {
        if !wanted {
            return CursorCompositor { enabled: false };
        }
        let enabled = conn
            .xfixes_query_version(5, 0)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some();
        if !enabled {
            debug!("XFixes not available, cursor compositing disabled");
        }
        CursorCompositor { enabled }
    }

    /// Blends the current cursor image over `frame` (BGRA pixels covering
    /// `region`). Any failure to fetch the cursor leaves the frame as-is.
    pub(super) fn composite(&self, conn: &RustConnection, frame: &mut [u8], region: &Monitor) {
        if !self.enabled {
            return;
        }
        let cursor = match conn
            .xfixes_get_cursor_image()
            .ok()
            .and_then(|cookie| cookie.reply().ok())
        {
            Some(c) => c,
            None => {
                debug!("XFixesGetCursorImage failed, skipping cursor");
                return;
            }
        };

        let origin_x = cursor.x as i32 - cursor.xhot as i32 - region.left;
        let origin_y = cursor.y as i32 - cursor.yhot as i32 - region.top;
        blend_argb_cursor(
            frame,
            region.width,
            region.height,
            &cursor.cursor_image,
            cursor.width as u32,
            cursor.height as u32,
            origin_x,
            origin_y,
        );
    }
}

/// Alpha-blends an ARGB32 cursor image onto a BGRA frame at `(dst_x, dst_y)`.
#[allow(clippy::too_many_arguments)]
fn blend_argb_cursor(
    frame: &mut [u8],
    frame_w: u32,
    frame_h: u32,
    cursor: &[u32],
    cursor_w: u32,
    cursor_h: u32,
    dst_x: i32,
    dst_y: i32,
) {
    for cy in 0..cursor_h as i32 {
        let y = dst_y + cy;
        if y < 0 || y >= frame_h as i32 {
            continue;
        }
        for cx in 0..cursor_w as i32 {
            let x = dst_x + cx;
            if x < 0 || x >= frame_w as i32 {
                continue;
            }
            let argb = cursor[(cy as u32 * cursor_w + cx as u32) as usize];
            let a = (argb >> 24) & 0xFF;
            if a == 0 {
                continue;
            }
            let r = ((argb >> 16) & 0xFF) as u32;
            let g = ((argb >> 8) & 0xFF) as u32;
            let b = (argb & 0xFF) as u32;
            let idx = (y as u32 * frame_w + x as u32) as usize * 4;
            let inv = 255 - a;
            frame[idx] = ((b * a + frame[idx] as u32 * inv) / 255) as u8;
            frame[idx + 1] = ((g * a + frame[idx + 1] as u32 * inv) / 255) as u8;
            frame[idx + 2] = ((r * a + frame[idx + 2] as u32 * inv) / 255) as u8;
            frame[idx + 3] = 0xFF;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_display_prefers_explicit_option() {
        let opts = CaptureOptions {
            display: Some(":7".into()),
            ..Default::default()
        };
        assert_eq!(resolve_display(&opts), Some(":7".into()));
    }

    #[test]
    fn depth_normalisation() {
        let region = Monitor::new(0, 0, 2, 1);
        let mut px = vec![1, 2, 3, 0, 4, 5, 6, 0];
        normalize_depth(&mut px, 24, &region).unwrap();
        assert_eq!(px, vec![1, 2, 3, 0xFF, 4, 5, 6, 0xFF]);

        let mut px32 = vec![1, 2, 3, 9, 4, 5, 6, 9];
        normalize_depth(&mut px32, 32, &region).unwrap();
        assert_eq!(px32[3], 9);

        let err = normalize_depth(&mut [0u8; 4], 16, &Monitor::new(0, 0, 1, 1)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedDepth);
    }

    #[test]
    fn cursor_blend_is_clipped_and_weighted() {
        // 2x2 black frame, 1x1 fully-opaque white cursor at (1, 1).
        let mut frame = vec![0u8; 2 * 2 * 4];
        blend_argb_cursor(&mut frame, 2, 2, &[0xFFFF_FFFF], 1, 1, 1, 1);
        assert_eq!(&frame[12..16], &[0xFF, 0xFF, 0xFF, 0xFF]);
        // Untouched pixel.
        assert_eq!(&frame[0..4], &[0, 0, 0, 0]);

        // 50% red over black at an off-frame position: clipped, no panic.
        blend_argb_cursor(&mut frame, 2, 2, &[0x80FF_0000], 1, 1, -5, -5);
        // Same pixel, on-frame: B stays 0, R roughly half.
        blend_argb_cursor(&mut frame, 2, 2, &[0x80FF_0000], 1, 1, 0, 0);
        assert_eq!(frame[0], 0);
        assert!((frame[2] as i32 - 0x80).abs() <= 1);
    }
}
