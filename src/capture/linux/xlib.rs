//! Legacy Xlib capture backend.
//!
//! Kept for servers and setups where XCB misbehaves. Pixels come from
//! `XGetImage`; channel order is derived from the image's colour masks
//! rather than assumed. Xlib reports errors through a process-wide
//! callback, so a trapping handler is installed for the lifetime of the
//! session: it records the error instead of letting the default handler
//! terminate the process. The handler is reference-counted across
//! sessions — the first install wins, the last close restores the
//! original.

use std::ffi::CString;
use std::os::raw::{c_int, c_ulong};
use std::ptr;
use std::sync::Mutex;

use tracing::debug;
use x11::{xfixes, xlib, xrandr};

use crate::capture::Backend;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::screenshot::Screenshot;

/// What the trapping handler saw, copied out of the `XErrorEvent`.
#[derive(Debug, Clone, Copy)]
struct XErrorRecord {
    serial: u64,
    error_code: u8,
    request_code: u8,
    minor_code: u8,
}

static LAST_ERROR: Mutex<Option<XErrorRecord>> = Mutex::new(None);

struct HandlerState {
    refcount: u32,
    previous: Option<unsafe extern "C" fn(*mut xlib::Display, *mut xlib::XErrorEvent) -> c_int>,
}

static HANDLER: Mutex<HandlerState> = Mutex::new(HandlerState {
    refcount: 0,
    previous: None,
});

/// Trapping handler: records the error and returns instead of aborting.
unsafe extern "C" fn trap_x_error(
    _display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    if let Some(event) = event.as_ref() {
        let record = XErrorRecord {
            serial: event.serial as u64,
            error_code: event.error_code,
            request_code: event.request_code,
            minor_code: event.minor_code,
        };
        if let Ok(mut slot) = LAST_ERROR.lock() {
            *slot = Some(record);
        }
    }
    0
}

fn install_error_handler() {
    let mut state = HANDLER.lock().expect("X handler state poisoned");
    if state.refcount == 0 {
        state.previous = unsafe { xlib::XSetErrorHandler(Some(trap_x_error)) };
    }
    state.refcount += 1;
}

fn restore_error_handler() {
    let mut state = HANDLER.lock().expect("X handler state poisoned");
    state.refcount = state.refcount.saturating_sub(1);
    if state.refcount == 0 {
        unsafe { xlib::XSetErrorHandler(state.previous) };
        state.previous = None;
    }
}

fn take_last_error() -> Option<XErrorRecord> {
    LAST_ERROR.lock().ok().and_then(|mut slot| slot.take())
}

pub(crate) struct XlibBackend {
    display: Option<*mut xlib::Display>,
    screen: c_int,
    root: xlib::Window,
    cursor_enabled: bool,
    monitors: Option<Vec<Monitor>>,
}

// The display pointer is confined to this backend and all access is
// serialised by the session lock.
unsafe impl Send for XlibBackend {}

impl XlibBackend {
    pub(crate) fn open(display: Option<&str>, with_cursor: bool) -> Result<XlibBackend> {
        let name = match display {
            Some(name) => Some(CString::new(name).map_err(|_| {
                Error::InvalidArgument(format!("display name {display:?} contains NUL"))
            })?),
            None => None,
        };
        let handle = unsafe {
            xlib::XOpenDisplay(name.as_ref().map_or(ptr::null(), |n| n.as_ptr()))
        };
        if handle.is_null() {
            return Err(Error::DisplayUnavailable(format!(
                "cannot open X display {}",
                display.unwrap_or("(default)")
            )));
        }

        install_error_handler();

        let screen = unsafe { xlib::XDefaultScreen(handle) };
        let root = unsafe { xlib::XDefaultRootWindow(handle) };

        let cursor_enabled = with_cursor && {
            let mut event_base = 0;
            let mut error_base = 0;
            let present = unsafe {
                xfixes::XFixesQueryExtension(handle, &mut event_base, &mut error_base) != 0
            };
            if !present {
                debug!("XFixes not available, cursor compositing disabled");
            }
            present
        };

        debug!(screen, "Xlib backend ready");
        Ok(XlibBackend {
            display: Some(handle),
            screen,
            root,
            cursor_enabled,
            monitors: None,
        })
    }

    fn display(&self) -> Result<*mut xlib::Display> {
        self.display.ok_or(Error::SessionClosed)
    }

    /// Flushes pending requests and converts a trapped X error into the
    /// library error for `call`.
    fn check_trap(&self, display: *mut xlib::Display, call: &'static str) -> Result<()> {
        unsafe { xlib::XSync(display, 0) };
        if let Some(record) = take_last_error() {
            return Err(Error::native_code(
                call,
                record.serial as i64,
                format!(
                    "X error {} (request {}.{})",
                    record.error_code, record.request_code, record.minor_code
                ),
            ));
        }
        Ok(())
    }

    fn enumerate(&self, display: *mut xlib::Display) -> Result<Vec<Monitor>> {
        let mut monitors = Vec::new();
        unsafe {
            let resources = xrandr::XRRGetScreenResourcesCurrent(display, self.root);
            if !resources.is_null() {
                let crtcs =
                    std::slice::from_raw_parts((*resources).crtcs, (*resources).ncrtc as usize);
                for &crtc in crtcs {
                    let info = xrandr::XRRGetCrtcInfo(display, resources, crtc);
                    if info.is_null() {
                        continue;
                    }
                    if (*info).width > 0 && (*info).height > 0 && (*info).noutput > 0 {
                        monitors.push(Monitor::new(
                            (*info).x,
                            (*info).y,
                            (*info).width,
                            (*info).height,
                        ));
                    }
                    xrandr::XRRFreeCrtcInfo(info);
                }
                xrandr::XRRFreeScreenResources(resources);
            }
        }
        self.check_trap(display, "XRRGetScreenResourcesCurrent")?;

        if monitors.is_empty() {
            let width = unsafe { xlib::XDisplayWidth(display, self.screen) };
            let height = unsafe { xlib::XDisplayHeight(display, self.screen) };
            monitors.push(Monitor::new(0, 0, width as u32, height as u32));
        }
        Ok(monitors)
    }

    fn composite_cursor(&self, display: *mut xlib::Display, frame: &mut [u8], region: &Monitor) {
        if !self.cursor_enabled {
            return;
        }
        unsafe {
            let image = xfixes::XFixesGetCursorImage(display);
            if image.is_null() {
                debug!("XFixesGetCursorImage returned no image, skipping cursor");
                return;
            }
            let width = (*image).width as u32;
            let height = (*image).height as u32;
            // Cursor pixels are c_ulong per entry; the ARGB value lives in
            // the low 32 bits.
            let raw: &[c_ulong] =
                std::slice::from_raw_parts((*image).pixels, (width * height) as usize);
            let argb: Vec<u32> = raw.iter().map(|&px| (px & 0xFFFF_FFFF) as u32).collect();
            let dst_x = (*image).x as i32 - (*image).xhot as i32 - region.left;
            let dst_y = (*image).y as i32 - (*image).yhot as i32 - region.top;
            xlib::XFree(image as *mut _);

            super::blend_argb_cursor(
                frame,
                region.width,
                region.height,
                &argb,
                width,
                height,
                dst_x,
                dst_y,
            );
        }
    }
}

impl Backend for XlibBackend {
    fn monitors(&mut self) -> Result<&[Monitor]> {
        if self.monitors.is_none() {
            let display = self.display()?;
            let physical = self.enumerate(display)?;
            self.monitors = Some(Monitor::with_virtual(physical));
        }
        Ok(self.monitors.as_deref().unwrap_or_default())
    }

    fn grab(&mut self, region: Monitor) -> Result<Screenshot> {
        let display = self.display()?;
        let image = unsafe {
            xlib::XGetImage(
                display,
                self.root,
                region.left,
                region.top,
                region.width,
                region.height,
                xlib::XAllPlanes(),
                xlib::ZPixmap,
            )
        };
        if image.is_null() {
            self.check_trap(display, "XGetImage")?;
            return Err(Error::native("XGetImage", "returned no image"));
        }

        let result = unsafe { extract_bgra(image, &region) };
        unsafe { xlib::XDestroyImage(image) };
        self.check_trap(display, "XGetImage")?;

        let mut data = result?;
        self.composite_cursor(display, &mut data, &region);
        Screenshot::from_bgra(data, region)
    }

    fn close(&mut self) {
        if let Some(display) = self.display.take() {
            restore_error_handler();
            unsafe { xlib::XCloseDisplay(display) };
            debug!("Xlib display closed");
        }
    }
}

impl Drop for XlibBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Repacks an `XImage` into tightly-packed BGRA using the image's colour
/// masks, honouring `bytes_per_line`. Only 32 bits per pixel is accepted.
unsafe fn extract_bgra(image: *mut xlib::XImage, region: &Monitor) -> Result<Vec<u8>> {
    let bits_per_pixel = (*image).bits_per_pixel;
    if bits_per_pixel != 32 {
        return Err(Error::UnsupportedDepth(bits_per_pixel as u8));
    }
    let width = (*image).width as usize;
    let height = (*image).height as usize;
    let stride = (*image).bytes_per_line as usize;
    let byte_order = (*image).byte_order;

    let offset_for = |mask: c_ulong| -> Result<usize> {
        match (byte_order, (mask & 0xFFFF_FFFF) as u32) {
            (0, 0x0000_00FF) | (1, 0xFF00_0000) => Ok(0),
            (0, 0x0000_FF00) | (1, 0x00FF_0000) => Ok(1),
            (0, 0x00FF_0000) | (1, 0x0000_FF00) => Ok(2),
            (0, 0xFF00_0000) | (1, 0x0000_00FF) => Ok(3),
            _ => Err(Error::native(
                "XGetImage",
                format!("unsupported channel mask {mask:#x}"),
            )),
        }
    };
    let red = offset_for((*image).red_mask)?;
    let green = offset_for((*image).green_mask)?;
    let blue = offset_for((*image).blue_mask)?;

    let src = std::slice::from_raw_parts((*image).data as *const u8, stride * height);
    let mut out = Vec::with_capacity(region.width as usize * region.height as usize * 4);
    for y in 0..height {
        let row = &src[y * stride..y * stride + width * 4];
        for px in row.chunks_exact(4) {
            out.push(px[blue]);
            out.push(px[green]);
            out.push(px[red]);
            out.push(0xFF);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Option<XlibBackend> {
        if std::env::var("DISPLAY").is_err() {
            return None;
        }
        XlibBackend::open(None, false).ok()
    }

    #[test]
    fn handler_refcount_survives_nested_sessions() {
        // Other tests may hold Xlib sessions concurrently, so only assert
        // on this test's own contribution to the count.
        let Some(mut a) = backend() else { return };
        let with_one = HANDLER.lock().unwrap().refcount;
        assert!(with_one >= 1);
        let mut b = XlibBackend::open(None, false).unwrap();
        assert!(HANDLER.lock().unwrap().refcount >= 2);
        b.close();
        a.close();
        let state = HANDLER.lock().unwrap();
        if state.refcount == 0 {
            // Last session restored the original handler.
            assert!(state.previous.is_none());
        }
    }

    #[test]
    fn grab_produces_requested_size() {
        let Some(mut b) = backend() else { return };
        let shot = b.grab(Monitor::new(0, 0, 32, 16)).unwrap();
        assert_eq!(shot.raw().len(), 32 * 16 * 4);
        // Alpha is forced opaque by the mask repack.
        assert!(shot.raw().chunks_exact(4).all(|px| px[3] == 0xFF));
    }

    #[test]
    fn monitors_match_bounding_box_invariant() {
        let Some(mut b) = backend() else { return };
        let monitors = b.monitors().unwrap().to_vec();
        assert!(monitors.len() >= 2);
        assert_eq!(
            monitors[0],
            Monitor::bounding_box(&monitors[1..]).unwrap()
        );
    }
}
