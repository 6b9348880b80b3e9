//! Windows capture backend on GDI.
//!
//! Monitors come from `EnumDisplayMonitors`; pixels from `BitBlt` into a
//! memory DC read back with `GetDIBits` as top-down 32-bpp BGRA. Source
//! device contexts are kept per thread: a thread gets its own screen DC on
//! first use, so concurrent captures from distinct threads never share GDI
//! resources. Everything is released in `close()`.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;
use windows::Win32::Foundation::{LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
    GetDIBits, GetMonitorInfoW, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    CAPTUREBLT, DIB_RGB_COLORS, HDC, HMONITOR, MONITORINFO, ROP_CODE, SRCCOPY,
};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::SetProcessDPIAware;

use crate::capture::Backend;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::screenshot::Screenshot;

pub(crate) struct GdiBackend {
    /// Screen DC per OS thread id, created on first access from each
    /// thread and destroyed only on close.
    src_dcs: Mutex<HashMap<u32, isize>>,
    monitors: Option<Vec<Monitor>>,
    closed: bool,
}

impl GdiBackend {
    pub(crate) fn open() -> Result<GdiBackend> {
        // Announce DPI awareness so GDI reports physical pixels. Failure
        // (already set, or very old Windows) is a silent no-op.
        unsafe {
            let _ = SetProcessDPIAware();
        }
        debug!("GDI backend ready");
        Ok(GdiBackend {
            src_dcs: Mutex::new(HashMap::new()),
            monitors: None,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// The screen DC owned by the calling thread, created on first use.
    fn src_dc(&self) -> Result<HDC> {
        let thread_id = unsafe { GetCurrentThreadId() };
        let mut dcs = self.src_dcs.lock().expect("DC map poisoned");
        if let Some(&raw) = dcs.get(&thread_id) {
            return Ok(HDC(raw as *mut _));
        }
        let dc = unsafe { GetDC(None) };
        if dc.is_invalid() {
            return Err(Error::native("GetDC", "cannot acquire the screen DC"));
        }
        debug!(thread_id, "created screen DC for new thread");
        dcs.insert(thread_id, dc.0 as isize);
        Ok(dc)
    }

    fn enumerate(&self) -> Result<Vec<Monitor>> {
        unsafe extern "system" fn enum_proc(
            hmonitor: HMONITOR,
            _hdc: HDC,
            _rect: *mut RECT,
            data: LPARAM,
        ) -> windows::Win32::Foundation::BOOL {
            let monitors = &mut *(data.0 as *mut Vec<Monitor>);
            let mut info = MONITORINFO {
                cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                ..Default::default()
            };
            if GetMonitorInfoW(hmonitor, &mut info).as_bool() {
                let rect = info.rcMonitor;
                monitors.push(Monitor::new(
                    rect.left,
                    rect.top,
                    (rect.right - rect.left) as u32,
                    (rect.bottom - rect.top) as u32,
                ));
            }
            true.into()
        }

        let mut monitors: Vec<Monitor> = Vec::new();
        let ok = unsafe {
            windows::Win32::Graphics::Gdi::EnumDisplayMonitors(
                None,
                None,
                Some(enum_proc),
                LPARAM(&mut monitors as *mut _ as isize),
            )
        };
        if !ok.as_bool() {
            return Err(Error::native(
                "EnumDisplayMonitors",
                "monitor enumeration failed",
            ));
        }
        Ok(monitors)
    }

    fn grab_impl(&self, src_dc: HDC, region: &Monitor) -> Result<Vec<u8>> {
        let width = region.width as i32;
        let height = region.height as i32;
        unsafe {
            let mem_dc = CreateCompatibleDC(src_dc);
            if mem_dc.is_invalid() {
                return Err(Error::native("CreateCompatibleDC", "no memory DC"));
            }
            let bitmap = CreateCompatibleBitmap(src_dc, width, height);
            if bitmap.is_invalid() {
                let _ = DeleteDC(mem_dc);
                return Err(Error::native("CreateCompatibleBitmap", "no bitmap"));
            }
            let old_bitmap = SelectObject(mem_dc, bitmap);

            // Cleanup happens on every path below, in reverse order.
            let result = (|| -> Result<Vec<u8>> {
                BitBlt(
                    mem_dc,
                    0,
                    0,
                    width,
                    height,
                    src_dc,
                    region.left,
                    region.top,
                    ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
                )
                .map_err(|e| Error::native_code("BitBlt", e.code().0 as i64, e.message()))?;

                let mut bmi = BITMAPINFO {
                    bmiHeader: BITMAPINFOHEADER {
                        biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                        biWidth: width,
                        // Negative height: top-down rows.
                        biHeight: -height,
                        biPlanes: 1,
                        biBitCount: 32,
                        biCompression: BI_RGB.0,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let mut pixels = vec![0u8; region.area() as usize * 4];
                let lines = GetDIBits(
                    mem_dc,
                    bitmap,
                    0,
                    region.height,
                    Some(pixels.as_mut_ptr() as *mut _),
                    &mut bmi,
                    DIB_RGB_COLORS,
                );
                if lines != height {
                    return Err(Error::native(
                        "GetDIBits",
                        format!("read {lines} of {height} scanlines"),
                    ));
                }
                // GDI leaves the alpha byte zeroed; make it opaque.
                for px in pixels.chunks_exact_mut(4) {
                    px[3] = 0xFF;
                }
                Ok(pixels)
            })();

            SelectObject(mem_dc, old_bitmap);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            result
        }
    }
}

impl Backend for GdiBackend {
    fn monitors(&mut self) -> Result<&[Monitor]> {
        self.ensure_open()?;
        if self.monitors.is_none() {
            let physical = self.enumerate()?;
            self.monitors = Some(Monitor::with_virtual(physical));
        }
        Ok(self.monitors.as_deref().unwrap_or_default())
    }

    fn grab(&mut self, region: Monitor) -> Result<Screenshot> {
        self.ensure_open()?;
        let src_dc = self.src_dc()?;
        let data = self.grab_impl(src_dc, &region)?;
        Screenshot::from_bgra(data, region)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut dcs = self.src_dcs.lock().expect("DC map poisoned");
        for (thread_id, raw) in dcs.drain() {
            unsafe {
                let _ = ReleaseDC(None, HDC(raw as *mut _));
            }
            debug!(thread_id, "released screen DC");
        }
        self.monitors = None;
    }
}

impl Drop for GdiBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_and_grab() {
        let mut backend = GdiBackend::open().unwrap();
        let Ok(monitors) = backend.monitors().map(<[Monitor]>::to_vec) else {
            return; // session without a display
        };
        assert!(monitors.len() >= 2);
        assert_eq!(monitors[0], Monitor::bounding_box(&monitors[1..]).unwrap());

        let shot = backend.grab(Monitor::new(0, 0, 64, 32)).unwrap();
        assert_eq!(shot.raw().len(), 64 * 32 * 4);
        assert!(shot.raw().chunks_exact(4).all(|px| px[3] == 0xFF));
    }

    #[test]
    fn close_releases_and_blocks_further_grabs() {
        let mut backend = GdiBackend::open().unwrap();
        backend.close();
        backend.close();
        assert_eq!(
            backend.grab(Monitor::new(0, 0, 4, 4)).unwrap_err().kind(),
            crate::ErrorKind::SessionClosed
        );
    }
}
