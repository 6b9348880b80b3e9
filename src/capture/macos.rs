//! macOS capture backend on Quartz / CoreGraphics.
//!
//! Displays come from the active-display list; pixels come from the
//! window-server screenshot API and are re-packed through a bitmap context
//! into tight BGRA. CoreGraphics may round the image width up for
//! alignment, so every grab is cropped (or padded, for off-screen regions)
//! back to the requested geometry. Captures run at nominal resolution by
//! default; the image-options hook switches to best (Retina) resolution.

use cocoa::base::{id, nil};
use cocoa::foundation::{NSPoint, NSSize};
use core_foundation::base::CFRelease;
use core_graphics::base::kCGImageAlphaPremultipliedFirst;
use core_graphics::color_space::CGColorSpace;
use core_graphics::context::CGContext;
use core_graphics::display::{CGDirectDisplayID, CGDisplay};
use core_graphics::geometry::{CGPoint, CGRect, CGSize};
use core_graphics::image::CGImage;
use core_graphics::window::{
    kCGNullWindowID, kCGWindowImageBestResolution, kCGWindowImageNominalResolution,
    kCGWindowListOptionOnScreenOnly, CGWindowImageOption,
};
use objc::{class, msg_send, sel, sel_impl};
use tracing::debug;

use crate::capture::Backend;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::screenshot::Screenshot;

/// CGBitmapInfo flag `kCGBitmapByteOrder32Little`; combined with
/// premultiplied-first alpha this selects the native BGRA layout.
const BYTE_ORDER_32_LITTLE: u32 = 0x2000;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGGetActiveDisplayList(
        max_displays: u32,
        active_displays: *mut CGDirectDisplayID,
        display_count: *mut u32,
    ) -> i32;
}

#[link(name = "ImageIO", kind = "framework")]
extern "C" {
    fn CGImageSourceCreateWithData(
        data: *const std::ffi::c_void,
        options: *const std::ffi::c_void,
    ) -> *mut std::ffi::c_void;

    fn CGImageSourceCreateImageAtIndex(
        isrc: *mut std::ffi::c_void,
        index: usize,
        options: *const std::ffi::c_void,
    ) -> *mut core_graphics::sys::CGImage;
}

pub(crate) struct QuartzBackend {
    max_displays: u32,
    with_cursor: bool,
    image_options: CGWindowImageOption,
    monitors: Option<Vec<Monitor>>,
    closed: bool,
}

impl QuartzBackend {
    pub(crate) fn open(max_displays: u32, with_cursor: bool) -> Result<QuartzBackend> {
        let backend = QuartzBackend {
            max_displays,
            with_cursor,
            image_options: kCGWindowImageNominalResolution,
            monitors: None,
            closed: false,
        };
        debug!(max_displays, "Quartz backend ready");
        Ok(backend)
    }

    /// Image-options hook: force scaled (Retina) capture instead of the
    /// default nominal resolution.
    pub(crate) fn set_scaled_capture(&mut self, scaled: bool) {
        self.image_options = if scaled {
            kCGWindowImageBestResolution
        } else {
            kCGWindowImageNominalResolution
        };
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<Monitor>> {
        let mut ids = vec![0 as CGDirectDisplayID; self.max_displays as usize];
        let mut count: u32 = 0;
        let status =
            unsafe { CGGetActiveDisplayList(self.max_displays, ids.as_mut_ptr(), &mut count) };
        if status != 0 {
            return Err(Error::native_code(
                "CGGetActiveDisplayList",
                status as i64,
                "cannot enumerate active displays",
            ));
        }
        if count == 0 {
            return Err(Error::DisplayUnavailable("no active display".into()));
        }

        // Bounds are reported in the global top-left coordinate space.
        let monitors = ids[..count as usize]
            .iter()
            .map(|&display_id| {
                let bounds = CGDisplay::new(display_id).bounds();
                Monitor::new(
                    bounds.origin.x as i32,
                    bounds.origin.y as i32,
                    bounds.size.width as u32,
                    bounds.size.height as u32,
                )
            })
            .collect();
        Ok(monitors)
    }

    fn read_pixels(&self, image: &CGImage) -> (Vec<u8>, u32, u32) {
        let width = image.width() as u32;
        let height = image.height() as u32;
        let mut buf = vec![0u8; width as usize * height as usize * 4];
        // Drawing through a context with a tight stride re-packs whatever
        // row padding the window server produced.
        let context = CGContext::create_bitmap_context(
            Some(buf.as_mut_ptr() as *mut _),
            width as usize,
            height as usize,
            8,
            width as usize * 4,
            &CGColorSpace::create_device_rgb(),
            kCGImageAlphaPremultipliedFirst | BYTE_ORDER_32_LITTLE,
        );
        context.draw_image(
            CGRect::new(
                &CGPoint::new(0.0, 0.0),
                &CGSize::new(width as f64, height as f64),
            ),
            image,
        );
        (buf, width, height)
    }
}

impl Backend for QuartzBackend {
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
        let rect = CGRect::new(
            &CGPoint::new(region.left as f64, region.top as f64),
            &CGSize::new(region.width as f64, region.height as f64),
        );
        let image = CGDisplay::screenshot(
            rect,
            kCGWindowListOptionOnScreenOnly,
            kCGNullWindowID,
            self.image_options,
        )
        .ok_or_else(|| {
            Error::native(
                "CGWindowListCreateImage",
                "returned no image (is screen recording permitted?)",
            )
        })?;

        let (buf, img_w, img_h) = self.read_pixels(&image);
        let mut data = fit_to_region(buf, img_w, img_h, region.width, region.height);

        if self.with_cursor {
            composite_cursor(&mut data, &region);
        }
        Screenshot::from_bgra(data, region)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.monitors = None;
            debug!("Quartz backend closed");
        }
    }
}

/// Crops a tight BGRA buffer of `src_w`x`src_h` down to `dst_w`x`dst_h`,
/// zero-padding when the source is smaller (off-screen regions). Handles
/// the window server rounding widths up to a 16-pixel alignment.
fn fit_to_region(src: Vec<u8>, src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Vec<u8> {
    if src_w == dst_w && src_h == dst_h {
        return src;
    }
    let copy_w = src_w.min(dst_w) as usize * 4;
    let src_stride = src_w as usize * 4;
    let dst_stride = dst_w as usize * 4;
    let mut dst = vec![0u8; dst_stride * dst_h as usize];
    for y in 0..src_h.min(dst_h) as usize {
        dst[y * dst_stride..y * dst_stride + copy_w]
            .copy_from_slice(&src[y * src_stride..y * src_stride + copy_w]);
    }
    dst
}

/// Reads the current cursor image and hot-spot from AppKit and blends it
/// over the captured frame. Any failure along the way leaves the frame
/// untouched.
fn composite_cursor(frame: &mut [u8], region: &Monitor) {
    let Some((cursor, cw, ch, hot_x, hot_y)) = cursor_bgra() else {
        debug!("no cursor image available, skipping cursor");
        return;
    };
    let (mouse_x, mouse_y) = mouse_position_top_left();
    let dst_x = mouse_x.round() as i32 - hot_x - region.left;
    let dst_y = mouse_y.round() as i32 - hot_y - region.top;
    blend_premultiplied_bgra(
        frame,
        region.width,
        region.height,
        &cursor,
        cw,
        ch,
        dst_x,
        dst_y,
    );
}

/// Current cursor as premultiplied BGRA plus its pixel hot-spot.
fn cursor_bgra() -> Option<(Vec<u8>, u32, u32, i32, i32)> {
    unsafe {
        let cursor: id = msg_send![class!(NSCursor), currentSystemCursor];
        let cursor: id = if cursor == nil {
            msg_send![class!(NSCursor), currentCursor]
        } else {
            cursor
        };
        if cursor == nil {
            return None;
        }
        let ns_image: id = msg_send![cursor, image];
        if ns_image == nil {
            return None;
        }
        let hot_spot: NSPoint = msg_send![cursor, hotSpot];
        let size_points: NSSize = msg_send![ns_image, size];

        // NSData is toll-free bridged to CFData, so the TIFF representation
        // feeds ImageIO directly.
        let tiff: id = msg_send![ns_image, TIFFRepresentation];
        if tiff == nil {
            return None;
        }
        let source = CGImageSourceCreateWithData(tiff as *const _, std::ptr::null());
        if source.is_null() {
            return None;
        }
        let image_ptr = CGImageSourceCreateImageAtIndex(source, 0, std::ptr::null());
        CFRelease(source as _);
        if image_ptr.is_null() {
            return None;
        }
        let image = {
            use foreign_types::ForeignType;
            CGImage::from_ptr(image_ptr)
        };

        let width = image.width() as u32;
        let height = image.height() as u32;
        if width == 0 || height == 0 {
            return None;
        }

        let mut buf = vec![0u8; width as usize * height as usize * 4];
        let context = CGContext::create_bitmap_context(
            Some(buf.as_mut_ptr() as *mut _),
            width as usize,
            height as usize,
            8,
            width as usize * 4,
            &CGColorSpace::create_device_rgb(),
            kCGImageAlphaPremultipliedFirst | BYTE_ORDER_32_LITTLE,
        );
        context.draw_image(
            CGRect::new(
                &CGPoint::new(0.0, 0.0),
                &CGSize::new(width as f64, height as f64),
            ),
            &image,
        );

        // The hot-spot is in points; scale to pixels for Retina cursors.
        let scale_x = if size_points.width > 0.0 {
            width as f64 / size_points.width
        } else {
            1.0
        };
        let scale_y = if size_points.height > 0.0 {
            height as f64 / size_points.height
        } else {
            1.0
        };
        let hot_x = (hot_spot.x * scale_x).round() as i32;
        let hot_y = (hot_spot.y * scale_y).round() as i32;

        Some((buf, width, height, hot_x, hot_y))
    }
}

/// Mouse position in the global top-left coordinate space. AppKit reports
/// it bottom-left relative, so flip against the main display height.
fn mouse_position_top_left() -> (f64, f64) {
    let main_height = CGDisplay::main().bounds().size.height;
    unsafe {
        let location: NSPoint = msg_send![class!(NSEvent), mouseLocation];
        (location.x, main_height - location.y)
    }
}

/// Premultiplied alpha-over of a BGRA cursor onto a BGRA frame.
#[allow(clippy::too_many_arguments)]
fn blend_premultiplied_bgra(
    frame: &mut [u8],
    frame_w: u32,
    frame_h: u32,
    cursor: &[u8],
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
            let si = ((cy as u32 * cursor_w + cx as u32) * 4) as usize;
            let a = cursor[si + 3] as u16;
            if a == 0 {
                continue;
            }
            let inv = 255 - a;
            let di = ((y as u32 * frame_w + x as u32) * 4) as usize;
            for c in 0..3 {
                frame[di + c] =
                    (cursor[si + c] as u16 + (frame[di + c] as u16 * inv + 127) / 255) as u8;
            }
            frame[di + 3] = 0xFF;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_crops_aligned_width_back_to_request() {
        // Width 100 is not 16-aligned; the server may hand back 112.
        let (src_w, src_h) = (112u32, 10u32);
        let mut src = vec![0u8; (src_w * src_h * 4) as usize];
        for y in 0..src_h as usize {
            for x in 0..src_w as usize {
                src[(y * src_w as usize + x) * 4] = x as u8;
            }
        }
        let out = fit_to_region(src, src_w, src_h, 100, 10);
        assert_eq!(out.len(), 100 * 10 * 4);
        // Last pixel of each row must be source column 99, not 111.
        for y in 0..10usize {
            assert_eq!(out[(y * 100 + 99) * 4], 99);
        }
    }

    #[test]
    fn fit_pads_offscreen_regions_with_black() {
        let src = vec![0xAA; 4 * 4 * 4];
        let out = fit_to_region(src, 4, 4, 8, 8);
        assert_eq!(out.len(), 8 * 8 * 4);
        assert_eq!(out[0], 0xAA);
        // Bottom-right quadrant is outside the source: zero-filled.
        assert_eq!(out[(7 * 8 + 7) * 4], 0);
    }

    #[test]
    fn enumerate_and_grab() {
        let Ok(mut backend) = QuartzBackend::open(32, false) else {
            return;
        };
        let Ok(monitors) = backend.monitors().map(<[Monitor]>::to_vec) else {
            return; // headless build machine
        };
        assert!(monitors.len() >= 2);
        assert_eq!(monitors[0], Monitor::bounding_box(&monitors[1..]).unwrap());

        let shot = backend.grab(Monitor::new(0, 0, 100, 50)).unwrap();
        assert_eq!(shot.raw().len(), 100 * 50 * 4);
    }

    #[test]
    fn image_options_hook_switches_resolution() {
        let mut backend = QuartzBackend::open(32, false).unwrap();
        assert_eq!(backend.image_options, kCGWindowImageNominalResolution);
        backend.set_scaled_capture(true);
        assert_eq!(backend.image_options, kCGWindowImageBestResolution);
        backend.set_scaled_capture(false);
        assert_eq!(backend.image_options, kCGWindowImageNominalResolution);
    }
}
