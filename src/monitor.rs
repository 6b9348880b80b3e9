//! Monitor geometry and the virtual-monitor model.

use serde::{Deserialize, Serialize};

/// A physical or virtual display surface, as an axis-aligned rectangle in
/// the global (multi-monitor) coordinate space.
///
/// `left`/`top` may be negative: secondary monitors can sit left of or
/// above the primary. The serialized form is exactly
/// `{"left", "top", "width", "height"}`, which is part of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Monitor {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.left + self.width as i32
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.top + self.height as i32
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The bounding box of a set of monitors: the rectangle served as the
    /// virtual monitor at index 0 of every monitor list.
    ///
    /// Returns `None` for an empty set (no display attached).
    pub fn bounding_box(monitors: &[Monitor]) -> Option<Monitor> {
        let first = monitors.first()?;
        let mut left = first.left;
        let mut top = first.top;
        let mut right = first.right();
        let mut bottom = first.bottom();
        for m in &monitors[1..] {
            left = left.min(m.left);
            top = top.min(m.top);
            right = right.max(m.right());
            bottom = bottom.max(m.bottom());
        }
        Some(Monitor {
            left,
            top,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    /// Builds the full monitor list from physical entries: the virtual
    /// monitor first, then the physical monitors in their reported order.
    /// Empty input yields an empty list.
    pub(crate) fn with_virtual(physical: Vec<Monitor>) -> Vec<Monitor> {
        match Monitor::bounding_box(&physical) {
            Some(virt) => {
                let mut all = Vec::with_capacity(physical.len() + 1);
                all.push(virt);
                all.extend(physical);
                all
            }
            None => Vec::new(),
        }
    }
}

impl std::fmt::Display for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_single() {
        let m = Monitor::new(0, 0, 1920, 1080);
        assert_eq!(Monitor::bounding_box(&[m]), Some(m));
    }

    #[test]
    fn bounding_box_negative_origin() {
        // Secondary monitor left of and above the primary.
        let monitors = [
            Monitor::new(0, 0, 1920, 1080),
            Monitor::new(-1280, -1024, 1280, 1024),
        ];
        let bbox = Monitor::bounding_box(&monitors).unwrap();
        assert_eq!(bbox, Monitor::new(-1280, -1024, 3200, 2104));
    }

    #[test]
    fn bounding_box_is_at_least_each_monitor() {
        let monitors = [
            Monitor::new(0, 0, 1920, 1080),
            Monitor::new(1920, 200, 1280, 720),
            Monitor::new(-640, 0, 640, 480),
        ];
        let bbox = Monitor::bounding_box(&monitors).unwrap();
        for m in &monitors {
            assert!(bbox.area() >= m.area());
            assert!(bbox.left <= m.left && bbox.top <= m.top);
            assert!(bbox.right() >= m.right() && bbox.bottom() >= m.bottom());
        }
    }

    #[test]
    fn with_virtual_prepends_union() {
        let list = Monitor::with_virtual(vec![
            Monitor::new(0, 0, 1920, 1080),
            Monitor::new(1920, 0, 1280, 1024),
        ]);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0], Monitor::new(0, 0, 3200, 1080));
        assert_eq!(list[1].left, 0);
        assert_eq!(list[2].left, 1920);
        assert!(Monitor::with_virtual(Vec::new()).is_empty());
    }

    #[test]
    fn single_monitor_list_duplicates_geometry() {
        // One 1920x1080 monitor at the origin: two entries, same rectangle.
        let list = Monitor::with_virtual(vec![Monitor::new(0, 0, 1920, 1080)]);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], list[1]);
    }

    #[test]
    fn json_schema_is_stable() {
        let m = Monitor::new(-5, 10, 800, 600);
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"left": -5, "top": 10, "width": 800, "height": 600})
        );
        let back: Monitor = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
