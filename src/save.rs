//! Save orchestrator: run captures for a monitor selector and deliver the
//! results as PNG files (or in-memory buffers) through a filename template.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::png;
use crate::screenshot::Screenshot;
use crate::Session;

const DEFAULT_TEMPLATE: &str = "monitor-{mon}.png";
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Capture source the orchestrator drives. [`Session`] is the real one;
/// tests substitute stubs. Not nameable outside the crate.
pub trait Grabber {
    fn monitors(&self) -> Result<Vec<Monitor>>;
    fn grab(&self, region: Monitor) -> Result<Screenshot>;
    fn compression_level(&self) -> u32;
}

impl Grabber for Session {
    fn monitors(&self) -> Result<Vec<Monitor>> {
        Session::monitors(self)
    }

    fn grab(&self, region: Monitor) -> Result<Screenshot> {
        Session::grab(self, region)
    }

    fn compression_level(&self) -> u32 {
        Session::compression_level(self)
    }
}

/// What to capture and where to put it.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// `-1`: one combined capture of the virtual monitor. `0`: iterate
    /// every physical monitor. Positive `N`: physical monitor `N`.
    pub selector: i32,
    /// Output filename template. Recognised placeholders: `{mon}`,
    /// `{top}`, `{left}`, `{width}`, `{height}`, `{date}`; anything else
    /// is kept verbatim. The special template `-` switches to no-file
    /// mode and yields in-memory PNG buffers instead.
    pub template: String,
    /// strftime-style format for `{date}`; local time, default
    /// `%Y-%m-%d_%H%M%S`.
    pub date_format: Option<String>,
}

impl Default for SaveRequest {
    fn default() -> Self {
        Self {
            selector: 0,
            template: DEFAULT_TEMPLATE.to_string(),
            date_format: None,
        }
    }
}

impl SaveRequest {
    /// Renders the filename template for one capture: `mon` is the value
    /// of the `{mon}` placeholder, `region` fills the geometry
    /// placeholders and `{date}` is the current local time.
    pub fn resolve(&self, mon: i32, region: &Monitor) -> String {
        let format = self.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
        let date = Local::now().format(format).to_string();
        render_template(&self.template, mon, region, &date)
    }
}

/// One delivered capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutput {
    /// Path of the PNG file that was written.
    File(PathBuf),
    /// In-memory PNG, produced in no-file mode.
    Bytes(Vec<u8>),
}

type PreWriteCallback<'a> = Box<dyn FnMut(&Path) + 'a>;

/// Lazy, single-pass sequence of capture results.
///
/// A failing monitor yields an `Err` item and iteration continues with
/// the remaining monitors, unless the error is terminal for the session.
pub struct Save<'a, G: Grabber = Session> {
    grabber: &'a G,
    request: SaveRequest,
    callback: Option<PreWriteCallback<'a>>,
    targets: Option<std::vec::IntoIter<(i32, Monitor)>>,
    done: bool,
}

impl<'a, G: Grabber> Save<'a, G> {
    pub(crate) fn new(
        grabber: &'a G,
        request: SaveRequest,
        callback: Option<PreWriteCallback<'a>>,
    ) -> Self {
        Save {
            grabber,
            request,
            callback,
            targets: None,
            done: false,
        }
    }

    /// Maps the selector onto `(mon placeholder value, region)` pairs.
    fn resolve_targets(&self) -> Result<Vec<(i32, Monitor)>> {
        let monitors = self.grabber.monitors()?;
        if monitors.is_empty() {
            return Err(Error::DisplayUnavailable("no monitor attached".into()));
        }
        match self.request.selector {
            -1 => Ok(vec![(-1, monitors[0])]),
            0 => Ok(monitors[1..]
                .iter()
                .enumerate()
                .map(|(i, m)| (i as i32 + 1, *m))
                .collect()),
            n if n > 0 && (n as usize) < monitors.len() => {
                Ok(vec![(n, monitors[n as usize])])
            }
            n => Err(Error::InvalidArgument(format!(
                "monitor {n} does not exist ({} available)",
                monitors.len() - 1
            ))),
        }
    }

    fn produce(&mut self, mon: i32, region: Monitor) -> Result<SaveOutput> {
        let shot = self.grabber.grab(region)?;
        let level = self.grabber.compression_level();

        if self.request.template == "-" {
            let bytes = png::encode(shot.raw(), shot.size(), level)?;
            return Ok(SaveOutput::Bytes(bytes));
        }

        let path = PathBuf::from(self.request.resolve(mon, &region));

        // Pre-write notification; its return value is deliberately ignored.
        if let Some(callback) = self.callback.as_mut() {
            callback(&path);
        }
        png::save(&path, shot.raw(), shot.size(), level)?;
        debug!(path = %path.display(), "screenshot written");
        Ok(SaveOutput::File(path))
    }
}

impl<'a, G: Grabber> Iterator for Save<'a, G> {
    type Item = Result<SaveOutput>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.targets.is_none() {
            match self.resolve_targets() {
                Ok(targets) => self.targets = Some(targets.into_iter()),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        let (mon, region) = match self.targets.as_mut().and_then(Iterator::next) {
            Some(target) => target,
            None => {
                self.done = true;
                return None;
            }
        };
        match self.produce(mon, region) {
            Ok(output) => Some(Ok(output)),
            Err(err) => {
                if err.is_terminal() {
                    self.done = true;
                }
                Some(Err(err))
            }
        }
    }
}

/// Instantiates the six known placeholders; unknown braces are preserved.
fn render_template(template: &str, mon: i32, region: &Monitor, date: &str) -> String {
    template
        .replace("{mon}", &mon.to_string())
        .replace("{top}", &region.top.to_string())
        .replace("{left}", &region.left.to_string())
        .replace("{width}", &region.width.to_string())
        .replace("{height}", &region.height.to_string())
        .replace("{date}", date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::cell::RefCell;

    /// Two fake monitors; grabs return solid buffers, with an optional
    /// failing region.
    struct StubGrabber {
        monitors: Vec<Monitor>,
        fail_region: Option<Monitor>,
        grabs: RefCell<Vec<Monitor>>,
    }

    impl StubGrabber {
        fn two_monitors() -> Self {
            StubGrabber {
                monitors: Monitor::with_virtual(vec![
                    Monitor::new(0, 0, 16, 8),
                    Monitor::new(16, 0, 8, 8),
                ]),
                fail_region: None,
                grabs: RefCell::new(Vec::new()),
            }
        }
    }

    impl Grabber for StubGrabber {
        fn monitors(&self) -> Result<Vec<Monitor>> {
            Ok(self.monitors.clone())
        }

        fn grab(&self, region: Monitor) -> Result<Screenshot> {
            self.grabs.borrow_mut().push(region);
            if self.fail_region == Some(region) {
                return Err(Error::native("XGetImage", "stubbed failure"));
            }
            Screenshot::from_bgra(vec![0x42; region.area() as usize * 4], region)
        }

        fn compression_level(&self) -> u32 {
            6
        }
    }

    #[test]
    fn template_rendering() {
        let monitor = Monitor::new(0, 0, 1920, 1080);
        assert_eq!(
            render_template("sct-{mon}-{width}x{height}.png", 1, &monitor, ""),
            "sct-1-1920x1080.png"
        );
        let monitor = Monitor::new(-5, 7, 10, 20);
        assert_eq!(
            render_template("{left},{top} {date} {other}", 2, &monitor, "2024-01-01"),
            "-5,7 2024-01-01 {other}"
        );
    }

    #[test]
    fn resolve_fills_the_template_contract() {
        let request = SaveRequest {
            selector: 1,
            template: "sct-{mon}-{width}x{height}.png".into(),
            date_format: None,
        };
        assert_eq!(
            request.resolve(1, &Monitor::new(0, 0, 1920, 1080)),
            "sct-1-1920x1080.png"
        );
    }

    #[test]
    fn every_monitor_yields_one_file_and_notifies_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubGrabber::two_monitors();
        let template = dir.path().join("monitor-{mon}.png");
        let seen = RefCell::new(Vec::new());

        let outputs: Vec<_> = Save::new(
            &stub,
            SaveRequest {
                selector: 0,
                template: template.to_string_lossy().into_owned(),
                date_format: None,
            },
            Some(Box::new(|path: &Path| {
                // The callback fires before the file exists.
                seen.borrow_mut().push((path.to_path_buf(), path.exists()));
            })),
        )
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(outputs.len(), 2);
        let paths: Vec<_> = outputs
            .iter()
            .map(|o| match o {
                SaveOutput::File(p) => p.clone(),
                SaveOutput::Bytes(_) => panic!("expected files"),
            })
            .collect();
        assert_eq!(paths[0], dir.path().join("monitor-1.png"));
        assert_eq!(paths[1], dir.path().join("monitor-2.png"));
        for path in &paths {
            assert!(path.exists());
        }
        let seen = seen.into_inner();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, existed)| !existed));
    }

    #[test]
    fn combined_selector_captures_the_virtual_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubGrabber::two_monitors();
        let template = dir
            .path()
            .join("sct-{mon}-{width}x{height}.png")
            .to_string_lossy()
            .into_owned();

        let outputs: Vec<_> = Save::new(
            &stub,
            SaveRequest {
                selector: -1,
                template,
                date_format: None,
            },
            None,
        )
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs[0],
            SaveOutput::File(dir.path().join("sct--1-24x8.png"))
        );
        assert_eq!(stub.grabs.borrow()[0], stub.monitors[0]);
    }

    #[test]
    fn unknown_monitor_is_invalid_argument() {
        let stub = StubGrabber::two_monitors();
        let mut save = Save::new(
            &stub,
            SaveRequest {
                selector: 9,
                ..Default::default()
            },
            None,
        );
        let err = save.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(save.next().is_none());
    }

    #[test]
    fn bytes_mode_yields_png_buffers() {
        let stub = StubGrabber::two_monitors();
        let outputs: Vec<_> = Save::new(
            &stub,
            SaveRequest {
                selector: 0,
                template: "-".to_string(),
                date_format: None,
            },
            None,
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(outputs.len(), 2);
        for output in outputs {
            let SaveOutput::Bytes(bytes) = output else {
                panic!("expected bytes");
            };
            assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
        }
    }

    #[test]
    fn non_terminal_failure_continues_with_later_monitors() {
        let dir = tempfile::tempdir().unwrap();
        let mut stub = StubGrabber::two_monitors();
        stub.fail_region = Some(stub.monitors[1]);
        let template = dir.path().join("monitor-{mon}.png");

        let results: Vec<_> = Save::new(
            &stub,
            SaveRequest {
                selector: 0,
                template: template.to_string_lossy().into_owned(),
                date_format: None,
            },
            None,
        )
        .collect();

        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            ErrorKind::NativeCallFailed
        );
        assert!(matches!(results[1], Ok(SaveOutput::File(_))));
    }

    #[test]
    fn date_placeholder_uses_the_requested_format() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubGrabber::two_monitors();
        let template = dir.path().join("shot-{date}-{mon}.png");

        let outputs: Vec<_> = Save::new(
            &stub,
            SaveRequest {
                selector: 1,
                template: template.to_string_lossy().into_owned(),
                date_format: Some("%Y".to_string()),
            },
            None,
        )
        .collect::<Result<_>>()
        .unwrap();

        let SaveOutput::File(path) = &outputs[0] else {
            panic!("expected a file");
        };
        let year = Local::now().format("%Y").to_string();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("shot-{year}-1.png")
        );
    }
}
