use std::fmt;

use crate::detection::domain::face_detector::{DetectorError, FaceDetector};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::MAX_CONSECUTIVE_DETECTION_FAILURES;
use crate::shared::frame::Frame;

/// Which of the two configured backends is in use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Primary,
    Secondary,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Primary => write!(f, "primary"),
            BackendKind::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorState {
    Uninitialized,
    Active(BackendKind),
    /// Terminal for the session: too many consecutive detection failures.
    Failed,
}

/// Selects the best available face detector and guards it against
/// unbounded failure loops.
///
/// `init` tries the primary backend and falls back to the secondary one.
/// While active, every successful `detect` resets a failure counter; once
/// `max_consecutive_failures` polls in a row fail, the active backend is
/// stopped and the strategy enters [`DetectorState::Failed`], after which
/// no backend is touched again.
pub struct DetectorStrategy {
    primary: Box<dyn FaceDetector>,
    secondary: Box<dyn FaceDetector>,
    state: DetectorState,
    consecutive_failures: usize,
    max_consecutive_failures: usize,
}

impl DetectorStrategy {
    pub fn new(primary: Box<dyn FaceDetector>, secondary: Box<dyn FaceDetector>) -> Self {
        Self {
            primary,
            secondary,
            state: DetectorState::Uninitialized,
            consecutive_failures: 0,
            max_consecutive_failures: MAX_CONSECUTIVE_DETECTION_FAILURES,
        }
    }

    pub fn with_max_consecutive_failures(mut self, max: usize) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DetectorState::Active(_))
    }

    /// Initializes the best available backend.
    ///
    /// Idempotent while active. A failed strategy stays failed.
    pub fn init(&mut self) -> Result<BackendKind, DetectorError> {
        match self.state {
            DetectorState::Active(kind) => return Ok(kind),
            DetectorState::Failed => {
                return Err(DetectorError::Failed {
                    failures: self.consecutive_failures,
                })
            }
            DetectorState::Uninitialized => {}
        }

        let kind = resolve_backend(self.primary.as_mut(), self.secondary.as_mut())?;
        log::info!("Face detection using {kind} backend ({})", self.backend(kind).name());
        self.state = DetectorState::Active(kind);
        self.consecutive_failures = 0;
        Ok(kind)
    }

    /// Polls the active backend. Boxes are returned primary face first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let kind = match self.state {
            DetectorState::Active(kind) => kind,
            DetectorState::Uninitialized => return Err(DetectorError::NotInitialized),
            DetectorState::Failed => {
                return Err(DetectorError::Failed {
                    failures: self.consecutive_failures,
                })
            }
        };

        match self.backend_mut(kind).detect(frame) {
            Ok(mut boxes) => {
                self.consecutive_failures = 0;
                BoundingBox::sort_primary_first(&mut boxes);
                Ok(boxes)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_consecutive_failures {
                    log::error!(
                        "Face detection failed {} times in a row, giving up: {e}",
                        self.consecutive_failures
                    );
                    self.backend_mut(kind).stop();
                    self.state = DetectorState::Failed;
                    return Err(DetectorError::Failed {
                        failures: self.consecutive_failures,
                    });
                }
                log::warn!("Face detection poll failed: {e}");
                Err(e)
            }
        }
    }

    /// Stops the active backend and releases its resources.
    ///
    /// An active strategy returns to `Uninitialized` so a later `init`
    /// restarts it; a failed strategy stays failed.
    pub fn stop(&mut self) {
        if let DetectorState::Active(kind) = self.state {
            self.backend_mut(kind).stop();
            self.state = DetectorState::Uninitialized;
            self.consecutive_failures = 0;
            log::debug!("Face detection stopped");
        }
    }

    fn backend(&self, kind: BackendKind) -> &dyn FaceDetector {
        match kind {
            BackendKind::Primary => self.primary.as_ref(),
            BackendKind::Secondary => self.secondary.as_ref(),
        }
    }

    fn backend_mut(&mut self, kind: BackendKind) -> &mut dyn FaceDetector {
        match kind {
            BackendKind::Primary => self.primary.as_mut(),
            BackendKind::Secondary => self.secondary.as_mut(),
        }
    }
}

/// Initializes the primary backend, falling back to the secondary one.
fn resolve_backend(
    primary: &mut dyn FaceDetector,
    secondary: &mut dyn FaceDetector,
) -> Result<BackendKind, DetectorError> {
    let primary_err = match primary.init() {
        Ok(()) => return Ok(BackendKind::Primary),
        Err(e) => e,
    };
    log::warn!("Primary face detector unavailable, falling back: {primary_err}");

    match secondary.init() {
        Ok(()) => Ok(BackendKind::Secondary),
        Err(secondary_err) => {
            log::error!("Secondary face detector unavailable: {secondary_err}");
            Err(DetectorError::NoBackendAvailable {
                primary: primary_err.to_string(),
                secondary: secondary_err.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        init: usize,
        detect: usize,
        stop: usize,
    }

    struct FakeBackend {
        name: &'static str,
        init_ok: bool,
        results: VecDeque<Result<Vec<BoundingBox>, DetectorError>>,
        calls: Rc<RefCell<Calls>>,
    }

    impl FakeBackend {
        fn new(
            name: &'static str,
            init_ok: bool,
            results: Vec<Result<Vec<BoundingBox>, DetectorError>>,
        ) -> (Box<Self>, Rc<RefCell<Calls>>) {
            let calls = Rc::new(RefCell::new(Calls::default()));
            let backend = Box::new(Self {
                name,
                init_ok,
                results: results.into(),
                calls: calls.clone(),
            });
            (backend, calls)
        }
    }

    impl FaceDetector for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&mut self) -> Result<(), DetectorError> {
            self.calls.borrow_mut().init += 1;
            if self.init_ok {
                Ok(())
            } else {
                Err(DetectorError::unavailable(self.name, "simulated"))
            }
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls.borrow_mut().detect += 1;
            self.results.pop_front().unwrap_or(Ok(Vec::new()))
        }

        fn stop(&mut self) {
            self.calls.borrow_mut().stop += 1;
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 10 * 10 * 3], 10, 10, 3, 0)
    }

    fn face(size: i32) -> BoundingBox {
        BoundingBox::new(0, 0, size, size)
    }

    fn fail() -> Result<Vec<BoundingBox>, DetectorError> {
        Err(DetectorError::detection("simulated"))
    }

    #[test]
    fn test_starts_uninitialized() {
        let (p, _) = FakeBackend::new("p", true, vec![]);
        let (s, _) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);
        assert_eq!(strategy.state(), DetectorState::Uninitialized);
        assert_eq!(strategy.detect(&frame()), Err(DetectorError::NotInitialized));
    }

    #[test]
    fn test_init_prefers_primary() {
        let (p, _) = FakeBackend::new("p", true, vec![]);
        let (s, s_calls) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);

        assert_eq!(strategy.init(), Ok(BackendKind::Primary));
        assert_eq!(strategy.state(), DetectorState::Active(BackendKind::Primary));
        assert_eq!(s_calls.borrow().init, 0);
    }

    #[test]
    fn test_falls_back_to_secondary_and_detects_through_it() {
        let (p, p_calls) = FakeBackend::new("p", false, vec![]);
        let (s, s_calls) = FakeBackend::new("s", true, vec![Ok(vec![face(20)])]);
        let mut strategy = DetectorStrategy::new(p, s);

        assert_eq!(strategy.init(), Ok(BackendKind::Secondary));
        let boxes = strategy.detect(&frame()).unwrap();

        assert_eq!(boxes, vec![face(20)]);
        assert_eq!(p_calls.borrow().detect, 0);
        assert_eq!(s_calls.borrow().detect, 1);
    }

    #[test]
    fn test_both_backends_unavailable() {
        let (p, _) = FakeBackend::new("p", false, vec![]);
        let (s, _) = FakeBackend::new("s", false, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);

        let err = strategy.init().unwrap_err();
        assert!(matches!(err, DetectorError::NoBackendAvailable { .. }));
        assert!(err.is_fatal());
        assert_eq!(strategy.state(), DetectorState::Uninitialized);
    }

    #[test]
    fn test_init_is_idempotent_while_active() {
        let (p, p_calls) = FakeBackend::new("p", true, vec![]);
        let (s, _) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);

        strategy.init().unwrap();
        strategy.init().unwrap();
        assert_eq!(p_calls.borrow().init, 1);
    }

    #[test]
    fn test_single_failure_is_recoverable() {
        let (p, _) = FakeBackend::new("p", true, vec![fail(), Ok(vec![face(10)]), fail()]);
        let (s, _) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);
        strategy.init().unwrap();

        assert!(matches!(
            strategy.detect(&frame()),
            Err(DetectorError::Detection(_))
        ));
        assert!(strategy.detect(&frame()).is_ok());
        assert!(matches!(
            strategy.detect(&frame()),
            Err(DetectorError::Detection(_))
        ));
        assert!(strategy.is_active());
    }

    #[test]
    fn test_two_consecutive_failures_are_terminal() {
        let (p, p_calls) = FakeBackend::new("p", true, vec![fail(), fail(), Ok(vec![])]);
        let (s, s_calls) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);
        strategy.init().unwrap();

        assert!(strategy.detect(&frame()).is_err());
        assert_eq!(
            strategy.detect(&frame()),
            Err(DetectorError::Failed { failures: 2 })
        );
        assert_eq!(strategy.state(), DetectorState::Failed);
        assert_eq!(p_calls.borrow().stop, 1);

        // No further automatic retries against any backend.
        assert!(strategy.detect(&frame()).unwrap_err().is_fatal());
        assert!(strategy.init().is_err());
        assert_eq!(p_calls.borrow().detect, 2);
        assert_eq!(p_calls.borrow().init, 1);
        assert_eq!(s_calls.borrow().init, 0);
    }

    #[test]
    fn test_failure_threshold_is_configurable() {
        let (p, _) = FakeBackend::new("p", true, vec![fail(), fail(), fail()]);
        let (s, _) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s).with_max_consecutive_failures(3);
        strategy.init().unwrap();

        assert!(!strategy.detect(&frame()).unwrap_err().is_fatal());
        assert!(!strategy.detect(&frame()).unwrap_err().is_fatal());
        assert!(strategy.detect(&frame()).unwrap_err().is_fatal());
    }

    #[test]
    fn test_detect_orders_primary_face_first() {
        let (p, _) = FakeBackend::new("p", true, vec![Ok(vec![face(10), face(40), face(20)])]);
        let (s, _) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);
        strategy.init().unwrap();

        let boxes = strategy.detect(&frame()).unwrap();
        let widths: Vec<i32> = boxes.iter().map(|b| b.width).collect();
        assert_eq!(widths, vec![40, 20, 10]);
    }

    #[test]
    fn test_stop_releases_backend_and_allows_restart() {
        let (p, p_calls) = FakeBackend::new("p", true, vec![]);
        let (s, _) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);
        strategy.init().unwrap();

        strategy.stop();
        assert_eq!(strategy.state(), DetectorState::Uninitialized);
        assert_eq!(p_calls.borrow().stop, 1);

        assert_eq!(strategy.init(), Ok(BackendKind::Primary));
        assert_eq!(p_calls.borrow().init, 2);
    }

    #[test]
    fn test_stop_when_uninitialized_is_noop() {
        let (p, p_calls) = FakeBackend::new("p", true, vec![]);
        let (s, s_calls) = FakeBackend::new("s", true, vec![]);
        let mut strategy = DetectorStrategy::new(p, s);

        strategy.stop();
        assert_eq!(p_calls.borrow().stop, 0);
        assert_eq!(s_calls.borrow().stop, 0);
    }
}
