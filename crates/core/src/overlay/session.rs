//! Overlay render session
//!
//! State machine driven by the two intercepted calls:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> (reset) Invalidated -> Initializing -> Ready -> ... -> TornDown
//! ```
//!
//! The first end-of-frame call binds the window and initializes the
//! backend; later ones draw inside a captured render state. A reset drops
//! device resources before the original reset runs, and the next frame
//! initializes again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use framehook_sdk::WindowHandle;

use super::backend::{OverlayBackend, WindowSubclass};
use super::chain::{Disposition, HandlerKey, MessageChain};
use super::error::OverlayError;
use super::hotkey::{Hotkey, HotkeyTracker, Modifiers};
use super::input::InputState;
use super::state::RenderStateGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    /// Device resources released for a reset; the next frame re-initializes
    Invalidated,
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Invalidated => "invalidated",
            SessionState::TornDown => "torn down",
        };
        f.write_str(s)
    }
}

/// What happened during one end-of-frame call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The overlay drew
    Drawn,
    /// Render state was set up and restored but the overlay is hidden
    Hidden,
    /// Nothing was touched (device lost, torn down, or re-entered)
    Skipped,
    /// The frame failed; the error was logged
    Failed,
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Toggles visibility
    pub hotkey: Hotkey,

    pub start_visible: bool,

    /// Modifier state source for the hotkey; `None` uses the window's own
    /// key messages
    pub modifiers: Option<fn() -> Modifiers>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            hotkey: Hotkey::default(),
            start_visible: true,
            modifiers: None,
        }
    }
}

/// Per-process overlay state bound to one window and one device
pub struct OverlayRenderSession<B: OverlayBackend, W: WindowSubclass> {
    backend: B,
    subclass: W,
    state: SessionState,
    visible: Arc<AtomicBool>,
    bound_window: Option<WindowHandle>,
    chain: Arc<MessageChain>,
    handlers: Vec<HandlerKey>,
    input: Arc<Mutex<InputState>>,
    options: SessionOptions,
    frames: u64,
}

impl<B: OverlayBackend, W: WindowSubclass> OverlayRenderSession<B, W> {
    /// Create an uninitialized session
    ///
    /// # Arguments
    /// * `backend` - Renderer
    /// * `subclass` - Window procedure swap; its procedure must dispatch through `chain`
    /// * `chain` - Message chain the session installs its handlers into
    /// * `options` - Hotkey and initial visibility
    pub fn new(backend: B, subclass: W, chain: Arc<MessageChain>, options: SessionOptions) -> Self {
        Self {
            backend,
            subclass,
            state: SessionState::Uninitialized,
            visible: Arc::new(AtomicBool::new(options.start_visible)),
            bound_window: None,
            chain,
            handlers: Vec::new(),
            input: Arc::new(Mutex::new(InputState::new())),
            options,
            frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Flip visibility, returning the new value
    pub fn toggle_visible(&self) -> bool {
        !self.visible.fetch_xor(true, Ordering::SeqCst)
    }

    /// Shared visibility flag, as flipped by the hotkey handler
    pub fn visibility(&self) -> Arc<AtomicBool> {
        self.visible.clone()
    }

    pub fn bound_window(&self) -> Option<WindowHandle> {
        self.bound_window
    }

    /// Frames drawn or set up since creation
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Copy of the input state captured from the window
    pub fn input(&self) -> InputState {
        self.input.lock().clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn subclass(&self) -> &W {
        &self.subclass
    }

    pub fn chain(&self) -> &Arc<MessageChain> {
        &self.chain
    }

    /// Intercepted end-of-frame call
    ///
    /// Never fails: errors are logged and isolated to this frame.
    pub fn on_end_of_frame(&mut self, device: B::Device) -> FrameOutcome {
        match self.state {
            SessionState::TornDown | SessionState::Initializing => return FrameOutcome::Skipped,
            SessionState::Uninitialized | SessionState::Invalidated => {
                if let Err(e) = self.initialize(device) {
                    tracing::error!("Overlay initialization failed: {}", e);
                    return FrameOutcome::Failed;
                }
            }
            SessionState::Ready => {}
        }

        match self.render(device) {
            Ok(outcome) => outcome,
            Err(OverlayError::DeviceLost) => {
                tracing::trace!("Device not ready, skipping overlay frame");
                FrameOutcome::Skipped
            }
            Err(e) => {
                tracing::error!("Overlay frame failed: {}", e);
                FrameOutcome::Failed
            }
        }
    }

    /// Intercepted reset notification
    ///
    /// Releases device resources; returns the state the session is left in,
    /// which is never `Ready`.
    pub fn on_reset(&mut self) -> SessionState {
        match self.state {
            SessionState::Ready | SessionState::Initializing => {
                self.backend.invalidate();
                self.state = SessionState::Invalidated;
                tracing::info!("Overlay invalidated for device reset");
            }
            SessionState::Uninitialized | SessionState::Invalidated | SessionState::TornDown => {}
        }
        self.state
    }

    /// Unbind the window and release everything
    ///
    /// Every step runs; the first error is returned.
    pub fn teardown(&mut self) -> Result<(), OverlayError> {
        if self.state == SessionState::TornDown {
            return Ok(());
        }

        let result = self.unbind();
        self.backend.shutdown();
        self.state = SessionState::TornDown;

        tracing::info!("Overlay session torn down after {} frames", self.frames);
        result
    }

    fn initialize(&mut self, device: B::Device) -> Result<(), OverlayError> {
        let previous = self.state;
        self.state = SessionState::Initializing;

        match self.try_initialize(device) {
            Ok(window) => {
                self.state = SessionState::Ready;
                tracing::info!("Overlay ready on window {}", window);
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    fn try_initialize(&mut self, device: B::Device) -> Result<WindowHandle, OverlayError> {
        let window = self.backend.window_for(device)?;
        self.bind(window)?;
        self.backend.init(device, window)?;
        Ok(window)
    }

    fn render(&mut self, device: B::Device) -> Result<FrameOutcome, OverlayError> {
        self.backend.device_ready(device)?;

        let window = self
            .bound_window
            .ok_or_else(|| OverlayError::Window("no window bound".to_string()))?;
        let visible = self.is_visible();

        let mut guard = RenderStateGuard::capture(&mut self.backend, device)?;
        guard.backend().apply_baseline(device, window)?;
        if visible {
            guard.backend().draw(device)?;
        }
        guard.finish()?;

        self.frames += 1;
        Ok(if visible {
            FrameOutcome::Drawn
        } else {
            FrameOutcome::Hidden
        })
    }

    /// Install the message handlers and the window procedure
    fn bind(&mut self, window: WindowHandle) -> Result<(), OverlayError> {
        if self.bound_window == Some(window) && self.subclass.is_installed() {
            return Ok(());
        }
        if self.bound_window.is_some() {
            tracing::info!("Rebinding overlay to window {}", window);
            self.unbind()?;
        }

        let input = self.input.clone();
        self.handlers.push(self.chain.push(move |message| {
            input.lock().handle(message);
            Disposition::Continue
        }));

        let tracker = Mutex::new(HotkeyTracker::new(self.options.hotkey));
        let visible = self.visible.clone();
        let input = self.input.clone();
        let source = self.options.modifiers;
        self.handlers.push(self.chain.push(move |message| {
            let modifiers = match source {
                Some(read) => read(),
                None => input.lock().modifiers(),
            };
            if tracker.lock().on_message(message, modifiers) {
                let was_visible = visible.fetch_xor(true, Ordering::SeqCst);
                tracing::info!("Overlay {}", if was_visible { "hidden" } else { "shown" });
                Disposition::Claimed(1)
            } else {
                Disposition::Continue
            }
        }));

        if let Err(e) = self.subclass.install(window) {
            self.remove_handlers();
            return Err(e);
        }

        self.bound_window = Some(window);
        tracing::debug!(
            "Bound window {} (toggle with {})",
            window,
            self.options.hotkey
        );
        Ok(())
    }

    fn unbind(&mut self) -> Result<(), OverlayError> {
        self.remove_handlers();
        self.bound_window = None;

        if self.subclass.is_installed() {
            self.subclass.uninstall()?;
        }
        Ok(())
    }

    fn remove_handlers(&mut self) {
        for key in self.handlers.drain(..) {
            self.chain.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::chain::{msg, WindowMessage};
    use crate::overlay::hotkey::vk;
    use crate::overlay::input::MAX_PENDING_CHARS;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    const HOST_STATE: u32 = 7;
    const BASELINE_STATE: u32 = 999;
    const WINDOW: WindowHandle = WindowHandle(0x42);

    #[derive(Default)]
    struct Recorder {
        render_state: u32,
        calls: Vec<&'static str>,
        inits: usize,
        draws: usize,
        fail_window: bool,
        fail_draw: bool,
        panic_draw: bool,
        lost: bool,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                render_state: HOST_STATE,
                ..Default::default()
            }
        }
    }

    impl OverlayBackend for Recorder {
        type Device = ();
        type Snapshot = u32;

        fn window_for(&mut self, _: ()) -> Result<WindowHandle, OverlayError> {
            if self.fail_window {
                return Err(OverlayError::Window("no focus window".into()));
            }
            Ok(WINDOW)
        }

        fn device_ready(&mut self, _: ()) -> Result<(), OverlayError> {
            if self.lost {
                return Err(OverlayError::DeviceLost);
            }
            Ok(())
        }

        fn init(&mut self, _: (), _: WindowHandle) -> Result<(), OverlayError> {
            self.calls.push("init");
            self.inits += 1;
            Ok(())
        }

        fn capture_state(&mut self, _: ()) -> Result<u32, OverlayError> {
            self.calls.push("capture");
            Ok(self.render_state)
        }

        fn apply_baseline(&mut self, _: (), _: WindowHandle) -> Result<(), OverlayError> {
            self.calls.push("baseline");
            self.render_state = BASELINE_STATE;
            Ok(())
        }

        fn draw(&mut self, _: ()) -> Result<(), OverlayError> {
            self.calls.push("draw");
            if self.panic_draw {
                panic!("draw exploded");
            }
            if self.fail_draw {
                return Err(OverlayError::Draw("vertex buffer lost".into()));
            }
            self.draws += 1;
            Ok(())
        }

        fn restore_state(&mut self, _: (), snapshot: u32) -> Result<(), OverlayError> {
            self.calls.push("restore");
            self.render_state = snapshot;
            Ok(())
        }

        fn invalidate(&mut self) {
            self.calls.push("invalidate");
        }

        fn shutdown(&mut self) {
            self.calls.push("shutdown");
        }
    }

    #[derive(Default)]
    struct FakeSubclass {
        installed: Option<WindowHandle>,
        installs: usize,
    }

    impl WindowSubclass for FakeSubclass {
        fn install(&mut self, window: WindowHandle) -> Result<(), OverlayError> {
            self.installed = Some(window);
            self.installs += 1;
            Ok(())
        }

        fn uninstall(&mut self) -> Result<(), OverlayError> {
            self.installed = None;
            Ok(())
        }

        fn is_installed(&self) -> bool {
            self.installed.is_some()
        }
    }

    type TestSession = OverlayRenderSession<Recorder, FakeSubclass>;

    fn session() -> TestSession {
        OverlayRenderSession::new(
            Recorder::new(),
            FakeSubclass::default(),
            Arc::new(MessageChain::new()),
            SessionOptions::default(),
        )
    }

    fn send(session: &TestSession, msg: u32, key: u32) -> isize {
        let message = WindowMessage::new(WINDOW, msg, key as usize, 0);
        session.chain().dispatch(&message, |_| 0)
    }

    #[test]
    fn test_first_frame_initializes_and_draws() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::Uninitialized);

        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Drawn);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.bound_window(), Some(WINDOW));
        assert_eq!(session.subclass().installed, Some(WINDOW));
        assert_eq!(session.chain().len(), 2);

        let backend = session.backend();
        assert_eq!(backend.calls, vec!["init", "capture", "baseline", "draw", "restore"]);
        assert_eq!(backend.render_state, HOST_STATE);
    }

    #[test]
    fn test_reset_invalidates_then_reinitializes() {
        let mut session = session();
        session.on_end_of_frame(());

        assert_eq!(session.on_reset(), SessionState::Invalidated);
        assert!(!session.is_ready());
        assert_eq!(session.backend().calls.last(), Some(&"invalidate"));

        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Drawn);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.backend().inits, 2);
        // Window stays bound across resets
        assert_eq!(session.subclass().installs, 1);
    }

    #[test]
    fn test_reset_before_first_frame() {
        let mut session = session();
        assert_eq!(session.on_reset(), SessionState::Uninitialized);
        assert!(session.backend().calls.is_empty());
    }

    #[test]
    fn test_draw_error_still_restores_state() {
        let mut session = session();
        session.backend_mut().fail_draw = true;

        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Failed);
        assert_eq!(session.backend().render_state, HOST_STATE);
        assert_eq!(session.backend().calls.last(), Some(&"restore"));
        // Frame failures do not leave Ready
        assert_eq!(session.state(), SessionState::Ready);

        session.backend_mut().fail_draw = false;
        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Drawn);
    }

    #[test]
    fn test_draw_panic_still_restores_state() {
        let mut session = session();
        session.backend_mut().panic_draw = true;

        let result = catch_unwind(AssertUnwindSafe(|| session.on_end_of_frame(())));
        assert!(result.is_err());
        assert_eq!(session.backend().render_state, HOST_STATE);
        assert_eq!(session.backend().calls.last(), Some(&"restore"));
    }

    #[test]
    fn test_hotkey_toggles_visibility() {
        let mut session = session();
        session.on_end_of_frame(());
        assert!(session.is_visible());

        // Without shift the key passes through
        assert_eq!(send(&session, msg::WM_KEYDOWN, vk::F9), 0);
        send(&session, msg::WM_KEYUP, vk::F9);
        assert!(session.is_visible());

        send(&session, msg::WM_KEYDOWN, vk::SHIFT);
        assert_eq!(send(&session, msg::WM_KEYDOWN, vk::F9), 1);
        assert!(!session.is_visible());

        // Held key does not toggle back
        assert_eq!(send(&session, msg::WM_KEYDOWN, vk::F9), 0);
        assert!(!session.is_visible());

        let draws = session.backend().draws;
        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Hidden);
        assert_eq!(session.backend().draws, draws);
        assert_eq!(session.backend().render_state, HOST_STATE);

        send(&session, msg::WM_KEYUP, vk::F9);
        send(&session, msg::WM_KEYDOWN, vk::F9);
        assert!(session.is_visible());
    }

    #[test]
    fn test_device_lost_skips_frame() {
        let mut session = session();
        session.on_end_of_frame(());
        session.backend_mut().calls.clear();
        session.backend_mut().lost = true;

        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Skipped);
        assert!(session.backend().calls.is_empty());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_init_failure_retries_next_frame() {
        let mut session = session();
        session.backend_mut().fail_window = true;

        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Failed);
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.chain().is_empty());

        session.backend_mut().fail_window = false;
        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Drawn);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_teardown() {
        let mut session = session();
        session.on_end_of_frame(());

        session.teardown().unwrap();
        assert_eq!(session.state(), SessionState::TornDown);
        assert!(!session.subclass().is_installed());
        assert!(session.chain().is_empty());
        assert_eq!(session.backend().calls.last(), Some(&"shutdown"));

        assert_eq!(session.on_end_of_frame(()), FrameOutcome::Skipped);
        assert_eq!(session.on_reset(), SessionState::TornDown);
        assert!(session.teardown().is_ok());
    }

    #[test]
    fn test_input_captured_through_chain() {
        let mut session = session();
        session.on_end_of_frame(());

        let message = WindowMessage::new(WINDOW, msg::WM_MOUSEMOVE, 0, (20 << 16) | 10);
        session.chain().dispatch(&message, |_| 0);
        assert_eq!(session.input().mouse_pos(), (10, 20));
    }

    #[test]
    fn test_typed_input_stays_bounded_across_frames() {
        let mut session = session();

        for frame in 0..100 {
            session.on_end_of_frame(());
            for i in 0..1000 {
                let c = char::from(b'a' + ((frame + i) % 26) as u8);
                let message = WindowMessage::new(WINDOW, msg::WM_CHAR, c as usize, 0);
                session.chain().dispatch(&message, |_| 0);
            }
        }

        assert_eq!(session.input().take_chars().len(), MAX_PENDING_CHARS);
    }
}
