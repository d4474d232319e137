//! Main loop orchestration.
//!
//! One iteration, strictly in this order:
//!
//!   1. read the clock and feed the scheduler's lag accumulator
//!   2. drain all pending events into the engine context
//!   3. at most one `Game.update()` tick, then clear edge-triggered input
//!   4. `AudioEngine_internal.update()`, unconditionally
//!   5. `Game.draw(fraction)` with the scheduler's interpolation fraction
//!   6. present the framebuffer, then title the window with the fps implied by
//!      this iteration's own duration (clock read again after present)
//!   7. append the frame to the capture, if one is recording
//!
//! A quit request is honoured at the top of the next iteration, so the current
//! one always completes. A failing script call ends the loop on the spot.
//!
//! Teardown runs once on every exit path: call handles, then the VM, then the
//! screen, the event source and finally the engine context.

use std::io::Write;
use std::path::PathBuf;

use pxe_core::event::EventSource;
use pxe_core::framebuffer::FrameBuffer;
use pxe_core::time::{instantaneous_fps, Clock, FrameScheduler};
use pxe_platform::PlatformError;
use pxe_render::{RenderError, Screen};
use thiserror::Error;

use crate::capture::CaptureSession;
use crate::context::EngineContext;
use crate::dispatcher::EventDispatcher;
use crate::script_host::{Method, Outcome, Receiver, ScriptError, ScriptHost};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot read entry script {path}: {source}")]
    EntryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("engine has already been torn down")]
    TornDown,
}

/// Counters for a finished run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub iterations: u64,
    pub update_ticks: u64,
    pub captured_frames: u64,
}

pub struct Engine<S: Screen, E: EventSource, C: Clock> {
    host: Option<ScriptHost>,
    screen: Option<S>,
    events: Option<E>,
    clock: C,
    dispatcher: EventDispatcher,
    title: String,
}

impl<S: Screen, E: EventSource, C: Clock> Engine<S, E, C> {
    pub fn new(
        ctx: EngineContext,
        screen: S,
        events: E,
        clock: C,
        dispatcher: EventDispatcher,
        title: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let host = ScriptHost::new(ctx)?;
        Ok(Self {
            host: Some(host),
            screen: Some(screen),
            events: Some(events),
            clock,
            dispatcher,
            title: title.into(),
        })
    }

    /// Run the bootstrap and entry script, resolve handles and call `Game.init()`.
    pub fn load(&mut self, entry_name: &str, source: &str) -> Result<(), EngineError> {
        let host = self.host.as_mut().ok_or(EngineError::TornDown)?;
        host.load_bootstrap()?;
        host.load_entry(entry_name, source)?;
        host.resolve_handles()?;
        host.start()?;
        host.invoke(Receiver::Game, Method::Init, None)?;
        Ok(())
    }

    /// Loop until quit or failure. The capture, if any, is finalized exactly once
    /// whichever way the loop ends.
    pub fn run<W: Write>(
        &mut self,
        capture: Option<CaptureSession<W>>,
    ) -> Result<LoopReport, EngineError> {
        let mut report = LoopReport::default();
        let mut recorder = Recorder {
            session: capture,
            failed: false,
        };

        if let Some(screen) = self.screen.as_mut() {
            screen.show();
        }
        let result = self.run_loop(&mut recorder, &mut report);
        report.captured_frames = recorder.finish();

        let outcome = if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        if let Some(host) = self.host.as_mut() {
            host.stop(outcome);
        }

        result?;
        log::info!(
            "Loop finished after {} iterations ({} update ticks)",
            report.iterations,
            report.update_ticks
        );
        Ok(report)
    }

    fn run_loop<W: Write>(
        &mut self,
        recorder: &mut Recorder<W>,
        report: &mut LoopReport,
    ) -> Result<(), EngineError> {
        let (Some(host), Some(screen), Some(events)) = (
            self.host.as_mut(),
            self.screen.as_mut(),
            self.events.as_mut(),
        ) else {
            return Err(EngineError::TornDown);
        };

        let mut scheduler = FrameScheduler::new(self.clock.now_ms());
        let mut running = true;

        while running {
            let start_ms = self.clock.now_ms();
            scheduler.begin_frame(start_ms);

            running = {
                let mut ctx = host.context_mut()?;
                self.dispatcher.drain(events, &mut ctx)
            };

            if scheduler.should_step() {
                host.invoke(Receiver::Game, Method::Update, None)?;
                host.context_mut()?.input.end_frame();
                report.update_ticks += 1;
            }

            host.invoke(Receiver::AudioEngine, Method::Update, None)?;
            host.invoke(Receiver::Game, Method::Draw, Some(scheduler.interpolation()))?;

            let ctx = host.context()?;
            screen.present(&ctx.framebuffer)?;
            let iteration_ms = self.clock.now_ms().wrapping_sub(start_ms);
            screen.set_title(&format!(
                "{} - {:.2} fps",
                self.title,
                instantaneous_fps(iteration_ms)
            ));
            recorder.append(&ctx.framebuffer);
            drop(ctx);

            report.iterations += 1;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        let ctx = self.host.take().and_then(ScriptHost::shutdown);
        if let Some(screen) = self.screen.take() {
            drop(screen);
            log::debug!("Screen released");
        }
        drop(self.events.take());
        drop(ctx);
    }
}

impl<S: Screen, E: EventSource, C: Clock> Drop for Engine<S, E, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Best-effort capture: the first write error stops recording, but the file
/// is still closed at the end.
struct Recorder<W: Write> {
    session: Option<CaptureSession<W>>,
    failed: bool,
}

impl<W: Write> Recorder<W> {
    fn append(&mut self, frame: &FrameBuffer) {
        if self.failed {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.append(frame) {
                log::warn!("Capture disabled after write error: {err}");
                self.failed = true;
            }
        }
    }

    fn finish(&mut self) -> u64 {
        let Some(session) = self.session.take() else {
            return 0;
        };
        let frames = session.frames_written();
        if let Err(err) = session.finish() {
            log::warn!("Failed to finalize capture: {err}");
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSettings;
    use crate::context::{GAME_HEIGHT, GAME_WIDTH};
    use crate::dispatcher::tests::key_down;
    use crate::files::FileLoader;
    use mlua::prelude::*;
    use pxe_core::event::EngineEvent;
    use pxe_core::input::Key;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;
    use std::sync::mpsc;

    /// The loop reads the clock once when it starts, then twice per iteration:
    /// at the top and again after present. Each read after the first advances
    /// by the next scripted delta, or 8ms once they run out.
    struct ScriptedClock {
        now: u32,
        started: bool,
        deltas: VecDeque<u32>,
    }

    impl ScriptedClock {
        /// One `(gap, work)` pair per iteration: `gap` passes before the
        /// iteration begins, `work` between its start and the end of present.
        fn frames(frames: &[(u32, u32)]) -> Self {
            Self {
                now: 1000,
                started: false,
                deltas: frames.iter().flat_map(|&(gap, work)| [gap, work]).collect(),
            }
        }

        fn steady() -> Self {
            Self::frames(&[])
        }
    }

    impl Clock for ScriptedClock {
        fn now_ms(&mut self) -> u32 {
            if self.started {
                let delta = self.deltas.pop_front().unwrap_or(8);
                self.now = self.now.wrapping_add(delta);
            }
            self.started = true;
            self.now
        }
    }

    /// Writer whose bytes stay readable after the capture session consumes it.
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl io::Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// One batch per pump; once the batches run out every pump yields `Quit`.
    struct FakeEvents {
        batches: VecDeque<Vec<EngineEvent>>,
        queue: VecDeque<EngineEvent>,
    }

    impl FakeEvents {
        fn new(batches: Vec<Vec<EngineEvent>>) -> Self {
            Self {
                batches: batches.into(),
                queue: VecDeque::new(),
            }
        }

        fn iterations(count: usize) -> Self {
            Self::new((0..count.saturating_sub(1)).map(|_| Vec::new()).collect())
        }
    }

    impl EventSource for FakeEvents {
        fn pump(&mut self) {
            match self.batches.pop_front() {
                Some(batch) => self.queue.extend(batch),
                None => self.queue.push_back(EngineEvent::Quit),
            }
        }

        fn poll_event(&mut self) -> Option<EngineEvent> {
            self.queue.pop_front()
        }
    }

    #[derive(Default)]
    struct ScreenLog {
        presented: Vec<u32>,
        titles: Vec<String>,
        shown: bool,
        drops: u32,
    }

    struct FakeScreen(Rc<RefCell<ScreenLog>>);

    impl Screen for FakeScreen {
        fn present(&mut self, frame: &FrameBuffer) -> Result<(), RenderError> {
            self.0
                .borrow_mut()
                .presented
                .push(frame.pixel(0, 0).unwrap_or(0));
            Ok(())
        }

        fn set_title(&mut self, title: &str) {
            self.0.borrow_mut().titles.push(title.to_string());
        }

        fn show(&mut self) {
            self.0.borrow_mut().shown = true;
        }
    }

    impl Drop for FakeScreen {
        fn drop(&mut self) {
            self.0.borrow_mut().drops += 1;
        }
    }

    const COUNTING_GAME: &str = r#"
updates, draws, audio_ticks, presses = 0, 0, 0, 0
fractions = {}
fail_on_update = -1

local base_audio_update = AudioEngine_internal.update
function AudioEngine_internal:update()
  audio_ticks = audio_ticks + 1
  base_audio_update(self)
end

Game = {}
function Game:init()
  canvas.cls(0xFF000000)
end
function Game:update()
  updates = updates + 1
  if updates == fail_on_update then error("update exploded") end
  if keyboard.justPressed("space") then presses = presses + 1 end
end
function Game:draw(fraction)
  draws = draws + 1
  fractions[draws] = fraction
  canvas.pset(0, 0, 0xFF000000 + draws)
end
"#;

    type TestEngine = Engine<FakeScreen, FakeEvents, ScriptedClock>;

    fn build(events: FakeEvents, clock: ScriptedClock) -> (TestEngine, Rc<RefCell<ScreenLog>>) {
        build_with(events, clock, EventDispatcher::new())
    }

    fn build_with(
        events: FakeEvents,
        clock: ScriptedClock,
        dispatcher: EventDispatcher,
    ) -> (TestEngine, Rc<RefCell<ScreenLog>>) {
        let (tx, _rx) = mpsc::channel();
        let ctx = EngineContext::new(GAME_WIDTH, GAME_HEIGHT, FileLoader::new(Box::new(tx)));
        let log = Rc::new(RefCell::new(ScreenLog::default()));
        let engine = Engine::new(
            ctx,
            FakeScreen(log.clone()),
            events,
            clock,
            dispatcher,
            "Test",
        )
        .expect("engine should build");
        (engine, log)
    }

    fn global<T: FromLua>(engine: &TestEngine, name: &str) -> T {
        engine
            .host
            .as_ref()
            .expect("host alive")
            .global(name)
            .expect("global should exist")
    }

    fn run_plain(engine: &mut TestEngine) -> Result<LoopReport, EngineError> {
        engine.run::<Vec<u8>>(None)
    }

    #[test]
    fn first_iteration_has_no_update_tick() {
        let (mut engine, log) = build(FakeEvents::iterations(1), ScriptedClock::frames(&[(0, 0)]));
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let report = run_plain(&mut engine).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.update_ticks, 0);
        assert_eq!(global::<i64>(&engine, "updates"), 0);
        assert_eq!(global::<i64>(&engine, "draws"), 1);
        assert!(log.borrow().shown);
    }

    #[test]
    fn one_tick_per_iteration_at_most() {
        // 100ms elapses before the second iteration, but only one tick is released.
        let (mut engine, _log) = build(
            FakeEvents::iterations(3),
            ScriptedClock::frames(&[(0, 0), (100, 0), (0, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let report = run_plain(&mut engine).unwrap();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.update_ticks, 2);
    }

    #[test]
    fn draw_receives_interpolation_fraction() {
        let (mut engine, _log) = build(
            FakeEvents::iterations(2),
            ScriptedClock::frames(&[(0, 0), (24, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        run_plain(&mut engine).unwrap();
        let fractions: LuaTable = global(&engine, "fractions");
        assert_eq!(fractions.get::<f64>(1).unwrap(), 0.0);
        assert_eq!(fractions.get::<f64>(2).unwrap(), 0.5);
    }

    #[test]
    fn audio_ticks_once_per_iteration() {
        let (mut engine, _log) = build(
            FakeEvents::iterations(5),
            ScriptedClock::frames(&[(0, 0), (3, 0), (40, 0), (2, 0), (16, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let report = run_plain(&mut engine).unwrap();
        assert_eq!(report.iterations, 5);
        assert_eq!(global::<i64>(&engine, "audio_ticks"), 5);
        assert_eq!(global::<i64>(&engine, "draws"), 5);
    }

    #[test]
    fn title_reports_each_iterations_own_duration() {
        // Idle gaps between iterations must not lower the reported rate.
        let (mut engine, log) = build(
            FakeEvents::iterations(3),
            ScriptedClock::frames(&[(500, 4), (12, 9), (7, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        run_plain(&mut engine).unwrap();
        let log = log.borrow();
        assert_eq!(log.presented, vec![0xFF00_0001, 0xFF00_0002, 0xFF00_0003]);
        assert_eq!(
            log.titles,
            vec![
                "Test - 200.00 fps",
                "Test - 100.00 fps",
                "Test - 1000.00 fps",
            ]
        );
    }

    #[test]
    fn update_failure_skips_that_frames_draw() {
        let (mut engine, log) = build(
            FakeEvents::iterations(10),
            ScriptedClock::frames(&[(0, 0), (16, 0), (16, 0), (16, 0)]),
        );
        engine
            .load("game.lua", &format!("{COUNTING_GAME}\nfail_on_update = 3"))
            .unwrap();
        let err = run_plain(&mut engine).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Script(ScriptError::Call {
                method: "update",
                ..
            })
        ));
        // Ticks land on iterations 2, 3 and 4; the fourth iteration never draws.
        assert_eq!(global::<i64>(&engine, "draws"), 3);
        assert_eq!(log.borrow().presented.len(), 3);
    }

    #[test]
    fn update_failure_still_finalizes_capture_and_releases_screen() {
        let (mut engine, log) = build(
            FakeEvents::iterations(10),
            ScriptedClock::frames(&[(0, 0), (16, 0), (16, 0), (16, 0)]),
        );
        engine
            .load("game.lua", &format!("{COUNTING_GAME}\nfail_on_update = 3"))
            .unwrap();
        let sink = SharedSink::default();
        let session = CaptureSession::new(
            sink.clone(),
            GAME_WIDTH,
            GAME_HEIGHT,
            &CaptureSettings::new("unused.gif"),
        )
        .unwrap();

        let err = engine.run(Some(session)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Script(ScriptError::Call {
                method: "update",
                ..
            })
        ));

        // A single trailer right after the last block terminator.
        {
            let bytes = sink.0.borrow();
            assert!(bytes.starts_with(b"GIF89a"));
            assert!(bytes.ends_with(&[0x00, 0x3B]));
        }
        let finalized_len = sink.0.borrow().len();

        drop(engine);
        assert_eq!(log.borrow().drops, 1);
        assert_eq!(log.borrow().presented.len(), 3);
        assert_eq!(sink.0.borrow().len(), finalized_len);
    }

    #[test]
    fn fresh_escape_ends_after_current_iteration() {
        let (mut engine, _log) = build(
            FakeEvents::new(vec![
                vec![key_down(Key::Escape, 1)],
                vec![key_down(Key::Escape, 0)],
                vec![],
                vec![],
            ]),
            ScriptedClock::steady(),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let report = run_plain(&mut engine).unwrap();
        assert_eq!(report.iterations, 2);
        assert_eq!(global::<i64>(&engine, "draws"), 2);
    }

    #[test]
    fn repeated_escape_keeps_running() {
        let (mut engine, _log) = build(
            FakeEvents::new(vec![
                vec![key_down(Key::Escape, 1)],
                vec![key_down(Key::Escape, 2)],
            ]),
            ScriptedClock::steady(),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let report = run_plain(&mut engine).unwrap();
        // The third pump has no batch left and yields Quit.
        assert_eq!(report.iterations, 3);
    }

    #[test]
    fn just_pressed_is_cleared_after_update_tick() {
        let (mut engine, _log) = build(
            FakeEvents::new(vec![vec![key_down(Key::Space, 0)], vec![], vec![]]),
            ScriptedClock::frames(&[(0, 0), (16, 0), (16, 0), (16, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        run_plain(&mut engine).unwrap();
        assert!(global::<i64>(&engine, "updates") >= 2);
        assert_eq!(global::<i64>(&engine, "presses"), 1);
    }

    #[test]
    fn missing_game_class_fails_load_and_releases_screen() {
        let (mut engine, log) = build(FakeEvents::iterations(1), ScriptedClock::steady());
        let err = engine.load("empty.lua", "local nothing = true").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Script(ScriptError::MissingClass("Game"))
        ));
        drop(engine);
        let log = log.borrow();
        assert!(log.presented.is_empty());
        assert_eq!(log.drops, 1);
    }

    #[test]
    fn screen_is_released_exactly_once() {
        let (mut engine, log) = build(FakeEvents::iterations(2), ScriptedClock::steady());
        engine.load("game.lua", COUNTING_GAME).unwrap();
        run_plain(&mut engine).unwrap();
        engine.teardown();
        assert_eq!(log.borrow().drops, 1);
        drop(engine);
        assert_eq!(log.borrow().drops, 1);
        assert_eq!(Rc::strong_count(&log), 1);
    }

    #[test]
    fn run_after_teardown_is_rejected() {
        let (mut engine, _log) = build(FakeEvents::iterations(1), ScriptedClock::steady());
        engine.teardown();
        assert!(matches!(run_plain(&mut engine), Err(EngineError::TornDown)));
    }

    #[test]
    fn capture_records_every_presented_frame() {
        let (mut engine, _log) = build(
            FakeEvents::iterations(3),
            ScriptedClock::frames(&[(0, 0), (16, 0), (16, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let session = CaptureSession::new(
            Vec::new(),
            GAME_WIDTH,
            GAME_HEIGHT,
            &CaptureSettings::new("unused.gif"),
        )
        .unwrap();
        let report = engine.run(Some(session)).unwrap();
        assert_eq!(report.captured_frames, 3);
    }

    #[test]
    fn capture_size_mismatch_does_not_stop_the_loop() {
        let (mut engine, _log) = build(
            FakeEvents::iterations(3),
            ScriptedClock::frames(&[(0, 0), (16, 0), (16, 0)]),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let session =
            CaptureSession::new(Vec::new(), 4, 4, &CaptureSettings::new("unused.gif")).unwrap();
        let report = engine.run(Some(session)).unwrap();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.captured_frames, 0);
    }

    #[test]
    fn window_close_still_works_without_quit_key() {
        let (mut engine, _log) = build_with(
            FakeEvents::new(vec![vec![key_down(Key::Escape, 0)]]),
            ScriptedClock::steady(),
            EventDispatcher::without_quit_key(),
        );
        engine.load("game.lua", COUNTING_GAME).unwrap();
        let report = run_plain(&mut engine).unwrap();
        assert_eq!(report.iterations, 2);
    }
}
