use pxe_core::event::{EngineEvent, EventSource, SignalData, LOAD_FILE_COMPLETE};
use pxe_core::input::Key;

use crate::context::EngineContext;

type TerminationPredicate = Box<dyn Fn(&EngineEvent) -> bool>;

/// Drains pending platform events into the engine context once per iteration.
pub struct EventDispatcher {
    terminate_on: Option<TerminationPredicate>,
}

impl EventDispatcher {
    /// Default policy: a fresh (non-repeat) Escape press ends the run.
    pub fn new() -> Self {
        Self::with_predicate(Self::key_press(Key::Escape))
    }

    pub fn with_predicate(predicate: impl Fn(&EngineEvent) -> bool + 'static) -> Self {
        Self {
            terminate_on: Some(Box::new(predicate)),
        }
    }

    /// Only window-close requests end the run.
    pub fn without_quit_key() -> Self {
        Self { terminate_on: None }
    }

    /// Matches a key-down of `key` with a repeat count of zero.
    pub fn key_press(key: Key) -> impl Fn(&EngineEvent) -> bool {
        move |event| matches!(event, EngineEvent::KeyDown(e) if e.key == key && e.repeat == 0)
    }

    /// Process everything currently queued. Returns `false` once the run should end.
    ///
    /// The queue is always drained to empty, even after a termination request.
    pub fn drain(&self, source: &mut impl EventSource, ctx: &mut EngineContext) -> bool {
        source.pump();
        let mut keep_running = true;
        while let Some(event) = source.poll_event() {
            if self.terminate_on.as_ref().is_some_and(|p| p(&event)) {
                log::info!("Quit key pressed");
                keep_running = false;
                continue;
            }
            match event {
                EngineEvent::Quit => {
                    log::info!("Quit requested");
                    keep_running = false;
                }
                EngineEvent::KeyDown(e) => ctx.input.key_down(e.key),
                EngineEvent::KeyUp(e) => ctx.input.key_up(e.key),
                EngineEvent::User(signal) => match (signal.code, signal.data) {
                    (LOAD_FILE_COMPLETE, SignalData::FileLoad(outcome)) => {
                        ctx.files.complete(outcome)
                    }
                    (code, data) => {
                        log::debug!("Unhandled user signal {code}: {:?}", data)
                    }
                },
            }
        }
        keep_running
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
