//! winit-backed event source.
//!
//! The engine owns its main loop, so winit is driven with `pump_app_events`
//! and a zero timeout: each pump hands over whatever the OS has queued and
//! returns immediately. Window and user events are translated into
//! `EngineEvent`s and buffered until the dispatcher drains them.
//!
//! Asynchronous completions reach the loop only through the event loop
//! proxy, which wakes the loop with a `UserSignal`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use pxe_core::event::{EngineEvent, EventSource, KeyEvent, SignalSender, UserSignal};
use pxe_core::input::Key;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

use crate::window::{create_window, PlatformConfig};
use crate::PlatformError;

/// Pumps allowed for the OS to deliver the initial resume before giving up.
const STARTUP_PUMPS: u32 = 200;
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(5);

struct Collector {
    config: PlatformConfig,
    window: Option<Arc<Window>>,
    window_error: Option<PlatformError>,
    queue: VecDeque<EngineEvent>,
}

impl ApplicationHandler<UserSignal> for Collector {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.window_error.is_some() {
            return;
        }
        match create_window(event_loop, &self.config) {
            Ok(window) => {
                let (w, h) = self.config.window_size();
                log::info!("Window created: {}x{}", w, h);
                self.window = Some(window);
            }
            Err(err) => {
                log::error!("Window creation failed: {err}");
                self.window_error = Some(err);
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.queue.push_back(EngineEvent::Quit);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(translated) = translate_key_event(&event) {
                    self.queue.push_back(translated);
                }
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, signal: UserSignal) {
        self.queue.push_back(EngineEvent::User(signal));
    }
}

/// Owns the OS event loop and the window created on its first resume.
///
/// Field order is drop order: the window goes before the event loop.
pub struct Platform {
    window: Arc<Window>,
    collector: Collector,
    event_loop: EventLoop<UserSignal>,
}

impl Platform {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let mut event_loop = EventLoop::<UserSignal>::with_user_event().build()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut collector = Collector {
            config,
            window: None,
            window_error: None,
            queue: VecDeque::new(),
        };

        for _ in 0..STARTUP_PUMPS {
            let status = event_loop.pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut collector);
            if let Some(err) = collector.window_error.take() {
                return Err(err);
            }
            if collector.window.is_some() || matches!(status, PumpStatus::Exit(_)) {
                break;
            }
        }

        let window = collector.window.clone().ok_or(PlatformError::NoWindow)?;
        Ok(Self {
            window,
            collector,
            event_loop,
        })
    }

    pub fn window(&self) -> Arc<Window> {
        self.window.clone()
    }

    /// Sender for worker threads; each signal wakes the event loop.
    pub fn signal_sender(&self) -> ProxySender {
        ProxySender(self.event_loop.create_proxy())
    }
}

impl EventSource for Platform {
    fn pump(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.collector);
        if let PumpStatus::Exit(code) = status {
            log::info!("Event loop exited with code {code}");
            self.collector.queue.push_back(EngineEvent::Quit);
        }
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.collector.queue.pop_front()
    }
}

/// `SignalSender` over the winit proxy; safe to move into worker threads.
pub struct ProxySender(EventLoopProxy<UserSignal>);

impl SignalSender for ProxySender {
    fn send(&self, signal: UserSignal) -> Result<(), String> {
        self.0
            .send_event(signal)
            .map_err(|_| "event loop closed".to_string())
    }

    fn clone_box(&self) -> Box<dyn SignalSender> {
        Box::new(ProxySender(self.0.clone()))
    }
}

fn translate_key_event(event: &winit::event::KeyEvent) -> Option<EngineEvent> {
    let PhysicalKey::Code(code) = event.physical_key else {
        return None;
    };
    let Some(key) = map_key(code) else {
        log::trace!("Unmapped key {:?}", code);
        return None;
    };
    let record = KeyEvent {
        key,
        repeat: u32::from(event.repeat),
    };
    Some(match event.state {
        ElementState::Pressed => EngineEvent::KeyDown(record),
        ElementState::Released => EngineEvent::KeyUp(record),
    })
}

pub fn map_key(key_code: KeyCode) -> Option<Key> {
    match key_code {
        KeyCode::ArrowLeft => Some(Key::Left),
        KeyCode::ArrowRight => Some(Key::Right),
        KeyCode::ArrowUp => Some(Key::Up),
        KeyCode::ArrowDown => Some(Key::Down),
        KeyCode::Space => Some(Key::Space),
        KeyCode::Enter | KeyCode::NumpadEnter => Some(Key::Enter),
        KeyCode::Escape => Some(Key::Escape),
        KeyCode::Tab => Some(Key::Tab),
        KeyCode::Backspace => Some(Key::Backspace),
        KeyCode::ShiftLeft | KeyCode::ShiftRight => Some(Key::Shift),
        KeyCode::ControlLeft | KeyCode::ControlRight => Some(Key::Ctrl),
        KeyCode::KeyA => Some(Key::A),
        KeyCode::KeyB => Some(Key::B),
        KeyCode::KeyC => Some(Key::C),
        KeyCode::KeyD => Some(Key::D),
        KeyCode::KeyE => Some(Key::E),
        KeyCode::KeyF => Some(Key::F),
        KeyCode::KeyG => Some(Key::G),
        KeyCode::KeyH => Some(Key::H),
        KeyCode::KeyI => Some(Key::I),
        KeyCode::KeyJ => Some(Key::J),
        KeyCode::KeyK => Some(Key::K),
        KeyCode::KeyL => Some(Key::L),
        KeyCode::KeyM => Some(Key::M),
        KeyCode::KeyN => Some(Key::N),
        KeyCode::KeyO => Some(Key::O),
        KeyCode::KeyP => Some(Key::P),
        KeyCode::KeyQ => Some(Key::Q),
        KeyCode::KeyR => Some(Key::R),
        KeyCode::KeyS => Some(Key::S),
        KeyCode::KeyT => Some(Key::T),
        KeyCode::KeyU => Some(Key::U),
        KeyCode::KeyV => Some(Key::V),
        KeyCode::KeyW => Some(Key::W),
        KeyCode::KeyX => Some(Key::X),
        KeyCode::KeyY => Some(Key::Y),
        KeyCode::KeyZ => Some(Key::Z),
        KeyCode::Digit0 => Some(Key::Digit0),
        KeyCode::Digit1 => Some(Key::Digit1),
        KeyCode::Digit2 => Some(Key::Digit2),
        KeyCode::Digit3 => Some(Key::Digit3),
        KeyCode::Digit4 => Some(Key::Digit4),
        KeyCode::Digit5 => Some(Key::Digit5),
        KeyCode::Digit6 => Some(Key::Digit6),
        KeyCode::Digit7 => Some(Key::Digit7),
        KeyCode::Digit8 => Some(Key::Digit8),
        KeyCode::Digit9 => Some(Key::Digit9),
        _ => None,
    }
}
