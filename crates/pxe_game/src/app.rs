use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use pxe_core::time::SystemClock;
use pxe_platform::{Platform, PlatformConfig};
use pxe_render::WindowScreen;

use crate::capture::CaptureSession;
use crate::config::{CaptureConfig, EngineConfig};
use crate::context::{EngineContext, GAME_HEIGHT, GAME_WIDTH};
use crate::dispatcher::EventDispatcher;
use crate::engine::{Engine, EngineError, LoopReport};
use crate::files::FileLoader;

/// Bring up the window, renderer and script VM, then run the loop to completion.
///
/// Subsystems come up in this order and are released in reverse by `Engine`.
pub fn run(entry: &Path, config: &EngineConfig) -> Result<LoopReport, EngineError> {
    let source = fs::read_to_string(entry).map_err(|source| EngineError::EntryUnreadable {
        path: entry.to_path_buf(),
        source,
    })?;

    let platform = Platform::new(PlatformConfig {
        title: config.title.clone(),
        width: GAME_WIDTH,
        height: GAME_HEIGHT,
        scale: config.scale,
    })?;
    let screen = WindowScreen::new(platform.window(), GAME_WIDTH, GAME_HEIGHT)?;
    let files = FileLoader::new(Box::new(platform.signal_sender()));
    let ctx = EngineContext::new(GAME_WIDTH, GAME_HEIGHT, files);

    let dispatcher = match config.quit_key {
        Some(key) => EventDispatcher::with_predicate(EventDispatcher::key_press(key)),
        None => EventDispatcher::without_quit_key(),
    };

    let mut engine = Engine::new(
        ctx,
        screen,
        platform,
        SystemClock::new(),
        dispatcher,
        config.title.clone(),
    )?;
    engine.load(&entry.display().to_string(), &source)?;

    engine.run(open_capture(&config.capture))
}

/// A capture that cannot be opened is logged and skipped; the game still runs.
fn open_capture(config: &CaptureConfig) -> Option<CaptureSession<BufWriter<File>>> {
    if !config.enabled {
        return None;
    }
    match CaptureSession::create(&config.settings(), GAME_WIDTH, GAME_HEIGHT) {
        Ok(session) => Some(session),
        Err(err) => {
            log::error!("Capture disabled: {err}");
            None
        }
    }
}
