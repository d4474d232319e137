//! Event records produced by the OS layer and consumed once by the dispatcher.

use std::path::PathBuf;

use crate::input::Key;

/// Application-defined user-signal code: an asynchronous file load finished.
pub const LOAD_FILE_COMPLETE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    /// Number of OS auto-repeats preceding this event; 0 for a fresh press.
    pub repeat: u32,
}

#[derive(Debug)]
pub enum EngineEvent {
    Quit,
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    User(UserSignal),
}

/// An application-defined event carrying a code and its payload.
#[derive(Debug)]
pub struct UserSignal {
    pub code: i32,
    pub data: SignalData,
}

#[derive(Debug)]
pub enum SignalData {
    Empty,
    FileLoad(FileLoadOutcome),
}

/// Result of one asynchronous file read.
pub struct FileLoadOutcome {
    pub request_id: u64,
    pub path: PathBuf,
    pub result: Result<Vec<u8>, String>,
}

impl std::fmt::Debug for FileLoadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLoadOutcome")
            .field("request_id", &self.request_id)
            .field("path", &self.path)
            .field("bytes", &self.result.as_ref().map(Vec::len))
            .finish()
    }
}

impl UserSignal {
    pub fn file_loaded(outcome: FileLoadOutcome) -> Self {
        Self {
            code: LOAD_FILE_COMPLETE,
            data: SignalData::FileLoad(outcome),
        }
    }
}

/// Non-blocking source of engine events.
pub trait EventSource {
    /// Collect whatever the OS has queued. Called once per iteration before draining.
    fn pump(&mut self) {}

    /// Next pending event, or `None` once the queue is empty.
    fn poll_event(&mut self) -> Option<EngineEvent>;
}

/// Posts user signals back to the main loop from other threads.
pub trait SignalSender: Send {
    fn send(&self, signal: UserSignal) -> Result<(), String>;

    fn clone_box(&self) -> Box<dyn SignalSender>;
}

impl SignalSender for std::sync::mpsc::Sender<UserSignal> {
    fn send(&self, signal: UserSignal) -> Result<(), String> {
        std::sync::mpsc::Sender::send(self, signal).map_err(|_| "receiver dropped".to_string())
    }

    fn clone_box(&self) -> Box<dyn SignalSender> {
        Box::new(self.clone())
    }
}
