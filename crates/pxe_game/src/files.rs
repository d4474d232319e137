//! Asynchronous file reads for scripts.
//!
//! Each request is served by a short-lived worker thread that reads the file and
//! posts a `LOAD_FILE_COMPLETE` user signal. Workers never touch engine state:
//! the result only becomes visible once the dispatcher routes the signal to
//! `FileLoader::complete` on the main thread.

use std::collections::HashMap;
use std::path::PathBuf;

use pxe_core::event::{FileLoadOutcome, SignalSender, UserSignal};

#[derive(Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Ready(Result<Vec<u8>, String>),
    Unknown,
}

pub struct FileLoader {
    sender: Box<dyn SignalSender>,
    next_id: u64,
    pending: HashMap<u64, PathBuf>,
    completed: HashMap<u64, Result<Vec<u8>, String>>,
}

impl FileLoader {
    pub fn new(sender: Box<dyn SignalSender>) -> Self {
        Self {
            sender,
            next_id: 0,
            pending: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    /// Start reading `path` in the background. Returns the request id to poll.
    pub fn request(&mut self, path: PathBuf) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let sender = self.sender.clone_box();
        let worker_path = path.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("pxe-file-load-{id}"))
            .spawn(move || {
                let result = std::fs::read(&worker_path)
                    .map_err(|err| format!("{}: {err}", worker_path.display()));
                let outcome = FileLoadOutcome {
                    request_id: id,
                    path: worker_path,
                    result,
                };
                if let Err(err) = sender.send(UserSignal::file_loaded(outcome)) {
                    log::warn!("Dropping result of file load {id}: {err}");
                }
            });

        match spawned {
            Ok(_) => {
                log::debug!("File load {id} started: {}", path.display());
                self.pending.insert(id, path);
            }
            Err(err) => {
                log::error!("Could not start file load for {}: {err}", path.display());
                self.completed
                    .insert(id, Err(format!("failed to start loader thread: {err}")));
            }
        }
        id
    }

    /// Completion handler for `LOAD_FILE_COMPLETE` signals.
    pub fn complete(&mut self, outcome: FileLoadOutcome) {
        if self.pending.remove(&outcome.request_id).is_none() {
            log::warn!(
                "Ignoring completion for unknown file load {} ({})",
                outcome.request_id,
                outcome.path.display()
            );
            return;
        }
        match &outcome.result {
            Ok(bytes) => log::debug!(
                "File load {} finished: {} ({} bytes)",
                outcome.request_id,
                outcome.path.display(),
                bytes.len()
            ),
            Err(err) => log::warn!("File load {} failed: {err}", outcome.request_id),
        }
        self.completed.insert(outcome.request_id, outcome.result);
    }

    /// A finished result is handed out exactly once.
    pub fn poll(&mut self, id: u64) -> LoadStatus {
        if let Some(result) = self.completed.remove(&id) {
            LoadStatus::Ready(result)
        } else if self.pending.contains_key(&id) {
            LoadStatus::Pending
        } else {
            LoadStatus::Unknown
        }
    }
}
