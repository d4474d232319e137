pub mod events;
pub mod window;

use thiserror::Error;

pub use events::{Platform, ProxySender};
pub use window::PlatformConfig;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to create event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("the OS never resumed the application; no window was created")]
    NoWindow,
}
