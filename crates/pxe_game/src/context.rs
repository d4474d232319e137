use pxe_core::framebuffer::FrameBuffer;
use pxe_core::input::InputState;

use crate::files::FileLoader;

/// Logical resolution scripts draw at.
pub const GAME_WIDTH: u32 = 320;
pub const GAME_HEIGHT: u32 = 240;

/// Engine state shared with scripts.
///
/// The script host keeps it bound to the VM for the whole run; the loop
/// borrows it between script calls. The event dispatcher is the only writer of
/// `input`, script draw calls the only writers of `framebuffer`.
pub struct EngineContext {
    pub framebuffer: FrameBuffer,
    pub input: InputState,
    pub files: FileLoader,
}

impl EngineContext {
    pub fn new(width: u32, height: u32, files: FileLoader) -> Self {
        Self {
            framebuffer: FrameBuffer::new(width, height),
            input: InputState::new(),
            files,
        }
    }

    pub fn width(&self) -> u32 {
        self.framebuffer.width()
    }

    pub fn height(&self) -> u32 {
        self.framebuffer.height()
    }
}
