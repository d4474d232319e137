use std::sync::Arc;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

use crate::PlatformError;

pub struct PlatformConfig {
    pub title: String,
    /// Logical framebuffer size; the window is `scale` times larger.
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

impl PlatformConfig {
    pub fn window_size(&self) -> (u32, u32) {
        let scale = self.scale.max(1);
        (self.width * scale, self.height * scale)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "Pixie Engine".to_string(),
            width: 320,
            height: 240,
            scale: 2,
        }
    }
}

/// The window starts hidden; it is shown once the game has initialised.
pub fn create_window(
    event_loop: &ActiveEventLoop,
    config: &PlatformConfig,
) -> Result<Arc<Window>, PlatformError> {
    let (width, height) = config.window_size();
    let attrs = WindowAttributes::default()
        .with_title(&config.title)
        .with_visible(false)
        .with_resizable(true)
        .with_inner_size(winit::dpi::PhysicalSize::new(width, height));

    let window = event_loop.create_window(attrs)?;
    Ok(Arc::new(window))
}
