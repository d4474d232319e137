pub mod blit;
pub mod gpu_context;
pub mod screen;

pub use blit::FramebufferBlit;
pub use gpu_context::GpuContext;
pub use screen::{RenderError, Screen, WindowScreen};
