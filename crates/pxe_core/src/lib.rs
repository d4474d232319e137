pub mod event;
pub mod framebuffer;
pub mod input;
pub mod time;
