use std::sync::Arc;

use pxe_core::framebuffer::FrameBuffer;
use thiserror::Error;
use winit::window::Window;

use crate::blit::FramebufferBlit;
use crate::gpu_context::GpuContext;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no supported formats")]
    IncompatibleSurface,
    #[error("GPU out of memory")]
    OutOfMemory,
}

/// Presentation target for the framebuffer.
pub trait Screen {
    /// Upload `frame`, clear, stretch it over the surface and present.
    fn present(&mut self, frame: &FrameBuffer) -> Result<(), RenderError>;

    fn set_title(&mut self, title: &str);

    fn show(&mut self) {}
}

/// Screen backed by a winit window and wgpu.
///
/// Field order is drop order: texture and pipeline, then the device and
/// surface, then this screen's handle on the window.
pub struct WindowScreen {
    blit: FramebufferBlit,
    gpu: GpuContext,
    window: Arc<Window>,
}

impl WindowScreen {
    pub fn new(window: Arc<Window>, width: u32, height: u32) -> Result<Self, RenderError> {
        let gpu = GpuContext::new(window.clone())?;
        let blit = FramebufferBlit::new(&gpu.device, gpu.surface_format, width, height);
        Ok(Self { blit, gpu, window })
    }
}

impl Screen for WindowScreen {
    fn present(&mut self, frame: &FrameBuffer) -> Result<(), RenderError> {
        let size = self.window.inner_size();
        if (size.width, size.height) != self.gpu.size {
            self.gpu.resize(size.width, size.height);
        }

        self.blit.upload(&self.gpu.queue, frame);

        let Some((output, view)) = self.gpu.begin_frame()? else {
            return Ok(());
        };

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Framebuffer Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });
            self.blit.draw(&mut render_pass);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    fn show(&mut self) {
        self.window.set_visible(true);
    }
}
