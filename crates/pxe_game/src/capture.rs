//! Animated GIF recording of the presented frames.
//!
//! Every appended frame is swizzled from the framebuffer's ARGB packing into
//! RGBA byte order in a private scratch buffer, quantized to a 256-color
//! palette and written immediately. The live framebuffer is never modified.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use pxe_core::framebuffer::{swizzle_frame, words_to_le_bytes, FrameBuffer};
use thiserror::Error;

/// Default inter-frame delay in hundredths of a second.
pub const DEFAULT_DELAY_CS: u16 = 2;
/// Default quantizer sampling factor (1 = best quality, 30 = fastest).
pub const DEFAULT_SPEED: i32 = 10;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame is {got_w}x{got_h}, capture expects {want_w}x{want_h}")]
    SizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("capture size {0}x{1} exceeds GIF limits")]
    TooLarge(u32, u32),
    #[error(transparent)]
    Encoding(#[from] gif::EncodingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub path: PathBuf,
    pub delay_cs: u16,
    pub speed: i32,
}

impl CaptureSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delay_cs: DEFAULT_DELAY_CS,
            speed: DEFAULT_SPEED,
        }
    }
}

pub struct CaptureSession<W: Write> {
    encoder: gif::Encoder<W>,
    scratch: Vec<u32>,
    width: u16,
    height: u16,
    delay_cs: u16,
    speed: i32,
    frames: u64,
}

impl CaptureSession<BufWriter<File>> {
    /// Open `settings.path` for writing and start a looping GIF there.
    pub fn create(settings: &CaptureSettings, width: u32, height: u32) -> Result<Self, CaptureError> {
        let file = File::create(&settings.path).map_err(|source| CaptureError::Create {
            path: settings.path.clone(),
            source,
        })?;
        let session = Self::new(BufWriter::new(file), width, height, settings)?;
        log::info!("Recording to {}", settings.path.display());
        Ok(session)
    }
}

impl<W: Write> CaptureSession<W> {
    pub fn new(
        writer: W,
        width: u32,
        height: u32,
        settings: &CaptureSettings,
    ) -> Result<Self, CaptureError> {
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(CaptureError::TooLarge(width, height));
        };
        let mut encoder = gif::Encoder::new(writer, w, h, &[])?;
        encoder.set_repeat(gif::Repeat::Infinite)?;
        Ok(Self {
            encoder,
            scratch: vec![0; width as usize * height as usize],
            width: w,
            height: h,
            delay_cs: settings.delay_cs.max(1),
            speed: settings.speed.clamp(1, 30),
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Encode the current contents of `frame` as the next GIF frame.
    pub fn append(&mut self, frame: &FrameBuffer) -> Result<(), CaptureError> {
        if frame.width() != u32::from(self.width) || frame.height() != u32::from(self.height) {
            return Err(CaptureError::SizeMismatch {
                got_w: frame.width(),
                got_h: frame.height(),
                want_w: self.width.into(),
                want_h: self.height.into(),
            });
        }
        // ABGR words read as little-endian bytes are R, G, B, A.
        swizzle_frame(frame.pixels(), &mut self.scratch);
        let bytes = words_to_le_bytes(&mut self.scratch);
        let mut gif_frame = gif::Frame::from_rgba_speed(self.width, self.height, bytes, self.speed);
        gif_frame.delay = self.delay_cs;
        self.encoder.write_frame(&gif_frame)?;
        self.frames += 1;
        Ok(())
    }

    /// Write the trailer and hand back the underlying writer.
    pub fn finish(self) -> Result<W, CaptureError> {
        let frames = self.frames;
        let mut writer = self.encoder.into_inner()?;
        writer.flush()?;
        log::info!("Capture finished: {frames} frames");
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::tests::temp_path;

    fn settings() -> CaptureSettings {
        CaptureSettings::new("unused.gif")
    }

    #[test]
    fn writes_header_frames_and_trailer() {
        let mut fb = FrameBuffer::new(4, 3);
        let mut session = CaptureSession::new(Vec::new(), 4, 3, &settings()).unwrap();
        fb.clear(0xFFFF_0000);
        session.append(&fb).unwrap();
        fb.clear(0xFF00_00FF);
        session.append(&fb).unwrap();
        assert_eq!(session.frames_written(), 2);

        let bytes = session.finish().unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(bytes.last(), Some(&0x3B));
    }

    #[test]
    fn decoded_colors_match_framebuffer() {
        let mut fb = FrameBuffer::new(2, 2);
        fb.clear(0xFFFF_0000);
        fb.set_pixel(1, 1, 0xFF00_00FF);
        let mut session = CaptureSession::new(Vec::new(), 2, 2, &settings()).unwrap();
        session.append(&fb).unwrap();
        let bytes = session.finish().unwrap();

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(bytes.as_slice()).unwrap();
        let frame = decoder.read_next_frame().unwrap().expect("one frame");
        assert_eq!(frame.delay, DEFAULT_DELAY_CS);
        assert_eq!(&frame.buffer[..4], &[0xFF, 0x00, 0x00, 0xFF]);
        assert_eq!(&frame.buffer[12..16], &[0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn live_framebuffer_is_not_modified() {
        let mut fb = FrameBuffer::new(2, 1);
        fb.set_pixel(0, 0, 0xFF11_2233);
        let before = fb.pixels().to_vec();
        let mut session = CaptureSession::new(Vec::new(), 2, 1, &settings()).unwrap();
        session.append(&fb).unwrap();
        assert_eq!(fb.pixels(), before.as_slice());
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let fb = FrameBuffer::new(5, 5);
        let mut session = CaptureSession::new(Vec::new(), 4, 4, &settings()).unwrap();
        assert!(matches!(
            session.append(&fb),
            Err(CaptureError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn create_writes_file() {
        let path = temp_path("capture.gif");
        let session = CaptureSession::create(&CaptureSettings::new(&path), 2, 2).unwrap();
        session.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        let _ = std::fs::remove_file(&path);
    }
}
