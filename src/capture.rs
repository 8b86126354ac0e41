//! Video source boundary: the trait the stream loop drives, plus the live
//! RTSP implementation (feature `vision`).

use thiserror::Error;

/// One decoded frame: packed BGR bytes, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to connect to video source: {0}")]
    Connect(String),
    #[error("failed to read frame: {0}")]
    Read(String),
}

/// A video source owned exclusively by the stream loop. `connect` must
/// verify the source actually yields frames (a failed test read is a
/// connect failure, not a read hiccup).
pub trait VideoSource: Send {
    fn connect(&mut self) -> Result<(), SourceError>;
    fn read_frame(&mut self) -> Result<Frame, SourceError>;
    fn release(&mut self);
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "vision")]
pub use rtsp::RtspSource;

#[cfg(feature = "vision")]
mod rtsp {
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{VideoCapture, CAP_FFMPEG, CAP_PROP_BUFFERSIZE},
    };
    use tracing::info;

    use super::{Frame, SourceError, VideoSource};

    /// RTSP stream via the OpenCV FFmpeg backend.
    pub struct RtspSource {
        url: String,
        cap: Option<VideoCapture>,
    }

    impl RtspSource {
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                url: url.into(),
                cap: None,
            }
        }

        fn read_mat(cap: &mut VideoCapture) -> Result<Mat, SourceError> {
            let mut mat = Mat::default();
            let ok = cap
                .read(&mut mat)
                .map_err(|e| SourceError::Read(e.to_string()))?;
            if !ok || mat.empty() {
                return Err(SourceError::Read("empty frame from stream".into()));
            }
            Ok(mat)
        }

        fn mat_to_frame(mat: &Mat) -> Result<Frame, SourceError> {
            let data = mat
                .data_bytes()
                .map_err(|e| SourceError::Read(e.to_string()))?
                .to_vec();
            Ok(Frame {
                data,
                width: mat.cols() as u32,
                height: mat.rows() as u32,
            })
        }
    }

    impl VideoSource for RtspSource {
        fn connect(&mut self) -> Result<(), SourceError> {
            let mut cap = VideoCapture::from_file(&self.url, CAP_FFMPEG)
                .map_err(|e| SourceError::Connect(e.to_string()))?;
            let opened = cap
                .is_opened()
                .map_err(|e| SourceError::Connect(e.to_string()))?;
            if !opened {
                return Err(SourceError::Connect(format!(
                    "could not open stream at {}",
                    self.url
                )));
            }

            // Small buffer — fresh frames, not queued ones.
            cap.set(CAP_PROP_BUFFERSIZE as i32, 1.0)
                .map_err(|e| SourceError::Connect(e.to_string()))?;

            // Test read: a source that never yields a frame is a dead
            // connection, not a hiccup.
            Self::read_mat(&mut cap)
                .map_err(|e| SourceError::Connect(format!("initial read failed: {e}")))?;

            info!("RTSP stream connected");
            self.cap = Some(cap);
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, SourceError> {
            let cap = self
                .cap
                .as_mut()
                .ok_or_else(|| SourceError::Read("source not connected".into()))?;
            let mat = Self::read_mat(cap)?;
            Self::mat_to_frame(&mat)
        }

        fn release(&mut self) {
            if let Some(mut cap) = self.cap.take() {
                let _ = cap.release();
                info!("RTSP stream released");
            }
        }

        fn is_connected(&self) -> bool {
            self.cap.is_some()
        }
    }

    impl Drop for RtspSource {
        fn drop(&mut self) {
            self.release();
        }
    }
}
