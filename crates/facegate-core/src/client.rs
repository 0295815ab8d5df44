//! [`EmbeddingExtractor`] backed by an external embedding service on a Unix socket.
//!
//! One request per connection. Every message is a frame: a `u32` little-endian
//! length followed by that many bytes. A request is a JSON header frame
//! followed by a frame of raw RGB8 pixels; a response is a single JSON frame.
//! Header dimensions and face boxes on the wire refer to the pixels sent.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ExtractorError, FaceError};
use crate::extractor::EmbeddingExtractor;
use crate::types::{Embedding, FaceBox};

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Longest image side sent to the service. Larger images are downscaled and
/// the boxes mapped back, so a pixel frame always fits in [`MAX_FRAME_LEN`].
pub const MAX_SIDE: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Detect { width: u32, height: u32 },
    Embed { width: u32, height: u32, face: FaceBox },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Faces { boxes: Vec<FaceBox> },
    Embedding { values: Option<Vec<f32>> },
    Error { message: String },
}

pub fn write_frame(w: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(payload)
}

pub fn read_frame(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub struct SocketExtractor {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketExtractor {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    fn call(&self, request: &Request, image: &DynamicImage) -> Result<Response, ExtractorError> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            ExtractorError::Unavailable(format!("{}: {e}", self.socket_path.display()))
        })?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|e| self.io_error(e))?;

        let header =
            serde_json::to_vec(request).map_err(|e| ExtractorError::Protocol(e.to_string()))?;
        let pixels = image.to_rgb8().into_raw();
        write_frame(&mut stream, &header)
            .and_then(|()| write_frame(&mut stream, &pixels))
            .and_then(|()| stream.flush())
            .map_err(|e| self.io_error(e))?;

        let reply = read_frame(&mut stream).map_err(|e| self.io_error(e))?;
        let response: Response =
            serde_json::from_slice(&reply).map_err(|e| ExtractorError::Protocol(e.to_string()))?;
        match response {
            Response::Error { message } => Err(ExtractorError::Remote(message)),
            other => Ok(other),
        }
    }

    fn io_error(&self, e: io::Error) -> ExtractorError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                ExtractorError::TimedOut(self.timeout)
            }
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                ExtractorError::Protocol(e.to_string())
            }
            _ => ExtractorError::Unavailable(e.to_string()),
        }
    }
}

/// Downscale so neither side exceeds [`MAX_SIDE`], keeping the aspect ratio.
fn bounded(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    if image.width() <= MAX_SIDE && image.height() <= MAX_SIDE {
        return Cow::Borrowed(image);
    }
    let resized = image.resize(MAX_SIDE, MAX_SIDE, FilterType::Triangle);
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        sent_width = resized.width(),
        sent_height = resized.height(),
        "downscaling image for embedding service"
    );
    Cow::Owned(resized)
}

/// Map a box between the coordinate spaces of two sizes of the same image.
fn rescale(face: &FaceBox, from: (u32, u32), to: (u32, u32)) -> FaceBox {
    if from == to || from.0 == 0 || from.1 == 0 {
        return *face;
    }
    let x = |v: i32| (f64::from(v) * f64::from(to.0) / f64::from(from.0)).round() as i32;
    let y = |v: i32| (f64::from(v) * f64::from(to.1) / f64::from(from.1)).round() as i32;
    FaceBox::new(y(face.top), x(face.right), y(face.bottom), x(face.left))
}

fn dimensions(image: &DynamicImage) -> (u32, u32) {
    (image.width(), image.height())
}

/// A vector with non-finite values is treated as no vector at all.
fn embedding_from_values(values: Vec<f32>) -> Result<Option<Embedding>, ExtractorError> {
    match Embedding::new(values) {
        Ok(embedding) => Ok(Some(embedding)),
        Err(FaceError::NonFiniteEmbedding { index }) => {
            tracing::warn!(index, "embedding service returned a non-finite vector");
            Ok(None)
        }
        Err(e) => Err(ExtractorError::Protocol(e.to_string())),
    }
}

impl EmbeddingExtractor for SocketExtractor {
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>, ExtractorError> {
        let sent = bounded(image);
        let request = Request::Detect {
            width: sent.width(),
            height: sent.height(),
        };
        match self.call(&request, &sent)? {
            Response::Faces { boxes } => Ok(boxes
                .iter()
                .map(|b| rescale(b, dimensions(&sent), dimensions(image)))
                .collect()),
            other => Err(ExtractorError::Protocol(format!("expected faces, got {other:?}"))),
        }
    }

    fn extract_embedding(
        &self,
        image: &DynamicImage,
        face: &FaceBox,
    ) -> Result<Option<Embedding>, ExtractorError> {
        let sent = bounded(image);
        let request = Request::Embed {
            width: sent.width(),
            height: sent.height(),
            face: rescale(face, dimensions(image), dimensions(&sent)),
        };
        match self.call(&request, &sent)? {
            Response::Embedding { values: None } => Ok(None),
            Response::Embedding {
                values: Some(values),
            } => embedding_from_values(values),
            other => Err(ExtractorError::Protocol(format!(
                "expected embedding, got {other:?}"
            ))),
        }
    }
}
