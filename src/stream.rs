use crate::cv_utils::{CvImage, CvUtilsError};
use crate::state::FrameCell;
use bytes::Bytes;
use futures::stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::broadcast, time::sleep};
use tracing::instrument;

pub const FRAME_BOUNDARY: &str = "frame";
const NO_FRAME_POLL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct VideoStream {
    pub frames: Arc<FrameCell>,
    pub video_stream_delay: u64,
    pub shutdown: broadcast::Sender<()>,
}

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Failed to copy frame: {0}")]
    Frame(#[from] opencv::Error),
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] CvUtilsError),
    #[error("Error: {0}")]
    Unavailable(String),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
    #[error("Encoding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub fn encode_part(jpg: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        jpg.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(jpg);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}

impl VideoStream {
    pub fn new(
        frames: Arc<FrameCell>,
        video_stream_delay: u64,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            frames,
            video_stream_delay,
            shutdown,
        }
    }

    /// Copies and encodes the latest frame on the blocking pool.
    async fn next_part(&self) -> Result<Option<Bytes>, VideoStreamError> {
        let frames = self.frames.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Bytes>, VideoStreamError> {
            let Some(frame) = frames.latest()? else {
                return Ok(None);
            };
            let jpg = CvImage::new(frame).to_jpg()?;
            Ok(Some(encode_part(&jpg)))
        })
        .await?
    }

    /// Endless multipart stream of the latest frame, paced by `video_stream_delay`.
    ///
    /// Waits for the first frame instead of sending a placeholder, skips frames
    /// that fail to encode and ends when the server shuts down.
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> {
        let shutdown_rx = self.shutdown.subscribe();
        let frame_delay = Duration::from_millis(self.video_stream_delay);

        stream::unfold(
            (self, shutdown_rx, Duration::ZERO),
            move |(video_stream, mut shutdown_rx, mut delay)| async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::debug!("Video stream closed on shutdown");
                            return None;
                        }
                        _ = sleep(delay) => {}
                    }

                    match video_stream.next_part().await {
                        Ok(Some(part)) => {
                            return Some((Ok(part), (video_stream, shutdown_rx, frame_delay)));
                        }
                        Ok(None) => delay = NO_FRAME_POLL,
                        Err(e) => {
                            tracing::warn!("Skipping frame: {}", e);
                            delay = frame_delay;
                        }
                    }
                }
            },
        )
    }
}
