// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! ffmpeg-backed network source.
//!
//! ffmpeg pulls the stream over TCP-interleaved RTSP and re-encodes it as an
//! MJPEG image pipe on stdout. Each picture is split out at its SOI/EOI markers
//! and decoded with the `image` crate; the compressed bytes ride along on the
//! frame so the live view never has to re-encode.

use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use image::ImageFormat;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::source::{DecodeGuard, FrameSource};
use super::{Frame, StreamConfig};
use crate::error::SourceError;

const READ_CHUNK: usize = 64 * 1024;
const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

pub struct FfmpegSource {
    camera_id: String,
    uri: String,
    child: Child,
    stdout: ChildStdout,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
    decode: DecodeGuard,
    pending: Option<Frame>,
}

impl FfmpegSource {
    /// Spawn ffmpeg and wait for the first decodable picture.
    /// Failing to get one within the connect timeout is a connection error.
    pub async fn open(camera_id: &str, uri: &str, config: &StreamConfig) -> Result<Self, SourceError> {
        let mut cmd = Command::new(&config.ffmpeg_path);
        cmd.args(build_args(uri, config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SourceError::connection(uri, format!("failed to start ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::connection(uri, "ffmpeg stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            let camera = camera_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!(camera = %camera, "ffmpeg: {}", line.trim());
                    }
                }
            });
        }

        let mut source = Self {
            camera_id: camera_id.to_string(),
            uri: uri.to_string(),
            child,
            stdout,
            buffer: Vec::with_capacity(READ_CHUNK * 4),
            chunk: vec![0u8; READ_CHUNK],
            decode: DecodeGuard::new(config.max_decode_failures),
            pending: None,
        };

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        match tokio::time::timeout(timeout, source.read_frame()).await {
            Ok(Ok(frame)) => {
                info!(camera = %camera_id, "ffmpeg source opened ({}x{})", frame.width(), frame.height());
                source.pending = Some(frame);
                Ok(source)
            }
            Ok(Err(e)) => {
                source.close().await;
                Err(SourceError::connection(uri, e))
            }
            Err(_) => {
                source.close().await;
                Err(SourceError::connection(uri, format!("no picture within {:?}", timeout)))
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Frame, SourceError> {
        loop {
            if let Some(jpeg) = split_jpeg(&mut self.buffer) {
                let bytes = jpeg.clone();
                let decoded = tokio::task::spawn_blocking(move || {
                    image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).map(|img| img.to_rgb8())
                })
                .await
                .map_err(|e| SourceError::Stream(format!("decoder task failed: {}", e)))?;

                match decoded {
                    Ok(image) => {
                        self.decode.success();
                        return Ok(Frame::new(&self.camera_id, image).with_encoded(jpeg));
                    }
                    Err(e) => {
                        self.decode.failure(&e.to_string())?;
                        continue;
                    }
                }
            }

            if self.buffer.len() > MAX_PENDING_BYTES {
                return Err(SourceError::Stream(format!(
                    "{} bytes without a complete picture",
                    self.buffer.len()
                )));
            }

            let n = self
                .stdout
                .read(&mut self.chunk)
                .await
                .map_err(|e| SourceError::Stream(e.to_string()))?;

            if n == 0 {
                return match self.child.try_wait() {
                    Ok(Some(status)) if !status.success() => {
                        Err(SourceError::Stream(format!("ffmpeg exited with {}", status)))
                    }
                    _ => Err(SourceError::EndOfStream),
                };
            }

            self.buffer.extend_from_slice(&self.chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_frame().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(camera = %self.camera_id, "ffmpeg kill: {}", e);
        }
        self.buffer.clear();
        self.pending = None;
    }
}

/// ffmpeg command line for a given input
pub fn build_args(uri: &str, config: &StreamConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostdin".into(),
    ];

    if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
        args.extend(["-rtsp_transport".into(), "tcp".into()]);
    }

    args.extend(["-i".into(), uri.to_string(), "-an".into()]);

    if let Some(fps) = config.max_fps {
        args.extend(["-r".into(), fps.to_string()]);
    }

    args.extend([
        "-f".into(),
        "image2pipe".into(),
        "-c:v".into(),
        "mjpeg".into(),
        "-q:v".into(),
        config.mjpeg_qscale.to_string(),
        "-".into(),
    ]);

    args
}

/// Take the first complete JPEG (SOI .. EOI) out of `buf`.
///
/// Bytes before the first SOI are discarded. Entropy-coded data stuffs every
/// 0xFF with 0x00, so the first 0xFFD9 after SOI is the picture's end.
pub fn split_jpeg(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = buf.windows(2).position(|w| w == [0xFF, 0xD8])?;
    if start > 0 {
        buf.drain(..start);
    }

    let end = buf[2..].windows(2).position(|w| w == [0xFF, 0xD9])? + 2;
    let jpeg: Vec<u8> = buf.drain(..end + 2).collect();
    Some(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_jpeg_extracts_pictures_in_order() {
        let mut buf = vec![0x00, 0x11, 0xFF, 0xD8, 0x01, 0xFF, 0x00, 0xFF, 0xD9, 0xFF, 0xD8, 0x02];

        let first = split_jpeg(&mut buf).unwrap();
        assert_eq!(first, vec![0xFF, 0xD8, 0x01, 0xFF, 0x00, 0xFF, 0xD9]);

        // second picture incomplete
        assert!(split_jpeg(&mut buf).is_none());
        assert_eq!(buf, vec![0xFF, 0xD8, 0x02]);

        buf.extend_from_slice(&[0xFF, 0xD9]);
        let second = split_jpeg(&mut buf).unwrap();
        assert_eq!(second, vec![0xFF, 0xD8, 0x02, 0xFF, 0xD9]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_jpeg_real_encoding() {
        let image = image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]));
        let jpeg = super::super::frame::encode_jpeg(&image, 90).unwrap();

        let mut buf = Vec::new();
        buf.extend_from_slice(&jpeg);
        buf.extend_from_slice(&jpeg);

        assert_eq!(split_jpeg(&mut buf).unwrap(), jpeg);
        assert_eq!(split_jpeg(&mut buf).unwrap(), jpeg);
    }

    #[test]
    fn test_rtsp_args_force_tcp() {
        let config = StreamConfig::default();
        let args = build_args("rtsp://10.0.0.9:554/main", &config);
        let pos = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        assert_eq!(args[pos + 1], "tcp");
        assert_eq!(args.last().unwrap(), "-");

        let args = build_args("/var/video/sample.mp4", &config);
        assert!(!args.contains(&"-rtsp_transport".to_string()));
    }
}
