//! Frames and body landmarks coming from a pose estimation model.
//!
//! The model runs outside of the application, it hands out one JSON
//! record per frame: the path of the frame image and the landmarks of
//! the person found on it, if any.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rallyq_common::{CaptureData, PoseFrame, Resolution};

mod bridge;
mod recording;

pub use bridge::BridgeSource;
pub use recording::{RecordingSource, RECORDS_FILE};

#[derive(Debug, thiserror::Error)]
pub enum VideoPoseError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed pose record at line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to decode frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unable to start pose bridge '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to read the output of pose bridge '{command}': {source}")]
    Bridge {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pose bridge command is empty")]
    EmptyCommand,
    #[error("source is not running")]
    NotRunning,
    #[error("live sources can not seek")]
    NotSeekable,
    #[error("frame {index} is past the end of the source ({len} frames)")]
    OutOfRange { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, VideoPoseError>;

/// One line of model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    /// Frame image, relative paths are resolved by the source
    pub frame: PathBuf,
    /// Landmarks of the detected person, normalized to the frame size
    pub landmarks: Option<PoseFrame>,
}

impl PoseRecord {
    pub fn parse(line: &str, number: usize) -> Result<Self> {
        serde_json::from_str(line).map_err(|source| VideoPoseError::Record { line: number, source })
    }
}

/// A stream of frames with their landmarks
pub trait VideoPose: Send {
    /// Open the underlying video
    fn inference_start(&mut self) -> Result<()>;

    /// Next frame, None once the stream is over
    fn inference_step(&mut self) -> Result<Option<CaptureData>>;

    /// Release the underlying video
    fn inference_stop(&mut self);

    /// Number of frames, None for live streams
    fn len(&self) -> Option<usize> {
        None
    }

    /// Position of the next frame
    fn position(&self) -> usize;

    fn seek(&mut self, _index: usize) -> Result<()> {
        Err(VideoPoseError::NotSeekable)
    }
}

/// Decode a frame image into packed RGB8
pub(crate) fn load_frame(index: usize, path: &Path, landmarks: Option<PoseFrame>) -> Result<CaptureData> {
    let image = image::open(path)
        .map_err(|source| VideoPoseError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    Ok(CaptureData {
        index,
        resolution: Resolution::new(image.width() as usize, image.height() as usize),
        frame: image.into_raw(),
        pose: landmarks,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use glam::Vec3;
    use image::{Rgb, RgbImage};

    /// A fresh directory under the system temporary directory
    pub fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rallyq-videopose-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write `count` small frames and their records, odd frames without a person
    pub fn write_recording(dir: &Path, count: usize) -> Vec<PoseRecord> {
        let mut records = vec![];
        let mut lines = String::new();
        for i in 0..count {
            let name = format!("frame_{i:04}.png");
            RgbImage::from_pixel(8, 6, Rgb([i as u8 * 10, 0, 0]))
                .save(dir.join(&name))
                .unwrap();

            let landmarks = (i % 2 == 0)
                .then(|| PoseFrame::new(vec![Vec3::new(0.5, 0.1 * i as f32, 0.0); 33]));
            let record = PoseRecord {
                frame: PathBuf::from(name),
                landmarks,
            };
            lines.push_str(&serde_json::to_string(&record).unwrap());
            lines.push('\n');
            records.push(record);
        }
        std::fs::write(dir.join(RECORDS_FILE), lines).unwrap();
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_with_and_without_person() {
        let record = PoseRecord::parse(r#"{"frame": "a.png", "landmarks": [[0.5, 0.25, -0.1]]}"#, 1).unwrap();
        assert_eq!(record.frame, PathBuf::from("a.png"));
        assert_eq!(record.landmarks.unwrap().len(), 1);

        let empty = PoseRecord::parse(r#"{"frame": "b.png", "landmarks": null}"#, 2).unwrap();
        assert!(empty.landmarks.is_none());

        assert!(matches!(
            PoseRecord::parse(r#"{"frame": 3}"#, 7),
            Err(VideoPoseError::Record { line: 7, .. })
        ));
    }
}
