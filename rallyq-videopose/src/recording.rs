use std::fs;
use std::path::{Path, PathBuf};

use crate::{load_frame, PoseRecord, Result, VideoPose, VideoPoseError};
use rallyq_common::CaptureData;

/// Name of the records file inside a recording directory
pub const RECORDS_FILE: &str = "poses.jsonl";

/// A recorded video: a directory with the frame images and their records
#[derive(Debug)]
pub struct RecordingSource {
    dir: PathBuf,
    records: Vec<PoseRecord>,
    position: usize,
    is_running: bool,
}

impl RecordingSource {
    #[tracing::instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(RECORDS_FILE);
        let content = fs::read_to_string(&path).map_err(|source| VideoPoseError::Io { path, source })?;

        let records = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| PoseRecord::parse(line, i + 1))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("recording with {} frames", records.len());

        Ok(Self {
            dir,
            records,
            position: 0,
            is_running: false,
        })
    }

    pub fn records(&self) -> &[PoseRecord] {
        &self.records
    }
}

impl VideoPose for RecordingSource {
    fn inference_start(&mut self) -> Result<()> {
        tracing::info!("playing recording {}", self.dir.display());
        self.is_running = true;
        Ok(())
    }

    fn inference_step(&mut self) -> Result<Option<CaptureData>> {
        if !self.is_running {
            return Err(VideoPoseError::NotRunning);
        }
        let Some(record) = self.records.get(self.position) else {
            return Ok(None);
        };

        let data = load_frame(self.position, &self.dir.join(&record.frame), record.landmarks.clone())?;
        self.position += 1;
        Ok(Some(data))
    }

    fn inference_stop(&mut self) {
        self.is_running = false;
    }

    fn len(&self) -> Option<usize> {
        Some(self.records.len())
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if index >= self.records.len() {
            return Err(VideoPoseError::OutOfRange {
                index,
                len: self.records.len(),
            });
        }
        self.position = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{temp_dir, write_recording};

    #[test]
    fn plays_frames_in_order() {
        let dir = temp_dir();
        let records = write_recording(&dir, 4);
        let mut source = RecordingSource::open(&dir).unwrap();
        assert_eq!(source.len(), Some(4));
        assert_eq!(source.records(), records.as_slice());

        source.inference_start().unwrap();
        let mut seen = vec![];
        while let Some(data) = source.inference_step().unwrap() {
            assert_eq!(data.resolution.w, 8);
            assert_eq!(data.frame.len(), 8 * 6 * 3);
            assert_eq!(data.frame[0], data.index as u8 * 10);
            seen.push((data.index, data.pose.is_some()));
        }
        assert_eq!(seen, [(0, true), (1, false), (2, true), (3, false)]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn seeks_within_bounds() {
        let dir = temp_dir();
        write_recording(&dir, 3);
        let mut source = RecordingSource::open(&dir).unwrap();
        source.inference_start().unwrap();

        source.seek(2).unwrap();
        assert_eq!(source.inference_step().unwrap().unwrap().index, 2);
        assert!(source.inference_step().unwrap().is_none());
        assert!(matches!(source.seek(3), Err(VideoPoseError::OutOfRange { index: 3, len: 3 })));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn requires_start() {
        let dir = temp_dir();
        write_recording(&dir, 1);
        let mut source = RecordingSource::open(&dir).unwrap();
        assert!(matches!(source.inference_step(), Err(VideoPoseError::NotRunning)));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_recording_is_an_error() {
        let dir = temp_dir().join("missing");
        assert!(matches!(RecordingSource::open(dir), Err(VideoPoseError::Io { .. })));
    }

    #[test]
    fn missing_frame_is_an_error() {
        let dir = temp_dir();
        write_recording(&dir, 2);
        fs::remove_file(dir.join("frame_0001.png")).unwrap();

        let mut source = RecordingSource::open(&dir).unwrap();
        source.inference_start().unwrap();
        assert!(source.inference_step().is_ok());
        assert!(matches!(source.inference_step(), Err(VideoPoseError::Image { .. })));
        fs::remove_dir_all(dir).unwrap();
    }
}
