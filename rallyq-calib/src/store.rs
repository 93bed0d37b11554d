use std::fs;
use std::path::Path;

use crate::grid::Calibration;
use crate::CalibrationError;

impl Calibration {
    /// Write the snapshot as pretty printed JSON
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::info!("calibration saved");
        Ok(())
    }

    /// Read a snapshot, None if the file does not exist
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, CalibrationError> {
        if !path.as_ref().exists() {
            tracing::info!("no calibration file");
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        let calibration: Calibration = serde_json::from_str(&content)?;

        let expected = calibration.board.rows * calibration.board.cols;
        if calibration.cells.len() != expected {
            return Err(CalibrationError::CellCount {
                found: calibration.cells.len(),
                expected,
            });
        }
        tracing::info!(error = calibration.camera.reprojection_error, "calibration loaded");
        Ok(Some(calibration))
    }
}
