use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod analysis;
mod capture;
mod charts;
mod config;
mod overlay;
mod session;
mod ui;

use config::Config;
use session::Mode;

#[derive(Parser, Debug)]
#[command(version, about = "Footwork and stroke coaching for table tennis", long_about = None)]
struct Cli {
    /// TOML settings file, defaults are used when missing
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Mode entered at startup
    #[arg(short, long, value_enum, default_value_t = Mode::Idle)]
    mode: Mode,
    /// Recording directory played by the analysis modes
    #[arg(long)]
    video: Option<PathBuf>,
    /// Log as JSON lines instead of the compact format
    #[arg(long)]
    json_logs: bool,
}

fn setup_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(false)                       // Display source code file paths
        .with_line_number(false)                // Display source code line numbers
        .with_thread_ids(true)                  // Display the thread ID an event was recorded on
        .with_target(false);                    // Don't display the event's target (module path)

    // sets this to be the default, global collector for this application.
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {

    let cli = Cli::parse();
    setup_tracing(cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(video) = cli.video {
        config.capture.video = video;
    }
    tracing::debug!(?config, "configuration loaded");

    // Channel for UI messages
    let (ui_tx, ui_rx) = tokio::sync::mpsc::channel(100);
    let ui_proxy = ui::UiProxy(ui_tx);
    let (session_proxy, session_rx) = session::channel();

    // Move the tokio runtime to a different thread
    let rt = tokio::runtime::Runtime::new()?;
    let session_config = config.clone();
    let runtime = std::thread::spawn(move || {
        rt.block_on(async {
            let (capture, frames) = capture::run_capture();
            let session = session::run_session(session_rx, &capture, frames, ui_proxy, &session_config, cli.mode);
            if let Err(e) = session.await {
                tracing::error!("session task failed: {}", e);
            }
        });
    });

    ui::run_ui_blocking(ui_rx, session_proxy, &config.ui)?;

    if runtime.join().is_err() {
        tracing::error!("runtime thread panicked");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use glam::{Vec2, Vec3};
    use image::{Rgb, RgbImage};
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
    use std::path::{Path, PathBuf};

    use rallyq_calib::{CameraModel, Calibration, GridSpec};
    use rallyq_common::{landmark, PoseFrame};
    use rallyq_videopose::{PoseRecord, RECORDS_FILE};

    /// Camera 4 m behind the board, tilted down by 45 degrees, the whole grid in view
    pub fn calibration() -> Calibration {
        let camera = CameraModel {
            intrinsic_matrix: [900.0, 0.0, 640.0, 0.0, 900.0, 360.0, 0.0, 0.0, 1.0],
            dist_coeffs: [0.0; 5],
            rvec: [-FRAC_PI_4, 0.0, 0.0],
            tvec: [-150.0, 150.0 * FRAC_1_SQRT_2, 650.0 * FRAC_1_SQRT_2],
            width: 1280,
            height: 720,
            reprojection_error: 0.0,
        };
        Calibration::from_camera(camera, GridSpec::default())
    }

    /// A neutral standing body, arms slightly open
    pub fn standing_pose() -> PoseFrame {
        let points: [(f32, f32); 33] = [
            (0.50, 0.20), // nose
            (0.51, 0.19), (0.52, 0.19), (0.53, 0.19),
            (0.49, 0.19), (0.48, 0.19), (0.47, 0.19),
            (0.54, 0.20), (0.46, 0.20),
            (0.51, 0.22), (0.49, 0.22),
            (0.55, 0.30), (0.45, 0.30), // shoulders
            (0.60, 0.40), (0.40, 0.40), // elbows
            (0.62, 0.50), (0.38, 0.50), // wrists
            (0.63, 0.53), (0.37, 0.53),
            (0.62, 0.54), (0.38, 0.54),
            (0.61, 0.53), (0.39, 0.53),
            (0.54, 0.55), (0.46, 0.55), // hips
            (0.55, 0.70), (0.45, 0.70), // knees
            (0.55, 0.85), (0.45, 0.85), // ankles
            (0.54, 0.87), (0.46, 0.87), // heels
            (0.58, 0.88), (0.42, 0.88), // foot index
        ];
        PoseFrame::new(points.iter().map(|&(x, y)| Vec3::new(x, y, 0.0)).collect())
    }

    /// Standing pose with both feet on a normalized point
    pub fn pose_at(point: Vec2) -> PoseFrame {
        let mut landmarks = standing_pose().landmarks().to_vec();
        for foot in landmark::FEET {
            landmarks[foot] = point.extend(0.0);
        }
        PoseFrame::new(landmarks)
    }

    /// A fresh directory under the system temporary directory
    pub fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rallyq-engine-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write `count` small frames and their records, odd frames without a person
    pub fn write_recording(dir: &Path, count: usize) {
        let mut lines = String::new();
        for i in 0..count {
            let name = format!("frame_{i:04}.png");
            RgbImage::from_pixel(16, 12, Rgb([40, 40, 40 + i as u8]))
                .save(dir.join(&name))
                .unwrap();

            let record = PoseRecord {
                frame: PathBuf::from(name),
                landmarks: (i % 2 == 0).then(standing_pose),
            };
            lines.push_str(&serde_json::to_string(&record).unwrap());
            lines.push('\n');
        }
        std::fs::write(dir.join(RECORDS_FILE), lines).unwrap();
    }

    #[test]
    fn the_grid_is_in_view() {
        let calibration = calibration();
        assert_eq!(calibration.cells.len(), 18);
        for cell in &calibration.cells {
            for corner in cell.corners {
                assert!(corner.cmpgt(Vec2::ZERO).all() && corner.cmplt(Vec2::ONE).all(), "{} {:?}", cell.label, corner);
            }
        }
    }
}
