use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::analysis::{body_height, feet_cells, hip_position, CoverageTracker, SpeedStats, SpeedTracker};
use crate::capture::{CaptureEvent, CaptureProxy};
use crate::config::{AnalysisConfig, CaptureConfig, Config};
use crate::ui::{self, UiProxy};
use rallyq_calib::{Calibration, CalibrationError, GridSpec};
use rallyq_common::{CaptureData, PoseFrame};
use rallyq_motion::{Category, MatchResults, StoreError, Template, TemplateMatcher, TemplateStore};
use rallyq_videopose::{BridgeSource, RecordingSource, VideoPose};

#[derive(Debug)]
pub enum Command {
    SetMode(Mode),
    RecordStart,
    RecordStop,
    /// Keep the last recording as a template
    SaveTemplate {
        name: String,
        category: Category,
    },
    DiscardRecording,
    DeleteTemplate {
        name: String,
        category: Category,
    },
    SaveCalibration,
    ForceRecalibrate,
    Seek(usize),
    Shutdown,
}

/// What drives the frame pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Idle,
    /// Live camera through the pose bridge
    RealTime,
    /// Playback of the configured recording
    AnalyzeVideo,
    /// Playback of the configured recording, needs at least one template
    MatchTemplate,
}

impl Mode {
    fn plays_recording(&self) -> bool {
        matches!(self, Mode::AnalyzeVideo | Mode::MatchTemplate)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => write!(f, "Idle"),
            Mode::RealTime => write!(f, "Real-time Analysis"),
            Mode::AnalyzeVideo => write!(f, "Analyze Video"),
            Mode::MatchTemplate => write!(f, "Match Template"),
        }
    }
}

/// Camera and grid of the session, replaced as a whole
#[derive(Debug, Clone, Default)]
pub enum CalibrationState {
    #[default]
    Uncalibrated,
    Calibrated(Arc<Calibration>),
    /// The operator asked for a new calibration, the previous one is shown meanwhile
    ForceRecalibrate { previous: Option<Arc<Calibration>> },
}

impl CalibrationState {
    /// Snapshot to use for the current frame
    pub fn current(&self) -> Option<&Arc<Calibration>> {
        match self {
            CalibrationState::Uncalibrated => None,
            CalibrationState::Calibrated(calibration) => Some(calibration),
            CalibrationState::ForceRecalibrate { previous } => previous.as_ref(),
        }
    }

    pub fn needs_calibration(&self) -> bool {
        !matches!(self, CalibrationState::Calibrated(_))
    }

    pub fn force(&mut self) {
        *self = CalibrationState::ForceRecalibrate {
            previous: self.current().cloned(),
        };
    }
}

/// Match statistics of one template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStat {
    pub name: String,
    pub category: Category,
    pub frames: usize,
    pub count: u32,
    /// Share of the matches of its category, percent
    pub share: f32,
}

/// Everything the UI shows for one processed frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub capture: Arc<CaptureData>,
    pub calibration: Option<Arc<Calibration>>,
    pub matches: MatchResults,
    /// Cells under the feet in this frame
    pub foot_cells: Vec<usize>,
    /// Share of foot placements per cell, percent
    pub coverage: Vec<f32>,
    /// Square meters
    pub covered_area: f64,
    pub speeds: SpeedStats,
    /// Meters
    pub height: Option<f32>,
    pub strokes: u32,
    pub steps: u32,
    pub templates: Vec<TemplateStat>,
    /// Frames recorded so far, None when not recording
    pub recording: Option<usize>,
}

/// Frame index and outcome of one calibration attempt
pub type CalibrationAttempt = (usize, Result<Calibration, CalibrationError>);

/// Session state shared by every frame of the pipeline
#[derive(Debug)]
pub struct SessionContext {
    grid: GridSpec,
    analysis: AnalysisConfig,
    calibration_path: PathBuf,
    calibration: CalibrationState,
    store: TemplateStore,
    matcher: TemplateMatcher,
    coverage: CoverageTracker,
    speed: SpeedTracker,
    /// Poses of the template being recorded
    recording: Option<Vec<PoseFrame>>,
    /// Last finished recording, waiting for a name
    pending: Vec<PoseFrame>,
}

impl SessionContext {
    pub fn new(config: &Config, store: TemplateStore, calibration: Option<Calibration>) -> Self {
        let mut matcher = TemplateMatcher::new(config.analysis.threshold);
        matcher.set_templates(store.templates());

        Self {
            grid: config.grid.clone(),
            analysis: config.analysis.clone(),
            calibration_path: config.files.calibration.clone(),
            calibration: match calibration {
                Some(calibration) => CalibrationState::Calibrated(Arc::new(calibration)),
                None => CalibrationState::Uncalibrated,
            },
            store,
            matcher,
            coverage: CoverageTracker::default(),
            speed: SpeedTracker::new(config.analysis.fps, config.analysis.noise_threshold),
            recording: None,
            pending: vec![],
        }
    }

    #[cfg(test)]
    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn has_templates(&self) -> bool {
        !self.store.is_empty()
    }

    /// Clear speeds, coverage and match counters
    pub fn reset_statistics(&mut self) {
        self.matcher.reset_counts();
        self.coverage.reset();
        self.speed.reset();
    }

    pub fn force_recalibration(&mut self) {
        tracing::info!("recalibration requested");
        self.calibration.force();
    }

    /// Write the current snapshot, false if there is none
    pub fn save_calibration(&self) -> Result<bool, CalibrationError> {
        match self.calibration.current() {
            Some(calibration) => {
                calibration.save(&self.calibration_path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn start_recording(&mut self) {
        tracing::info!("recording started");
        self.recording = Some(vec![]);
    }

    /// Stop recording, returns the number of recorded poses
    pub fn stop_recording(&mut self) -> usize {
        self.pending = self.recording.take().unwrap_or_default();
        tracing::info!("recording stopped with {} poses", self.pending.len());
        self.pending.len()
    }

    pub fn discard_recording(&mut self) {
        self.pending.clear();
    }

    /// Store the last recording as a template
    pub fn save_recording(&mut self, name: String, category: Category) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            tracing::warn!("no recording to save");
            return Ok(());
        }
        let frames = std::mem::take(&mut self.pending);
        tracing::info!("new template {} ({}) with {} frames", name, category, frames.len());
        self.store.add(Template { name, category, frames });
        self.matcher.set_templates(self.store.templates());
        self.store.save()
    }

    /// Returns false if the template does not exist
    pub fn delete_template(&mut self, name: &str, category: Category) -> Result<bool, StoreError> {
        if !self.store.remove(name, category) {
            return Ok(false);
        }
        tracing::info!("template {} ({}) deleted", name, category);
        self.matcher.set_templates(self.store.templates());
        self.store.save()?;
        Ok(true)
    }

    pub fn template_stats(&self) -> Vec<TemplateStat> {
        self.store
            .templates()
            .iter()
            .map(|t| {
                let count = self.matcher.counts(t.category).get(&t.name).copied().unwrap_or(0);
                let total = self.matcher.total(t.category);
                TemplateStat {
                    name: t.name.clone(),
                    category: t.category,
                    frames: t.frames.len(),
                    count,
                    share: if total > 0 { count as f32 / total as f32 * 100.0 } else { 0.0 },
                }
            })
            .collect()
    }

    /// Calibration attempt on this frame, None while a snapshot is in use.
    /// The attempt is slow and meant for the blocking pool.
    pub fn calibration_job(&self, data: &Arc<CaptureData>) -> Option<impl FnOnce() -> CalibrationAttempt + Send + 'static> {
        if !self.calibration.needs_calibration() {
            return None;
        }
        let (data, grid) = (data.clone(), self.grid.clone());
        Some(move || {
            let (w, h) = (data.resolution.w as u32, data.resolution.h as u32);
            (data.index, Calibration::from_rgb(w, h, data.frame.clone(), &grid))
        })
    }

    /// Keep a successful attempt as the new snapshot and write it out
    pub fn finish_calibration(&mut self, (index, result): CalibrationAttempt) {
        match result {
            Ok(calibration) => {
                tracing::info!(error = calibration.camera.reprojection_error, "camera calibrated on frame {}", index);
                if let Err(e) = calibration.save(&self.calibration_path) {
                    tracing::warn!("unable to save calibration: {}", e);
                }
                self.calibration = CalibrationState::Calibrated(Arc::new(calibration));
            }
            Err(e) => tracing::debug!("no calibration on frame {}: {}", index, e),
        }
    }

    /// Grid hit-test, template matching and statistics of one frame
    #[tracing::instrument(skip_all, fields(frame = data.index))]
    pub fn process_frame(&mut self, data: Arc<CaptureData>) -> FrameReport {
        let calibration = self.calibration.current().cloned();

        let mut matches = MatchResults::default();
        let mut foot_cells = vec![];
        let mut height = None;
        let mut position = None;

        if let Some(pose) = &data.pose {
            if let Some(frames) = &mut self.recording {
                frames.push(pose.clone());
            }
            matches = self.matcher.process(pose);

            if let Some(calibration) = &calibration {
                foot_cells = feet_cells(calibration, pose);
                // Footwork only counts while a stroke is being played
                if matches.get(Category::Arm).is_some() {
                    self.coverage.record(calibration, pose);
                }
                position = hip_position(calibration, pose);
                height = body_height(calibration, pose, self.analysis.height_correction);
            }
        }
        self.speed.update(position);

        FrameReport {
            capture: data,
            calibration,
            matches,
            foot_cells,
            coverage: self.coverage.ratios(),
            covered_area: self.coverage.covered_area(),
            speeds: self.speed.stats(),
            height,
            strokes: self.matcher.total(Category::Arm),
            steps: self.matcher.total(Category::Footwork),
            templates: self.template_stats(),
            recording: self.recording.as_ref().map(Vec::len),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionProxy(mpsc::Sender<Command>);

impl SessionProxy {
    /// Queue a command without waiting, commands are dropped if the session is gone or busy
    pub fn send(&self, cmd: Command) {
        if let Err(e) = self.0.try_send(cmd) {
            tracing::warn!("session command dropped: {}", e);
        }
    }
}

/// Channel used to drive the session, created before the session itself
pub fn channel() -> (SessionProxy, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(100);
    (SessionProxy(tx), rx)
}

#[derive(Debug)]
struct Session {
    receiver: mpsc::Receiver<Command>,
    frames: watch::Receiver<CaptureEvent>,
    capture: CaptureProxy,
    ui: UiProxy,
    context: SessionContext,
    mode: Mode,
    sources: CaptureConfig,
    fps: f32,
    /// At most one calibration attempt runs at a time
    calibrating: Option<JoinHandle<CalibrationAttempt>>,
    /// Problems found while loading, shown once the UI listens
    startup_errors: Vec<String>,
}

impl Session {
    fn instantiate(
        receiver: mpsc::Receiver<Command>,
        capture: &CaptureProxy,
        frames: watch::Receiver<CaptureEvent>,
        ui: UiProxy,
        config: &Config,
    ) -> Self {
        let mut startup_errors = vec![];

        let store = match TemplateStore::load(&config.files.templates) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("unable to load templates: {}", e);
                startup_errors.push(format!("Unable to load templates: {}", e));
                TemplateStore::new(&config.files.templates)
            }
        };

        let calibration = match Calibration::load(&config.files.calibration) {
            Ok(calibration) => calibration,
            Err(e) => {
                tracing::warn!("ignoring calibration file: {}", e);
                None
            }
        };

        Self {
            receiver,
            frames,
            capture: capture.clone(),
            ui,
            context: SessionContext::new(config, store, calibration),
            mode: Mode::Idle,
            sources: config.capture.clone(),
            fps: config.analysis.fps,
            calibrating: None,
            startup_errors,
        }
    }

    /// Source of a mode and its pacing
    fn open_source(&self, mode: Mode) -> Result<(Box<dyn VideoPose>, Option<Duration>), String> {
        match mode {
            Mode::RealTime => Ok((Box::new(BridgeSource::new(self.sources.bridge_command.clone())), None)),
            Mode::AnalyzeVideo | Mode::MatchTemplate => {
                let recording = RecordingSource::open(&self.sources.video)
                    .map_err(|e| format!("Unable to open {}: {}", self.sources.video.display(), e))?;
                let pace = Duration::from_secs_f32(1.0 / self.fps.max(1.0));
                Ok((Box::new(recording), Some(pace)))
            }
            Mode::Idle => Err("idle has no source".into()),
        }
    }

    #[tracing::instrument(skip_all, fields(mode = ?mode))]
    async fn set_mode(&mut self, mode: Mode) {
        if mode == Mode::RealTime && self.mode == Mode::RealTime {
            return;
        }
        if mode == Mode::MatchTemplate && !self.context.has_templates() {
            tracing::warn!("no templates to match");
            self.ui.send(ui::Command::Error("Record a template before matching".into())).await;
            return;
        }

        self.capture.close().await;
        self.context.reset_statistics();
        self.mode = Mode::Idle;

        let length = if mode == Mode::Idle {
            None
        } else {
            let opened = match self.open_source(mode) {
                Ok((source, pace)) => self.capture.open(source, pace).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            match opened {
                Ok(length) => {
                    self.mode = mode;
                    length
                }
                Err(e) => {
                    tracing::error!("unable to start {}: {}", mode, e);
                    self.ui.send(ui::Command::Error(e)).await;
                    None
                }
            }
        };

        tracing::info!("mode {}", self.mode);
        self.ui
            .send(ui::Command::ModeChanged {
                mode: self.mode,
                length,
            })
            .await;
    }

    #[tracing::instrument(skip_all, fields(cmd))]
    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetMode(mode) => self.set_mode(mode).await,
            Command::RecordStart => {
                self.context.start_recording();
            }
            Command::RecordStop => {
                let frames = self.context.stop_recording();
                self.ui.send(ui::Command::RecordingStopped { frames }).await;
            }
            Command::SaveTemplate { name, category } => {
                if let Err(e) = self.context.save_recording(name, category) {
                    tracing::error!("unable to save templates: {}", e);
                    self.ui.send(ui::Command::Error(format!("Unable to save templates: {}", e))).await;
                }
                self.ui.send(ui::Command::Templates(self.context.template_stats())).await;
            }
            Command::DiscardRecording => self.context.discard_recording(),
            Command::DeleteTemplate { name, category } => {
                match self.context.delete_template(&name, category) {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!("no template {} ({})", name, category),
                    Err(e) => {
                        tracing::error!("unable to save templates: {}", e);
                        self.ui.send(ui::Command::Error(format!("Unable to save templates: {}", e))).await;
                    }
                }
                self.ui.send(ui::Command::Templates(self.context.template_stats())).await;
            }
            Command::SaveCalibration => match self.context.save_calibration() {
                Ok(true) => {}
                Ok(false) => tracing::warn!("no calibration to save"),
                Err(e) => {
                    tracing::error!("unable to save calibration: {}", e);
                    self.ui.send(ui::Command::Error(format!("Unable to save calibration: {}", e))).await;
                }
            },
            Command::ForceRecalibrate => self.context.force_recalibration(),
            Command::Seek(index) => {
                if self.mode.plays_recording() {
                    self.capture.seek(index).await;
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Frame(data) => {
                if self.mode == Mode::Idle {
                    return;
                }
                tracing::trace!("processing frame {}", data.index);
                if self.calibrating.is_none() {
                    if let Some(job) = self.context.calibration_job(&data) {
                        self.calibrating = Some(tokio::task::spawn_blocking(job));
                    }
                }
                let report = self.context.process_frame(data);
                self.ui.send(ui::Command::Frame(Box::new(report))).await;
            }
            CaptureEvent::Ended => {
                tracing::info!("playback ended");
                self.ui.send(ui::Command::PlaybackEnded).await;
            }
            CaptureEvent::Idle => {}
        }
    }

    #[tracing::instrument(skip_all)]
    async fn run_session(mut self, initial_mode: Mode) {
        for error in std::mem::take(&mut self.startup_errors) {
            self.ui.send(ui::Command::Error(error)).await;
        }
        self.ui.send(ui::Command::Templates(self.context.template_stats())).await;
        if initial_mode != Mode::Idle {
            self.set_mode(initial_mode).await;
        }

        loop {
            tokio::select! {

                // Handle commands from the ui
                cmd = self.receiver.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },

                // Handle the most recent frame
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        tracing::error!("capture task is gone");
                        break;
                    }
                    let event = self.frames.borrow_and_update().clone();
                    self.handle_capture(event).await;
                }

                // Keep the outcome of a finished calibration attempt
                joined = calibration_done(&mut self.calibrating) => {
                    self.calibrating = None;
                    match joined {
                        Ok(attempt) => self.context.finish_calibration(attempt),
                        Err(e) => tracing::error!("calibration task failed: {}", e),
                    }
                }
            }
        }

        self.capture.close().await;
        tracing::info!("session ended");
    }
}

async fn calibration_done(task: &mut Option<JoinHandle<CalibrationAttempt>>) -> Result<CalibrationAttempt, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

pub fn run_session(
    receiver: mpsc::Receiver<Command>,
    capture: &CaptureProxy,
    frames: watch::Receiver<CaptureEvent>,
    ui: UiProxy,
    config: &Config,
    initial_mode: Mode,
) -> JoinHandle<()> {
    let session = Session::instantiate(receiver, capture, frames, ui, config);
    tokio::spawn(session.run_session(initial_mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::run_capture;
    use crate::fixtures::{calibration, pose_at, standing_pose, temp_dir, write_recording};
    use glam::Vec2;
    use rallyq_calib::quad_center;
    use rallyq_common::Resolution;

    fn test_config() -> Config {
        let dir = temp_dir();
        let mut config = Config::default();
        config.files.templates = dir.join("templates.csv");
        config.files.calibration = dir.join("calibration.json");
        config.capture.video = dir.join("recording");
        config
    }

    fn frame_with(pose: Option<PoseFrame>) -> Arc<CaptureData> {
        Arc::new(CaptureData {
            index: 0,
            resolution: Resolution::new(64, 48),
            frame: vec![200; 64 * 48 * 3],
            pose,
        })
    }

    fn calibrated_context(config: &Config, templates: Vec<Template>) -> SessionContext {
        let mut store = TemplateStore::new(&config.files.templates);
        templates.into_iter().for_each(|t| store.add(t));
        SessionContext::new(config, store, Some(calibration()))
    }

    fn template(name: &str, category: Category, pose: &PoseFrame) -> Template {
        Template {
            name: name.into(),
            category,
            frames: vec![pose.clone()],
        }
    }

    #[test]
    fn forced_recalibration_keeps_the_previous_grid() {
        let mut state = CalibrationState::Calibrated(Arc::new(calibration()));
        assert!(!state.needs_calibration());

        state.force();
        assert!(state.needs_calibration());
        assert!(matches!(state, CalibrationState::ForceRecalibrate { previous: Some(_) }));
        assert!(state.current().is_some());

        let mut empty = CalibrationState::default();
        empty.force();
        assert!(empty.current().is_none());
    }

    #[test]
    fn calibration_attempts_run_beside_the_frames() {
        let config = test_config();
        let mut context = SessionContext::new(&config, TemplateStore::new(&config.files.templates), None);
        let data = frame_with(Some(standing_pose()));
        let job = context.calibration_job(&data).unwrap();

        // Frames are processed while the attempt is pending
        let report = context.process_frame(data.clone());
        assert!(report.calibration.is_none());
        assert!(report.foot_cells.is_empty());

        // A blank frame holds no board
        let (index, result) = job();
        assert_eq!(index, 0);
        assert!(result.is_err());
        context.finish_calibration((index, result));
        assert!(matches!(context.calibration(), CalibrationState::Uncalibrated));
        assert!(!config.files.calibration.exists());

        context.finish_calibration((3, Ok(calibration())));
        assert!(matches!(context.calibration(), CalibrationState::Calibrated(_)));
        assert!(config.files.calibration.exists());
        assert!(context.calibration_job(&data).is_none());
        assert!(context.process_frame(data).calibration.is_some());
    }

    #[test]
    fn forced_recalibration_shows_the_previous_grid_meanwhile() {
        let config = test_config();
        let mut context = calibrated_context(&config, vec![]);
        let data = frame_with(None);
        assert!(context.calibration_job(&data).is_none());

        context.force_recalibration();
        let job = context.calibration_job(&data).unwrap();
        context.finish_calibration(job());
        let report = context.process_frame(data);
        assert!(report.calibration.is_some());
        assert!(matches!(context.calibration(), CalibrationState::ForceRecalibrate { .. }));
    }

    #[test]
    fn strokes_count_rising_edges_and_feed_coverage() {
        let config = test_config();
        let grid = calibration();
        let pose = pose_at(quad_center(&grid.cells[7].corners));
        let mut context = calibrated_context(&config, vec![template("forehand", Category::Arm, &pose)]);

        let report = context.process_frame(frame_with(Some(pose.clone())));
        assert_eq!(report.strokes, 1);
        assert_eq!(report.matches.get(Category::Arm).unwrap().template, "forehand");
        assert_eq!(report.foot_cells, vec![7; 4]);
        assert_eq!(report.coverage[7], 100.0);
        assert!((report.covered_area - 0.75).abs() < 1e-9);
        assert!(report.height.is_some());

        // Same stroke held over several frames
        let report = context.process_frame(frame_with(Some(pose.clone())));
        assert_eq!(report.strokes, 1);
        assert_eq!(report.templates[0].count, 1);
        assert_eq!(report.templates[0].share, 100.0);

        context.reset_statistics();
        let report = context.process_frame(frame_with(Some(pose)));
        assert_eq!(report.strokes, 1);
    }

    #[test]
    fn footwork_alone_does_not_cover_cells() {
        let config = test_config();
        let grid = calibration();
        let pose = pose_at(quad_center(&grid.cells[3].corners));
        let mut context = calibrated_context(&config, vec![template("shuffle", Category::Footwork, &pose)]);

        let report = context.process_frame(frame_with(Some(pose)));
        assert_eq!(report.steps, 1);
        assert_eq!(report.strokes, 0);
        assert_eq!(report.foot_cells, vec![3; 4]);
        assert!(report.coverage.iter().all(|&r| r == 0.0));
        assert_eq!(report.covered_area, 0.0);
    }

    #[test]
    fn recorded_poses_become_a_template() {
        let config = test_config();
        let mut context = calibrated_context(&config, vec![]);
        assert!(!context.has_templates());

        context.start_recording();
        for dx in [0.0, 0.01, 0.02] {
            let report = context.process_frame(frame_with(Some(pose_at(Vec2::new(0.5 + dx, 0.8)))));
            assert!(report.recording.is_some());
        }
        context.process_frame(frame_with(None));
        assert_eq!(context.stop_recording(), 3);

        context.save_recording("drive".into(), Category::Arm).unwrap();
        assert!(context.has_templates());
        let reloaded = TemplateStore::load(&config.files.templates).unwrap();
        assert_eq!(reloaded.templates()[0].name, "drive");
        assert_eq!(reloaded.templates()[0].frames.len(), 3);

        assert!(context.delete_template("drive", Category::Arm).unwrap());
        assert!(!context.delete_template("drive", Category::Arm).unwrap());
        assert!(TemplateStore::load(&config.files.templates).unwrap().is_empty());
    }

    #[test]
    fn saves_the_current_calibration() {
        let config = test_config();
        let context = SessionContext::new(&config, TemplateStore::new(&config.files.templates), None);
        assert!(!context.save_calibration().unwrap());

        let context = calibrated_context(&config, vec![]);
        assert!(context.save_calibration().unwrap());
        let saved = Calibration::load(&config.files.calibration).unwrap().unwrap();
        assert_eq!(saved.cells.len(), 18);
    }

    /// Next ui message, skipping frame reports when asked to
    async fn next_message(ui: &mut mpsc::Receiver<ui::Command>, skip_frames: bool) -> ui::Command {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ui.recv())
                .await
                .expect("no ui message in time")
                .expect("session is gone");
            if skip_frames && matches!(msg, ui::Command::Frame(_)) {
                continue;
            }
            return msg;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn analyzes_a_recording_until_it_ends() {
        let mut config = test_config();
        config.analysis.fps = 10.0;
        std::fs::create_dir_all(&config.capture.video).unwrap();
        write_recording(&config.capture.video, 4);

        let (proxy, receiver) = channel();
        let (ui_tx, mut ui_rx) = mpsc::channel(100);
        let (capture, frames) = run_capture();
        let session = run_session(receiver, &capture, frames, UiProxy(ui_tx), &config, Mode::Idle);

        assert!(matches!(next_message(&mut ui_rx, false).await, ui::Command::Templates(t) if t.is_empty()));

        proxy.send(Command::SetMode(Mode::MatchTemplate));
        assert!(matches!(next_message(&mut ui_rx, false).await, ui::Command::Error(_)));

        proxy.send(Command::SetMode(Mode::AnalyzeVideo));
        match next_message(&mut ui_rx, false).await {
            ui::Command::ModeChanged { mode, length } => {
                assert_eq!(mode, Mode::AnalyzeVideo);
                assert_eq!(length, Some(4));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut reports = 0;
        loop {
            match next_message(&mut ui_rx, false).await {
                ui::Command::Frame(report) => {
                    assert!(report.capture.index < 4);
                    reports += 1;
                }
                ui::Command::PlaybackEnded => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(reports > 0);

        proxy.send(Command::Shutdown);
        tokio::time::timeout(Duration::from_secs(5), session).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_recording_falls_back_to_idle() {
        let config = test_config();
        let (proxy, receiver) = channel();
        let (ui_tx, mut ui_rx) = mpsc::channel(100);
        let (capture, frames) = run_capture();
        let _session = run_session(receiver, &capture, frames, UiProxy(ui_tx), &config, Mode::AnalyzeVideo);

        assert!(matches!(next_message(&mut ui_rx, true).await, ui::Command::Templates(_)));
        assert!(matches!(next_message(&mut ui_rx, true).await, ui::Command::Error(_)));
        assert!(matches!(
            next_message(&mut ui_rx, true).await,
            ui::Command::ModeChanged { mode: Mode::Idle, length: None }
        ));
        proxy.send(Command::Shutdown);
    }
}
