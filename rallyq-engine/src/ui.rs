use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

use eframe::egui;
use egui::{Color32, Key, Pos2, Rect, RichText, Sense, Ui};

use crate::charts;
use crate::config::UiConfig;
use crate::overlay::{draw_grid, draw_reference, draw_skeleton, fit_rect};
use crate::session::{self, FrameReport, Mode, SessionProxy, TemplateStat};
use rallyq_motion::Category;

/// Contains all commands understood by the ui
#[derive(Debug)]
pub enum Command {
    ModeChanged {
        mode: Mode,
        /// Number of frames of the source, None for live sources
        length: Option<usize>,
    },
    Frame(Box<FrameReport>),
    PlaybackEnded,
    Templates(Vec<TemplateStat>),
    RecordingStopped {
        frames: usize,
    },
    Error(String),
}

#[derive(Debug)]
pub struct UiProxy(pub mpsc::Sender<Command>);
impl UiProxy {
    pub async fn send(&self, cmd: Command) {
        if self.0.send(cmd).await.is_err() {
            tracing::debug!("ui is gone");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Video on the left, skeleton and coverage chart on the right
    SideBySide,
    /// Video only, coverage chart drawn over it
    Overlay,
}

#[derive(Debug, PartialEq)]
enum Dialog {
    NameTemplate {
        name: String,
        category: Category,
        frames: usize,
    },
    ConfirmDelete {
        name: String,
        category: Category,
    },
}

/// What the operator chose in a dialog
enum DialogOutcome {
    Send(session::Command),
    Cancel,
}

struct RallyApp {
    receiver: mpsc::Receiver<Command>,
    session: SessionProxy,
    refresh: Duration,

    mode: Mode,
    /// Frames of the played recording
    length: Option<usize>,
    position: usize,
    seeking: bool,
    ended: bool,

    report: Option<Box<FrameReport>>,
    texture: Option<egui::TextureHandle>,
    templates: Vec<TemplateStat>,
    selected: Option<(String, Category)>,

    show_grid: bool,
    layout: Layout,
    dialog: Option<Dialog>,
    errors: VecDeque<String>,
}

impl RallyApp {
    fn new(receiver: mpsc::Receiver<Command>, session: SessionProxy, refresh: Duration) -> Self {
        Self {
            receiver,
            session,
            refresh,
            mode: Mode::Idle,
            length: None,
            position: 0,
            seeking: false,
            ended: false,
            report: None,
            texture: None,
            templates: vec![],
            selected: None,
            show_grid: true,
            layout: Layout::SideBySide,
            dialog: None,
            errors: VecDeque::new(),
        }
    }

    /// Apply a message of the session, true if it carried a new frame
    fn apply(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::ModeChanged { mode, length } => {
                self.mode = mode;
                self.length = length;
                self.position = 0;
                self.ended = false;
                if mode == Mode::Idle {
                    self.report = None;
                }
                false
            }
            Command::Frame(report) => {
                if !self.seeking {
                    self.position = report.capture.index;
                }
                self.templates = report.templates.clone();
                self.report = Some(report);
                self.ended = false;
                true
            }
            Command::PlaybackEnded => {
                self.ended = true;
                false
            }
            Command::Templates(templates) => {
                let selected_exists = self
                    .selected
                    .as_ref()
                    .is_some_and(|(n, c)| templates.iter().any(|t| &t.name == n && t.category == *c));
                if !selected_exists {
                    self.selected = None;
                }
                self.templates = templates;
                false
            }
            Command::RecordingStopped { frames } => {
                if frames > 0 {
                    self.dialog = Some(Dialog::NameTemplate {
                        name: String::new(),
                        category: Category::Arm,
                        frames,
                    });
                } else {
                    self.errors.push_back("No poses were recorded".into());
                }
                false
            }
            Command::Error(message) => {
                self.errors.push_back(message);
                false
            }
        }
    }

    fn poll(&mut self, ctx: &egui::Context) {
        let mut new_frame = false;
        while let Ok(cmd) = self.receiver.try_recv() {
            new_frame |= self.apply(cmd);
        }
        if new_frame {
            self.upload_frame(ctx);
        }
    }

    fn upload_frame(&mut self, ctx: &egui::Context) {
        let Some(report) = &self.report else {
            return;
        };
        let data = &report.capture;
        let size = [data.resolution.w, data.resolution.h];
        if data.frame.len() != size[0] * size[1] * 3 {
            tracing::warn!("frame {} has a malformed buffer", data.index);
            return;
        }

        let image = egui::ColorImage::from_rgb(size, &data.frame);
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => self.texture = Some(ctx.load_texture("video", image, egui::TextureOptions::LINEAR)),
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        let pressed = |key: Key| ctx.input(|i| i.key_pressed(key));

        if pressed(Key::Escape) {
            self.session.send(session::Command::Shutdown);
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }
        if ctx.wants_keyboard_input() || self.dialog.is_some() {
            return;
        }

        if pressed(Key::F5) {
            self.session.send(session::Command::SetMode(Mode::RealTime));
        }
        if pressed(Key::A) {
            self.session.send(session::Command::SetMode(Mode::AnalyzeVideo));
        }
        if pressed(Key::F6) {
            self.session.send(session::Command::SetMode(Mode::MatchTemplate));
        }
        if pressed(Key::B) {
            self.session.send(session::Command::RecordStart);
        }
        if pressed(Key::E) {
            self.session.send(session::Command::RecordStop);
        }
        if pressed(Key::D) {
            if let Some((name, category)) = self.selected.take() {
                self.session.send(session::Command::DeleteTemplate { name, category });
            }
        }
        if pressed(Key::F1) {
            self.session.send(session::Command::SaveCalibration);
        }
        if pressed(Key::F2) {
            self.session.send(session::Command::ForceRecalibrate);
        }
        if pressed(Key::F3) {
            self.show_grid = !self.show_grid;
        }
        if pressed(Key::F4) {
            self.layout = match self.layout {
                Layout::SideBySide => Layout::Overlay,
                Layout::Overlay => Layout::SideBySide,
            };
        }
    }

    fn top_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("status_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading(format!("Mode: {}", self.mode));
                ui.separator();

                for (label, mode) in [
                    ("Real-time (F5)", Mode::RealTime),
                    ("Analyze (A)", Mode::AnalyzeVideo),
                    ("Match (F6)", Mode::MatchTemplate),
                    ("Stop", Mode::Idle),
                ] {
                    if ui.add_enabled(self.mode != mode, egui::Button::new(label)).clicked() {
                        self.session.send(session::Command::SetMode(mode));
                    }
                }
                ui.separator();

                if let Some(frames) = self.report.as_ref().and_then(|r| r.recording) {
                    ui.label(RichText::new(format!("Recording, {} poses (E to stop)", frames)).color(Color32::RED));
                } else if self.ended {
                    ui.label("Playback ended");
                }
            });
        });
    }

    fn bottom_panel(&mut self, ctx: &egui::Context) {
        let Some(length) = self.length.filter(|&l| l > 0) else {
            return;
        };

        egui::TopBottomPanel::bottom("playback_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("{} / {}", self.position + 1, length));
                ui.spacing_mut().slider_width = ui.available_width() - 16.0;
                let response = ui.add(egui::Slider::new(&mut self.position, 0..=length - 1).show_value(false));
                self.seeking = response.dragged();
                if response.drag_stopped() || (response.changed() && !response.dragged()) {
                    self.session.send(session::Command::Seek(self.position));
                }
            });
        });
    }

    fn statistics_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("statistics_panel")
            .exact_width(380.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.heading("Speed");
                    match &self.report {
                        Some(report) => charts::speed_table(ui, &report.speeds, report.height),
                        None => charts::speed_table(ui, &Default::default(), None),
                    }
                    ui.separator();

                    let (strokes, steps) = self.report.as_ref().map_or((0, 0), |r| (r.strokes, r.steps));
                    let matched = |category: Category| {
                        self.report
                            .as_ref()
                            .and_then(|r| r.matches.get(category))
                            .map(|m| m.template.as_str())
                    };
                    let of = |category: Category| self.templates.iter().filter(|t| t.category == category).collect::<Vec<_>>();

                    charts::template_bars(ui, &format!("Strokes: {}", strokes), &of(Category::Arm), matched(Category::Arm));
                    ui.add_space(8.0);
                    charts::template_bars(ui, &format!("Steps: {}", steps), &of(Category::Footwork), matched(Category::Footwork));
                    ui.separator();

                    self.template_list(ui);
                });
            });
    }

    fn template_list(&mut self, ui: &mut Ui) {
        ui.heading("Templates");
        if self.templates.is_empty() {
            ui.weak("B starts recording a template, E stops it");
            return;
        }

        for template in &self.templates {
            let key = (template.name.clone(), template.category);
            let is_selected = self.selected.as_ref() == Some(&key);
            let text = format!("{} ({}, {} frames)", template.name, template.category, template.frames);

            let response = ui.selectable_label(is_selected, text);
            if response.double_clicked() {
                self.dialog = Some(Dialog::ConfirmDelete {
                    name: key.0.clone(),
                    category: key.1,
                });
            }
            if response.clicked() {
                self.selected = if is_selected { None } else { Some(key) };
            }
        }
        ui.weak("D deletes the selected template");
    }

    fn central_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| match self.layout {
            Layout::SideBySide => {
                ui.columns(2, |cols| {
                    self.video_view(&mut cols[0], false);

                    let ui = &mut cols[1];
                    let size = egui::vec2(ui.available_width(), ui.available_height() * 0.5);
                    let (canvas, _) = ui.allocate_exact_size(size, Sense::hover());
                    self.skeleton_view(ui, canvas);

                    let (chart, _) = ui.allocate_exact_size(ui.available_size(), Sense::hover());
                    self.coverage_view(ui, chart);
                });
            }
            Layout::Overlay => self.video_view(ui, true),
        });
    }

    /// Video with the grid, the reference and the skeleton on top
    fn video_view(&self, ui: &mut Ui, with_chart: bool) {
        let (outer, _) = ui.allocate_exact_size(ui.available_size(), Sense::hover());
        let painter = ui.painter_at(outer);
        painter.rect_filled(outer, 0.0, Color32::BLACK);

        let (Some(report), Some(texture)) = (&self.report, &self.texture) else {
            painter.text(
                outer.center(),
                egui::Align2::CENTER_CENTER,
                "No video",
                egui::FontId::proportional(18.0),
                Color32::GRAY,
            );
            return;
        };

        let resolution = report.capture.resolution;
        let rect = fit_rect(outer, resolution.w as f32 / resolution.h.max(1) as f32);
        let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
        painter.image(texture.id(), rect, uv, Color32::WHITE);

        if let Some(calibration) = &report.calibration {
            if self.show_grid {
                draw_grid(&painter, rect, calibration, None, &report.foot_cells);
                draw_reference(&painter, rect, &calibration.reference);
            }
            if with_chart {
                let chart = Rect::from_min_size(rect.min, egui::vec2(rect.width() * 0.25, rect.height()));
                let rows = charts::coverage_rows(calibration, &report.coverage);
                charts::paint_coverage(&painter, chart, &rows, report.covered_area);
            }
        }

        if let Some(pose) = &report.capture.pose {
            draw_skeleton(&painter, rect, pose, skeleton_color(report));
        }
    }

    /// Skeleton over the heat of the grid on a black canvas
    fn skeleton_view(&self, ui: &Ui, canvas: Rect) {
        let painter = ui.painter_at(canvas);
        painter.rect_filled(canvas, 0.0, Color32::BLACK);
        let Some(report) = &self.report else {
            return;
        };

        let resolution = report.capture.resolution;
        let rect = fit_rect(canvas, resolution.w as f32 / resolution.h.max(1) as f32);
        if let Some(calibration) = &report.calibration {
            draw_grid(&painter, rect, calibration, Some(&report.coverage), &report.foot_cells);
        }
        if let Some(pose) = &report.capture.pose {
            draw_skeleton(&painter, rect, pose, skeleton_color(report));
        }
    }

    fn coverage_view(&self, ui: &Ui, rect: Rect) {
        let painter = ui.painter_at(rect);
        match self.report.as_ref().and_then(|r| r.calibration.as_ref().map(|c| (r, c))) {
            Some((report, calibration)) => {
                let rows = charts::coverage_rows(calibration, &report.coverage);
                charts::paint_coverage(&painter, rect, &rows, report.covered_area);
            }
            None => charts::paint_coverage(&painter, rect, &[], 0.0),
        }
    }

    fn dialogs(&mut self, ctx: &egui::Context) {
        if let Some(message) = self.errors.front() {
            let mut dismissed = false;
            egui::Window::new("Error")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                .show(ctx, |ui| {
                    ui.label(message.as_str());
                    dismissed = ui.button("OK").clicked();
                });
            if dismissed {
                self.errors.pop_front();
            }
            return;
        }

        let mut outcome = None;
        match &mut self.dialog {
            Some(Dialog::NameTemplate { name, category, frames }) => {
                egui::Window::new("New template")
                    .collapsible(false)
                    .resizable(false)
                    .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                    .show(ctx, |ui| {
                        ui.label(format!("{} poses recorded", frames));
                        ui.horizontal(|ui| {
                            ui.label("Name");
                            ui.text_edit_singleline(name);
                        });
                        egui::ComboBox::from_label("Category")
                            .selected_text(category.to_string())
                            .show_ui(ui, |ui| {
                                for c in Category::ALL {
                                    ui.selectable_value(category, c, c.to_string());
                                }
                            });
                        ui.horizontal(|ui| {
                            let name = name.trim();
                            if ui.add_enabled(!name.is_empty(), egui::Button::new("Save")).clicked() {
                                outcome = Some(DialogOutcome::Send(session::Command::SaveTemplate {
                                    name: name.to_string(),
                                    category: *category,
                                }));
                            }
                            if ui.button("Discard").clicked() {
                                outcome = Some(DialogOutcome::Send(session::Command::DiscardRecording));
                            }
                        });
                    });
            }
            Some(Dialog::ConfirmDelete { name, category }) => {
                egui::Window::new("Delete template")
                    .collapsible(false)
                    .resizable(false)
                    .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                    .show(ctx, |ui| {
                        ui.label(format!("Delete {} ({})?", name, category));
                        ui.horizontal(|ui| {
                            if ui.button("Delete").clicked() {
                                self.selected = None;
                                outcome = Some(DialogOutcome::Send(session::Command::DeleteTemplate {
                                    name: name.clone(),
                                    category: *category,
                                }));
                            }
                            if ui.button("Cancel").clicked() {
                                outcome = Some(DialogOutcome::Cancel);
                            }
                        });
                    });
            }
            None => {}
        }

        match outcome {
            Some(DialogOutcome::Send(cmd)) => {
                self.session.send(cmd);
                self.dialog = None;
            }
            Some(DialogOutcome::Cancel) => self.dialog = None,
            None => {}
        }
    }
}

fn skeleton_color(report: &FrameReport) -> Color32 {
    if report.matches.any() {
        Color32::GREEN
    } else {
        Color32::WHITE
    }
}

impl eframe::App for RallyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll(ctx);
        self.handle_keys(ctx);

        self.top_panel(ctx);
        self.bottom_panel(ctx);
        self.statistics_panel(ctx);
        self.central_panel(ctx);
        self.dialogs(ctx);

        // Poll the session again even without input
        ctx.request_repaint_after(self.refresh);
    }
}

/// Run the window on the calling thread until it is closed
pub fn run_ui_blocking(receiver: mpsc::Receiver<Command>, session: SessionProxy, config: &UiConfig) -> eframe::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(config.window_size)
            .with_title("RallyQ"),
        ..Default::default()
    };

    let shutdown = session.clone();
    let refresh = Duration::from_millis(config.refresh_ms);
    let result = eframe::run_native(
        "RallyQ",
        options,
        Box::new(move |_cc| Ok(Box::new(RallyApp::new(receiver, session, refresh)))),
    );

    // The window may be closed without Esc
    shutdown.send(session::Command::Shutdown);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::standing_pose;
    use rallyq_common::{CaptureData, Resolution};
    use std::sync::Arc;

    fn app() -> (RallyApp, mpsc::Receiver<session::Command>) {
        let (_ui_tx, ui_rx) = mpsc::channel(1);
        let (proxy, commands) = session::channel();
        (RallyApp::new(ui_rx, proxy, Duration::from_millis(10)), commands)
    }

    fn report(index: usize) -> Box<FrameReport> {
        Box::new(FrameReport {
            capture: Arc::new(CaptureData {
                index,
                resolution: Resolution::new(4, 2),
                frame: vec![0; 4 * 2 * 3],
                pose: Some(standing_pose()),
            }),
            calibration: None,
            matches: Default::default(),
            foot_cells: vec![],
            coverage: vec![],
            covered_area: 0.0,
            speeds: Default::default(),
            height: None,
            strokes: 0,
            steps: 0,
            templates: vec![stat("drive")],
            recording: None,
        })
    }

    fn stat(name: &str) -> TemplateStat {
        TemplateStat {
            name: name.into(),
            category: Category::Arm,
            frames: 3,
            count: 0,
            share: 0.0,
        }
    }

    #[test]
    fn frames_move_the_playback_position() {
        let (mut app, _commands) = app();
        assert!(!app.apply(Command::ModeChanged {
            mode: Mode::AnalyzeVideo,
            length: Some(10)
        }));
        assert_eq!(app.length, Some(10));

        assert!(app.apply(Command::Frame(report(4))));
        assert_eq!(app.position, 4);
        assert_eq!(app.templates, vec![stat("drive")]);

        // Dragging the slider wins over incoming frames
        app.seeking = true;
        app.apply(Command::Frame(report(5)));
        assert_eq!(app.position, 4);

        app.apply(Command::PlaybackEnded);
        assert!(app.ended);

        app.apply(Command::ModeChanged {
            mode: Mode::Idle,
            length: None,
        });
        assert!(app.report.is_none());
        assert_eq!(app.position, 0);
    }

    #[test]
    fn stopped_recording_asks_for_a_name() {
        let (mut app, _commands) = app();
        app.apply(Command::RecordingStopped { frames: 0 });
        assert_eq!(app.errors.len(), 1);
        assert!(app.dialog.is_none());

        app.apply(Command::RecordingStopped { frames: 12 });
        assert_eq!(
            app.dialog,
            Some(Dialog::NameTemplate {
                name: String::new(),
                category: Category::Arm,
                frames: 12
            })
        );
    }

    #[test]
    fn removed_templates_clear_the_selection() {
        let (mut app, _commands) = app();
        app.apply(Command::Templates(vec![stat("drive"), stat("push")]));
        app.selected = Some(("push".into(), Category::Arm));

        app.apply(Command::Templates(vec![stat("drive"), stat("push")]));
        assert!(app.selected.is_some());

        app.apply(Command::Templates(vec![stat("drive")]));
        assert!(app.selected.is_none());
    }

    #[test]
    fn errors_queue_up() {
        let (mut app, _commands) = app();
        app.apply(Command::Error("first".into()));
        app.apply(Command::Error("second".into()));
        assert_eq!(app.errors.front().map(String::as_str), Some("first"));
        assert_eq!(app.errors.len(), 2);
    }
}
