use egui::{Align2, Color32, FontId, Painter, Pos2, Rect, Stroke, Vec2};

use crate::analysis::SpeedStats;
use crate::session::TemplateStat;
use rallyq_calib::Calibration;

/// Black, red, yellow, white heat scale, `t` in 0..1
pub fn hot(t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let r = 0.0416 + (1.0 - 0.0416) * (t / 0.365079);
    let g = (t - 0.365079) / (0.746032 - 0.365079);
    let b = (t - 0.746032) / (1.0 - 0.746032);
    rgb(r, g, b)
}

/// Black, blue, white scale used for the template bars
pub fn blue_white(t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let rg = (t - 0.5) * 2.0;
    rgb(rg, rg, t * 2.0)
}

fn rgb(r: f32, g: f32, b: f32) -> Color32 {
    let channel = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color32::from_rgb(channel(r), channel(g), channel(b))
}

/// Cell labels and coverage ratios in chart order
pub fn coverage_rows(calibration: &Calibration, ratios: &[f32]) -> Vec<(String, f32)> {
    calibration
        .chart_order()
        .into_iter()
        .map(|cell| (cell.label.clone(), ratios.get(cell.index).copied().unwrap_or(0.0)))
        .collect()
}

/// Horizontal bar per cell with a heat scale on the right
pub fn paint_coverage(painter: &Painter, rect: Rect, rows: &[(String, f32)], covered_area: f64) {
    let text = Color32::WHITE;
    let font = FontId::proportional(11.0);
    painter.rect_filled(rect, 4.0, Color32::from_black_alpha(200));

    painter.text(
        Pos2::new(rect.center().x, rect.top() + 12.0),
        Align2::CENTER_CENTER,
        format!("Covered Area: {:.2} m²", covered_area),
        FontId::proportional(14.0),
        text,
    );
    if rows.is_empty() {
        return;
    }

    let scale_width = 10.0;
    let label_width = 32.0;
    let value_width = 40.0;
    let plot = Rect::from_min_max(
        Pos2::new(rect.left() + label_width, rect.top() + 28.0),
        Pos2::new(rect.right() - scale_width - 30.0 - value_width, rect.bottom() - 8.0),
    );
    let row_height = plot.height() / rows.len() as f32;

    for (i, (label, ratio)) in rows.iter().enumerate() {
        let y = plot.top() + row_height * (i as f32 + 0.5);
        painter.text(Pos2::new(rect.left() + 4.0, y), Align2::LEFT_CENTER, label, font.clone(), text);

        let width = plot.width() * ratio.clamp(0.0, 100.0) / 100.0;
        let bar = Rect::from_min_size(
            Pos2::new(plot.left(), y - row_height * 0.35),
            Vec2::new(width, row_height * 0.7),
        );
        painter.rect_filled(bar, 0.0, hot(ratio / 100.0));
        painter.rect_stroke(bar, 0.0, Stroke::new(0.5, Color32::BLACK));
        painter.text(
            Pos2::new(bar.right() + 3.0, y),
            Align2::LEFT_CENTER,
            format!("{:.1}%", ratio),
            font.clone(),
            text,
        );
    }

    // Heat scale
    let scale = Rect::from_min_max(
        Pos2::new(rect.right() - scale_width - 30.0, plot.top()),
        Pos2::new(rect.right() - 30.0, plot.bottom()),
    );
    let steps = 50;
    let step = scale.height() / steps as f32;
    for k in 0..steps {
        let t = 1.0 - (k as f32 + 0.5) / steps as f32;
        let band = Rect::from_min_size(Pos2::new(scale.left(), scale.top() + k as f32 * step), Vec2::new(scale_width, step + 0.5));
        painter.rect_filled(band, 0.0, hot(t));
    }
    for tick in (0..=100).step_by(20) {
        let y = scale.bottom() - scale.height() * tick as f32 / 100.0;
        painter.text(Pos2::new(scale.right() + 3.0, y), Align2::LEFT_CENTER, format!("{}%", tick), font.clone(), text);
    }
}

/// Share of the matches of each template of a region
pub fn template_bars(ui: &mut egui::Ui, title: &str, stats: &[&TemplateStat], matched: Option<&str>) {
    ui.label(egui::RichText::new(title).size(14.0));
    if stats.is_empty() {
        ui.weak("no templates");
        return;
    }

    for stat in stats {
        let color = if matched == Some(stat.name.as_str()) {
            Color32::GREEN
        } else {
            ui.visuals().text_color()
        };
        ui.label(egui::RichText::new(format!("{}: {:.2}%", stat.name, stat.share)).color(color));

        let (rect, _) = ui.allocate_exact_size(Vec2::new(ui.available_width(), 10.0), egui::Sense::hover());
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 0.0, Color32::LIGHT_GRAY);
        let filled = Rect::from_min_size(rect.min, Vec2::new(rect.width() * stat.share / 100.0, rect.height()));
        painter.rect_filled(filled, 0.0, blue_white(stat.share / 100.0));
    }
}

/// Current, max and average speeds in km/h, then the body height
pub fn speed_table(ui: &mut egui::Ui, speeds: &SpeedStats, height: Option<f32>) {
    let [current, max, average] = [speeds.current, speeds.max, speeds.average].map(|v| v.km_h());
    let rows = [
        ("Forward", current.forward, max.forward, average.forward),
        ("Sideways", current.sideways, max.sideways, average.sideways),
        ("Depth", current.depth, max.depth, average.depth),
        ("Overall", current.overall, max.overall, average.overall),
    ];

    egui::Grid::new("speed_table").striped(true).min_col_width(90.0).show(ui, |ui| {
        for header in ["", "Current (km/h)", "Max (km/h)", "Average (km/h)"] {
            ui.strong(header);
        }
        ui.end_row();

        for (name, current, max, average) in rows {
            ui.label(name);
            ui.label(format!("{:.2}", current));
            ui.label(format!("{:.2}", max));
            ui.label(format!("{:.2}", average));
            ui.end_row();
        }
    });

    match height {
        Some(height) => ui.label(format!("Height: {:.2} m", height)),
        None => ui.weak("Height: -"),
    };
}
