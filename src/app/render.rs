use crate::model::Area;
use eframe::egui;

use super::draw_mode::{DrawMode, InProgress};
use super::map_session::MapView;
use super::overlay::AttachedOverlay;

/// Classic web-map blue for the area rectangle.
fn rectangle_stroke() -> egui::Stroke {
    egui::Stroke::new(2.0, egui::Color32::from_rgb(0x33, 0x88, 0xff))
}

fn rectangle_fill() -> egui::Color32 {
    egui::Color32::from_rgba_unmultiplied(0x33, 0x88, 0xff, 51)
}

pub(super) fn mode_button(ui: &mut egui::Ui, label: &str, mode: DrawMode, current: DrawMode) -> bool {
    ui.selectable_label(current == mode, label).clicked()
}

/// Ladder of graticule spacings in degrees; the widest one that still
/// leaves readable gaps on screen wins.
fn graticule_spacing(scale: f64) -> f64 {
    const LADDER: [f64; 10] = [0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 5.0, 10.0, 30.0];
    for spacing in LADDER {
        if spacing * scale >= 80.0 {
            return spacing;
        }
    }
    45.0
}

pub(super) fn draw_background(painter: &egui::Painter, viewport: egui::Rect, view: &MapView) {
    let bg = painter.ctx().style().visuals.extreme_bg_color;
    painter.rect_filled(viewport, 0.0, bg);

    let grid_color = egui::Color32::from_gray(60);
    let label_color = egui::Color32::from_gray(120);
    let spacing = graticule_spacing(view.scale);

    let (west, north) = view.screen_to_world(viewport, viewport.min);
    let (east, south) = view.screen_to_world(viewport, viewport.max);

    let mut lon = (west / spacing).floor() * spacing;
    while lon <= east {
        let x = view.world_to_screen(viewport, lon, 0.0).x;
        painter.line_segment(
            [egui::pos2(x, viewport.min.y), egui::pos2(x, viewport.max.y)],
            egui::Stroke::new(1.0, grid_color),
        );
        painter.text(
            egui::pos2(x + 3.0, viewport.max.y - 12.0),
            egui::Align2::LEFT_TOP,
            format!("{lon:.2}°"),
            egui::FontId::proportional(10.0),
            label_color,
        );
        lon += spacing;
    }

    let mut lat = (south / spacing).floor() * spacing;
    while lat <= north {
        let y = view.world_to_screen(viewport, 0.0, lat).y;
        painter.line_segment(
            [egui::pos2(viewport.min.x, y), egui::pos2(viewport.max.x, y)],
            egui::Stroke::new(1.0, grid_color),
        );
        painter.text(
            egui::pos2(viewport.min.x + 3.0, y + 2.0),
            egui::Align2::LEFT_TOP,
            format!("{lat:.2}°"),
            egui::FontId::proportional(10.0),
            label_color,
        );
        lat += spacing;
    }
}

pub(super) fn draw_overlay(
    painter: &egui::Painter,
    viewport: egui::Rect,
    view: &MapView,
    overlay: &AttachedOverlay,
) {
    let rect = view.bounds_to_rect(viewport, overlay.bounds);
    painter.image(
        overlay.texture.id(),
        rect,
        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
        egui::Color32::WHITE,
    );
}

pub(super) fn draw_area_rect(
    painter: &egui::Painter,
    viewport: egui::Rect,
    view: &MapView,
    area: &Area,
) {
    let rect = view.bounds_to_rect(viewport, area.bounds());
    painter.rect_filled(rect, 0.0, rectangle_fill());
    painter.rect_stroke(rect, 0.0, rectangle_stroke(), egui::StrokeKind::Outside);
}

pub(super) fn draw_in_progress(
    painter: &egui::Painter,
    viewport: egui::Rect,
    view: &MapView,
    in_progress: &InProgress,
) {
    let a = view.world_to_screen(viewport, in_progress.start.0, in_progress.start.1);
    let b = view.world_to_screen(viewport, in_progress.current.0, in_progress.current.1);
    let rect = egui::Rect::from_two_pos(a, b);
    painter.rect_filled(rect, 0.0, rectangle_fill());
    painter.rect_stroke(rect, 0.0, rectangle_stroke(), egui::StrokeKind::Outside);
}

/// Land-cover legend drawn in the map corner while the overlay is live.
pub(super) fn draw_legend(
    painter: &egui::Painter,
    viewport: egui::Rect,
    legend: &[(String, egui::Color32)],
) {
    if legend.is_empty() {
        return;
    }
    const ROW: f32 = 16.0;
    const SWATCH: f32 = 10.0;
    let width = 190.0;
    let height = legend.len() as f32 * ROW + 10.0;
    let origin = egui::pos2(
        viewport.max.x - width - 10.0,
        viewport.min.y + 10.0,
    );
    let frame = egui::Rect::from_min_size(origin, egui::vec2(width, height));
    painter.rect_filled(frame, 4.0, egui::Color32::from_black_alpha(170));
    for (i, (label, color)) in legend.iter().enumerate() {
        let y = origin.y + 5.0 + i as f32 * ROW;
        painter.rect_filled(
            egui::Rect::from_min_size(egui::pos2(origin.x + 6.0, y + 2.0), egui::vec2(SWATCH, SWATCH)),
            2.0,
            *color,
        );
        painter.text(
            egui::pos2(origin.x + 6.0 + SWATCH + 6.0, y),
            egui::Align2::LEFT_TOP,
            label,
            egui::FontId::proportional(11.0),
            egui::Color32::WHITE,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graticule_spacing_narrows_as_the_view_zooms_in() {
        assert!(graticule_spacing(10_000.0) < graticule_spacing(100.0));
        assert!(graticule_spacing(1.0) <= 45.0);
    }
}
