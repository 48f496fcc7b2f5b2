use crate::model::GeoBounds;
use eframe::egui;

/// Pan/zoom view over the lon/lat plane. World x is longitude, world y is
/// latitude; screen y grows downwards, so latitude is flipped on projection.
#[derive(Clone, Copy, Debug)]
pub(super) struct MapView {
    /// Geographic point at the viewport center (lon, lat).
    pub center: (f64, f64),
    /// Pixels per degree of longitude.
    pub scale: f64,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            // Bucharest, matching the original default position.
            center: (26.1025, 44.4268),
            scale: 2048.0,
        }
    }
}

const MIN_SCALE: f64 = 2.0;
const MAX_SCALE: f64 = 4_000_000.0;

impl MapView {
    pub fn world_to_screen(&self, viewport: egui::Rect, lon: f64, lat: f64) -> egui::Pos2 {
        let c = viewport.center();
        egui::pos2(
            c.x + ((lon - self.center.0) * self.scale) as f32,
            c.y - ((lat - self.center.1) * self.scale) as f32,
        )
    }

    pub fn screen_to_world(&self, viewport: egui::Rect, screen: egui::Pos2) -> (f64, f64) {
        let c = viewport.center();
        (
            self.center.0 + (screen.x - c.x) as f64 / self.scale,
            self.center.1 - (screen.y - c.y) as f64 / self.scale,
        )
    }

    pub fn pan_screen(&mut self, delta: egui::Vec2) {
        self.center.0 -= delta.x as f64 / self.scale;
        self.center.1 += delta.y as f64 / self.scale;
        self.center.1 = self.center.1.clamp(-85.0, 85.0);
    }

    /// Zooms keeping the world point under `screen_point` fixed.
    pub fn zoom_about_screen_point(
        &mut self,
        viewport: egui::Rect,
        screen_point: egui::Pos2,
        zoom_delta: f64,
    ) {
        let before = self.screen_to_world(viewport, screen_point);
        self.scale = (self.scale * zoom_delta).clamp(MIN_SCALE, MAX_SCALE);
        let after = self.world_to_screen(viewport, before.0, before.1);
        self.pan_screen(screen_point - after);
    }

    /// Centers and scales so `bounds` fits inside the viewport with a fixed
    /// pixel padding on every side.
    pub fn fit_bounds(&mut self, viewport: egui::Rect, bounds: GeoBounds, padding: f32) {
        self.center = bounds.center();
        let avail_w = (viewport.width() - 2.0 * padding).max(1.0) as f64;
        let avail_h = (viewport.height() - 2.0 * padding).max(1.0) as f64;
        let scale_w = avail_w / bounds.width().max(1e-9);
        let scale_h = avail_h / bounds.height().max(1e-9);
        self.scale = scale_w.min(scale_h).clamp(MIN_SCALE, MAX_SCALE);
    }

    pub fn bounds_to_rect(&self, viewport: egui::Rect, bounds: GeoBounds) -> egui::Rect {
        let nw = self.world_to_screen(viewport, bounds.west, bounds.north);
        let se = self.world_to_screen(viewport, bounds.east, bounds.south);
        egui::Rect::from_min_max(nw, se)
    }
}

/// The single map handle shared by draw mode, overlays and history. The
/// widget initializes over the first frames; anything needing the viewport
/// must check `is_ready()` first.
pub(super) struct MapSession {
    pub view: MapView,
    viewport: Option<egui::Rect>,
    pending_fit: Option<GeoBounds>,
    fit_padding: f32,
}

impl MapSession {
    pub fn new(center: (f64, f64), fit_padding: f32) -> Self {
        Self {
            view: MapView {
                center,
                ..MapView::default()
            },
            viewport: None,
            pending_fit: None,
            fit_padding,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.viewport.is_some()
    }

    pub fn viewport(&self) -> Option<egui::Rect> {
        self.viewport
    }

    /// Called once per frame by the central panel; the first call flips the
    /// session to ready and applies any fit queued while not ready.
    pub fn frame(&mut self, viewport: egui::Rect) {
        self.viewport = Some(viewport);
        if let Some(bounds) = self.pending_fit.take() {
            self.view.fit_bounds(viewport, bounds, self.fit_padding);
        }
    }

    pub fn recenter(&mut self, lon: f64, lat: f64) {
        self.view.center = (lon, lat);
    }

    pub fn fit(&mut self, bounds: GeoBounds) {
        match self.viewport {
            Some(viewport) => self.view.fit_bounds(viewport, bounds, self.fit_padding),
            None => self.pending_fit = Some(bounds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Area;

    fn viewport() -> egui::Rect {
        egui::Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(800.0, 600.0))
    }

    #[test]
    fn world_screen_round_trip() {
        let view = MapView::default();
        let p = view.world_to_screen(viewport(), 26.2, 44.5);
        let (lon, lat) = view.screen_to_world(viewport(), p);
        assert!((lon - 26.2).abs() < 1e-6);
        assert!((lat - 44.5).abs() < 1e-6);
    }

    #[test]
    fn latitude_grows_upwards_on_screen() {
        let view = MapView::default();
        let low = view.world_to_screen(viewport(), 26.0, 44.0);
        let high = view.world_to_screen(viewport(), 26.0, 45.0);
        assert!(high.y < low.y);
    }

    #[test]
    fn zoom_keeps_the_point_under_the_cursor() {
        let mut view = MapView::default();
        let cursor = egui::pos2(100.0, 100.0);
        let before = view.screen_to_world(viewport(), cursor);
        view.zoom_about_screen_point(viewport(), cursor, 1.5);
        let after = view.screen_to_world(viewport(), cursor);
        assert!((before.0 - after.0).abs() < 1e-6);
        assert!((before.1 - after.1).abs() < 1e-6);
    }

    #[test]
    fn fit_bounds_contains_the_area_with_padding() {
        let mut view = MapView::default();
        let bounds = Area::from_corners(25.0, 45.0, 25.1, 45.1).bounds();
        view.fit_bounds(viewport(), bounds, 20.0);
        let rect = view.bounds_to_rect(viewport(), bounds);
        let inner = viewport().shrink(19.0);
        assert!(inner.contains_rect(rect));
        assert!(rect.width() > 100.0 || rect.height() > 100.0);
    }

    #[test]
    fn session_becomes_ready_after_first_frame_and_applies_queued_fit() {
        let mut session = MapSession::new((26.1, 44.4), 20.0);
        assert!(!session.is_ready());
        let bounds = Area::from_corners(25.0, 45.0, 25.1, 45.1).bounds();
        session.fit(bounds);
        session.frame(viewport());
        assert!(session.is_ready());
        let (lon, lat) = (session.view.center.0, session.view.center.1);
        assert!((lon - 25.05).abs() < 1e-9);
        assert!((lat - 45.05).abs() < 1e-9);
    }
}
