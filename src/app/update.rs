use crate::api::NdviOptions;
use crate::model::{Area, Identity};
use crate::storage;
use eframe::egui;
use std::time::{Duration, Instant};

use super::ParcelApp;
use super::draw_mode::{DrawEvent, DrawMode};
use super::history::{self, HistoryAction};
use super::jobs::{Outcome, OverlayPayload};
use super::overlay::{Completion, OverlayKind};
use super::render::{
    draw_area_rect, draw_background, draw_in_progress, draw_legend, draw_overlay, mode_button,
};
use super::router;

impl eframe::App for ParcelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        for outcome in self.jobs.poll() {
            self.handle_outcome(ctx, outcome);
        }
        self.poll_deferred(ctx);

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if mode_button(ui, "Navigate", DrawMode::Navigation, self.draw.mode()) {
                    self.draw.enter_navigation(&self.map);
                }
                if mode_button(ui, "Select area", DrawMode::Selecting, self.draw.mode()) {
                    self.draw.enter_selecting(&self.map);
                }
                ui.separator();
                if self.router.flush_in_flight() {
                    ui.label("Syncing pending areas");
                }
            });
        });

        egui::SidePanel::right("controls")
            .resizable(true)
            .min_width(260.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.account_section(ui);
                    ui.separator();
                    self.coordinates_section(ui);
                    self.report_section(ui);
                    ui.separator();
                    self.history_section(ui);
                });
            });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                match &self.status {
                    Some(status) => ui.label(status),
                    None => ui.label("Ready"),
                };
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(self.identity.display_name().to_string());
                    ui.separator();
                    let pending = self.router.pending_count();
                    if pending > 0 {
                        ui.label(format!("{pending} pending"));
                        ui.separator();
                    }
                    ui.label(format!("{:.0} px/°", self.map.view.scale));
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let (rect, response) =
                ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
            self.map.frame(rect);

            let scroll_delta = ctx.input(|i| i.raw_scroll_delta.y);
            if scroll_delta.abs() > 0.0 {
                if let Some(hover_pos) = ctx.input(|i| i.pointer.hover_pos()) {
                    if rect.contains(hover_pos) {
                        let zoom_delta = (1.0 + scroll_delta * 0.001).clamp(0.8, 1.25);
                        self.map
                            .view
                            .zoom_about_screen_point(rect, hover_pos, zoom_delta as f64);
                    }
                }
            }

            match self.draw.mode() {
                DrawMode::Navigation => {
                    if response.dragged() {
                        self.map.view.pan_screen(response.drag_delta());
                    }
                }
                DrawMode::Selecting => {
                    let pointer_world = response
                        .interact_pointer_pos()
                        .map(|p| self.map.view.screen_to_world(rect, p));
                    if response.drag_started() {
                        if let Some(world) = pointer_world {
                            self.draw.begin_drag(world);
                        }
                    } else if response.dragged() {
                        if let Some(world) = pointer_world {
                            self.draw.update_drag(world);
                        }
                    }
                    if response.drag_stopped() {
                        if let Some(DrawEvent::AreaSelected(area)) = self.draw.finish_drag() {
                            self.set_inputs_from_area(&area);
                            self.status = Some("Area selected".to_string());
                        }
                    }
                }
            }

            let painter = ui.painter_at(rect);
            draw_background(&painter, rect, &self.map.view);
            if let Some(overlay) = self.overlays.attached(OverlayKind::Ndvi) {
                draw_overlay(&painter, rect, &self.map.view, overlay);
            }
            if let Some(overlay) = self.overlays.attached(OverlayKind::LandCover) {
                draw_overlay(&painter, rect, &self.map.view, overlay);
                draw_legend(&painter, rect, &overlay.legend);
            }
            if let Some(area) = self.draw.shape() {
                draw_area_rect(&painter, rect, &self.map.view, area);
            }
            if let Some(in_progress) = self.draw.in_progress() {
                draw_in_progress(&painter, rect, &self.map.view, in_progress);
            }
            if self.overlays.is_loading(OverlayKind::Ndvi)
                || self.overlays.is_loading(OverlayKind::LandCover)
            {
                painter.text(
                    rect.center_top() + egui::vec2(0.0, 20.0),
                    egui::Align2::CENTER_CENTER,
                    "Loading overlay",
                    egui::FontId::proportional(14.0),
                    ui.visuals().strong_text_color(),
                );
            }
        });
    }
}

impl ParcelApp {
    fn account_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Account");
        if let Identity::Authenticated(username) = self.identity.clone() {
            ui.label(format!("Signed in as {username}"));
            if ui.button("Log out").clicked() {
                self.identity = Identity::Guest;
                storage::store_identity(self.durable.as_mut(), &self.identity);
                self.history.clear();
                self.status = Some("Signed out".to_string());
            }
        } else {
            ui.label("Browsing as guest");
            ui.add(egui::TextEdit::singleline(&mut self.auth_username).hint_text("username"));
            ui.add(
                egui::TextEdit::singleline(&mut self.auth_password)
                    .password(true)
                    .hint_text("password"),
            );
            ui.horizontal(|ui| {
                let idle = !self.signing_in;
                if ui.add_enabled(idle, egui::Button::new("Sign in")).clicked() {
                    self.start_sign_in(false);
                }
                if ui.add_enabled(idle, egui::Button::new("Sign up")).clicked() {
                    self.start_sign_in(true);
                }
            });
            let pending = self.router.pending_count();
            if pending > 0 {
                ui.small(format!("{pending} saved area(s) will sync after sign-in"));
            }
        }
    }

    fn coordinates_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Area of interest");
        let labels = ["X1 (lon)", "Y1 (lat)", "X2 (lon)", "Y2 (lat)"];
        for (input, label) in self.coord_inputs.iter_mut().zip(labels) {
            ui.horizontal(|ui| {
                ui.label(label);
                ui.text_edit_singleline(input);
            });
        }
        if let Ok(area) = self.parse_inputs() {
            let surface = area.surface();
            ui.label(format!(
                "Surface: {:.0} m² ({:.2} ha)",
                surface.m2, surface.ha
            ));
        }

        if ui.button("Show on map").clicked() {
            match self.parse_inputs() {
                Err(err) => self.status = Some(err.to_string()),
                Ok(area) => {
                    let area = area.normalized();
                    self.draw.set_shape(area.clone());
                    self.map.fit(area.bounds());
                }
            }
        }

        if ui.button("Save coordinates").clicked() {
            match self.parse_inputs() {
                Err(err) => self.status = Some(err.to_string()),
                Ok(area) => {
                    if self.identity.is_authenticated() {
                        self.router
                            .save(area.normalized(), &self.identity, &self.api, &self.jobs);
                        self.status = Some("Saving coordinates".to_string());
                    } else {
                        self.status =
                            Some("You must create an account to save coordinates.".to_string());
                    }
                }
            }
        }

        let ndvi_attached = self.overlays.is_attached(OverlayKind::Ndvi);
        let ndvi_label = if ndvi_attached { "Hide NDVI" } else { "Generate NDVI" };
        let ndvi_idle = !self.overlays.is_loading(OverlayKind::Ndvi);
        if ui
            .add_enabled(ndvi_idle, egui::Button::new(ndvi_label))
            .clicked()
        {
            if ndvi_attached {
                self.overlays.hide(OverlayKind::Ndvi);
            } else {
                match self.parse_inputs() {
                    Err(err) => self.status = Some(err.to_string()),
                    Ok(area) => {
                        let area = area.normalized();
                        if !self.identity.is_authenticated() {
                            // Guest saves are provisional; the server write
                            // happens on the first sign-in flush.
                            self.router
                                .save(area.clone(), &self.identity, &self.api, &self.jobs);
                        }
                        self.show_overlay(OverlayKind::Ndvi, area);
                        self.status = Some("Generating NDVI".to_string());
                    }
                }
            }
        }

        let cover_attached = self.overlays.is_attached(OverlayKind::LandCover);
        let cover_label = if cover_attached {
            "Hide land cover"
        } else {
            "Analyze land cover"
        };
        let cover_idle = !self.overlays.is_loading(OverlayKind::LandCover);
        if ui
            .add_enabled(cover_idle, egui::Button::new(cover_label))
            .clicked()
        {
            if cover_attached {
                self.overlays.hide(OverlayKind::LandCover);
            } else {
                match self.parse_inputs() {
                    Err(err) => self.status = Some(err.to_string()),
                    Ok(area) => {
                        self.show_overlay(OverlayKind::LandCover, area.normalized());
                        self.status = Some("Running land cover analysis".to_string());
                    }
                }
            }
        }

        if ui.button("Remove overlays").clicked() {
            self.overlays.hide_all();
        }
    }

    fn report_section(&mut self, ui: &mut egui::Ui) {
        let Some(report) = &self.overlays.last_report else {
            return;
        };
        ui.separator();
        ui.heading("Land cover");
        for (label, stat) in &report.analysis {
            ui.label(format!(
                "{label}: {:.1}% ({:.2} km²)",
                stat.percentage, stat.area_km2
            ));
        }
    }

    fn history_section(&mut self, ui: &mut egui::Ui) {
        let toggle_label = if self.history.open { "Hide history" } else { "History" };
        if ui.button(toggle_label).clicked() {
            if let HistoryAction::Refused(message) = self.history.toggle(
                &self.identity,
                self.router.flush_in_flight(),
                &self.api,
                &self.jobs,
            ) {
                self.status = Some(message.to_string());
            }
        }
        if !self.history.open {
            return;
        }
        if self.history.loading {
            ui.label("Loading history");
        } else if self.history.count() == 0 {
            ui.label("No saved areas yet");
        }

        let rows: Vec<(Option<i64>, Area, String)> = self
            .history
            .items()
            .iter()
            .map(|area| {
                (
                    area.id,
                    area.clone(),
                    history::format_created_at(area.created_at.as_deref()),
                )
            })
            .collect();

        let mut fill_from: Option<Area> = None;
        let mut delete_id: Option<i64> = None;
        for (i, (id, area, date)) in rows.iter().enumerate() {
            ui.horizontal(|ui| {
                let label = format!(
                    "({:.2}, {:.2}) ({:.2}, {:.2})  {date}",
                    area.x1, area.y1, area.x2, area.y2
                );
                let selected = self.history.selected == Some(i);
                if ui.selectable_label(selected, label).clicked() {
                    self.history.selected = Some(i);
                    fill_from = Some(area.clone());
                }
                if let Some(id) = id {
                    if ui.small_button("Delete").clicked() {
                        delete_id = Some(*id);
                    }
                }
            });
        }

        if let Some(area) = fill_from {
            self.select_history_area(&area);
        }
        if let Some(id) = delete_id {
            if let Err(message) =
                self.history
                    .request_delete(&self.identity, id, &self.api, &self.jobs)
            {
                self.status = Some(message.to_string());
            }
        }
    }

    /// Reselecting a past area only fills the form; drawing it stays an
    /// explicit "Show on map" action.
    fn select_history_area(&mut self, area: &Area) {
        self.set_inputs_from_area(area);
    }

    fn start_sign_in(&mut self, create_account: bool) {
        let username = self.auth_username.trim().to_string();
        if username.is_empty() || self.auth_password.is_empty() {
            self.status = Some("Username and password are required".to_string());
            return;
        }
        self.signing_in = true;
        let password = self.auth_password.clone();
        let api = self.api.clone();
        self.jobs.run(move |tx| {
            let result = if create_account {
                api.sign_up(&username, &password)
            } else {
                api.sign_in(&username, &password)
            }
            .map(|_| ());
            let _ = tx.send(Outcome::SignedIn { username, result });
        });
    }

    /// Draws the area, fits the view and starts the raster fetch. A call that
    /// lands before the map is ready is retried for a short while instead of
    /// being dropped.
    fn show_overlay(&mut self, kind: OverlayKind, area: Area) {
        if !self.map.is_ready() {
            self.overlays.defer(kind, area);
            return;
        }
        let area = area.normalized();
        self.draw.set_shape(area.clone());
        self.map.fit(area.bounds());
        let token = self.overlays.begin(kind, &area);
        match kind {
            OverlayKind::Ndvi => match &self.identity {
                Identity::Authenticated(username) => {
                    // The server renders NDVI from the user's latest stored
                    // record, so the save precedes the fetch on one worker.
                    let api = self.api.clone();
                    let username = username.clone();
                    self.jobs.run(move |tx| {
                        router::save_then_fetch_ndvi(&api, &username, &area, token, tx);
                    });
                }
                Identity::Uninitialized | Identity::Guest => {
                    let api = self.api.clone();
                    let opts = NdviOptions {
                        resolution: Some(self.settings.ndvi_resolution),
                        ..Default::default()
                    };
                    self.jobs.run(move |tx| {
                        let result = api
                            .ndvi_for_bbox(&area, &opts)
                            .map(|bytes| OverlayPayload { bytes, report: None });
                        let _ = tx.send(Outcome::OverlayFetched {
                            kind: OverlayKind::Ndvi,
                            token,
                            result,
                        });
                    });
                }
            },
            OverlayKind::LandCover => {
                let api = self.api.clone();
                self.jobs.run(move |tx| {
                    let result = api.land_cover(&area).and_then(|report| {
                        let bytes = match report.tile_url.as_deref() {
                            Some(url) => api.fetch_raster(url)?,
                            None => Vec::new(),
                        };
                        Ok(OverlayPayload {
                            bytes,
                            report: Some(report),
                        })
                    });
                    let _ = tx.send(Outcome::OverlayFetched {
                        kind: OverlayKind::LandCover,
                        token,
                        result,
                    });
                });
            }
        }
    }

    fn poll_deferred(&mut self, ctx: &egui::Context) {
        if !self.overlays.has_deferred() {
            return;
        }
        ctx.request_repaint_after(Duration::from_millis(100));
        let (ready, expired) = self.overlays.poll_deferred(self.map.is_ready(), Instant::now());
        for kind in expired {
            self.status = Some(format!(
                "Map is not ready; {} display cancelled",
                kind.as_str()
            ));
        }
        for (kind, area) in ready {
            self.show_overlay(kind, area);
        }
    }

    fn reload_history(&mut self) {
        if let Some(username) = self.identity.username() {
            self.history.reload(username, &self.api, &self.jobs);
        }
    }

    fn handle_outcome(&mut self, ctx: &egui::Context, outcome: Outcome) {
        match outcome {
            Outcome::Geolocated(Ok((lon, lat))) => self.map.recenter(lon, lat),
            Outcome::Geolocated(Err(err)) => log::debug!("geolocation unavailable: {err}"),
            Outcome::UserEnsured(Ok(())) => {}
            Outcome::UserEnsured(Err(err)) => log::warn!("user record check failed: {err}"),
            Outcome::AreaSaved { area, result } => match result {
                Ok(_) => {
                    self.status = Some("Coordinates saved".to_string());
                    if self.history.open {
                        self.reload_history();
                    }
                }
                Err(err) => {
                    self.router.requeue(area);
                    self.status = Some(format!("Save failed ({err}); kept locally for a later sync"));
                }
            },
            Outcome::Flushed {
                succeeded,
                failed,
                total,
            } => {
                let kept = failed.len();
                self.router.finish_flush(failed);
                let mut message = format!("Synced {succeeded} of {total} pending areas");
                if kept > 0 {
                    message.push_str(&format!(", {kept} kept for retry"));
                }
                self.status = Some(message);
                if self.history.open {
                    self.reload_history();
                }
            }
            Outcome::HistoryLoaded(result) => {
                if let Err(err) = self.history.apply_loaded(result) {
                    self.status = Some(format!("Could not load history: {err}"));
                }
            }
            Outcome::AreaDeleted { id, result } => {
                self.history.apply_deleted(id, &result);
                match result {
                    Ok(()) => self.status = Some("Record deleted".to_string()),
                    Err(err) => self.status = Some(format!("Delete failed: {err}")),
                }
            }
            Outcome::OverlayFetched {
                kind,
                token,
                result,
            } => match self.overlays.complete(ctx, kind, token, result) {
                Ok((Completion::Attached, bounds)) => {
                    self.map.fit(bounds);
                    self.status = Some(format!("{} overlay ready", kind.as_str()));
                }
                Ok((Completion::ReportOnly, _)) => {
                    self.status = Some("Analysis ready; no raster tile for this area".to_string());
                }
                Ok((Completion::Stale, _)) => {}
                Err(err) => {
                    self.status = Some(format!("{} overlay failed: {err}", kind.as_str()));
                }
            },
            Outcome::SignedIn { username, result } => {
                self.signing_in = false;
                match result {
                    Ok(()) => {
                        self.identity = Identity::Authenticated(username.clone());
                        storage::store_identity(self.durable.as_mut(), &self.identity);
                        self.auth_password.clear();
                        self.router.begin_flush(&username, &self.api, &self.jobs);
                        self.status = Some(format!("Signed in as {username}"));
                    }
                    Err(err) => self.status = Some(format!("Sign-in failed: {err}")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::draw_mode::DrawModeController;
    use super::super::history::HistoryPanel;
    use super::super::jobs::JobRunner;
    use super::super::map_session::MapSession;
    use super::super::overlay::OverlayManager;
    use super::super::router::TierRouter;
    use super::super::settings::AppSettings;
    use super::ParcelApp;
    use crate::api::ApiClient;
    use crate::model::{Area, Identity};
    use crate::storage::{MemoryStore, PendingQueue};
    use std::time::Duration;

    fn test_app() -> ParcelApp {
        let settings = AppSettings::default();
        ParcelApp {
            api: ApiClient::new(&settings.api_base, Duration::from_secs(1)).unwrap(),
            identity: Identity::Guest,
            durable: Box::new(MemoryStore::default()),
            router: TierRouter::new(PendingQueue::new(Box::new(MemoryStore::default()))),
            jobs: JobRunner::new(),
            map: MapSession::new(
                (settings.default_center[0], settings.default_center[1]),
                settings.bounds_padding,
            ),
            draw: DrawModeController::default(),
            overlays: OverlayManager::new(),
            history: HistoryPanel::default(),
            coord_inputs: settings.default_coords.clone(),
            auth_username: String::new(),
            auth_password: String::new(),
            signing_in: false,
            status: None,
            settings,
        }
    }

    #[test]
    fn history_selection_fills_the_form_without_drawing() {
        let mut app = test_app();
        let area = Area::from_corners(25.0, 45.0, 25.1, 45.1);
        app.select_history_area(&area);
        assert_eq!(app.coord_inputs[0], "25");
        assert_eq!(app.coord_inputs[1], "45");
        assert_eq!(app.coord_inputs[2], "25.1");
        assert_eq!(app.coord_inputs[3], "45.1");
        assert!(app.draw.shape().is_none());
    }
}
