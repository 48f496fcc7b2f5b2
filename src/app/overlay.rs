use crate::api::ApiError;
use crate::model::{Area, GeoBounds, LandCoverReport};
use eframe::egui;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::jobs::OverlayPayload;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum OverlayKind {
    Ndvi,
    LandCover,
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayKind::Ndvi => "NDVI",
            OverlayKind::LandCover => "land cover",
        }
    }
}

#[derive(Error, Debug)]
pub(super) enum OverlayError {
    #[error("map is not ready")]
    MapNotReady,
    #[error(transparent)]
    Network(#[from] ApiError),
    #[error("could not decode raster image: {0}")]
    Decode(String),
}

/// A live raster draped on the map. Dropping it releases the texture; the
/// state machine guarantees the old one is dropped before a replacement
/// attaches.
pub(super) struct AttachedOverlay {
    pub texture: egui::TextureHandle,
    pub bounds: GeoBounds,
    pub legend: Vec<(String, egui::Color32)>,
}

enum OverlayState {
    Absent,
    Loading { token: u64, bounds: GeoBounds },
    Attached(AttachedOverlay),
}

/// What a completed fetch produced.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Completion {
    /// Raster decoded and attached; caller should fit the map to `bounds()`.
    Attached,
    /// Analysis arrived without a raster tile; nothing on the map.
    ReportOnly,
    /// The response belonged to a superseded request and was discarded.
    Stale,
}

struct Deferred {
    kind: OverlayKind,
    area: Area,
    attempts: u32,
    next_try: Instant,
}

const DEFER_INTERVAL: Duration = Duration::from_millis(100);
const DEFER_MAX_ATTEMPTS: u32 = 10;

/// At most one live raster per analysis kind. `begin` tears the previous
/// instance down before the fetch starts, so there is never a moment with
/// two resources of the same kind.
pub(super) struct OverlayManager {
    ndvi: OverlayState,
    land_cover: OverlayState,
    next_token: u64,
    deferred: Vec<Deferred>,
    pub last_report: Option<LandCoverReport>,
}

impl OverlayManager {
    pub fn new() -> Self {
        Self {
            ndvi: OverlayState::Absent,
            land_cover: OverlayState::Absent,
            next_token: 0,
            deferred: Vec::new(),
            last_report: None,
        }
    }

    fn slot(&self, kind: OverlayKind) -> &OverlayState {
        match kind {
            OverlayKind::Ndvi => &self.ndvi,
            OverlayKind::LandCover => &self.land_cover,
        }
    }

    fn slot_mut(&mut self, kind: OverlayKind) -> &mut OverlayState {
        match kind {
            OverlayKind::Ndvi => &mut self.ndvi,
            OverlayKind::LandCover => &mut self.land_cover,
        }
    }

    pub fn is_attached(&self, kind: OverlayKind) -> bool {
        matches!(self.slot(kind), OverlayState::Attached(_))
    }

    pub fn is_loading(&self, kind: OverlayKind) -> bool {
        matches!(self.slot(kind), OverlayState::Loading { .. })
    }

    pub fn attached(&self, kind: OverlayKind) -> Option<&AttachedOverlay> {
        match self.slot(kind) {
            OverlayState::Attached(overlay) => Some(overlay),
            OverlayState::Absent | OverlayState::Loading { .. } => None,
        }
    }

    /// Tears down any previous instance of this kind and opens a Loading
    /// slot tagged with a fresh token. The caller starts the fetch with the
    /// returned token; a response carrying any other token is discarded.
    pub fn begin(&mut self, kind: OverlayKind, area: &Area) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        *self.slot_mut(kind) = OverlayState::Loading {
            token,
            bounds: area.bounds(),
        };
        token
    }

    /// Detaches and releases; safe to call when already absent.
    pub fn hide(&mut self, kind: OverlayKind) {
        *self.slot_mut(kind) = OverlayState::Absent;
    }

    pub fn hide_all(&mut self) {
        self.ndvi = OverlayState::Absent;
        self.land_cover = OverlayState::Absent;
        self.deferred.clear();
    }

    /// Lands a fetch result on the UI loop. Stale responses are dropped
    /// unused; failures leave the slot Absent; successes decode, attach and
    /// report the bounds to fit.
    pub fn complete(
        &mut self,
        ctx: &egui::Context,
        kind: OverlayKind,
        token: u64,
        result: Result<OverlayPayload, ApiError>,
    ) -> Result<(Completion, GeoBounds), OverlayError> {
        let bounds = match self.slot(kind) {
            OverlayState::Loading {
                token: current,
                bounds,
            } if *current == token => *bounds,
            _ => {
                log::debug!("discarding stale {} response (token {token})", kind.as_str());
                return Ok((Completion::Stale, GeoBounds::default()));
            }
        };

        let payload = match result {
            Ok(payload) => payload,
            Err(err) => {
                *self.slot_mut(kind) = OverlayState::Absent;
                return Err(err.into());
            }
        };

        let legend = payload
            .report
            .as_ref()
            .map(|r| r.legend_colors())
            .unwrap_or_default();
        if let Some(report) = payload.report {
            self.last_report = Some(report);
        }

        if payload.bytes.is_empty() {
            // Land-cover analysis without a raster tile: stats only.
            *self.slot_mut(kind) = OverlayState::Absent;
            return Ok((Completion::ReportOnly, bounds));
        }

        let image = decode_raster(&payload.bytes).map_err(|err| {
            *self.slot_mut(kind) = OverlayState::Absent;
            err
        })?;
        let texture = ctx.load_texture(
            format!("overlay-{}", kind.as_str()),
            image,
            egui::TextureOptions::LINEAR,
        );
        *self.slot_mut(kind) = OverlayState::Attached(AttachedOverlay {
            texture,
            bounds,
            legend,
        });
        Ok((Completion::Attached, bounds))
    }

    /// Queues a show that arrived before the map was ready.
    pub fn defer(&mut self, kind: OverlayKind, area: Area) {
        self.deferred.retain(|d| d.kind != kind);
        self.deferred.push(Deferred {
            kind,
            area,
            attempts: 0,
            next_try: Instant::now() + DEFER_INTERVAL,
        });
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Called each frame: returns shows that may proceed now and the kinds
    /// that exhausted their retry budget waiting for the map.
    pub fn poll_deferred(
        &mut self,
        map_ready: bool,
        now: Instant,
    ) -> (Vec<(OverlayKind, Area)>, Vec<OverlayKind>) {
        let mut ready = Vec::new();
        let mut expired = Vec::new();
        self.deferred.retain_mut(|d| {
            if map_ready {
                ready.push((d.kind, d.area.clone()));
                return false;
            }
            if now < d.next_try {
                return true;
            }
            d.attempts += 1;
            if d.attempts >= DEFER_MAX_ATTEMPTS {
                expired.push(d.kind);
                return false;
            }
            d.next_try = now + DEFER_INTERVAL;
            true
        });
        (ready, expired)
    }
}

fn decode_raster(bytes: &[u8]) -> Result<egui::ColorImage, OverlayError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| OverlayError::Decode(err.to_string()))?
        .to_rgba8();
    let size = [decoded.width() as usize, decoded.height() as usize];
    Ok(egui::ColorImage::from_rgba_unmultiplied(
        size,
        decoded.as_raw(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 128, 0, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn payload(bytes: Vec<u8>) -> OverlayPayload {
        OverlayPayload {
            bytes,
            report: None,
        }
    }

    fn area() -> Area {
        Area::from_corners(25.0, 45.0, 25.1, 45.1)
    }

    #[test]
    fn fetch_attaches_and_reports_bounds() {
        let ctx = egui::Context::default();
        let mut manager = OverlayManager::new();
        let token = manager.begin(OverlayKind::Ndvi, &area());
        let (completion, bounds) = manager
            .complete(&ctx, OverlayKind::Ndvi, token, Ok(payload(png_bytes())))
            .unwrap();
        assert_eq!(completion, Completion::Attached);
        assert_eq!(bounds, area().bounds());
        assert!(manager.is_attached(OverlayKind::Ndvi));
    }

    #[test]
    fn second_begin_supersedes_the_first_request() {
        let ctx = egui::Context::default();
        let mut manager = OverlayManager::new();
        let stale = manager.begin(OverlayKind::Ndvi, &area());
        let fresh = manager.begin(OverlayKind::Ndvi, &area());
        // The stale response lands after the replacement was issued.
        let (completion, _) = manager
            .complete(&ctx, OverlayKind::Ndvi, stale, Ok(payload(png_bytes())))
            .unwrap();
        assert_eq!(completion, Completion::Stale);
        assert!(manager.is_loading(OverlayKind::Ndvi));
        let (completion, _) = manager
            .complete(&ctx, OverlayKind::Ndvi, fresh, Ok(payload(png_bytes())))
            .unwrap();
        assert_eq!(completion, Completion::Attached);
    }

    #[test]
    fn replacing_an_attached_overlay_keeps_exactly_one_resource() {
        let ctx = egui::Context::default();
        let mut manager = OverlayManager::new();
        let token = manager.begin(OverlayKind::Ndvi, &area());
        manager
            .complete(&ctx, OverlayKind::Ndvi, token, Ok(payload(png_bytes())))
            .unwrap();
        // begin() drops the old texture before the new fetch even starts.
        let token = manager.begin(OverlayKind::Ndvi, &area());
        assert!(!manager.is_attached(OverlayKind::Ndvi));
        manager
            .complete(&ctx, OverlayKind::Ndvi, token, Ok(payload(png_bytes())))
            .unwrap();
        assert!(manager.is_attached(OverlayKind::Ndvi));
    }

    #[test]
    fn failure_leaves_the_slot_absent() {
        let ctx = egui::Context::default();
        let mut manager = OverlayManager::new();
        let token = manager.begin(OverlayKind::Ndvi, &area());
        let err = manager
            .complete(&ctx, OverlayKind::Ndvi, token, Err(ApiError::EmptyBody))
            .unwrap_err();
        assert!(matches!(err, OverlayError::Network(ApiError::EmptyBody)));
        assert!(!manager.is_attached(OverlayKind::Ndvi));
        assert!(!manager.is_loading(OverlayKind::Ndvi));
    }

    #[test]
    fn garbage_bytes_never_attach() {
        let ctx = egui::Context::default();
        let mut manager = OverlayManager::new();
        let token = manager.begin(OverlayKind::Ndvi, &area());
        let result = manager.complete(
            &ctx,
            OverlayKind::Ndvi,
            token,
            Ok(payload(b"not a png".to_vec())),
        );
        assert!(matches!(result, Err(OverlayError::Decode(_))));
        assert!(!manager.is_attached(OverlayKind::Ndvi));
    }

    #[test]
    fn report_without_tile_keeps_the_map_clear() {
        let ctx = egui::Context::default();
        let mut manager = OverlayManager::new();
        let token = manager.begin(OverlayKind::LandCover, &area());
        let payload = OverlayPayload {
            bytes: Vec::new(),
            report: Some(LandCoverReport::default()),
        };
        let (completion, _) = manager
            .complete(&ctx, OverlayKind::LandCover, token, Ok(payload))
            .unwrap();
        assert_eq!(completion, Completion::ReportOnly);
        assert!(!manager.is_attached(OverlayKind::LandCover));
        assert!(manager.last_report.is_some());
    }

    #[test]
    fn hide_is_a_safe_no_op_when_absent() {
        let mut manager = OverlayManager::new();
        manager.hide(OverlayKind::Ndvi);
        assert!(!manager.is_attached(OverlayKind::Ndvi));
    }

    #[test]
    fn deferred_show_expires_after_the_attempt_cap() {
        let mut manager = OverlayManager::new();
        manager.defer(OverlayKind::Ndvi, area());
        let mut now = Instant::now() + DEFER_INTERVAL;
        let mut expired = Vec::new();
        for _ in 0..DEFER_MAX_ATTEMPTS {
            let (ready, ex) = manager.poll_deferred(false, now);
            assert!(ready.is_empty());
            expired.extend(ex);
            now += DEFER_INTERVAL;
        }
        assert_eq!(expired, vec![OverlayKind::Ndvi]);
        assert!(!manager.has_deferred());
    }

    #[test]
    fn deferred_show_fires_once_the_map_is_ready() {
        let mut manager = OverlayManager::new();
        manager.defer(OverlayKind::LandCover, area());
        let (ready, expired) = manager.poll_deferred(true, Instant::now());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, OverlayKind::LandCover);
        assert!(expired.is_empty());
    }
}
