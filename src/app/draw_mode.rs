use crate::model::Area;

use super::map_session::MapSession;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) enum DrawMode {
    #[default]
    Navigation,
    Selecting,
}

/// An in-progress rectangle gesture, corners in world (lon, lat) order of
/// appearance.
#[derive(Clone, Copy, Debug)]
pub(super) struct InProgress {
    pub start: (f64, f64),
    pub current: (f64, f64),
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum DrawEvent {
    AreaSelected(Area),
}

/// Interaction mode state machine. Owns the single drawn shape on the map;
/// starting a new draw clears the previous one (last-drawn-wins). Entry
/// methods silently no-op until the map session is ready.
#[derive(Default)]
pub(super) struct DrawModeController {
    mode: DrawMode,
    in_progress: Option<InProgress>,
    shape: Option<Area>,
}

impl DrawModeController {
    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn shape(&self) -> Option<&Area> {
        self.shape.as_ref()
    }

    pub fn in_progress(&self) -> Option<&InProgress> {
        self.in_progress.as_ref()
    }

    /// Pan and zoom gestures apply again; any drawn or half-drawn shape is
    /// removed. Idempotent.
    pub fn enter_navigation(&mut self, map: &MapSession) {
        if !map.is_ready() {
            return;
        }
        self.clear_shape();
        self.mode = DrawMode::Navigation;
    }

    /// The next pointer drag is a rectangle gesture instead of a pan.
    pub fn enter_selecting(&mut self, map: &MapSession) {
        if !map.is_ready() {
            return;
        }
        self.clear_shape();
        self.mode = DrawMode::Selecting;
    }

    pub fn clear_shape(&mut self) {
        self.in_progress = None;
        self.shape = None;
    }

    /// Displays a rectangle without going through a draw gesture (the
    /// "show on map" path).
    pub fn set_shape(&mut self, area: Area) {
        self.in_progress = None;
        self.shape = Some(area);
    }

    pub fn begin_drag(&mut self, world: (f64, f64)) {
        if self.mode != DrawMode::Selecting {
            return;
        }
        self.shape = None;
        self.in_progress = Some(InProgress {
            start: world,
            current: world,
        });
    }

    pub fn update_drag(&mut self, world: (f64, f64)) {
        if let Some(in_progress) = &mut self.in_progress {
            in_progress.current = world;
        }
    }

    /// Finalizes the gesture into a normalized Area. The shape stays on the
    /// map until the next mode entry or explicit clear; the event is handed
    /// to the caller for form fill, save and overlay wiring.
    pub fn finish_drag(&mut self) -> Option<DrawEvent> {
        let in_progress = self.in_progress.take()?;
        if self.mode != DrawMode::Selecting {
            return None;
        }
        let (x1, y1) = in_progress.start;
        let (x2, y2) = in_progress.current;
        // Degenerate click without movement is not a selection.
        if x1 == x2 && y1 == y2 {
            return None;
        }
        let area = Area::from_corners(x1, y1, x2, y2).normalized();
        self.shape = Some(area.clone());
        Some(DrawEvent::AreaSelected(area))
    }
}
