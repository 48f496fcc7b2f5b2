use crate::api::ApiError;
use crate::model::{Area, LandCoverReport};
use std::sync::mpsc::{Receiver, Sender, channel};

use super::overlay::OverlayKind;

/// Bytes and metadata fetched for an overlay, before decoding. Decoding and
/// texture upload happen on the UI loop where the egui context lives.
pub(super) struct OverlayPayload {
    pub bytes: Vec<u8>,
    pub report: Option<LandCoverReport>,
}

/// Everything a worker thread can report back to the UI loop.
pub(super) enum Outcome {
    Geolocated(Result<(f64, f64), ApiError>),
    UserEnsured(Result<(), ApiError>),
    AreaSaved {
        area: Area,
        result: Result<Area, ApiError>,
    },
    Flushed {
        succeeded: usize,
        failed: Vec<Area>,
        total: usize,
    },
    HistoryLoaded(Result<Vec<Area>, ApiError>),
    AreaDeleted {
        id: i64,
        result: Result<(), ApiError>,
    },
    OverlayFetched {
        kind: OverlayKind,
        token: u64,
        result: Result<OverlayPayload, ApiError>,
    },
    SignedIn {
        username: String,
        result: Result<(), ApiError>,
    },
}

/// Fire-and-forget worker threads reporting back over one mpsc channel.
/// A job receives the sender so a single worker can emit several outcomes
/// in order (save, then overlay fetch, on the same thread).
pub(super) struct JobRunner {
    tx: Sender<Outcome>,
    rx: Receiver<Outcome>,
}

impl JobRunner {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    pub fn run(&self, job: impl FnOnce(&Sender<Outcome>) + Send + 'static) {
        let tx = self.tx.clone();
        std::thread::spawn(move || job(&tx));
    }

    /// Drains every outcome that landed since the last frame.
    pub fn poll(&self) -> Vec<Outcome> {
        self.rx.try_iter().collect()
    }
}
