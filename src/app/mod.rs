use crate::api::{ApiClient, ApiError};
use crate::model::{Area, Identity, ParseError};
use crate::storage::{self, PendingQueue, PersistenceTier};
use std::time::Duration;

mod draw_mode;
mod history;
mod jobs;
mod map_session;
mod overlay;
mod render;
mod router;
mod settings;
mod update;

use draw_mode::DrawModeController;
use history::HistoryPanel;
use jobs::{JobRunner, Outcome};
use map_session::MapSession;
use overlay::OverlayManager;
use router::TierRouter;

pub struct ParcelApp {
    settings: settings::AppSettings,
    api: ApiClient,
    identity: Identity,
    durable: Box<dyn PersistenceTier>,
    router: TierRouter,
    jobs: JobRunner,
    map: MapSession,
    draw: DrawModeController,
    overlays: OverlayManager,
    history: HistoryPanel,
    coord_inputs: [String; 4],
    auth_username: String,
    auth_password: String,
    signing_in: bool,
    status: Option<String>,
}

impl ParcelApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Result<Self, ApiError> {
        let settings = settings::config_path()
            .as_deref()
            .and_then(settings::load_settings)
            .or_else(|| settings::load_settings("settings.json"))
            .unwrap_or_default();
        let api = ApiClient::new(
            &settings::api_base(&settings),
            Duration::from_secs(settings.request_timeout_secs),
        )?;

        let durable = storage::durable_tier();
        let identity = storage::load_identity(durable.as_ref());
        // Guest work lives in the session tier and vanishes with the process;
        // only authenticated data reaches the durable tier or the server.
        let router = TierRouter::new(PendingQueue::new(storage::session_tier()));
        let jobs = JobRunner::new();

        {
            let api = api.clone();
            let url = settings.geolocation_url.clone();
            jobs.run(move |tx| {
                let _ = tx.send(Outcome::Geolocated(api.geolocate(&url)));
            });
        }
        if let Some(username) = identity.username() {
            // Restored identity; make sure the server-side record still exists.
            let api = api.clone();
            let username = username.to_string();
            jobs.run(move |tx| {
                let _ = tx.send(Outcome::UserEnsured(api.ensure_user(&username).map(|_| ())));
            });
        }

        let map = MapSession::new(
            (settings.default_center[0], settings.default_center[1]),
            settings.bounds_padding,
        );
        let coord_inputs = settings.default_coords.clone();

        Ok(Self {
            settings,
            api,
            identity,
            durable,
            router,
            jobs,
            map,
            draw: DrawModeController::default(),
            overlays: OverlayManager::new(),
            history: HistoryPanel::default(),
            coord_inputs,
            auth_username: String::new(),
            auth_password: String::new(),
            signing_in: false,
            status: None,
        })
    }

    fn parse_inputs(&self) -> Result<Area, ParseError> {
        Area::parse(
            &self.coord_inputs[0],
            &self.coord_inputs[1],
            &self.coord_inputs[2],
            &self.coord_inputs[3],
        )
    }

    fn set_inputs_from_area(&mut self, area: &Area) {
        self.coord_inputs = [
            format!("{}", area.x1),
            format!("{}", area.y1),
            format!("{}", area.x2),
            format!("{}", area.y2),
        ];
    }
}
