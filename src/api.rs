use crate::model::{Area, LandCoverReport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Network failures are surfaced to the user and never retried
/// automatically; queued writes simply wait for the next flush.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("server returned an empty response")]
    EmptyBody,
    #[error("aborted: {0}")]
    Aborted(&'static str),
}

impl ApiError {
    /// Non-2xx responses carry either a `{"detail": ...}` body or plain
    /// text; keep whichever reads best.
    fn from_response(status: u16, body: String) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").cloned())
            .map(|detail| match detail {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or(body);
        ApiError::Status { status, message }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UserRecord {
    pub username: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NdviOptions {
    pub resolution: Option<u32>,
    pub start: Option<&'static str>,
    pub end: Option<&'static str>,
}

#[derive(Serialize)]
struct UsernameBody<'a> {
    username: &'a str,
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    username: &'a str,
    password: &'a str,
}

pub(crate) fn ndvi_bbox_payload(area: &Area, opts: &NdviOptions) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "bbox": [area.x1, area.y1, area.x2, area.y2],
    });
    if let Some(resolution) = opts.resolution {
        payload["resolution"] = resolution.into();
    }
    if let Some(start) = opts.start {
        payload["start"] = start.into();
    }
    if let Some(end) = opts.end {
        payload["end"] = end.into();
    }
    payload
}

/// Blocking client for the raster backend. Runs on worker threads only; the
/// UI loop sees results through the job channel.
#[derive(Clone)]
pub struct ApiClient {
    base: String,
    http: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(ApiError::from_response(status.as_u16(), body))
    }

    fn binary(response: reqwest::blocking::Response) -> Result<Vec<u8>, ApiError> {
        let bytes = Self::check(response)?.bytes()?;
        if bytes.is_empty() {
            return Err(ApiError::EmptyBody);
        }
        Ok(bytes.to_vec())
    }

    /// Idempotent "create if absent" for the server-side user record.
    pub fn ensure_user(&self, username: &str) -> Result<UserRecord, ApiError> {
        let response = self
            .http
            .post(self.url("/users"))
            .json(&UsernameBody { username })
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    pub fn save_coord(&self, username: &str, area: &Area) -> Result<Area, ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/users/{username}/coords")))
            .json(area)
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    pub fn list_coords(&self, username: &str) -> Result<Vec<Area>, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/users/{username}/coords")))
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    pub fn delete_coord(&self, username: &str, id: i64) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/users/{username}/coords/{id}")))
            .send()?;
        Self::check(response)?;
        Ok(())
    }

    /// NDVI raster for the user's latest stored area; the server re-derives
    /// the bbox from its own record.
    pub fn ndvi_for_user(&self, username: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/users/{username}/coords/ndvi")))
            .header(reqwest::header::ACCEPT, "image/png")
            .send()?;
        Self::binary(response)
    }

    /// NDVI raster for an ad-hoc bbox, nothing stored server-side.
    pub fn ndvi_for_bbox(&self, area: &Area, opts: &NdviOptions) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .post(self.url("/ndvi"))
            .header(reqwest::header::ACCEPT, "image/png")
            .json(&ndvi_bbox_payload(area, opts))
            .send()?;
        Self::binary(response)
    }

    pub fn land_cover(&self, area: &Area) -> Result<LandCoverReport, ApiError> {
        let response = self
            .http
            .get(self.url("/modis"))
            .query(&[
                ("x1", area.x1),
                ("y1", area.y1),
                ("x2", area.x2),
                ("y2", area.y2),
            ])
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    /// Raster referenced by a land-cover response's `tile_url`.
    pub fn fetch_raster(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let absolute = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.url(url)
        };
        let response = self.http.get(absolute).send()?;
        Self::binary(response)
    }

    pub fn sign_up(&self, username: &str, password: &str) -> Result<UserRecord, ApiError> {
        let response = self
            .http
            .post(self.url("/signup"))
            .json(&CredentialsBody { username, password })
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    pub fn sign_in(&self, username: &str, password: &str) -> Result<UserRecord, ApiError> {
        let response = self
            .http
            .post(self.url("/signin"))
            .json(&CredentialsBody { username, password })
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    /// Best-effort IP geolocation used to center the map at startup.
    pub fn geolocate(&self, url: &str) -> Result<(f64, f64), ApiError> {
        #[derive(Deserialize)]
        struct GeoResponse {
            lat: f64,
            lon: f64,
        }
        let response = self.http.get(url).send()?;
        let geo: GeoResponse = Self::check(response)?.json()?;
        Ok((geo.lon, geo.lat))
    }
}
