use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct AppSettings {
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub geolocation_url: String,
    /// Map center at startup (lon, lat) until geolocation answers.
    pub default_center: [f64; 2],
    /// Coordinate form contents at startup.
    pub default_coords: [String; 4],
    pub ndvi_resolution: u32,
    /// Pixel padding used when fitting the view to an area.
    pub bounds_padding: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            request_timeout_secs: 10,
            geolocation_url: "http://ip-api.com/json/".to_string(),
            default_center: [26.1025, 44.4268],
            default_coords: [
                "25.0".to_string(),
                "45.0".to_string(),
                "25.1".to_string(),
                "45.1".to_string(),
            ],
            ndvi_resolution: 60,
            bounds_padding: 20.0,
        }
    }
}

pub(super) fn config_path() -> Option<String> {
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("parcelmap.toml");
        if path.exists() {
            return Some(path.display().to_string());
        }
    }
    if std::path::Path::new("settings.toml").exists() {
        return Some("settings.toml".to_string());
    }
    None
}

pub(super) fn load_settings(path: &str) -> Option<AppSettings> {
    let s = std::fs::read_to_string(path).ok()?;
    if path.ends_with(".toml") {
        toml::from_str::<AppSettings>(&s)
            .ok()
            .or_else(|| serde_json::from_str::<AppSettings>(&s).ok())
    } else {
        serde_json::from_str::<AppSettings>(&s)
            .ok()
            .or_else(|| toml::from_str::<AppSettings>(&s).ok())
    }
}

/// Environment wins over the settings file, matching how the original
/// deployment switched backends per container.
pub(super) fn api_base(settings: &AppSettings) -> String {
    std::env::var("PARCELMAP_API_BASE").unwrap_or_else(|_| settings.api_base.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployment_shape() {
        let settings = AppSettings::default();
        assert_eq!(settings.api_base, "http://localhost:8000");
        assert_eq!(settings.ndvi_resolution, 60);
        assert_eq!(settings.default_coords[0], "25.0");
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let settings = AppSettings::default();
        let raw = toml::to_string_pretty(&settings).unwrap();
        let parsed: AppSettings = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.api_base, settings.api_base);
        assert_eq!(parsed.default_center, settings.default_center);
    }
}
