use eframe::egui;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Who owns a piece of data. Exactly one identity is active at a time;
/// every consumer must handle all three arms.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    #[default]
    Uninitialized,
    Guest,
    Authenticated(String),
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated(_))
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::Uninitialized | Identity::Guest => None,
            Identity::Authenticated(name) => Some(name),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Identity::Uninitialized | Identity::Guest => "guest",
            Identity::Authenticated(name) => name,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("'{field}' is not a valid number")]
    InvalidNumber { field: &'static str },
}

/// A rectangular area of interest given by two opposite geographic corners.
/// The corners are stored as entered; nothing may assume them pre-sorted.
/// `id` and `created_at` stay absent until the server assigns them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip)]
    pub owner: Identity,
}

/// Canonical south-west / north-east form consumed by the map canvas and
/// the overlay manager.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn center(&self) -> (f64, f64) {
        ((self.west + self.east) * 0.5, (self.south + self.north) * 0.5)
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }
}

fn parse_field(value: &str, field: &'static str) -> Result<f64, ParseError> {
    let n: f64 = value
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidNumber { field })?;
    // str::parse accepts "NaN" and "inf"; those are not coordinates.
    if !n.is_finite() {
        return Err(ParseError::InvalidNumber { field });
    }
    Ok(n)
}

impl Area {
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            id: None,
            x1,
            y1,
            x2,
            y2,
            created_at: None,
            owner: Identity::Uninitialized,
        }
    }

    pub fn parse(x1: &str, y1: &str, x2: &str, y2: &str) -> Result<Self, ParseError> {
        Ok(Self::from_corners(
            parse_field(x1, "x1")?,
            parse_field(y1, "y1")?,
            parse_field(x2, "x2")?,
            parse_field(y2, "y2")?,
        ))
    }

    /// Corners reordered so that (x1, y1) is the south-west corner. Pure and
    /// idempotent; metadata is carried over unchanged.
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
            ..self.clone()
        }
    }

    pub fn bounds(&self) -> GeoBounds {
        GeoBounds {
            south: self.y1.min(self.y2),
            west: self.x1.min(self.x2),
            north: self.y1.max(self.y2),
            east: self.x1.max(self.x2),
        }
    }

    /// Approximate parcel surface via the haversine product.
    pub fn surface(&self) -> Surface {
        let width = haversine_distance(self.y1, self.x1, self.y1, self.x2);
        let height = haversine_distance(self.y1, self.x1, self.y2, self.x1);
        let m2 = width * height;
        Surface { m2, ha: m2 / 10_000.0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Surface {
    pub m2: f64,
    pub ha: f64,
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat * 0.5).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon * 0.5).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Per-class land-cover statistics from the MODIS analysis endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandCoverStat {
    pub pixels: f64,
    pub percentage: f64,
    pub area_km2: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandCoverReport {
    #[serde(default)]
    pub analysis: BTreeMap<String, LandCoverStat>,
    #[serde(default)]
    pub tile_url: Option<String>,
    /// Mapping of class label to "#rrggbb" color.
    #[serde(default)]
    pub legend: Option<BTreeMap<String, String>>,
}

impl LandCoverReport {
    /// Legend entries with parseable colors, ordered by label.
    pub fn legend_colors(&self) -> Vec<(String, egui::Color32)> {
        let Some(legend) = &self.legend else {
            return Vec::new();
        };
        legend
            .iter()
            .filter_map(|(label, hex)| Some((label.clone(), parse_hex_color(hex)?)))
            .collect()
    }
}

pub fn parse_hex_color(hex: &str) -> Option<egui::Color32> {
    let hex = hex.trim_start_matches('#');
    // Server legends are untrusted input; reject anything that is not
    // plain ASCII before slicing on byte offsets.
    if !hex.is_ascii() || hex.len() < 6 {
        return None;
    }
    let r = u8::from_str_radix(hex.get(0..2)?, 16).ok()?;
    let g = u8::from_str_radix(hex.get(2..4)?, 16).ok()?;
    let b = u8::from_str_radix(hex.get(4..6)?, 16).ok()?;
    Some(egui::Color32::from_rgb(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_numeric_fields() {
        let err = Area::parse("abc", "1", "2", "3").unwrap_err();
        assert_eq!(err, ParseError::InvalidNumber { field: "x1" });
        let err = Area::parse("1", "2", "3", "").unwrap_err();
        assert_eq!(err, ParseError::InvalidNumber { field: "y2" });
    }

    #[test]
    fn parse_rejects_non_finite_values() {
        assert!(Area::parse("NaN", "1", "2", "3").is_err());
        assert!(Area::parse("1", "inf", "2", "3").is_err());
        assert!(Area::parse("1", "2", "-inf", "3").is_err());
    }

    #[test]
    fn parse_accepts_plain_coordinates() {
        let area = Area::parse("25.0", "45.0", "25.1", "45.1").unwrap();
        assert_eq!(area.x1, 25.0);
        assert_eq!(area.y1, 45.0);
        assert_eq!(area.x2, 25.1);
        assert_eq!(area.y2, 45.1);
        assert!(area.id.is_none());
        assert!(area.created_at.is_none());
    }

    #[test]
    fn normalized_is_idempotent_and_sorted() {
        let area = Area::from_corners(25.1, 45.1, 25.0, 45.0);
        let n = area.normalized();
        assert!(n.x1 <= n.x2 && n.y1 <= n.y2);
        assert_eq!(n.normalized(), n);
    }

    #[test]
    fn bounds_ignore_corner_order() {
        let a = Area::from_corners(25.0, 45.0, 25.1, 45.1);
        let b = Area::from_corners(25.1, 45.1, 25.0, 45.0);
        assert_eq!(a.bounds(), b.bounds());
        let bounds = a.bounds();
        assert_eq!(bounds.south, 45.0);
        assert_eq!(bounds.west, 25.0);
        assert_eq!(bounds.north, 45.1);
        assert_eq!(bounds.east, 25.1);
    }

    #[test]
    fn wire_form_has_only_corner_fields_until_stored() {
        let area = Area::from_corners(25.0, 45.0, 25.1, 45.1);
        let value = serde_json::to_value(&area).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"x1": 25.0, "y1": 45.0, "x2": 25.1, "y2": 45.1})
        );
    }

    #[test]
    fn stored_record_round_trips() {
        let raw = r#"{"id": 7, "x1": 25.0, "y1": 45.0, "x2": 25.1, "y2": 45.1,
                      "created_at": "2024-07-01T10:00:00"}"#;
        let area: Area = serde_json::from_str(raw).unwrap();
        assert_eq!(area.id, Some(7));
        assert_eq!(area.created_at.as_deref(), Some("2024-07-01T10:00:00"));
    }

    #[test]
    fn surface_is_positive_for_a_real_parcel() {
        let area = Area::from_corners(25.0, 45.0, 25.1, 45.1);
        let s = area.surface();
        // Roughly 7.9 km x 11.1 km at this latitude.
        assert!(s.m2 > 80_000_000.0 && s.m2 < 100_000_000.0);
        assert!((s.ha - s.m2 / 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn hex_colors_with_non_ascii_bytes_are_rejected() {
        assert!(parse_hex_color("#aé0000").is_none());
        assert!(parse_hex_color("#ümber").is_none());
        assert_eq!(
            parse_hex_color("#f8cd0a"),
            Some(egui::Color32::from_rgb(0xf8, 0xcd, 0x0a))
        );
    }

    #[test]
    fn legend_colors_skip_malformed_entries() {
        let mut legend = BTreeMap::new();
        legend.insert("Water".to_string(), "#0B43D2".to_string());
        legend.insert("Broken".to_string(), "#xyz".to_string());
        legend.insert("Mangled".to_string(), "#aé0000".to_string());
        let report = LandCoverReport {
            legend: Some(legend),
            ..Default::default()
        };
        let colors = report.legend_colors();
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].0, "Water");
        assert_eq!(colors[0].1, egui::Color32::from_rgb(0x0b, 0x43, 0xd2));
    }
}
