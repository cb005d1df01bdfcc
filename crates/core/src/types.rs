use chrono::{DateTime, Utc};
use html_escape::encode_text;
use serde::{Deserialize, Serialize};

/// Geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Employee entry with coordinates already coerced to numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeRecord {
    pub first_name: String,
    pub last_name: String,
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl EmployeeRecord {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Popup markup: bold full name, then `city, country` on the next line.
    pub fn popup_html(&self) -> String {
        format!(
            "<b>{} {}</b><br>{}, {}",
            encode_text(&self.first_name),
            encode_text(&self.last_name),
            encode_text(&self.city),
            encode_text(&self.country),
        )
    }

    pub fn to_marker(&self) -> MarkerPlacement {
        MarkerPlacement {
            position: self.position(),
            popup_html: self.popup_html(),
        }
    }
}

/// A marker to be pushed onto a map surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerPlacement {
    pub position: LatLng,
    pub popup_html: String,
}

/// Loading and error state observed by the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Marks the start of an attempt: loading on, previous error cleared.
    pub fn begin(&mut self) {
        self.loading = true;
        self.error = None;
    }

    /// Records the failure message; the latest failure wins.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.loading = false;
        self.last_synced_at = Some(at);
    }
}
