use model::vehicle::RawVehicle;
use serde::Deserialize;
use utility::time::parse_msajax;

/// One entry from the live vehicle points feed.
#[derive(Debug, Clone, Deserialize)]
pub struct VehiclePoint {
    #[serde(rename = "VehicleID")]
    pub vehicle_id: i64,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "RouteID", default)]
    pub route_id: Option<i64>,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "Heading", default)]
    pub heading: Option<f64>,
    #[serde(rename = "GroundSpeed", default)]
    pub ground_speed: Option<f64>,
    /// Microsoft-AJAX timestamp string, e.g. `/Date(1764922344000-0700)/`.
    #[serde(rename = "TimeStampUTC", default)]
    pub time_stamp_utc: Option<String>,
    /// Age of the fix in seconds, as reported by the provider.
    #[serde(rename = "Seconds", default)]
    pub seconds: Option<f64>,
}

impl VehiclePoint {
    /// Normalize into the internal position record. Returns `None` when the
    /// report has no usable coordinates.
    pub fn to_raw(&self) -> Option<RawVehicle> {
        let lat = self.latitude?;
        let lon = self.longitude?;
        Some(RawVehicle {
            vehicle_id: self.vehicle_id,
            name: self.name.clone().unwrap_or_default(),
            route_id: self.route_id,
            lat,
            lon,
            heading_deg: self.heading.unwrap_or(0.0),
            ground_speed_mps: self.ground_speed.unwrap_or(0.0),
            report_age_s: self.seconds.unwrap_or(0.0),
            provider_timestamp_ms: self
                .time_stamp_utc
                .as_deref()
                .and_then(parse_msajax),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feed_record() {
        let json = r#"{
            "VehicleID": 42,
            "Name": "1701",
            "RouteID": 7,
            "Latitude": 38.03,
            "Longitude": -78.5,
            "Heading": 90.0,
            "GroundSpeed": 8.5,
            "TimeStampUTC": "/Date(1764922344000-0700)/",
            "Seconds": 3.0,
            "IsOnRoute": true
        }"#;
        let point: VehiclePoint = serde_json::from_str(json).unwrap();
        let raw = point.to_raw().unwrap();
        assert_eq!(raw.vehicle_id, 42);
        assert_eq!(raw.name, "1701");
        assert_eq!(raw.route_id, Some(7));
        assert_eq!(raw.provider_timestamp_ms, Some(1764922344000 - 7 * 3_600_000));
    }

    #[test]
    fn missing_coordinates_produce_no_record() {
        let json = r#"{"VehicleID": 1, "Latitude": null}"#;
        let point: VehiclePoint = serde_json::from_str(json).unwrap();
        assert!(point.to_raw().is_none());
    }
}
