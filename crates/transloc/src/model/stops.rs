use serde::Deserialize;

/// One entry from the stops feed.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslocStop {
    #[serde(rename = "StopID", alias = "StopId", default)]
    pub stop_id: Option<i64>,
    #[serde(rename = "StopName", alias = "Name", default)]
    pub stop_name: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Latitude", alias = "Lat", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", alias = "Lon", alias = "Lng", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "AddressID", alias = "AddressId", default)]
    pub address_id: Option<i64>,
    #[serde(rename = "RouteIDs", alias = "RouteIds", default)]
    pub route_ids: Vec<i64>,
    #[serde(rename = "RouteID", alias = "RouteId", default)]
    pub route_id: Option<i64>,
}
