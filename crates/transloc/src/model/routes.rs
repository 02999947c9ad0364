use serde::Deserialize;

/// One entry from the routes-with-shapes feed.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteWithShape {
    #[serde(rename = "RouteID")]
    pub route_id: i64,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "InfoText", default)]
    pub info_text: String,
    #[serde(rename = "MapLineColor", default)]
    pub map_line_color: Option<String>,
    #[serde(rename = "EncodedPolyline", default)]
    pub encoded_polyline: String,
    #[serde(rename = "Stops", default)]
    pub stops: Vec<RouteStop>,
}

/// A stop as embedded in a route payload. The feed is inconsistent about
/// which id and name keys it populates, so everything is optional here and
/// normalized downstream.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteStop {
    #[serde(rename = "RouteStopID", default)]
    pub route_stop_id: Option<i64>,
    #[serde(rename = "StopID", alias = "StopId", default)]
    pub stop_id: Option<i64>,
    #[serde(rename = "Name", alias = "StopName", default)]
    pub name: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Latitude", alias = "Lat", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", alias = "Lon", alias = "Lng", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "AddressID", alias = "AddressId", default)]
    pub address_id: Option<i64>,
    #[serde(rename = "RouteID", alias = "RouteId", default)]
    pub route_id: Option<i64>,
}

/// One entry from the plain routes catalog, used to discover routes that are
/// configured but not currently on the map.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteCatalogEntry {
    #[serde(rename = "RouteID")]
    pub route_id: i64,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "InfoText", default)]
    pub info_text: String,
}
