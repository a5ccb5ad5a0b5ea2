//! Authenticated GET against the vehicle data endpoints

use std::fmt;
use std::str::FromStr;

use chrono::Local;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{CdApiError, Result};

/// Live status values inside the dynamic envelope
pub const ATTRIBUTES_MAP: &str = "attributesMap";
/// Service alerts inside the dynamic envelope
pub const VEHICLE_MESSAGES: &str = "vehicleMessages";
/// Dealer record inside the service partner envelope
pub const DEALER: &str = "dealer";

/// Data endpoints known to the fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    DynamicStatus,
    Navigation,
    Efficiency,
    ServicePartner,
    VehicleList,
    Specs,
    Service,
    ChargingProfile,
    RemoteServiceHistory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        Self::DynamicStatus,
        Self::Navigation,
        Self::Efficiency,
        Self::ServicePartner,
        Self::VehicleList,
        Self::Specs,
        Self::Service,
        Self::ChargingProfile,
        Self::RemoteServiceHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DynamicStatus => "dynamic_status",
            Self::Navigation => "navigation",
            Self::Efficiency => "efficiency",
            Self::ServicePartner => "service_partner",
            Self::VehicleList => "vehicle_list",
            Self::Specs => "specs",
            Self::Service => "service",
            Self::ChargingProfile => "charging_profile",
            Self::RemoteServiceHistory => "remote_service_history",
        }
    }

    /// Path relative to the API base
    fn path(&self, vin: &str) -> String {
        match self {
            Self::DynamicStatus => format!("vehicle/dynamic/v1/{}", vin),
            Self::Navigation => format!("vehicle/navigation/v1/{}", vin),
            Self::Efficiency => format!("vehicle/efficiency/v1/{}", vin),
            Self::ServicePartner => format!("vehicle/servicepartner/v1/{}", vin),
            Self::VehicleList => "me/vehicles/v2".to_string(),
            Self::Specs => format!("vehicle/specs/v1/{}", vin),
            Self::Service => format!("vehicle/service/v1/{}", vin),
            Self::ChargingProfile => format!("vehicle/remoteservices/chargingprofile/v1/{}", vin),
            Self::RemoteServiceHistory => format!("vehicle/remoteservices/v1/{}/history", vin),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "status" | "dynamic" => Ok(Self::DynamicStatus),
            "vehicles" | "cars" => Ok(Self::VehicleList),
            "servicepartner" | "dealer" => Ok(Self::ServicePartner),
            "history" => Ok(Self::RemoteServiceHistory),
            other => Self::ALL
                .into_iter()
                .find(|k| k.as_str() == other)
                .ok_or_else(|| format!("unknown resource: {}", s)),
        }
    }
}

/// Parse an API origin, making sure relative endpoint paths join below it
pub(crate) fn api_base(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Minutes to add to local time to get UTC (e.g. `-60` in CET)
pub fn local_utc_offset_minutes() -> i32 {
    -(Local::now().offset().local_minus_utc() / 60)
}

/// Generic "GET, decode envelope, translate errors" for the data endpoints
#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    client: Client,
    base_url: Url,
    utc_offset_minutes: i32,
}

impl ResourceFetcher {
    /// The UTC offset is captured here once and reused for every call
    pub fn new(client: Client, base_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            base_url: api_base(base_url)?,
            utc_offset_minutes: local_utc_offset_minutes(),
        })
    }

    /// Override the UTC offset sent to the dynamic endpoint
    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }

    /// Full URL for a resource
    pub fn resource_url(&self, kind: ResourceKind, vin: &str) -> Result<Url> {
        let mut url = self.base_url.join(&kind.path(vin))?;
        if kind == ResourceKind::DynamicStatus {
            url.query_pairs_mut()
                .append_pair("offset", &self.utc_offset_minutes.to_string());
        }
        Ok(url)
    }

    /// Fetch a resource and optionally select one field of its envelope
    #[instrument(skip(self, token))]
    pub async fn fetch(
        &self,
        token: &str,
        kind: ResourceKind,
        vin: &str,
        sub_field: Option<&str>,
    ) -> Result<Value> {
        let url = self.resource_url(kind, vin)?;
        info!("connect to URL {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let body = handle_response(response).await?;

        let value = match sub_field {
            Some(field) => select_field(body, field)?,
            None => body,
        };

        if kind == ResourceKind::VehicleList && !value.is_array() {
            return Err(CdApiError::envelope("vehicles"));
        }
        Ok(value)
    }
}

/// Take one field out of a decoded envelope
pub fn select_field(body: Value, field: &str) -> Result<Value> {
    match body {
        Value::Object(mut map) => map.remove(field).ok_or_else(|| CdApiError::envelope(field)),
        _ => Err(CdApiError::envelope(field)),
    }
}

/// Decode a 2xx JSON body, or turn anything else into a remote API error
async fn handle_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();

    if status.is_success() {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| CdApiError::ParseError(e.to_string()))
    } else {
        let body = response.text().await.unwrap_or_default();
        debug!("error code: {} ({})", status.as_u16(), body);
        Err(CdApiError::remote(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VIN: &str = "WBY1Z21000V123456";

    fn fetcher() -> ResourceFetcher {
        ResourceFetcher::new(Client::new(), "https://www.bmw-connecteddrive.de/api")
            .unwrap()
            .with_utc_offset(-60)
    }

    #[test]
    fn test_dynamic_url_carries_offset() {
        let url = fetcher()
            .resource_url(ResourceKind::DynamicStatus, VIN)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.bmw-connecteddrive.de/api/vehicle/dynamic/v1/WBY1Z21000V123456?offset=-60"
        );
    }

    #[test]
    fn test_resource_urls() {
        let f = fetcher();
        let cases = [
            (ResourceKind::Navigation, "vehicle/navigation/v1/WBY1Z21000V123456"),
            (ResourceKind::Efficiency, "vehicle/efficiency/v1/WBY1Z21000V123456"),
            (ResourceKind::ServicePartner, "vehicle/servicepartner/v1/WBY1Z21000V123456"),
            (ResourceKind::VehicleList, "me/vehicles/v2"),
            (ResourceKind::Specs, "vehicle/specs/v1/WBY1Z21000V123456"),
            (
                ResourceKind::ChargingProfile,
                "vehicle/remoteservices/chargingprofile/v1/WBY1Z21000V123456",
            ),
            (
                ResourceKind::RemoteServiceHistory,
                "vehicle/remoteservices/v1/WBY1Z21000V123456/history",
            ),
        ];
        for (kind, path) in cases {
            let url = f.resource_url(kind, VIN).unwrap();
            assert_eq!(
                url.as_str(),
                format!("https://www.bmw-connecteddrive.de/api/{}", path)
            );
        }
    }

    #[test]
    fn test_api_base_with_trailing_slash() {
        let url = api_base("http://127.0.0.1:8080/api/").unwrap();
        assert_eq!(url.join("me/vehicles/v2").unwrap().path(), "/api/me/vehicles/v2");
    }

    #[test]
    fn test_select_field() {
        let body = json!({"attributesMap": {"soc": "80"}, "vehicleMessages": []});
        let selected = select_field(body, ATTRIBUTES_MAP).unwrap();
        assert_eq!(selected, json!({"soc": "80"}));
    }

    #[test]
    fn test_select_missing_field() {
        let body = json!({"attributesMap": {}});
        let err = select_field(body, "nope").unwrap_err();
        assert!(matches!(err, CdApiError::UnexpectedEnvelopeShape { field } if field == "nope"));
    }

    #[test]
    fn test_select_from_non_object() {
        let err = select_field(json!([1, 2]), DEALER).unwrap_err();
        assert!(matches!(err, CdApiError::UnexpectedEnvelopeShape { .. }));
    }

    #[test]
    fn test_resource_kind_parsing() {
        assert_eq!("status".parse::<ResourceKind>(), Ok(ResourceKind::DynamicStatus));
        assert_eq!("vehicles".parse::<ResourceKind>(), Ok(ResourceKind::VehicleList));
        assert_eq!("service-partner".parse::<ResourceKind>(), Ok(ResourceKind::ServicePartner));
        assert_eq!("Efficiency".parse::<ResourceKind>(), Ok(ResourceKind::Efficiency));
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("image".parse::<ResourceKind>().is_err());
    }
}
