//! ConnectedDrive HTTP client implementation

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandExecutor, CommandOutcome, RemoteService};
use crate::config::{ClientConfig, VehicleIdentity};
use crate::error::{CdApiError, Result};
use crate::fetch::{ResourceFetcher, ResourceKind, ATTRIBUTES_MAP, DEALER, VEHICLE_MESSAGES};
use crate::gate::UpdateGate;
use crate::session::SessionManager;
use crate::USER_AGENT;

/// Shortest refresh cadence the backend is known to tolerate
const RECOMMENDED_MIN_INTERVAL: Duration = Duration::from_secs(600);

/// Result of [`ConnectedDriveClient::update`]
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Fresh status values were fetched
    Refreshed(Map<String, Value>),
    /// The update interval has not elapsed; nothing was fetched
    Skipped,
}

impl UpdateOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed(_))
    }
}

/// Session, throttle and cache, mutated only while the guard is held
#[derive(Debug)]
struct ClientState {
    session: SessionManager,
    gate: UpdateGate,
    car_data: Option<Map<String, Value>>,
}

/// ConnectedDrive REST API client for one vehicle
///
/// The client may be shared between tasks behind an `Arc`. Data fetches are
/// serialized: each holds the internal guard from token check to decoded
/// body, so two fetches never have requests in flight at the same time.
#[derive(Debug)]
pub struct ConnectedDriveClient {
    vehicle: VehicleIdentity,
    fetcher: ResourceFetcher,
    executor: CommandExecutor,
    state: Mutex<ClientState>,
}

impl ConnectedDriveClient {
    /// Create a client and acquire the initial access token
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.ensure_session().await?;
        Ok(client)
    }

    /// Create a client without touching the network.
    ///
    /// The first authorized call acquires a token.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        if config.update_interval() < RECOMMENDED_MIN_INTERVAL {
            warn!(
                "update interval of {}s is below the recommended {}s",
                config.update_interval().as_secs(),
                RECOMMENDED_MIN_INTERVAL.as_secs()
            );
        }

        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        let fetcher = ResourceFetcher::new(http.clone(), &config.vehicle.base_url)?;
        info!("UTC offset: {} minutes", fetcher.utc_offset_minutes());

        let executor = CommandExecutor::new(
            http,
            &config.vehicle.base_url,
            config.polling.command_max_attempts,
            config.command_poll_interval(),
        )?;

        let state = ClientState {
            session: SessionManager::new(&config)?,
            gate: UpdateGate::new(config.update_interval()),
            car_data: None,
        };

        info!("ConnectedDrive client created for {}", config.vehicle.label());

        Ok(Self {
            vehicle: config.vehicle,
            fetcher,
            executor,
            state: Mutex::new(state),
        })
    }

    /// Override the UTC offset sent with dynamic status requests
    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.fetcher = self.fetcher.with_utc_offset(minutes);
        self
    }

    /// The vehicle this client talks to
    pub fn vehicle(&self) -> &VehicleIdentity {
        &self.vehicle
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.fetcher.utc_offset_minutes()
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Make sure a valid token is held, renewing if it expired
    pub async fn ensure_session(&self) -> Result<()> {
        self.ensure_session_at(Utc::now()).await
    }

    /// [`ensure_session`](Self::ensure_session) with an explicit clock reading
    pub async fn ensure_session_at(&self, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.session.ensure_valid_at(now).await.map(|_| ())
    }

    /// Expiry of the current token, if one was obtained
    pub async fn session_expires_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.session.session().map(|s| s.expires_at())
    }

    /// Number of credential exchanges performed by this client
    pub async fn renewals(&self) -> u64 {
        self.state.lock().await.session.renewals()
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Fetch any resource, optionally selecting one envelope field
    pub async fn fetch(&self, kind: ResourceKind, sub_field: Option<&str>) -> Result<Value> {
        let mut state = self.state.lock().await;
        self.fetch_locked(&mut state, kind, sub_field).await
    }

    /// Live status values (`attributesMap` of the dynamic endpoint)
    #[instrument(skip(self))]
    pub async fn vehicle_status(&self) -> Result<Map<String, Value>> {
        let value = self
            .fetch(ResourceKind::DynamicStatus, Some(ATTRIBUTES_MAP))
            .await?;
        into_object(value, ATTRIBUTES_MAP)
    }

    /// Service alerts (`vehicleMessages` of the dynamic endpoint)
    #[instrument(skip(self))]
    pub async fn vehicle_messages(&self) -> Result<Value> {
        self.fetch(ResourceKind::DynamicStatus, Some(VEHICLE_MESSAGES))
            .await
    }

    /// Navigation data
    #[instrument(skip(self))]
    pub async fn navigation(&self) -> Result<Map<String, Value>> {
        let value = self.fetch(ResourceKind::Navigation, None).await?;
        into_object(value, "navigation")
    }

    /// Efficiency data
    #[instrument(skip(self))]
    pub async fn efficiency(&self) -> Result<Map<String, Value>> {
        let value = self.fetch(ResourceKind::Efficiency, None).await?;
        into_object(value, "efficiency")
    }

    /// Service partner (`dealer` of the service partner endpoint)
    #[instrument(skip(self))]
    pub async fn service_partner(&self) -> Result<Map<String, Value>> {
        let value = self
            .fetch(ResourceKind::ServicePartner, Some(DEALER))
            .await?;
        into_object(value, DEALER)
    }

    /// Vehicles registered to the account
    #[instrument(skip(self))]
    pub async fn vehicles(&self) -> Result<Vec<Value>> {
        match self.fetch(ResourceKind::VehicleList, None).await? {
            Value::Array(items) => Ok(items),
            _ => Err(CdApiError::envelope("vehicles")),
        }
    }

    /// Vehicle specification sheet
    #[instrument(skip(self))]
    pub async fn specs(&self) -> Result<Value> {
        self.fetch(ResourceKind::Specs, None).await
    }

    /// Scheduled service status
    #[instrument(skip(self))]
    pub async fn service_status(&self) -> Result<Value> {
        self.fetch(ResourceKind::Service, None).await
    }

    /// Charging profile
    #[instrument(skip(self))]
    pub async fn charging_profile(&self) -> Result<Value> {
        self.fetch(ResourceKind::ChargingProfile, None).await
    }

    /// History of executed remote services
    #[instrument(skip(self))]
    pub async fn remote_service_history(&self) -> Result<Value> {
        self.fetch(ResourceKind::RemoteServiceHistory, None).await
    }

    // =========================================================================
    // Throttled update
    // =========================================================================

    /// Refresh the status values if the update interval has elapsed
    pub async fn update(&self) -> Result<UpdateOutcome> {
        self.update_at(Utc::now()).await
    }

    /// Refresh the status values regardless of the update interval
    pub async fn update_forced(&self) -> Result<UpdateOutcome> {
        self.run_update(Utc::now(), true).await
    }

    /// [`update`](Self::update) with an explicit clock reading
    pub async fn update_at(&self, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        self.run_update(now, false).await
    }

    /// Status values from the last successful update
    pub async fn cached_status(&self) -> Option<Map<String, Value>> {
        self.state.lock().await.car_data.clone()
    }

    #[instrument(skip(self, now))]
    async fn run_update(&self, now: DateTime<Utc>, force: bool) -> Result<UpdateOutcome> {
        let mut state = self.state.lock().await;

        if !force && !state.gate.should_fetch(now) {
            debug!("no data collected from car as interval has not yet passed");
            return Ok(UpdateOutcome::Skipped);
        }

        let value = self
            .fetch_locked(&mut state, ResourceKind::DynamicStatus, Some(ATTRIBUTES_MAP))
            .await?;
        let data = into_object(value, ATTRIBUTES_MAP)?;

        state.gate.record_success(now);
        state.car_data = Some(data.clone());
        info!("data collected from car ({} values)", data.len());

        Ok(UpdateOutcome::Refreshed(data))
    }

    // =========================================================================
    // Remote services
    // =========================================================================

    /// Execute a remote service by name (`climate`, `lock`, `unlock`,
    /// `light`, `horn`) and wait for completion.
    ///
    /// Unknown names fail before any request is made.
    #[instrument(skip(self))]
    pub async fn execute_service(&self, name: &str) -> Result<CommandOutcome> {
        let service: RemoteService = name.parse()?;
        self.execute(service).await
    }

    /// Execute a remote service and wait for completion
    pub async fn execute(&self, service: RemoteService) -> Result<CommandOutcome> {
        let token = {
            let mut state = self.state.lock().await;
            state.session.ensure_valid().await?
        };

        self.executor
            .execute(&token, &self.vehicle.vin, service)
            .await
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    async fn fetch_locked(
        &self,
        state: &mut ClientState,
        kind: ResourceKind,
        sub_field: Option<&str>,
    ) -> Result<Value> {
        let token = state.session.ensure_valid().await?;
        self.fetcher
            .fetch(&token, kind, &self.vehicle.vin, sub_field)
            .await
    }
}

fn into_object(value: Value, field: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CdApiError::envelope(field)),
    }
}
