//! Test utilities for cdapi-client
//!
//! [`MockConnectedDrive`] serves the authentication, data and remote service
//! endpoints from memory and counts what it receives. [`TestServer`] binds
//! it to a local port.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::{ClientConfig, VehicleIdentity};
use crate::Result;

/// VIN served by the default mock data
pub const MOCK_VIN: &str = "WBY1Z21000V123456";

/// Wrap a status value in an execution-state document
pub fn execution_state_xml(status: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <executionStatus><serviceType>RDL</serviceType>\
         <remoteServiceStatus>{}</remoteServiceStatus>\
         <eventId>1234@bmw.de</eventId></executionStatus>",
        status
    )
}

/// Canned responses, adjustable while the server runs
struct MockResponses {
    token: String,
    expires_in: u64,
    auth_status: u16,
    auth_location: Option<String>,
    auth_delay: Duration,
    resources: HashMap<&'static str, Value>,
    data_error: Option<(u16, String)>,
    data_delay: Duration,
    submit_status: u16,
    execution_states: VecDeque<String>,
    final_execution_state: String,
}

#[derive(Default)]
struct Counters {
    auth_calls: AtomicUsize,
    data_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    status_polls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct MockState {
    responses: Mutex<MockResponses>,
    counters: Counters,
    last_auth_form: Mutex<Option<HashMap<String, String>>>,
    last_authorization: Mutex<Option<String>>,
    last_offset: Mutex<Option<String>>,
    submitted_codes: Mutex<Vec<String>>,
}

impl MockState {
    fn enter(&self) -> InFlight<'_> {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.counters.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory ConnectedDrive backend
#[derive(Clone)]
pub struct MockConnectedDrive {
    state: Arc<MockState>,
}

impl Default for MockConnectedDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnectedDrive {
    /// A backend issuing `MOCKTOKEN1` for one hour, with sample vehicle data
    /// and remote services that execute on the first poll
    pub fn new() -> Self {
        let responses = MockResponses {
            token: "MOCKTOKEN1".to_string(),
            expires_in: 3600,
            auth_status: 302,
            auth_location: None,
            auth_delay: Duration::ZERO,
            resources: default_resources(),
            data_error: None,
            data_delay: Duration::ZERO,
            submit_status: 200,
            execution_states: VecDeque::new(),
            final_execution_state: execution_state_xml("EXECUTED"),
        };

        Self {
            state: Arc::new(MockState {
                responses: Mutex::new(responses),
                counters: Counters::default(),
                last_auth_form: Mutex::new(None),
                last_authorization: Mutex::new(None),
                last_offset: Mutex::new(None),
                submitted_codes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Router serving the API under `/api` and auth under `/gcdm`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/gcdm/oauth/authenticate", post(authenticate))
            .route("/api/vehicle/dynamic/v1/{vin}", resource("dynamic"))
            .route("/api/vehicle/navigation/v1/{vin}", resource("navigation"))
            .route("/api/vehicle/efficiency/v1/{vin}", resource("efficiency"))
            .route("/api/vehicle/servicepartner/v1/{vin}", resource("servicepartner"))
            .route("/api/vehicle/specs/v1/{vin}", resource("specs"))
            .route("/api/vehicle/service/v1/{vin}", resource("service"))
            .route(
                "/api/vehicle/remoteservices/chargingprofile/v1/{vin}",
                resource("chargingprofile"),
            )
            .route(
                "/api/vehicle/remoteservices/v1/{vin}/history",
                resource("history"),
            )
            .route("/api/me/vehicles/v2", resource("vehicles"))
            .route(
                "/api/vehicle/remoteservices/v1/{vin}/{code}",
                post(submit_service),
            )
            .route(
                "/api/vehicle/remoteservices/v1/{vin}/state/execution",
                get(execution_state),
            )
            .with_state(self.state.clone())
    }

    // =========================================================================
    // Behaviour
    // =========================================================================

    /// Token handed out by the authentication endpoint
    pub fn set_token(&self, token: impl Into<String>, expires_in: u64) {
        let mut r = self.state.responses.lock();
        r.token = token.into();
        r.expires_in = expires_in;
    }

    /// Status returned by the authentication endpoint (302 by default)
    pub fn set_auth_status(&self, status: u16) {
        self.state.responses.lock().auth_status = status;
    }

    /// Replace the generated `Location` header value
    pub fn set_auth_location(&self, location: impl Into<String>) {
        self.state.responses.lock().auth_location = Some(location.into());
    }

    /// Delay every authentication response
    pub fn set_auth_delay(&self, delay: Duration) {
        self.state.responses.lock().auth_delay = delay;
    }

    /// Body served for a resource key (`dynamic`, `navigation`, `efficiency`,
    /// `servicepartner`, `vehicles`, `specs`, `service`, `chargingprofile`,
    /// `history`)
    pub fn set_resource(&self, key: &'static str, body: Value) {
        self.state.responses.lock().resources.insert(key, body);
    }

    /// Make every data endpoint answer with `status` and `body`
    pub fn fail_data(&self, status: u16, body: impl Into<String>) {
        self.state.responses.lock().data_error = Some((status, body.into()));
    }

    /// Answer data requests normally again
    pub fn clear_data_failure(&self) {
        self.state.responses.lock().data_error = None;
    }

    /// Delay every data response
    pub fn set_data_delay(&self, delay: Duration) {
        self.state.responses.lock().data_delay = delay;
    }

    /// Status returned by command submission (200 by default)
    pub fn set_submit_status(&self, status: u16) {
        self.state.responses.lock().submit_status = status;
    }

    /// Queue status values served by successive execution-state polls
    pub fn push_execution_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut r = self.state.responses.lock();
        r.execution_states
            .extend(states.into_iter().map(|s| execution_state_xml(s.as_ref())));
    }

    /// Queue a raw execution-state body
    pub fn push_raw_execution_state(&self, body: impl Into<String>) {
        self.state
            .responses
            .lock()
            .execution_states
            .push_back(body.into());
    }

    /// Status served once the queue is drained (`EXECUTED` by default)
    pub fn set_final_execution_state(&self, status: &str) {
        self.state.responses.lock().final_execution_state = execution_state_xml(status);
    }

    // =========================================================================
    // Observations
    // =========================================================================

    pub fn auth_calls(&self) -> usize {
        self.state.counters.auth_calls.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> usize {
        self.state.counters.data_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.state.counters.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.state.counters.status_polls.load(Ordering::SeqCst)
    }

    /// Every request received, authentication included
    pub fn total_requests(&self) -> usize {
        self.auth_calls() + self.data_calls() + self.submit_calls() + self.status_polls()
    }

    /// Highest number of API requests that were being served at once
    pub fn max_in_flight(&self) -> usize {
        self.state.counters.max_in_flight.load(Ordering::SeqCst)
    }

    /// Form fields of the last credential exchange
    pub fn last_auth_form(&self) -> Option<HashMap<String, String>> {
        self.state.last_auth_form.lock().clone()
    }

    /// `Authorization` header of the last data request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().clone()
    }

    /// `offset` query parameter of the last dynamic status request
    pub fn last_offset(&self) -> Option<String> {
        self.state.last_offset.lock().clone()
    }

    /// Command codes submitted so far
    pub fn submitted_codes(&self) -> Vec<String> {
        self.state.submitted_codes.lock().clone()
    }
}

fn default_resources() -> HashMap<&'static str, Value> {
    HashMap::from([
        (
            "dynamic",
            json!({
                "attributesMap": {
                    "mileage": "12345",
                    "chargingLevelHv": "80",
                    "beRemainingRangeElectric": "120",
                    "door_lock_state": "SECURED",
                    "updateTime": "01.03.2024 08:00:00 UTC"
                },
                "vehicleMessages": {
                    "ccmMessages": [],
                    "cbsMessages": [{"description": "Brake fluid", "date": "2025-03"}]
                }
            }),
        ),
        (
            "navigation",
            json!({"latitude": 52.37, "longitude": 4.89, "isoCountryCode": "NLD", "socMax": 22.0}),
        ),
        (
            "efficiency",
            json!({"modelType": "BEV", "efficiencyQuotient": 72, "lastTripList": []}),
        ),
        (
            "servicepartner",
            json!({"dealer": {"name": "BMW Amsterdam", "city": "Amsterdam", "country": "NL"}}),
        ),
        (
            "vehicles",
            json!([{"vin": MOCK_VIN, "model": "i3 94", "brand": "BMW_I", "licensePlate": "XX-123-X"}]),
        ),
        ("specs", json!([{"key": "WEIGHT_UNLADEN", "value": "1300"}])),
        ("service", json!({"cbsMessages": []})),
        (
            "chargingprofile",
            json!({"weeklyPlanner": {"climatizationEnabled": false}}),
        ),
        ("history", json!([])),
    ])
}

// =============================================================================
// Handlers
// =============================================================================

async fn authenticate(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.counters.auth_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_auth_form.lock() = Some(form);

    let (delay, status, location) = {
        let r = state.responses.lock();
        let location = r.auth_location.clone().unwrap_or_else(|| {
            format!(
                "https://www.bmw-connecteddrive.com/app/default/static/external-dispatch.html\
                 #state=mock&access_token={}&token_type=Bearer&expires_in={}",
                r.token, r.expires_in
            )
        });
        (r.auth_delay, r.auth_status, location)
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::FOUND);
    if !status.is_redirection() {
        return (status, "login failed").into_response();
    }
    (status, [(header::LOCATION, location)]).into_response()
}

fn resource(key: &'static str) -> MethodRouter<Arc<MockState>> {
    get(
        move |State(state): State<Arc<MockState>>,
              headers: HeaderMap,
              Query(query): Query<HashMap<String, String>>| async move {
            serve_resource(&state, key, &headers, &query).await
        },
    )
}

async fn serve_resource(
    state: &MockState,
    key: &'static str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Response {
    let _flight = state.enter();
    state.counters.data_calls.fetch_add(1, Ordering::SeqCst);

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *state.last_authorization.lock() = authorization.clone();
    if key == "dynamic" {
        *state.last_offset.lock() = query.get("offset").cloned();
    }

    let (delay, failure, body) = {
        let r = state.responses.lock();
        (r.data_delay, r.data_error.clone(), r.resources.get(key).cloned())
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if !authorization.is_some_and(|a| a.starts_with("Bearer ")) {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    }

    if let Some((status, body)) = failure {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, body).into_response();
    }

    match body {
        Some(body) => Json(body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn submit_service(
    State(state): State<Arc<MockState>>,
    Path((_vin, code)): Path<(String, String)>,
) -> Response {
    let _flight = state.enter();
    state.counters.submit_calls.fetch_add(1, Ordering::SeqCst);
    state.submitted_codes.lock().push(code.clone());

    let status = {
        let r = state.responses.lock();
        StatusCode::from_u16(r.submit_status).unwrap_or(StatusCode::OK)
    };
    (status, Json(json!({"serviceType": code}))).into_response()
}

async fn execution_state(State(state): State<Arc<MockState>>) -> Response {
    let _flight = state.enter();
    state.counters.status_polls.fetch_add(1, Ordering::SeqCst);

    let body = {
        let mut r = state.responses.lock();
        match r.execution_states.pop_front() {
            Some(body) => body,
            None => r.final_execution_state.clone(),
        }
    };
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

// =============================================================================
// Server
// =============================================================================

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral local port
    pub async fn start(router: Router) -> Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this server, with fast command polling
    pub fn client_config(&self, vin: &str) -> ClientConfig {
        let vehicle = VehicleIdentity {
            vin: vin.to_string(),
            base_url: format!("{}/api", self.base_url()),
            display_name: Some("mock".to_string()),
        };
        ClientConfig::builder("driver@example.com", "secret", vehicle)
            .auth_url(format!("{}/gcdm/oauth/authenticate", self.base_url()))
            .command_polling(9, Duration::from_millis(5))
            .timeouts(Duration::from_secs(5), Duration::from_secs(2))
            .build()
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_execution_status;

    #[test]
    fn test_execution_state_xml_roundtrips_through_parser() {
        let xml = execution_state_xml("DELIVERED_TO_VEHICLE");
        assert_eq!(
            parse_execution_status(&xml).as_deref(),
            Some("DELIVERED_TO_VEHICLE")
        );
    }

    #[test]
    fn test_default_resources_cover_every_route() {
        let resources = default_resources();
        for key in [
            "dynamic",
            "navigation",
            "efficiency",
            "servicepartner",
            "vehicles",
            "specs",
            "service",
            "chargingprofile",
            "history",
        ] {
            assert!(resources.contains_key(key), "missing {key}");
        }
    }
}
