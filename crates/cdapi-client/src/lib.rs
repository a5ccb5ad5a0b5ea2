//! ConnectedDrive Client Library
//!
//! Typed client for the BMW ConnectedDrive vehicle REST API: session
//! handling, vehicle data endpoints, a throttled status update, and remote
//! services with completion polling.
//!
//! # Example
//!
//! ```rust,no_run
//! use cdapi_client::{ClientConfig, ConnectedDriveClient, VehicleIdentity};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let vehicle = VehicleIdentity::for_domain("WBY1Z21000V123456", "www.bmw-connecteddrive.de");
//!     let config = ClientConfig::builder("driver@example.com", "secret", vehicle).build();
//!
//!     // Authenticates once up front
//!     let client = ConnectedDriveClient::connect(config).await?;
//!
//!     // Live status values
//!     let status = client.vehicle_status().await?;
//!     println!("charge level: {:?}", status.get("chargingLevelHv"));
//!
//!     // Lock the doors and wait for the car to confirm
//!     let outcome = client.execute_service("lock").await?;
//!     println!("{}", outcome);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module runs an in-process mock of the vendor API:
//!
//! ```rust,ignore
//! use cdapi_client::testing::{MockConnectedDrive, TestServer};
//!
//! let mock = MockConnectedDrive::new();
//! let server = TestServer::start(mock.router()).await?;
//! let client = ConnectedDriveClient::connect(server.client_config(VIN)).await?;
//! ```

mod client;
mod command;
mod config;
mod error;
mod fetch;
mod gate;
mod session;
pub mod testing;

pub use client::{ConnectedDriveClient, UpdateOutcome};
pub use command::{parse_execution_status, CommandExecutor, CommandOutcome, RemoteService, EXECUTED};
pub use config::{
    AuthConfig, ClientConfig, ClientConfigBuilder, Credentials, PollingConfig, TimeoutsConfig,
    VehicleIdentity, DEFAULT_AUTH_URL, VIN_LENGTH,
};
pub use error::{CdApiError, Result};
pub use fetch::{
    local_utc_offset_minutes, select_field, ResourceFetcher, ResourceKind, ATTRIBUTES_MAP, DEALER,
    VEHICLE_MESSAGES,
};
pub use gate::UpdateGate;
pub use session::{parse_token_location, Session, SessionManager, TokenGrant};

/// User agent sent with every request
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:57.0) Gecko/20100101 Firefox/57.0";
