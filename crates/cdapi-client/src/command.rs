//! Remote command submission and completion polling
//!
//! A command is accepted asynchronously by the backend. After submission the
//! execution-state document is polled a fixed number of times until it
//! reports [`EXECUTED`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{header, Client};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{CdApiError, Result};
use crate::fetch::api_base;

/// Terminal success value of `remoteServiceStatus`
pub const EXECUTED: &str = "EXECUTED";

/// Remote services the vehicle accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteService {
    Climate,
    Lock,
    Unlock,
    Light,
    Horn,
}

impl RemoteService {
    pub const ALL: [RemoteService; 5] = [
        Self::Climate,
        Self::Lock,
        Self::Unlock,
        Self::Light,
        Self::Horn,
    ];

    /// Command code used in the submission path
    pub fn code(&self) -> &'static str {
        match self {
            Self::Climate => "RCN",
            Self::Lock => "RDL",
            Self::Unlock => "RDU",
            Self::Light => "RLF",
            Self::Horn => "RHB",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Climate => "climate",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Light => "light",
            Self::Horn => "horn",
        }
    }
}

impl fmt::Display for RemoteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RemoteService {
    type Err = CdApiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|svc| svc.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CdApiError::UnknownService(s.to_string()))
    }
}

/// How a command execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The vehicle reported `EXECUTED` on poll number `attempts`
    Executed { attempts: u32 },
    /// The poll budget ran out; `last_status` is the last status read
    TimedOut {
        attempts: u32,
        last_status: Option<String>,
    },
    /// The submission itself answered non-2xx, nothing was polled
    RejectedBySubmission { status: u16 },
}

impl CommandOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed { attempts } => write!(f, "executed after {} poll(s)", attempts),
            Self::TimedOut {
                attempts,
                last_status,
            } => write!(
                f,
                "timed out after {} poll(s), last status {}",
                attempts,
                last_status.as_deref().unwrap_or("unknown")
            ),
            Self::RejectedBySubmission { status } => {
                write!(f, "rejected by the server (HTTP {})", status)
            }
        }
    }
}

/// Read `remoteServiceStatus` out of an execution-state document.
///
/// Anything unreadable yields `None`.
pub fn parse_execution_status(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut in_status = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                in_status = e.local_name().as_ref() == b"remoteServiceStatus";
            }
            Ok(Event::Text(text)) if in_status => {
                return text
                    .unescape()
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
            }
            Ok(Event::End(_)) => in_status = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Fire-and-poll executor for remote services
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    client: Client,
    base_url: Url,
    max_attempts: u32,
    poll_interval: Duration,
}

impl CommandExecutor {
    pub fn new(
        client: Client,
        base_url: &str,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client,
            base_url: api_base(base_url)?,
            max_attempts,
            poll_interval,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn submit_url(&self, vin: &str, service: RemoteService) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("vehicle/remoteservices/v1/{}/{}", vin, service.code()))?)
    }

    pub fn status_url(&self, vin: &str) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("vehicle/remoteservices/v1/{}/state/execution", vin))?)
    }

    /// Submit `service` and wait for the vehicle to execute it.
    ///
    /// Worst case this takes `max_attempts * poll_interval` plus request time.
    #[instrument(skip(self, token))]
    pub async fn execute(
        &self,
        token: &str,
        vin: &str,
        service: RemoteService,
    ) -> Result<CommandOutcome> {
        let submit_url = self.submit_url(vin, service)?;
        let status_url = self.status_url(vin)?;
        info!("executing service {}", service);

        let response = self
            .client
            .post(submit_url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!("error during executing service {}: HTTP {}", service, status);
            return Ok(CommandOutcome::RejectedBySubmission {
                status: status.as_u16(),
            });
        }

        let mut last_status = None;
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let current = self.poll_status(token, &status_url).await;
            debug!(attempt, status = ?current, "execution state");

            if current.as_deref() == Some(EXECUTED) {
                info!("executing service {} succeeded", service);
                return Ok(CommandOutcome::Executed { attempts: attempt });
            }
            if current.is_some() {
                last_status = current;
            }
        }

        error!("error during executing service {}, timer expired", service);
        Ok(CommandOutcome::TimedOut {
            attempts: self.max_attempts,
            last_status,
        })
    }

    /// One execution-state read; every failure counts as "not yet"
    async fn poll_status(&self, token: &str, url: &Url) -> Option<String> {
        let response = match self.client.get(url.clone()).bearer_auth(token).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("execution state request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("execution state returned HTTP {}", status);
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("execution state body unreadable: {}", e);
                return None;
            }
        };

        let parsed = parse_execution_status(&body);
        if parsed.is_none() {
            warn!("no remoteServiceStatus in execution state: {}", body);
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_codes() {
        assert_eq!(RemoteService::Climate.code(), "RCN");
        assert_eq!(RemoteService::Lock.code(), "RDL");
        assert_eq!(RemoteService::Unlock.code(), "RDU");
        assert_eq!(RemoteService::Light.code(), "RLF");
        assert_eq!(RemoteService::Horn.code(), "RHB");
    }

    #[test]
    fn test_service_from_str() {
        assert_eq!("lock".parse::<RemoteService>().unwrap(), RemoteService::Lock);
        assert_eq!(" Horn ".parse::<RemoteService>().unwrap(), RemoteService::Horn);
        for svc in RemoteService::ALL {
            assert_eq!(svc.name().parse::<RemoteService>().unwrap(), svc);
        }
    }

    #[test]
    fn test_unknown_service() {
        let err = "teleport".parse::<RemoteService>().unwrap_err();
        assert!(matches!(err, CdApiError::UnknownService(name) if name == "teleport"));
    }

    #[test]
    fn test_parse_execution_status() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<executionStatus>
  <serviceType>RDL</serviceType>
  <remoteServiceStatus>DELIVERED_TO_VEHICLE</remoteServiceStatus>
  <eventId>1234@bmw.de</eventId>
</executionStatus>"#;
        assert_eq!(
            parse_execution_status(xml).as_deref(),
            Some("DELIVERED_TO_VEHICLE")
        );
    }

    #[test]
    fn test_parse_executed() {
        let xml = "<executionStatus><remoteServiceStatus>EXECUTED</remoteServiceStatus></executionStatus>";
        assert_eq!(parse_execution_status(xml).as_deref(), Some(EXECUTED));
    }

    #[test]
    fn test_parse_malformed_documents() {
        assert_eq!(parse_execution_status(""), None);
        assert_eq!(parse_execution_status("not xml at all"), None);
        assert_eq!(
            parse_execution_status("<executionStatus><serviceType>RDL</serviceType></executionStatus>"),
            None
        );
        assert_eq!(
            parse_execution_status("<executionStatus><remoteServiceStatus/></executionStatus>"),
            None
        );
        assert_eq!(
            parse_execution_status("<a><remoteServiceStatus></remoteServiceStatus></a>"),
            None
        );
    }

    #[test]
    fn test_command_urls() {
        let executor = CommandExecutor::new(
            Client::new(),
            "https://www.bmw-connecteddrive.de/api",
            9,
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(
            executor
                .submit_url("WBY1Z21000V123456", RemoteService::Climate)
                .unwrap()
                .as_str(),
            "https://www.bmw-connecteddrive.de/api/vehicle/remoteservices/v1/WBY1Z21000V123456/RCN"
        );
        assert_eq!(
            executor.status_url("WBY1Z21000V123456").unwrap().as_str(),
            "https://www.bmw-connecteddrive.de/api/vehicle/remoteservices/v1/WBY1Z21000V123456/state/execution"
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            CommandOutcome::Executed { attempts: 3 }.to_string(),
            "executed after 3 poll(s)"
        );
        assert_eq!(
            CommandOutcome::RejectedBySubmission { status: 403 }.to_string(),
            "rejected by the server (HTTP 403)"
        );
        assert!(!CommandOutcome::TimedOut {
            attempts: 9,
            last_status: None
        }
        .is_executed());
    }
}
