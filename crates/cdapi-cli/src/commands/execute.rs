//! Execute command - run a remote service on the car

use anyhow::Result;
use cdapi_client::{CommandOutcome, ConnectedDriveClient, RemoteService};

use crate::output::OutputContext;

/// Submit a remote service and wait for the car to report completion
pub async fn execute(
    client: &ConnectedDriveClient,
    service: RemoteService,
    ctx: &OutputContext,
) -> Result<CommandOutcome> {
    ctx.info(&format!("Executing service {}...", service));

    let outcome = client.execute(service).await?;
    let msg = format!("Service {} {}", service, outcome);
    match outcome {
        CommandOutcome::Executed { .. } => ctx.success(&msg),
        CommandOutcome::TimedOut { .. } => ctx.warn(&msg),
        CommandOutcome::RejectedBySubmission { .. } => ctx.error(&msg),
    }

    Ok(outcome)
}

/// Process exit code for a command outcome
pub fn exit_code(outcome: &CommandOutcome) -> u8 {
    match outcome {
        CommandOutcome::Executed { .. } => 0,
        CommandOutcome::TimedOut { .. } => 2,
        CommandOutcome::RejectedBySubmission { .. } => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use cdapi_client::testing::{MockConnectedDrive, TestServer, MOCK_VIN};

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CommandOutcome::Executed { attempts: 1 }), 0);
        assert_eq!(
            exit_code(&CommandOutcome::TimedOut {
                attempts: 9,
                last_status: None
            }),
            2
        );
        assert_eq!(
            exit_code(&CommandOutcome::RejectedBySubmission { status: 500 }),
            3
        );
    }

    #[tokio::test]
    async fn test_execute_reports_rejection() {
        let mock = MockConnectedDrive::new();
        mock.set_submit_status(403);
        let server = TestServer::start(mock.router()).await.unwrap();
        let client = ConnectedDriveClient::connect(server.client_config(MOCK_VIN))
            .await
            .unwrap();
        let ctx = OutputContext::new(OutputFormat::Table, true, true);

        let outcome = execute(&client, RemoteService::Horn, &ctx).await.unwrap();
        assert_eq!(outcome, CommandOutcome::RejectedBySubmission { status: 403 });
        assert_eq!(exit_code(&outcome), 3);
        assert_eq!(mock.submitted_codes(), vec!["RHB".to_string()]);
    }
}
