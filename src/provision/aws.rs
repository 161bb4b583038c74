//! EC2 spot fleet provider driven through the `aws` CLI.
//!
//! Every call runs `aws ec2 <operation> ... --output json` and parses the
//! JSON it prints. Non-zero exits become [`ProviderError::CommandFailed`]
//! carrying the CLI's stderr.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::error::ProviderError;
use crate::provision::{
    CancelOutcome, ComputeProvider, ProvisionHandle, ProvisionRequest, RequestStatus,
};

/// Error codes in `UnsuccessfulFleetRequests` that mean "nothing left to cancel".
const ALREADY_GONE_CODES: &[&str] = &[
    "fleetRequestIdDoesNotExist",
    "fleetRequestNotInCancellableState",
];

/// CLI error text for a request id the API no longer knows.
const NOT_FOUND_MARKER: &str = "InvalidSpotFleetRequestId.NotFound";

pub struct AwsSpotFleet {
    program: String,
    region: Option<String>,
}

impl AwsSpotFleet {
    pub fn new(region: Option<String>) -> Self {
        Self {
            program: "aws".to_string(),
            region,
        }
    }

    /// Use a different executable (e.g. a pinned path or a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, operation: &str, args: &[&str]) -> Result<Value, ProviderError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("ec2").arg(operation).args(args).args(["--output", "json"]);
        if let Some(ref region) = self.region {
            cmd.args(["--region", region.as_str()]);
        }
        cmd.kill_on_drop(true);

        tracing::debug!(operation, "Running provider command");
        let output = cmd.output().await.map_err(|e| ProviderError::CommandFailed {
            operation: operation.to_string(),
            reason: format!("failed to run {}: {}", self.program, e),
        })?;

        if !output.status.success() {
            return Err(ProviderError::CommandFailed {
                operation: operation.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).map_err(|e| ProviderError::InvalidResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    /// Collect the provider's error history for a failed request.
    async fn error_detail(&self, handle: &ProvisionHandle, created: Option<&str>) -> String {
        let start = created.unwrap_or("1970-01-01T00:00:00Z");
        match self
            .run(
                "describe-spot-fleet-request-history",
                &["--spot-fleet-request-id", handle.as_str(), "--start-time", start],
            )
            .await
        {
            Ok(history) => parse_error_history(&history)
                .unwrap_or_else(|| "provider reported an error without details".to_string()),
            Err(e) => format!("provider reported an error; history unavailable: {}", e),
        }
    }
}

#[async_trait]
impl ComputeProvider for AwsSpotFleet {
    fn name(&self) -> &str {
        "aws-spot-fleet"
    }

    async fn submit(&self, request: &ProvisionRequest) -> Result<ProvisionHandle, ProviderError> {
        let config = serde_json::to_string(request.document()).map_err(|e| {
            ProviderError::InvalidResponse {
                operation: "request-spot-fleet".to_string(),
                reason: format!("request is not serializable: {}", e),
            }
        })?;
        let response = self
            .run("request-spot-fleet", &["--spot-fleet-request-config", &config])
            .await?;
        parse_request_id(&response)
    }

    async fn request_status(
        &self,
        handle: &ProvisionHandle,
    ) -> Result<RequestStatus, ProviderError> {
        let response = self
            .run(
                "describe-spot-fleet-requests",
                &["--spot-fleet-request-ids", handle.as_str()],
            )
            .await?;
        let described = parse_request_state(&response)?;
        match described.status {
            RequestStatus::Error { .. } => {
                let detail = self
                    .error_detail(handle, described.create_time.as_deref())
                    .await;
                Ok(RequestStatus::Error { detail })
            }
            status => Ok(status),
        }
    }

    async fn active_instances(
        &self,
        handle: &ProvisionHandle,
    ) -> Result<Vec<String>, ProviderError> {
        let response = self
            .run(
                "describe-spot-fleet-instances",
                &["--spot-fleet-request-id", handle.as_str()],
            )
            .await?;
        Ok(parse_active_instances(&response))
    }

    async fn instance_address(&self, instance_id: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .run("describe-instances", &["--instance-ids", instance_id])
            .await?;
        Ok(parse_public_address(&response))
    }

    async fn cancel(
        &self,
        handle: &ProvisionHandle,
        terminate_instances: bool,
    ) -> Result<CancelOutcome, ProviderError> {
        let terminate_flag = if terminate_instances {
            "--terminate-instances"
        } else {
            "--no-terminate-instances"
        };
        match self
            .run(
                "cancel-spot-fleet-requests",
                &["--spot-fleet-request-ids", handle.as_str(), terminate_flag],
            )
            .await
        {
            Ok(response) => parse_cancel_response(&response, handle),
            Err(e) => classify_cancel_failure(e),
        }
    }
}

/// State of a request as described by the provider.
#[derive(Debug, PartialEq)]
pub(crate) struct DescribedRequest {
    pub status: RequestStatus,
    pub create_time: Option<String>,
}

fn invalid(operation: &str, reason: impl Into<String>) -> ProviderError {
    ProviderError::InvalidResponse {
        operation: operation.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn parse_request_id(response: &Value) -> Result<ProvisionHandle, ProviderError> {
    response["SpotFleetRequestId"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(ProvisionHandle::new)
        .ok_or_else(|| invalid("request-spot-fleet", "missing SpotFleetRequestId"))
}

/// Map fleet state + activity status onto [`RequestStatus`].
///
/// An `Error` returned here has an empty detail; the caller fills it in
/// from the request history.
pub(crate) fn classify(state: &str, activity: Option<&str>) -> RequestStatus {
    match state {
        "cancelled" | "cancelled_running" | "cancelled_terminating" => RequestStatus::Cancelled,
        "failed" => RequestStatus::Error {
            detail: String::new(),
        },
        _ => match activity {
            Some("fulfilled") => RequestStatus::Fulfilled,
            Some("error") => RequestStatus::Error {
                detail: String::new(),
            },
            None | Some("pending_fulfillment") => RequestStatus::Pending,
            Some(other) => RequestStatus::Other(other.to_string()),
        },
    }
}

pub(crate) fn parse_request_state(response: &Value) -> Result<DescribedRequest, ProviderError> {
    let config = response["SpotFleetRequestConfigs"]
        .as_array()
        .and_then(|configs| configs.first())
        .ok_or_else(|| invalid("describe-spot-fleet-requests", "no request configs returned"))?;
    let state = config["SpotFleetRequestState"]
        .as_str()
        .ok_or_else(|| invalid("describe-spot-fleet-requests", "missing SpotFleetRequestState"))?;
    Ok(DescribedRequest {
        status: classify(state, config["ActivityStatus"].as_str()),
        create_time: config["CreateTime"].as_str().map(String::from),
    })
}

/// Join the descriptions of `error` history events, newest last.
pub(crate) fn parse_error_history(history: &Value) -> Option<String> {
    let records = history["HistoryRecords"].as_array()?;
    let errors: Vec<&str> = records
        .iter()
        .filter(|r| r["EventType"].as_str() == Some("error"))
        .filter_map(|r| r["EventInformation"]["EventDescription"].as_str())
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

pub(crate) fn parse_active_instances(response: &Value) -> Vec<String> {
    response["ActiveInstances"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|i| i["InstanceId"].as_str())
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

pub(crate) fn parse_public_address(response: &Value) -> Option<String> {
    response["Reservations"]
        .as_array()?
        .iter()
        .flat_map(|r| r["Instances"].as_array().into_iter().flatten())
        .find_map(|i| i["PublicIpAddress"].as_str())
        .filter(|ip| !ip.is_empty() && *ip != "None")
        .map(String::from)
}

/// A cancel the CLI rejects because the request id is unknown has nothing
/// left to clean up.
pub(crate) fn classify_cancel_failure(error: ProviderError) -> Result<CancelOutcome, ProviderError> {
    match error {
        ProviderError::CommandFailed { ref reason, .. } if reason.contains(NOT_FOUND_MARKER) => {
            Ok(CancelOutcome::AlreadyGone)
        }
        e => Err(e),
    }
}

pub(crate) fn parse_cancel_response(
    response: &Value,
    handle: &ProvisionHandle,
) -> Result<CancelOutcome, ProviderError> {
    if let Some(failure) = response["UnsuccessfulFleetRequests"]
        .as_array()
        .and_then(|f| f.iter().find(|r| r["SpotFleetRequestId"] == handle.as_str()))
    {
        let code = failure["Error"]["Code"].as_str().unwrap_or("unknown");
        if ALREADY_GONE_CODES.contains(&code) {
            return Ok(CancelOutcome::AlreadyGone);
        }
        let message = failure["Error"]["Message"].as_str().unwrap_or("");
        return Err(ProviderError::Rejected {
            reason: format!("{}: {}", code, message),
        });
    }

    let already_cancelled = response["SuccessfulFleetRequests"]
        .as_array()
        .and_then(|s| s.iter().find(|r| r["SpotFleetRequestId"] == handle.as_str()))
        .and_then(|r| r["PreviousSpotFleetRequestState"].as_str())
        .is_some_and(|prev| prev.starts_with("cancelled"));

    Ok(if already_cancelled {
        CancelOutcome::AlreadyGone
    } else {
        CancelOutcome::Cancelled
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_request_id() {
        let handle = parse_request_id(&json!({"SpotFleetRequestId": "sfr-123"})).unwrap();
        assert_eq!(handle.as_str(), "sfr-123");
        assert!(parse_request_id(&json!({})).is_err());
        assert!(parse_request_id(&json!({"SpotFleetRequestId": ""})).is_err());
    }

    #[test]
    fn test_classify_vocabulary() {
        assert_eq!(classify("active", Some("fulfilled")), RequestStatus::Fulfilled);
        assert_eq!(classify("submitted", None), RequestStatus::Pending);
        assert_eq!(
            classify("active", Some("pending_fulfillment")),
            RequestStatus::Pending
        );
        assert!(classify("active", Some("error")).is_terminal_error());
        assert!(classify("failed", None).is_terminal_error());
        assert_eq!(
            classify("cancelled_terminating", Some("fulfilled")),
            RequestStatus::Cancelled
        );
        assert_eq!(
            classify("modifying", Some("pending_termination")),
            RequestStatus::Other("pending_termination".to_string())
        );
    }

    #[test]
    fn test_parse_request_state() {
        let response = json!({
            "SpotFleetRequestConfigs": [{
                "SpotFleetRequestId": "sfr-1",
                "SpotFleetRequestState": "active",
                "ActivityStatus": "fulfilled",
                "CreateTime": "2026-10-19T08:00:00.000Z"
            }]
        });
        let described = parse_request_state(&response).unwrap();
        assert_eq!(described.status, RequestStatus::Fulfilled);
        assert_eq!(described.create_time.as_deref(), Some("2026-10-19T08:00:00.000Z"));

        assert!(parse_request_state(&json!({"SpotFleetRequestConfigs": []})).is_err());
    }

    #[test]
    fn test_parse_error_history() {
        let history = json!({
            "HistoryRecords": [
                {"EventType": "fleetRequestChange", "EventInformation": {"EventSubType": "submitted"}},
                {"EventType": "error", "EventInformation": {
                    "EventSubType": "launchSpecUnusable",
                    "EventDescription": "g4dn.xlarge, ami-0abc, Linux/UNIX: bid price is lower than spot price"
                }},
                {"EventType": "error", "EventInformation": {"EventDescription": "capacity-not-available"}}
            ]
        });
        let detail = parse_error_history(&history).unwrap();
        assert_eq!(
            detail,
            "g4dn.xlarge, ami-0abc, Linux/UNIX: bid price is lower than spot price; capacity-not-available"
        );
        assert!(parse_error_history(&json!({"HistoryRecords": []})).is_none());
    }

    #[test]
    fn test_parse_active_instances() {
        let response = json!({
            "ActiveInstances": [
                {"InstanceId": "i-0aaa", "InstanceType": "g4dn.xlarge"},
                {"InstanceId": ""}
            ]
        });
        assert_eq!(parse_active_instances(&response), vec!["i-0aaa"]);
        assert!(parse_active_instances(&json!({"ActiveInstances": []})).is_empty());
        assert!(parse_active_instances(&Value::Null).is_empty());
    }

    #[test]
    fn test_parse_public_address() {
        let response = json!({
            "Reservations": [{"Instances": [{"InstanceId": "i-1", "PublicIpAddress": "203.0.113.5"}]}]
        });
        assert_eq!(parse_public_address(&response).as_deref(), Some("203.0.113.5"));

        let pending = json!({"Reservations": [{"Instances": [{"InstanceId": "i-1"}]}]});
        assert_eq!(parse_public_address(&pending), None);
        assert_eq!(parse_public_address(&json!({"Reservations": []})), None);
    }

    #[test]
    fn test_cancel_success() {
        let handle = ProvisionHandle::new("sfr-1");
        let response = json!({
            "SuccessfulFleetRequests": [{
                "SpotFleetRequestId": "sfr-1",
                "CurrentSpotFleetRequestState": "cancelled_terminating",
                "PreviousSpotFleetRequestState": "active"
            }],
            "UnsuccessfulFleetRequests": []
        });
        assert_eq!(
            parse_cancel_response(&response, &handle).unwrap(),
            CancelOutcome::Cancelled
        );
    }

    #[test]
    fn test_cancel_already_cancelled_is_idempotent() {
        let handle = ProvisionHandle::new("sfr-1");
        let repeat = json!({
            "SuccessfulFleetRequests": [{
                "SpotFleetRequestId": "sfr-1",
                "CurrentSpotFleetRequestState": "cancelled_terminating",
                "PreviousSpotFleetRequestState": "cancelled_terminating"
            }]
        });
        assert_eq!(
            parse_cancel_response(&repeat, &handle).unwrap(),
            CancelOutcome::AlreadyGone
        );

        let gone = json!({
            "UnsuccessfulFleetRequests": [{
                "SpotFleetRequestId": "sfr-1",
                "Error": {"Code": "fleetRequestIdDoesNotExist", "Message": "not found"}
            }]
        });
        assert_eq!(
            parse_cancel_response(&gone, &handle).unwrap(),
            CancelOutcome::AlreadyGone
        );
    }

    #[test]
    fn test_cancel_of_unknown_request_id_is_idempotent() {
        let unknown = ProviderError::CommandFailed {
            operation: "cancel-spot-fleet-requests".to_string(),
            reason: "An error occurred (InvalidSpotFleetRequestId.NotFound) when calling the \
                     CancelSpotFleetRequests operation: The spot fleet request ID 'sfr-1' does not exist"
                .to_string(),
        };
        assert_eq!(
            classify_cancel_failure(unknown).unwrap(),
            CancelOutcome::AlreadyGone
        );

        let throttled = ProviderError::CommandFailed {
            operation: "cancel-spot-fleet-requests".to_string(),
            reason: "An error occurred (RequestLimitExceeded)".to_string(),
        };
        let err = classify_cancel_failure(throttled).unwrap_err();
        assert!(err.to_string().contains("RequestLimitExceeded"));

        let invalid = ProviderError::InvalidResponse {
            operation: "cancel-spot-fleet-requests".to_string(),
            reason: "InvalidSpotFleetRequestId.NotFound".to_string(),
        };
        assert!(classify_cancel_failure(invalid).is_err());
    }

    #[test]
    fn test_cancel_unexpected_failure_is_error() {
        let handle = ProvisionHandle::new("sfr-1");
        let response = json!({
            "UnsuccessfulFleetRequests": [{
                "SpotFleetRequestId": "sfr-1",
                "Error": {"Code": "unexpectedError", "Message": "try again"}
            }]
        });
        let err = parse_cancel_response(&response, &handle).unwrap_err();
        assert!(err.to_string().contains("unexpectedError"));
    }
}
