use std::fmt;

use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Client for the employee directory: activation code issuance and the employee list.
#[derive(Clone)]
pub struct DirectoryClient {
    http: Client,
    activation_url: Url,
    employees_url: Url,
}

impl DirectoryClient {
    /// Creates a new directory client for the provided endpoints.
    pub fn new(activation_url: Url, employees_url: Url, http: Client) -> Self {
        Self {
            http,
            activation_url,
            employees_url,
        }
    }

    /// Requests a fresh activation code. The request carries no body.
    pub async fn request_activation_code(&self) -> Result<ActivationCode, DirectoryError> {
        debug!(stage = "directory", url = %self.activation_url, "requesting activation code");
        let response = self
            .http
            .post(self.activation_url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::ActivationStatus {
                status,
                body: read_body(response).await,
            });
        }

        let payload = parse_json(response).await?;
        activation_code_from(&payload).ok_or(DirectoryError::ActivationMissing)
    }

    /// Fetches the raw employee array authorized by `code`.
    ///
    /// Entries are returned unvalidated so callers can skip bad records
    /// individually.
    pub async fn fetch_employees(&self, code: &ActivationCode) -> Result<Vec<Value>, DirectoryError> {
        debug!(stage = "directory", url = %self.employees_url, "fetching employees");
        let response = self
            .http
            .post(self.employees_url.clone())
            .json(&EmployeesRequest {
                activation_code: code.as_value(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::EmployeeStatus {
                status,
                body: read_body(response).await,
            });
        }

        match parse_json(response).await? {
            Value::Array(employees) => Ok(employees),
            _ => Err(DirectoryError::InvalidEmployeeFormat),
        }
    }
}

/// Short-lived token authorizing one employee list request.
///
/// The directory decides the code's JSON type; it is sent back exactly as
/// it was received.
#[derive(Clone, PartialEq, Eq)]
pub struct ActivationCode(Value);

impl ActivationCode {
    pub fn new(code: impl Into<Value>) -> Self {
        Self(code.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Debug for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActivationCode(<redacted>)")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmployeesRequest<'a> {
    activation_code: &'a Value,
}

/// Errors produced by the directory client.
///
/// The display text is what ends up in the UI's error slot.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Failed to fetch activation code ({status})")]
    ActivationStatus { status: StatusCode, body: String },
    #[error("Activation code is missing")]
    ActivationMissing,
    #[error("Failed to fetch employees ({status})")]
    EmployeeStatus { status: StatusCode, body: String },
    #[error("Invalid employee data format")]
    InvalidEmployeeFormat,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl DirectoryError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActivationStatus { .. } => "activation_status",
            Self::ActivationMissing => "activation_missing",
            Self::EmployeeStatus { .. } => "employee_status",
            Self::InvalidEmployeeFormat => "employee_format",
            Self::Http(_) => "http",
            Self::Decode(_) => "decode",
        }
    }
}

/// Any truthy value counts as a code: `null`, `false`, zero and the empty
/// string do not.
fn activation_code_from(payload: &Value) -> Option<ActivationCode> {
    let code = payload.get("activationCode")?;
    is_truthy(code).then(|| ActivationCode::new(code.clone()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

async fn read_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unavailable>"))
}

async fn parse_json(response: Response) -> Result<Value, DirectoryError> {
    response.json().await.map_err(DirectoryError::Decode)
}
