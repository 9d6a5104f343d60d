//! Low-level token-endpoint plumbing: form-encoded POSTs and the flat
//! key/value view of the server's response that both flows classify against.
//!
//! OAuth token endpoints answer either `application/x-www-form-urlencoded`
//! or `application/json` depending on the server and the `Accept` header;
//! [`post_form`] normalizes both into a [`FormResponse`] so the flow engines
//! never touch raw bodies.

use std::collections::HashMap;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result, ServerError};

/// An OAuth access token, the terminal success value of every flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The token value, typically an opaque random string.
    pub token: String,
    /// The refresh token associated with the access token, when issued.
    pub refresh_token: Option<String>,
    /// The token type, e.g. "bearer".
    pub token_type: String,
    /// Space-separated list of OAuth scopes that this token grants.
    pub scope: String,
}

/// The parsed response from a token or device-authorization endpoint.
#[derive(Debug, Clone)]
pub struct FormResponse {
    /// HTTP status of the response.
    pub status_code: u16,
    request_uri: String,
    values: HashMap<String, String>,
}

impl FormResponse {
    /// The response value named `key`, or `""` when absent.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// Build the structured protocol error carried by this response.
    pub fn error(&self) -> FlowError {
        FlowError::Server(ServerError {
            code: self.get("error").to_string(),
            status: self.status_code,
            request_uri: self.request_uri.clone(),
            message: self.get("error_description").to_string(),
        })
    }

    /// Extract the access token, or the protocol error when none was granted.
    pub fn access_token(&self) -> Result<AccessToken> {
        let token = self.get("access_token");
        if token.is_empty() {
            return Err(self.error());
        }
        let refresh_token = self.get("refresh_token");
        Ok(AccessToken {
            token: token.to_string(),
            refresh_token: (!refresh_token.is_empty()).then(|| refresh_token.to_string()),
            token_type: self.get("token_type").to_string(),
            scope: self.get("scope").to_string(),
        })
    }
}

/// POST `params` as a form to `uri` and parse the response of either
/// supported media type. Exactly one outbound request; no retries here.
pub async fn post_form(
    client: &reqwest::Client,
    uri: &str,
    params: &[(&str, &str)],
) -> Result<FormResponse> {
    let resp = client
        .post(uri)
        .header(ACCEPT, "application/json")
        .form(params)
        .send()
        .await?;

    let status_code = resp.status().as_u16();
    let media_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let body = resp.text().await?;

    let values = match media_type.as_str() {
        "application/x-www-form-urlencoded" => parse_form_body(&body),
        "application/json" => parse_json_body(&body),
        // Anything else carries no fields worth keeping; status still matters.
        _ => HashMap::new(),
    };

    Ok(FormResponse {
        status_code,
        request_uri: uri.to_string(),
        values,
    })
}

fn parse_form_body(body: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        values.entry(key.into_owned()).or_insert(value.into_owned());
    }
    values
}

fn parse_json_body(body: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let Ok(serde_json::Value::Object(object)) = serde_json::from_str(body) else {
        return values;
    };
    for (key, value) in object {
        match value {
            serde_json::Value::String(s) => {
                values.insert(key, s);
            }
            serde_json::Value::Number(n) => {
                // Integers stringify losslessly; floats use the shortest
                // round-trippable decimal form.
                values.insert(key, n.to_string());
            }
            _ => {}
        }
    }
    values
}
