//! OAuth Device Authorization Flow for client applications such as CLIs that
//! can not receive redirects from a web site.
//!
//! First, [`request_code`] obtains a [`DeviceAuthorization`]. The user then
//! navigates to its `verification_uri` in a browser on any device and enters
//! the `user_code`. While the user completes the web flow, the application
//! calls [`wait`], which polls the token endpoint until the server grants or
//! denies the authorization, the window expires, or the caller cancels.

mod poller;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{self, AccessToken, FormResponse};
use crate::error::{FlowError, Result};
use poller::{IntervalPoller, PollWait};

/// The grant type defined by the OAuth 2.0 Device Authorization Grant.
pub const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Details of an authorization-in-progress, as issued by the server.
///
/// Immutable once created; the `device_code` is sent back verbatim on every
/// poll and is never shown to the user.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    /// Opaque verification code exchanged for the token while polling.
    pub device_code: String,
    /// The one-time code the user enters in their browser.
    pub user_code: String,
    /// The URL where the user enters the `user_code`.
    pub verification_uri: String,
    /// Optional variant of `verification_uri` that embeds the `user_code`.
    pub verification_uri_complete: Option<String>,
    /// Minimum number of seconds between token requests.
    pub interval: u64,
    /// Seconds until the device and user codes expire.
    pub expires_in: u64,
}

/// Initiate the flow by requesting a device code from `uri`.
///
/// Performs exactly one outbound request; retry pacing belongs to [`wait`].
/// Returns [`FlowError::Unsupported`] when the server signals, in any of its
/// known spellings, that it does not implement the device flow.
pub async fn request_code(
    client: &reqwest::Client,
    uri: &str,
    client_id: &str,
    scopes: &[String],
) -> Result<DeviceAuthorization> {
    let resp = api::post_form(
        client,
        uri,
        &[("client_id", client_id), ("scope", &scopes.join(" "))],
    )
    .await?;

    let mut verification_uri = resp.get("verification_uri");
    if verification_uri.is_empty() {
        // Google's "OAuth 2.0 for TV and Limited-Input Device Applications"
        // uses `verification_url`.
        verification_uri = resp.get("verification_url");
    }

    if matches!(resp.status_code, 401 | 403 | 404 | 422)
        || (resp.status_code == 200 && verification_uri.is_empty())
        || (resp.status_code == 400 && resp.get("error") == "unauthorized_client")
    {
        return Err(FlowError::Unsupported);
    }

    if resp.status_code != 200 {
        return Err(resp.error());
    }

    let interval = parse_seconds(&resp, "interval")?;
    let expires_in = parse_seconds(&resp, "expires_in")?;

    debug!(interval, expires_in, "device code issued");
    let verification_uri_complete = resp.get("verification_uri_complete");
    Ok(DeviceAuthorization {
        device_code: resp.get("device_code").to_string(),
        user_code: resp.get("user_code").to_string(),
        verification_uri: verification_uri.to_string(),
        verification_uri_complete: (!verification_uri_complete.is_empty())
            .then(|| verification_uri_complete.to_string()),
        interval,
        expires_in,
    })
}

fn parse_seconds(resp: &FormResponse, field: &'static str) -> Result<u64> {
    let value = resp.get(field);
    value.parse().map_err(|_| FlowError::MalformedResponse {
        field,
        value: value.to_string(),
    })
}

/// Parameters for polling the token endpoint until authorization completes.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// The app client ID value.
    pub client_id: String,
    /// The app client secret. Only pass it if the server requires one.
    pub client_secret: Option<String>,
    /// Overrides the standard device-code grant type. Rarely needed.
    pub grant_type: Option<String>,
    /// External cancellation signal; cancelling interrupts a pending sleep.
    pub cancel: CancellationToken,
}

impl WaitOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

/// Poll `uri` until the server grants or denies the authorization.
///
/// The overall deadline is `expires_in` seconds from entry, computed once.
/// Each tick sleeps `interval` seconds and then issues one token request —
/// never more than one outstanding request at a time. A pending-authorization
/// answer continues the loop; every other protocol error is returned
/// unchanged, and transport failures propagate immediately without retry.
pub async fn wait(
    client: &reqwest::Client,
    uri: &str,
    authorization: &DeviceAuthorization,
    options: WaitOptions,
) -> Result<AccessToken> {
    let grant_type = options
        .grant_type
        .as_deref()
        .unwrap_or(GRANT_TYPE_DEVICE_CODE);
    let poller = IntervalPoller::new(
        Duration::from_secs(authorization.interval),
        Duration::from_secs(authorization.expires_in),
        options.cancel.clone(),
    );

    loop {
        match poller.wait().await {
            PollWait::Ready => {}
            PollWait::DeadlineElapsed => return Err(FlowError::Timeout),
            PollWait::Cancelled => return Err(FlowError::Cancelled),
        }

        match poll_once(client, uri, authorization, &options, grant_type).await {
            Ok(token) => {
                debug!("device authorization granted");
                return Ok(token);
            }
            Err(FlowError::AuthorizationPending) => {
                debug!("authorization pending");
            }
            Err(err) => return Err(err),
        }
    }
}

async fn poll_once(
    client: &reqwest::Client,
    uri: &str,
    authorization: &DeviceAuthorization,
    options: &WaitOptions,
    grant_type: &str,
) -> Result<AccessToken> {
    let mut params = vec![
        ("client_id", options.client_id.as_str()),
        ("device_code", authorization.device_code.as_str()),
        ("grant_type", grant_type),
    ];
    if let Some(secret) = options.client_secret.as_deref() {
        params.push(("client_secret", secret));
    }

    let resp = api::post_form(client, uri, &params).await?;
    match resp.access_token() {
        Ok(token) => Ok(token),
        Err(err) if err.server_code() == Some("authorization_pending") => {
            Err(FlowError::AuthorizationPending)
        }
        Err(err) => Err(err),
    }
}
