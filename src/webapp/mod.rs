//! OAuth Web Application Flow for client applications, receiving the web
//! redirect on a short-lived server bound to the loopback interface.
//!
//! [`WebAppFlow::init_flow`] reserves the port and generates the CSRF state;
//! [`WebAppFlow::browser_url`] builds the URL to open in the user's browser;
//! the callback server is then spawned with [`WebAppFlow::start_server`] and
//! [`WebAppFlow::access_token`] blocks until the redirect has delivered an
//! authorization code to exchange.

mod local_server;

pub use local_server::CallbackResult;

use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::api::{self, AccessToken};
use crate::error::{FlowError, Result};
use local_server::LocalServer;

/// GET query parameters for initiating the web flow in a browser.
#[derive(Debug, Clone)]
pub struct BrowserParams {
    pub client_id: String,
    /// The callback URI registered with the server, e.g.
    /// `http://127.0.0.1/callback`. Its port is rewritten to the bound one.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Account name to pre-fill the login form with, when supported.
    pub login_handle: Option<String>,
    /// Whether the authorize page may offer account sign-up. The parameter
    /// is only emitted on the URL when sign-up is disallowed.
    pub allow_signup: bool,
}

impl Default for BrowserParams {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            login_handle: None,
            allow_signup: true,
        }
    }
}

/// State for the steps of the OAuth Web Application flow.
pub struct WebAppFlow {
    server: Option<LocalServer>,
    result_rx: mpsc::Receiver<CallbackResult>,
    client_id: String,
    state: String,
}

impl WebAppFlow {
    /// Start a new flow: bind the local callback server to an available
    /// loopback port and generate the one-per-flow CSRF state token.
    pub async fn init_flow() -> Result<Self> {
        let (server, result_rx) = LocalServer::bind().await?;
        Ok(Self {
            server: Some(server),
            result_rx,
            client_id: String::new(),
            state: random_state(),
        })
    }

    /// The URL the user should navigate to in their web browser.
    ///
    /// Rewrites the redirect URI's port to the bound port, records its path
    /// as the callback path, and appends the flow parameters to `base_url`.
    pub fn browser_url(&mut self, base_url: &str, params: BrowserParams) -> Result<String> {
        let server = self.server.as_mut().ok_or_else(already_started_error)?;

        let mut redirect = url::Url::parse(&params.redirect_uri)
            .map_err(|_| FlowError::InvalidRedirect(params.redirect_uri.clone()))?;
        redirect
            .set_port(Some(server.port()))
            .map_err(|_| FlowError::InvalidRedirect(params.redirect_uri.clone()))?;
        server.callback_path = redirect.path().to_string();
        self.client_id = params.client_id.clone();

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("client_id", &params.client_id)
            .append_pair("redirect_uri", redirect.as_str())
            .append_pair("scope", &params.scopes.join(" "))
            .append_pair("state", &self.state);
        if let Some(login) = &params.login_handle {
            query.append_pair("login", login);
        }
        if !params.allow_signup {
            query.append_pair("allow_signup", "false");
        }

        Ok(format!("{}?{}", base_url, query.finish()))
    }

    /// Spawn the callback server. The listener is already bound, so the
    /// browser may be opened as soon as this returns; the task runs until
    /// one redirect has been served.
    pub fn start_server(&mut self, success_html: Option<String>) -> Result<JoinHandle<Result<()>>> {
        let mut server = self.server.take().ok_or_else(already_started_error)?;
        server.success_html = success_html;
        debug!(port = server.port(), "starting local callback server");
        Ok(tokio::spawn(server.serve()))
    }

    /// Block until the browser flow has completed, then exchange the
    /// authorization code for an access token.
    ///
    /// When the state echoed back by the redirect does not match this flow's
    /// CSRF token, fails with [`FlowError::StateMismatch`] without attempting
    /// the exchange. There is no built-in timeout on the redirect; wrap the
    /// call externally if one is needed.
    pub async fn access_token(
        &mut self,
        client: &reqwest::Client,
        token_url: &str,
        client_secret: &str,
    ) -> Result<AccessToken> {
        let result = self.result_rx.recv().await.ok_or_else(|| {
            FlowError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "callback server closed without delivering a result",
            ))
        })?;
        if result.state != self.state {
            return Err(FlowError::StateMismatch);
        }

        let resp = api::post_form(
            client,
            token_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret),
                ("code", result.code.as_str()),
                ("state", self.state.as_str()),
            ],
        )
        .await?;
        resp.access_token()
    }
}

fn already_started_error() -> FlowError {
    FlowError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "callback server already started",
    ))
}

/// 20 printable characters from 10 random bytes, rendered as lowercase hex.
fn random_state() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(20);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_state_is_twenty_lowercase_hex_chars() {
        let state = random_state();
        assert_eq!(state.len(), 20);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(random_state(), state);
    }
}
