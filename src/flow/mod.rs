//! Single-call OAuth authorization against a server, typically GitHub.com:
//! a configuration struct covering both flows and a coordinator that tries
//! the device flow first and falls back to the web-application flow.

use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::api::AccessToken;
use crate::device::{self, WaitOptions};
use crate::error::{FlowError, Result};
use crate::webapp::{BrowserParams, WebAppFlow};

/// Display a one-time code to the user; receives the code and the browser
/// URL. Replaces the default copy-the-code prompt on stdout.
pub type DisplayCodeFn = Box<dyn Fn(&str, &str) -> Result<()> + Send + Sync>;

/// Open a web browser at a URL. Defaults to the system browser.
pub type BrowseUrlFn = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// The three endpoints an authorization flow talks to.
#[derive(Debug, Clone)]
pub struct Host {
    pub device_code_url: String,
    pub authorize_url: String,
    pub token_url: String,
}

impl Host {
    pub fn new(
        device_code_url: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            device_code_url: device_code_url.into(),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
        }
    }

    /// Endpoint layout used by GitHub.com and GitHub Enterprise hosts.
    pub fn github(hostname: &str) -> Self {
        Self {
            device_code_url: format!("https://{hostname}/login/device/code"),
            authorize_url: format!("https://{hostname}/login/oauth/authorize"),
            token_url: format!("https://{hostname}/login/oauth/access_token"),
        }
    }
}

/// Facilitates a single OAuth authorization flow.
///
/// Every hook and collaborator is a named optional field resolved to its
/// default only at the point of use; there are no module-level singletons.
pub struct Flow {
    /// The endpoints to authorize the app with.
    pub host: Host,
    /// OAuth application ID.
    pub client_id: String,
    /// OAuth application secret. Only applicable in web application flow,
    /// and on servers that require it for the device flow.
    pub client_secret: String,
    /// OAuth scopes to request from the user.
    pub scopes: Vec<String>,
    /// The localhost URI for the web application flow callback, e.g.
    /// `http://127.0.0.1/callback`.
    pub callback_uri: String,
    /// Account name to pre-fill the web login form with.
    pub login_handle: Option<String>,
    /// Whether the authorize web page may offer to create a new account.
    pub allow_signup: bool,
    /// Displays the one-time code to the user. Defaults to printing the code
    /// with instructions to press Enter to continue in the browser.
    pub display_code: Option<DisplayCodeFn>,
    /// Opens a web browser at a URL. Defaults to the system browser.
    pub browse_url: Option<BrowseUrlFn>,
    /// HTML rendered to the user when the web application flow completes.
    /// Defaults to a message saying the page can be closed.
    pub success_html: Option<String>,
    /// The HTTP client for API POST requests. Defaults to a fresh client.
    pub http_client: Option<reqwest::Client>,
    /// The stream the one-time-code prompt listens on. Defaults to stdin.
    pub stdin: Option<Box<dyn BufRead + Send>>,
    /// The stream UI messages are printed to. Defaults to stdout.
    pub stdout: Option<Box<dyn Write + Send>>,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            host: Host::github("github.com"),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: Vec::new(),
            callback_uri: String::new(),
            login_handle: None,
            allow_signup: true,
            display_code: None,
            browse_url: None,
            success_html: None,
            http_client: None,
            stdin: None,
            stdout: None,
        }
    }
}

impl Flow {
    /// Try the device flow first; when the server signals it does not
    /// implement it, fall back to the web application flow. Any other
    /// device-flow outcome, success or failure, is returned unchanged.
    pub async fn detect_flow(&mut self) -> Result<AccessToken> {
        match self.device_flow().await {
            Err(err) if err.is_unsupported() => {
                debug!("device flow unsupported, falling back to web application flow");
                self.web_app_flow().await
            }
            result => result,
        }
    }

    /// The full device flow: request a one-time code, show it to the user,
    /// open their browser at the verification page, and poll until the
    /// authorization completes.
    pub async fn device_flow(&mut self) -> Result<AccessToken> {
        let client = self.client();
        let authorization = device::request_code(
            &client,
            &self.host.device_code_url,
            &self.client_id,
            &self.scopes,
        )
        .await?;

        match &self.display_code {
            Some(display) => display(&authorization.user_code, &authorization.verification_uri)?,
            None => self.prompt_one_time_code(&authorization.user_code)?,
        }
        self.open_browser(&authorization.verification_uri)?;

        let options = WaitOptions {
            client_id: self.client_id.clone(),
            client_secret: (!self.client_secret.is_empty()).then(|| self.client_secret.clone()),
            ..WaitOptions::default()
        };
        device::wait(&client, &self.host.token_url, &authorization, options).await
    }

    /// The full web application flow: start the local callback server, open
    /// the browser at the authorize page, block until the user is redirected
    /// back, and exchange the authorization code for an access token.
    pub async fn web_app_flow(&mut self) -> Result<AccessToken> {
        let client = self.client();
        let mut flow = WebAppFlow::init_flow().await?;

        let browser_url = flow.browser_url(
            &self.host.authorize_url,
            BrowserParams {
                client_id: self.client_id.clone(),
                redirect_uri: self.callback_uri.clone(),
                scopes: self.scopes.clone(),
                login_handle: self.login_handle.clone(),
                allow_signup: self.allow_signup,
            },
        )?;

        // The listener must be serving before the browser navigates to
        // the authorize URL; the port is bound, so a redirect arriving
        // while the task spins up is queued rather than refused.
        let server = flow.start_server(self.success_html.clone())?;
        self.open_browser(&browser_url)?;

        let token = flow
            .access_token(&client, &self.host.token_url, &self.client_secret)
            .await;
        server.abort();
        token
    }

    fn client(&self) -> reqwest::Client {
        self.http_client.clone().unwrap_or_default()
    }

    fn open_browser(&self, url: &str) -> Result<()> {
        match &self.browse_url {
            Some(browse) => browse(url),
            None => open::that(url).map_err(|err| FlowError::Browser(err.to_string())),
        }
    }

    fn prompt_one_time_code(&mut self, user_code: &str) -> Result<()> {
        let mut default_out;
        let out: &mut dyn Write = match &mut self.stdout {
            Some(out) => out.as_mut(),
            None => {
                default_out = io::stdout();
                &mut default_out
            }
        };
        writeln!(out, "First, copy your one-time code: {user_code}")?;
        write!(out, "Then press [Enter] to continue in the web browser... ")?;
        out.flush()?;

        let mut line = String::new();
        match &mut self.stdin {
            Some(stdin) => {
                let _ = stdin.read_line(&mut line);
            }
            None => {
                let _ = io::stdin().read_line(&mut line);
            }
        }
        Ok(())
    }
}
