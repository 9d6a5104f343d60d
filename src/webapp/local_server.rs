use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;

pub(crate) const DEFAULT_SUCCESS_HTML: &str =
    "<p>You may now close this page and return to the client app.</p>";

/// The code received by the local server's callback handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub code: String,
    pub state: String,
}

/// Loopback HTTP listener that receives the browser redirect.
///
/// Bound to an OS-assigned port before the authorize URL is constructed, so
/// the redirect URI can name the port. Exactly one request to the configured
/// callback path is ever handled; its result goes through a single-slot
/// channel, after which the listener shuts down. Requests to any other path
/// get a 404 and leave the listener open.
pub(crate) struct LocalServer {
    listener: TcpListener,
    result_tx: mpsc::Sender<CallbackResult>,
    pub(crate) callback_path: String,
    pub(crate) success_html: Option<String>,
}

impl LocalServer {
    /// Reserve a random available TCP port on the IPv4 loopback interface.
    pub(crate) async fn bind() -> Result<(Self, mpsc::Receiver<CallbackResult>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        // Capacity 1: the result is delivered at most once, and the handler
        // must never block on the send.
        let (result_tx, result_rx) = mpsc::channel(1);
        let server = Self {
            listener,
            result_tx,
            callback_path: String::new(),
            success_html: None,
        };
        Ok((server, result_rx))
    }

    pub(crate) fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    /// Accept connections until one request to the callback path has been
    /// served. Returning drops the listener, which closes the port; no
    /// second result can ever be delivered.
    ///
    /// Connections are handled concurrently, so a connection that resets or
    /// never sends a request can neither stall the accept loop nor shut the
    /// server down before the real redirect arrives.
    pub(crate) async fn serve(self) -> Result<()> {
        let Self {
            listener,
            result_tx,
            callback_path,
            success_html,
        } = self;
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        loop {
            tokio::select! {
                biased;
                _ = done_rx.recv() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "callback connection accepted");
                    let callback_path = callback_path.clone();
                    let success_html = success_html.clone();
                    let result_tx = result_tx.clone();
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        match handle_connection(stream, &callback_path, success_html.as_deref())
                            .await
                        {
                            Ok(Some(result)) => {
                                // Only one request ever matches; a full slot
                                // means a duplicate raced in and its result
                                // is discarded.
                                let _ = result_tx.try_send(result);
                                debug!("callback received, shutting down listener");
                                let _ = done_tx.try_send(());
                            }
                            Ok(None) => {}
                            Err(err) => debug!(error = %err, "callback connection failed"),
                        }
                    });
                }
            }
        }
    }
}

/// Serve one connection. Returns the callback result when the request
/// matched the configured path; `None` leaves the listener open.
async fn handle_connection(
    stream: TcpStream,
    callback_path: &str,
    success_html: Option<&str>,
) -> Result<Option<CallbackResult>> {
    let (reader, mut writer) = stream.into_split();
    let mut request_line = String::new();
    BufReader::new(reader).read_line(&mut request_line).await?;

    let target = match request_target(&request_line) {
        Some(target) => target,
        None => {
            respond_404(&mut writer).await?;
            return Ok(None);
        }
    };
    let url = match url::Url::parse(&format!("http://127.0.0.1{target}")) {
        Ok(url) => url,
        Err(_) => {
            respond_404(&mut writer).await?;
            return Ok(None);
        }
    };

    if !callback_path.is_empty() && url.path() != callback_path {
        debug!(path = url.path(), "ignoring request outside callback path");
        respond_404(&mut writer).await?;
        return Ok(None);
    }

    let result = CallbackResult {
        code: query_param(&url, "code"),
        state: query_param(&url, "state"),
    };

    let body = success_html.unwrap_or(DEFAULT_SUCCESS_HTML);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(Some(result))
}

/// Extract the request target from an HTTP/1.1 request line such as
/// `GET /callback?code=x HTTP/1.1`.
fn request_target(request_line: &str) -> Option<&str> {
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    parts.next()
}

fn query_param(url: &url::Url, name: &str) -> String {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

async fn respond_404(writer: &mut (impl AsyncWriteExt + Unpin)) -> Result<()> {
    writer
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_target_parses_a_request_line() {
        assert_eq!(
            request_target("GET /callback?code=abc HTTP/1.1\r\n"),
            Some("/callback?code=abc")
        );
        assert_eq!(request_target("GET"), None);
        assert_eq!(request_target(""), None);
    }

    #[test]
    fn query_param_percent_decodes() {
        let url = url::Url::parse("http://127.0.0.1/cb?code=ABC-123&state=xy%2Fz").unwrap();
        assert_eq!(query_param(&url, "code"), "ABC-123");
        assert_eq!(query_param(&url, "state"), "xy/z");
        assert_eq!(query_param(&url, "missing"), "");
    }
}
