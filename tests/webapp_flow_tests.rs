use std::collections::HashMap;

use authflow::webapp::{BrowserParams, WebAppFlow};
use authflow::FlowError;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn browser_params() -> BrowserParams {
    BrowserParams {
        client_id: "CLIENT-ID".to_string(),
        redirect_uri: "http://127.0.0.1/callback".to_string(),
        scopes: vec!["repo".to_string(), "read:org".to_string()],
        login_handle: None,
        allow_signup: true,
    }
}

fn query_map(url: &url::Url) -> HashMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// The redirect URI the flow rewrote into the browser URL, pointing at the
/// bound loopback port.
fn redirect_from(browser_url: &str) -> (url::Url, String) {
    let url = url::Url::parse(browser_url).expect("browser url");
    let query = query_map(&url);
    let redirect = url::Url::parse(&query["redirect_uri"]).expect("redirect uri");
    (redirect, query["state"].clone())
}

#[tokio::test]
async fn browser_url_carries_flow_parameters() {
    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url("https://github.com/login/oauth/authorize", browser_params())
        .expect("browser url");

    let url = url::Url::parse(&browser_url).unwrap();
    assert_eq!(url.path(), "/login/oauth/authorize");
    let query = query_map(&url);
    assert_eq!(query["client_id"], "CLIENT-ID");
    assert_eq!(query["scope"], "repo read:org");
    assert_eq!(query["state"].len(), 20);
    assert!(query["state"].chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!query.contains_key("login"));
    assert!(!query.contains_key("allow_signup"));

    let redirect = url::Url::parse(&query["redirect_uri"]).unwrap();
    assert_eq!(redirect.host_str(), Some("127.0.0.1"));
    assert_eq!(redirect.path(), "/callback");
    assert!(redirect.port().is_some());
}

#[tokio::test]
async fn browser_url_emits_login_and_signup_controls() {
    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url(
            "https://github.com/login/oauth/authorize",
            BrowserParams {
                login_handle: Some("monalisa".to_string()),
                allow_signup: false,
                ..browser_params()
            },
        )
        .expect("browser url");

    let query = query_map(&url::Url::parse(&browser_url).unwrap());
    assert_eq!(query["login"], "monalisa");
    assert_eq!(query["allow_signup"], "false");
}

#[tokio::test]
async fn browser_url_rejects_invalid_redirect_uri() {
    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let err = flow
        .browser_url(
            "https://github.com/login/oauth/authorize",
            BrowserParams {
                redirect_uri: "not a uri".to_string(),
                ..browser_params()
            },
        )
        .unwrap_err();
    assert!(matches!(err, FlowError::InvalidRedirect(_)), "got {err:?}");
}

#[tokio::test]
async fn callback_handoff_and_token_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_string_contains("client_id=CLIENT-ID"))
        .and(body_string_contains("client_secret=SEKRIT"))
        .and(body_string_contains("code=ABC-123"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "access_token=ATOKEN&token_type=bearer".to_string(),
            "application/x-www-form-urlencoded",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url("https://github.com/login/oauth/authorize", browser_params())
        .expect("browser url");
    let (redirect, state) = redirect_from(&browser_url);
    let serve_task = flow.start_server(None).expect("start server");

    // A stray request outside the callback path is rejected and the
    // listener stays open for the real redirect.
    let port = redirect.port().unwrap();
    let stray = reqwest::get(format!("http://127.0.0.1:{port}/favicon.ico"))
        .await
        .expect("stray request");
    assert_eq!(stray.status().as_u16(), 404);

    let callback = reqwest::get(format!(
        "http://127.0.0.1:{port}/callback?code=ABC-123&state={state}"
    ))
    .await
    .expect("callback request");
    assert_eq!(callback.status().as_u16(), 200);
    assert_eq!(
        callback.headers()["content-type"].to_str().unwrap(),
        "text/html"
    );
    assert_eq!(
        callback.text().await.unwrap(),
        "<p>You may now close this page and return to the client app.</p>"
    );

    // The qualifying request shuts the listener down.
    serve_task.await.expect("join").expect("serve");
    assert!(
        reqwest::get(format!("http://127.0.0.1:{port}/callback"))
            .await
            .is_err(),
        "listener should be closed after the callback"
    );

    let token = flow
        .access_token(
            &reqwest::Client::new(),
            &format!("{}/login/oauth/access_token", server.uri()),
            "SEKRIT",
        )
        .await
        .expect("token");
    assert_eq!(token.token, "ATOKEN");
    assert_eq!(token.token_type, "bearer");
}

#[tokio::test]
async fn callback_survives_reset_and_silent_connections() {
    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url("https://github.com/login/oauth/authorize", browser_params())
        .expect("browser url");
    let (redirect, state) = redirect_from(&browser_url);
    let serve_task = flow.start_server(None).expect("start server");
    let port = redirect.port().unwrap();
    let addr = format!("127.0.0.1:{port}");

    // A connection torn down with an immediate RST, the way a browser drops
    // a speculative preconnect, must not bring the listener down.
    let reset = tokio::net::TcpStream::connect(&addr).await.expect("connect");
    reset
        .set_linger(Some(std::time::Duration::from_secs(0)))
        .expect("linger");
    drop(reset);

    // Nor may a connection that never sends a request stall the loop.
    let _silent = tokio::net::TcpStream::connect(&addr).await.expect("connect");

    let callback = reqwest::get(format!(
        "http://127.0.0.1:{port}/callback?code=ABC-123&state={state}"
    ))
    .await
    .expect("callback request");
    assert_eq!(callback.status().as_u16(), 200);

    serve_task.await.expect("join").expect("serve");
    let result = flow
        .access_token(&reqwest::Client::new(), "http://127.0.0.1:1/token", "")
        .await;
    // The state matches, so the flow proceeded to the (unreachable) token
    // endpoint: the callback was delivered despite the bad connections.
    assert!(
        matches!(result, Err(FlowError::Network(_))),
        "got {result:?}"
    );
}

#[tokio::test]
async fn callback_serves_custom_success_html() {
    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url("https://github.com/login/oauth/authorize", browser_params())
        .expect("browser url");
    let (redirect, state) = redirect_from(&browser_url);
    let serve_task = flow
        .start_server(Some("<h1>All done!</h1>".to_string()))
        .expect("start server");

    let callback = reqwest::get(format!(
        "http://127.0.0.1:{}/callback?code=ABC-123&state={state}",
        redirect.port().unwrap()
    ))
    .await
    .expect("callback request");
    assert_eq!(callback.text().await.unwrap(), "<h1>All done!</h1>");
    serve_task.await.expect("join").expect("serve");
}

#[tokio::test]
async fn state_mismatch_skips_the_token_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "access_token=ATOKEN".to_string(),
            "application/x-www-form-urlencoded",
        ))
        .expect(0)
        .mount(&server)
        .await;

    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url("https://github.com/login/oauth/authorize", browser_params())
        .expect("browser url");
    let (redirect, _state) = redirect_from(&browser_url);
    let serve_task = flow.start_server(None).expect("start server");

    reqwest::get(format!(
        "http://127.0.0.1:{}/callback?code=ABC-123&state=forged",
        redirect.port().unwrap()
    ))
    .await
    .expect("callback request");
    serve_task.await.expect("join").expect("serve");

    let err = flow
        .access_token(&reqwest::Client::new(), &server.uri(), "SEKRIT")
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::StateMismatch), "got {err:?}");
}

#[tokio::test]
async fn callback_state_is_percent_decoded() {
    let mut flow = WebAppFlow::init_flow().await.expect("init");
    let browser_url = flow
        .browser_url("https://github.com/login/oauth/authorize", browser_params())
        .expect("browser url");
    let (redirect, _state) = redirect_from(&browser_url);
    let serve_task = flow.start_server(None).expect("start server");

    // A state of "xy/z" arrives percent-encoded; the mismatch error proves
    // the comparison ran against the decoded value rather than erroring out.
    reqwest::get(format!(
        "http://127.0.0.1:{}/callback?code=ABC-123&state=xy%2Fz",
        redirect.port().unwrap()
    ))
    .await
    .expect("callback request");
    serve_task.await.expect("join").expect("serve");

    let err = flow
        .access_token(&reqwest::Client::new(), "http://127.0.0.1:1/token", "")
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::StateMismatch));
}
