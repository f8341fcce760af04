// ABOUTME: Local callback listener for the interactive authorization flow
// ABOUTME: Accepts Google's redirect on localhost and extracts the code, state, or error

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};

pub const DEFAULT_CALLBACK_PORT: u16 = 3737;
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// Query parameters of the authorization redirect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// One-shot HTTP listener bound to 127.0.0.1
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
}

impl CallbackServer {
    /// Bind the listener; port 0 picks a free port
    pub async fn bind(port: u16) -> AuthResult<Self> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AuthError::Callback(format!("Failed to bind to {}: {}", addr, e)))?;
        let port = listener.local_addr()?.port();

        debug!("OAuth callback server bound on port {}", port);
        Ok(Self { listener, port })
    }

    pub async fn bind_default() -> AuthResult<Self> {
        Self::bind(DEFAULT_CALLBACK_PORT).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI to register with the authorization request
    pub fn callback_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, CALLBACK_PATH)
    }

    /// Wait for the authorization redirect.
    ///
    /// Requests for other paths (such as favicon requests) get a 404 and the
    /// server keeps listening.
    pub async fn wait_for_callback(self) -> AuthResult<CallbackParams> {
        info!("Waiting for OAuth callback on {}", self.callback_url());

        loop {
            let (mut stream, peer_addr) = self.listener.accept().await.map_err(|e| {
                AuthError::Callback(format!("Failed to accept connection: {}", e))
            })?;
            debug!("Received connection from {}", peer_addr);

            let mut buffer = vec![0; 4096];
            let n = match stream.read(&mut buffer).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to read request from {}: {}", peer_addr, e);
                    continue;
                }
            };
            let request = String::from_utf8_lossy(&buffer[..n]);

            let Some(params) = Self::parse_request(&request) else {
                respond(&mut stream, NOT_FOUND_RESPONSE).await;
                continue;
            };

            if let Some(error) = &params.error {
                respond(&mut stream, &error_response(error)).await;
            } else if params.code.is_some() {
                respond(&mut stream, &success_response()).await;
            } else {
                respond(
                    &mut stream,
                    &error_response("No authorization code found in request"),
                )
                .await;
            }

            return Ok(params);
        }
    }

    /// Extract callback parameters from a raw HTTP request.
    ///
    /// Returns `None` when the request does not target the callback path.
    pub fn parse_request(request: &str) -> Option<CallbackParams> {
        let target = request.lines().next()?.split_whitespace().nth(1)?;
        let url = Url::parse(&format!("http://localhost{}", target)).ok()?;
        if url.path() != CALLBACK_PATH {
            return None;
        }

        let mut params = CallbackParams::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(params)
    }
}

async fn respond(stream: &mut TcpStream, response: &str) {
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to send callback response: {}", e);
    }
}

fn success_response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        SUCCESS_HTML.len(),
        SUCCESS_HTML
    )
}

fn error_response(message: &str) -> String {
    let html = format!(
        "<html><body><h1>Authentication Failed</h1><p>{}</p><p>You can close this tab and return to your terminal.</p></body></html>",
        html_escape(message)
    );
    format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        html.len(),
        html
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const NOT_FOUND_RESPONSE: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const SUCCESS_HTML: &str = r#"<html>
<head>
    <title>Authentication Successful</title>
    <style>
        body { font-family: system-ui, -apple-system, sans-serif; max-width: 600px; margin: 100px auto; text-align: center; }
        h1 { color: #22c55e; }
        p { color: #64748b; }
    </style>
</head>
<body>
    <h1>Authentication Successful</h1>
    <p>Your Google account is connected.</p>
    <p>You can now close this tab and return to your terminal.</p>
</body>
</html>"#;
