//! Loopback redirect listener.
//!
//! A minimal HTTP listener bound to 127.0.0.1 that exists to receive a
//! single `GET /callback?code=...` redirect. The HTML it serves is
//! informational only; the flow completes by parsing the query string.
//! The listener is single-fire: it is torn down after one successful
//! callback.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::OAuthError;

/// Query parameters delivered by a successful redirect.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub code: String,
    pub state: Option<String>,
}

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><body>\
<h2>Authorization complete</h2>\
<p>You can close this window and return to the terminal.</p>\
</body></html>";

const ERROR_PAGE: &str = "<!DOCTYPE html><html><body>\
<h2>Authorization failed</h2>\
<p>The authorization server reported an error. See the terminal.</p>\
</body></html>";

pub(crate) async fn bind(port: u16) -> Result<TcpListener, OAuthError> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| OAuthError::ListenerFailed(format!("bind 127.0.0.1:{port}: {e}")))
}

/// Accept connections until one callback resolves, then stop.
pub(crate) fn spawn_accept_loop(
    listener: TcpListener,
) -> (
    JoinHandle<()>,
    oneshot::Receiver<Result<CallbackOutcome, OAuthError>>,
) {
    let (tx, rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut tx = Some(tx);
        loop {
            let (mut socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            debug!(%peer, "redirect connection");

            let mut request_line = String::new();
            {
                let mut reader = BufReader::new(&mut socket);
                if reader.read_line(&mut request_line).await.is_err() {
                    continue;
                }
            }

            // GET /callback?code=... HTTP/1.1
            let Some(path) = request_line.split_whitespace().nth(1) else {
                continue;
            };

            if !path.starts_with("/callback") {
                let _ = write_response(&mut socket, 404, "<html>Not found</html>").await;
                continue;
            }

            let outcome = parse_callback(path);
            let page = if outcome.is_ok() {
                SUCCESS_PAGE
            } else {
                ERROR_PAGE
            };
            let _ = write_response(&mut socket, 200, page).await;

            if let Some(tx) = tx.take() {
                let _ = tx.send(outcome);
            }
            break;
        }
    });

    (handle, rx)
}

fn parse_callback(path: &str) -> Result<CallbackOutcome, OAuthError> {
    let query = path.split('?').nth(1).unwrap_or("");

    let mut code = None;
    let mut state = None;
    let mut error = None;

    for param in query.split('&') {
        let mut parts = param.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());

        match key {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(OAuthError::AuthorizationRejected(error));
    }

    match code {
        Some(code) if !code.is_empty() => Ok(CallbackOutcome { code, state }),
        _ => Err(OAuthError::InvalidCallback(
            "callback carried neither code nor error".to_string(),
        )),
    }
}

async fn write_response(
    socket: &mut tokio::net::TcpStream,
    status: u16,
    body: &str,
) -> std::io::Result<()> {
    let reason = if status == 200 { "OK" } else { "Not Found" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_code() {
        let outcome = parse_callback("/callback?code=XYZ&state=s1").unwrap();
        assert_eq!(outcome.code, "XYZ");
        assert_eq!(outcome.state.as_deref(), Some("s1"));
    }

    #[test]
    fn test_parse_callback_error() {
        assert!(matches!(
            parse_callback("/callback?error=access_denied"),
            Err(OAuthError::AuthorizationRejected(_))
        ));
    }

    #[test]
    fn test_parse_callback_empty() {
        assert!(matches!(
            parse_callback("/callback"),
            Err(OAuthError::InvalidCallback(_))
        ));
    }

    #[test]
    fn test_parse_callback_url_encoded() {
        let outcome = parse_callback("/callback?code=a%2Bb").unwrap();
        assert_eq!(outcome.code, "a+b");
    }

    #[tokio::test]
    async fn test_listener_single_fire() {
        use tokio::io::AsyncReadExt;

        let listener = bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (handle, rx) = spawn_accept_loop(listener);

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream
            .write_all(b"GET /callback?code=ABC HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        assert!(String::from_utf8_lossy(&buf).contains("Authorization complete"));

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.code, "ABC");
        let _ = handle.await;
    }
}
