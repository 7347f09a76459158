//! Temporary key uploads at `/_/upload/`
//!
//! A WebSocket client sends one authorized_keys line and receives the
//! generated identity in reply. The identity resolves to the uploaded key
//! until the connection closes.

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::UploadGate;
use crate::keys::PublicKey;
use crate::repo::UploadableKeys;
use crate::server::http::text_response;
use crate::ws::{ConnectionState, HandlerPool, Session, SessionFn};

const UPLOAD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Upload a temporary key</title>
</head>
<body>
<h1>Upload a temporary key</h1>
<p>
Paste a public key below. It is served under a generated name for as long as
this page stays open.
</p>
<textarea id="key" rows="4" cols="80" placeholder="ssh-ed25519 AAAA..."></textarea>
<p><button id="upload">Upload</button></p>
<p id="status"></p>
<script>
document.getElementById("upload").addEventListener("click", function () {
  var status = document.getElementById("status");
  var scheme = location.protocol === "https:" ? "wss:" : "ws:";
  var socket = new WebSocket(scheme + "//" + location.host + location.pathname);
  socket.onopen = function () {
    socket.send(document.getElementById("key").value.trim());
    status.textContent = "Uploading...";
  };
  socket.onmessage = function (event) {
    var url = location.protocol + "//" + location.host + "/" + event.data;
    status.innerHTML = "";
    var link = document.createElement("a");
    link.href = url;
    link.textContent = url;
    status.append("Your key is available at ", link, ". Keep this page open.");
  };
  socket.onclose = function () {
    status.append(" Connection closed, the key is no longer served.");
  };
});
</script>
</body>
</html>
"#;

/// Upload endpoint state
pub struct Uploads {
    registry: Arc<UploadableKeys>,
    pool: HandlerPool,
    gate: Option<Arc<UploadGate>>,
    suffix: Option<Bytes>,
}

impl Uploads {
    pub fn new(
        registry: Arc<UploadableKeys>,
        pool: HandlerPool,
        gate: Option<UploadGate>,
        suffix: Option<Bytes>,
    ) -> Self {
        Self {
            registry,
            pool,
            gate: gate.map(Arc::new),
            suffix,
        }
    }

    pub fn registry(&self) -> &Arc<UploadableKeys> {
        &self.registry
    }

    pub fn pool(&self) -> &HandlerPool {
        &self.pool
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }

    /// Session function running the registration protocol
    pub fn session_fn(&self) -> SessionFn {
        let registry = Arc::clone(&self.registry);
        Arc::new(move |session| register_session(session, Arc::clone(&registry)).boxed())
    }

    fn page(&self) -> Bytes {
        let mut body = BytesMut::from(UPLOAD_HTML.as_bytes());
        if let Some(suffix) = &self.suffix {
            body.extend_from_slice(suffix);
        }
        body.freeze()
    }

    async fn authorize(&self, authorization: Option<String>) -> bool {
        let Some(gate) = &self.gate else {
            return true;
        };

        // argon2 verification is CPU bound
        let gate = Arc::clone(gate);
        match tokio::task::spawn_blocking(move || gate.check(authorization.as_deref())).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(e) => {
                error!(error = %e, "Upload credential check failed");
                false
            }
        }
    }
}

/// Handle a request to the upload endpoint
pub async fn handle_upload(uploads: Arc<Uploads>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !uploads.authorize(authorization).await {
        let mut response = text_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        if let Some(gate) = &uploads.gate {
            if let Ok(challenge) = HeaderValue::from_str(&gate.challenge()) {
                response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
            }
        }
        return response;
    }

    if !hyper_tungstenite::is_upgrade_request(&req) {
        let mut response = Response::new(Full::new(uploads.page()));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        return response;
    }

    let ws_config = uploads.pool.config().websocket_config();
    match hyper_tungstenite::upgrade(req, Some(ws_config)) {
        Ok((response, websocket)) => {
            let session = uploads.session_fn();
            tokio::spawn(async move {
                if let Err(e) = uploads.pool.handle(websocket, session).await {
                    warn!(error = %e, "Upload connection failed");
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket upgrade error");
            text_response(StatusCode::BAD_REQUEST, "WebSocket upgrade failed")
        }
    }
}

/// Registration protocol for one connection.
///
/// Reads a single key, registers it and replies with the generated identity,
/// then holds the registration until the connection is cancelled.
pub async fn register_session(mut session: Session, registry: Arc<UploadableKeys>) {
    session.set_state(ConnectionState::AwaitingKey);

    let Some(message) = session.read().await else {
        debug!("Connection closed before a key was submitted");
        return;
    };

    let key = match PublicKey::parse_authorized_key(&message) {
        Ok(key) => key,
        Err(e) => {
            info!(error = %e, "Rejected uploaded key");
            return;
        }
    };
    let fingerprint = key.fingerprint();

    let registration = registry.register(vec![key]);
    session.set_state(ConnectionState::Registered);
    info!(identity = %registration.identity(), fingerprint = %fingerprint, "Registered uploaded key");

    if session.write(registration.identity()).await.is_ok() {
        session.wait().await;
    }

    registration.revoke();
    info!(identity = %registration.identity(), "Uploaded key expired");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testdata::{key, ED25519_A};
    use crate::repo::KeyRepository;
    use crate::ws::handler::testutil::{drain, next_text, pair};
    use futures_util::SinkExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    fn uploads() -> Arc<Uploads> {
        Arc::new(Uploads::new(
            Arc::new(UploadableKeys::new("uploaded-")),
            HandlerPool::default(),
            None,
            None,
        ))
    }

    async fn wait_until_empty(registry: &UploadableKeys) {
        for _ in 0..100 {
            if registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry still has {} entries", registry.len());
    }

    #[tokio::test]
    async fn test_registration_lives_as_long_as_connection() {
        let uploads = uploads();
        let (server, mut client) = pair().await;
        let served = {
            let uploads = Arc::clone(&uploads);
            tokio::spawn(async move {
                uploads
                    .pool()
                    .handle_stream(server, uploads.session_fn())
                    .await
            })
        };

        client
            .send(Message::Text(format!("{ED25519_A} me@laptop")))
            .await
            .unwrap();
        let identity = next_text(&mut client).await.unwrap();
        assert!(identity.starts_with("uploaded-"));

        // the identity resolves as soon as it has been reported
        let record = uploads.registry().get_keys(&identity).await.unwrap();
        assert_eq!(record.keys, vec![key(ED25519_A)]);

        client.send(Message::Close(None)).await.unwrap();
        drain(&mut client).await;
        served.await.unwrap().unwrap();

        // revoked before the handler returned
        assert!(uploads.registry().get_keys(&identity).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_key_closes_without_registering() {
        let uploads = uploads();
        let (server, mut client) = pair().await;
        let served = {
            let uploads = Arc::clone(&uploads);
            tokio::spawn(async move {
                uploads
                    .pool()
                    .handle_stream(server, uploads.session_fn())
                    .await
            })
        };

        client.send(Message::Text("not a key".into())).await.unwrap();
        assert_eq!(next_text(&mut client).await, None);
        served.await.unwrap().unwrap();
        assert!(uploads.registry().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_before_submission_registers_nothing() {
        let uploads = uploads();
        let (server, client) = pair().await;
        let served = {
            let uploads = Arc::clone(&uploads);
            tokio::spawn(async move {
                uploads
                    .pool()
                    .handle_stream(server, uploads.session_fn())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(client);
        served.await.unwrap().unwrap();
        wait_until_empty(uploads.registry()).await;
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_revokes() {
        let uploads = uploads();
        let (server, mut client) = pair().await;
        let served = {
            let uploads = Arc::clone(&uploads);
            tokio::spawn(async move {
                uploads
                    .pool()
                    .handle_stream(server, uploads.session_fn())
                    .await
            })
        };

        client.send(Message::Text(ED25519_A.into())).await.unwrap();
        let identity = next_text(&mut client).await.unwrap();
        assert!(uploads.registry().contains(&identity));

        drop(client);
        served.await.unwrap().unwrap();
        assert!(!uploads.registry().contains(&identity));
    }
}
