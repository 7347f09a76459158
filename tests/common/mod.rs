//! Shared helpers for integration tests

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const ED25519_A: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGUdUNqRHa0eh/90qPnUIxpDcS5s+Fn5fnA8qQ3prKwu";
pub const ED25519_B: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIEA/m4sLSwHLj3ufUvsmgYR56PAG2bh62NVrsIRifSPx";
pub const ED25519_C: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJCqFaeiU4Ztsu92/GBWoArQk7NI0GVf89kgC0OAxtPl";

/// Mock of the GitHub `/users/{user}/keys` endpoint.
///
/// Users not in the map get a 404. Returns the base URL.
pub async fn mock_github(users: HashMap<&'static str, Vec<&'static str>>) -> String {
    let users = Arc::new(users);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let users = Arc::clone(&users);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let response = keys_response(&users, req.uri().path());
                    async move { Ok::<_, Infallible>(response) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    format!("http://{addr}")
}

fn keys_response(users: &HashMap<&'static str, Vec<&'static str>>, path: &str) -> Response<Full<Bytes>> {
    let user = path
        .strip_prefix("/users/")
        .and_then(|rest| rest.strip_suffix("/keys"));

    let (status, body) = match user.and_then(|u| users.get(u)) {
        Some(keys) => {
            let listing: Vec<_> = keys
                .iter()
                .enumerate()
                .map(|(id, key)| serde_json::json!({ "id": id, "key": key }))
                .collect();
            (200, serde_json::Value::Array(listing).to_string())
        }
        None => (404, r#"{"message":"Not Found"}"#.to_string()),
    };

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Serve an app state on an ephemeral port
pub async fn spawn_server(state: keyway::AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(keyway::server::serve(listener, Arc::new(state)));
    addr
}
