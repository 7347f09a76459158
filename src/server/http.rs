//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Only GET is served.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CONTENT_DISPOSITION, CONTENT_TYPE, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::auth::UploadGate;
use crate::config::Args;
use crate::format::{ClientHint, Formatters, RenderContext};
use crate::repo::cache::{self, ResponseCache};
use crate::repo::{
    Blocklisted, Combo, Disk, GitHubKeys, GitHubKeysOptions, KeyRepository, UploadableKeys,
};
use crate::server::files::{self, INDEX_HTML, ROBOTS_TXT};
use crate::server::upload::{self, Uploads};
use crate::types::{ErrorKind, KeywayError, Result};
use crate::ws::HandlerPool;

/// Shared application state
pub struct AppState {
    /// Resolver chain (blocklist around the ordered sources)
    pub resolver: Arc<dyn KeyRepository>,
    /// Output encodings by extension
    pub formatters: Formatters,
    /// Upload endpoint, if uploads are enabled
    pub uploads: Option<Arc<Uploads>>,
    /// Response cache of the remote source, swept in the background
    pub remote_cache: Option<Arc<ResponseCache>>,
    /// Override for `/`
    pub index: Option<PathBuf>,
    /// Override for `/robots.txt`
    pub robots: Option<PathBuf>,
    /// Directory served under `/_/`
    pub serve: Option<PathBuf>,
}

impl AppState {
    pub fn new(resolver: Arc<dyn KeyRepository>, formatters: Formatters) -> Self {
        Self {
            resolver,
            formatters,
            uploads: None,
            remote_cache: None,
            index: None,
            robots: None,
            serve: None,
        }
    }

    /// Build the resolver chain and endpoints described by `args`.
    ///
    /// Sources are tried in the order ephemeral, disk, remote; the blocklist
    /// wraps all of them.
    pub fn from_args(args: &Args) -> Result<Self> {
        let suffix = match &args.suffix {
            Some(path) => Some(Bytes::from(std::fs::read(path).map_err(|e| {
                KeywayError::Config(format!("reading suffix {}: {}", path.display(), e))
            })?)),
            None => None,
        };

        let mut chain: Vec<Arc<dyn KeyRepository>> = Vec::new();

        let uploads = if args.uploads_enabled() {
            let registry = Arc::new(UploadableKeys::new(args.upload_prefix.clone()));
            chain.push(Arc::clone(&registry) as Arc<dyn KeyRepository>);

            let gate = args
                .upload_auth
                .as_deref()
                .map(UploadGate::from_credentials)
                .transpose()?;
            Some(Arc::new(Uploads::new(
                registry,
                HandlerPool::default(),
                gate,
                suffix.clone(),
            )))
        } else {
            None
        };

        if let Some(akpath) = &args.akpath {
            chain.push(Arc::new(Disk::new(akpath)));
        }

        let github = GitHubKeys::new(GitHubKeysOptions {
            token: args.token.clone(),
            api_url: args.github_api_url.clone(),
            timeout: args.api_timeout(),
            max_cache_size: args.cache_size,
            max_cache_age_secs: args.cache_age_secs,
        })?;
        let remote_cache = Arc::clone(github.cache());
        chain.push(Arc::new(github));

        let resolver = Blocklisted::new(Combo::new(chain)?, args.blocklist());

        Ok(Self {
            resolver: Arc::new(resolver),
            formatters: Formatters::standard(suffix),
            uploads,
            remote_cache: Some(remote_cache),
            index: args.index.clone(),
            robots: args.robots.clone(),
            serve: args.serve.clone(),
        })
    }

    pub fn with_uploads(mut self, uploads: Arc<Uploads>) -> Self {
        self.uploads = Some(uploads);
        self
    }
}

/// Bind `listen` and serve until the process exits
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Keyway listening on {}", listener.local_addr()?);
    serve(listener, state).await
}

/// Serve connections accepted from `listener`
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    if let Some(cache) = &state.remote_cache {
        if cache.is_enabled() && cache.config().max_age.is_some() {
            cache::spawn_cleanup_task(Arc::clone(cache));
        }
    }

    if let Some(uploads) = &state.uploads {
        info!(
            gated = uploads.is_gated(),
            "Temporary key uploads enabled at /_/upload/"
        );
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, req.method(), path);

    if req.method() != Method::GET {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return Ok(response);
    }

    let response = match path.as_str() {
        "" | "/" | "/index.html" => {
            fallback_file(state.index.as_deref(), INDEX_HTML, "text/html; charset=utf-8").await
        }
        "/robots.txt" => fallback_file(state.robots.as_deref(), ROBOTS_TXT, "text/plain").await,
        "/favicon.ico" => not_found(),
        "/_/upload" | "/_/upload/" => match &state.uploads {
            Some(uploads) => upload::handle_upload(Arc::clone(uploads), req).await,
            None => not_found(),
        },
        p if p.starts_with("/_/") => match &state.serve {
            Some(root) => static_file(root, &p[3..]).await,
            None => not_found(),
        },
        p => match parse_key_path(p) {
            Some((identity, extension)) => {
                let hint = ClientHint::from_user_agent(
                    req.headers().get(USER_AGENT).and_then(|v| v.to_str().ok()),
                );
                serve_keys(&state, identity, extension, hint).await
            }
            None => not_found(),
        },
    };

    Ok(response)
}

/// Resolve an identity and render it with the formatter for `extension`
async fn serve_keys(
    state: &AppState,
    identity: &str,
    extension: &str,
    hint: ClientHint,
) -> Response<Full<Bytes>> {
    let Some(formatter) = state.formatters.get(extension) else {
        return not_found();
    };

    let record = match state.resolver.get_keys(identity).await {
        Ok(record) => record,
        Err(e) => {
            match e.kind() {
                ErrorKind::Fatal => error!(identity = %identity, error = %e, "Key resolution failed"),
                _ => debug!(identity = %identity, error = %e, "Key resolution refused"),
            }
            return error_response(e);
        }
    };

    let rendered = formatter.render(&RenderContext::new(
        identity,
        record.source,
        &record.keys,
        hint,
    ));
    info!(
        identity = %identity,
        source = %record.source,
        keys = record.keys.len(),
        "Served keys"
    );

    let mut response = Response::new(Full::new(rendered.body.clone()));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(rendered.content_type));
    if let Some(value) = rendered
        .content_disposition()
        .and_then(|d| HeaderValue::from_str(&d).ok())
    {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}

async fn fallback_file(
    path: Option<&std::path::Path>,
    fallback: &'static str,
    content_type: &'static str,
) -> Response<Full<Bytes>> {
    match files::path_or_fallback(path, fallback).await {
        Ok(body) => {
            let mut response = Response::new(Full::new(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to read override file");
            error_response(e)
        }
    }
}

async fn static_file(root: &std::path::Path, relative: &str) -> Response<Full<Bytes>> {
    match files::serve_static(root, relative).await {
        Ok(Some(file)) => {
            let mut response = Response::new(Full::new(file.body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(file.content_type));
            response
        }
        Ok(None) => not_found(),
        Err(e) => {
            error!(error = %e, "Failed to serve static file");
            error_response(e)
        }
    }
}

/// Split `/{identity}[.{extension}][/]`.
///
/// The identity is `[A-Za-z0-9-]+`, the extension `[A-Za-z_]+`.
pub fn parse_key_path(path: &str) -> Option<(&str, &str)> {
    let path = path.strip_prefix('/')?;
    let path = path.strip_suffix('/').unwrap_or(path);

    let (identity, extension) = match path.split_once('.') {
        Some((identity, extension)) => {
            if extension.is_empty()
                || !extension.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
            {
                return None;
            }
            (identity, extension)
        }
        None => (path, ""),
    };

    if identity.is_empty()
        || !identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return None;
    }

    Some((identity, extension))
}

pub(crate) fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn not_found() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

fn error_response(err: KeywayError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    text_response(status, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_path() {
        assert_eq!(parse_key_path("/alice"), Some(("alice", "")));
        assert_eq!(parse_key_path("/alice/"), Some(("alice", "")));
        assert_eq!(parse_key_path("/alice.sh"), Some(("alice", "sh")));
        assert_eq!(
            parse_key_path("/bob-2.authorized_keys"),
            Some(("bob-2", "authorized_keys"))
        );
        assert_eq!(parse_key_path("/Bob-2.HTML/"), Some(("Bob-2", "HTML")));

        for invalid in ["", "/", "/.sh", "/alice.", "/a.b.c", "/a/b", "//alice", "/al ice", "/al_ice"] {
            assert_eq!(parse_key_path(invalid), None, "{invalid}");
        }
    }
}
