//! Static responses: index page, robots.txt and the `/_/` directory

use bytes::Bytes;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::types::{KeywayError, Result};

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>keyway</title>
</head>
<body>
<h1>keyway</h1>
<p>Serves SSH public keys by username.</p>
<ul>
<li><code>GET /{user}</code> keys as a web page, or as authorized_keys for command line clients</li>
<li><code>GET /{user}.authorized_keys</code> an authorized_keys file</li>
<li><code>GET /{user}.sh</code> a script that installs the keys as <code>~/.ssh/authorized_keys</code></li>
<li><code>GET /{user}.html</code> a web page</li>
</ul>
<p>For example: <code>curl https://this.host/{user} &gt;&gt; ~/.ssh/authorized_keys</code></p>
</body>
</html>
"#;

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// Contents of `path`, or `fallback` when no path is configured or the file
/// does not exist. Other read errors are returned.
pub async fn path_or_fallback(path: Option<&Path>, fallback: &'static str) -> Result<Bytes> {
    let Some(path) = path else {
        return Ok(Bytes::from_static(fallback.as_bytes()));
    };

    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Bytes::from(contents)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Bytes::from_static(fallback.as_bytes())),
        Err(e) => Err(KeywayError::Internal(format!("reading {}: {}", path.display(), e))),
    }
}

/// A file read from the static directory
#[derive(Debug)]
pub struct StaticFile {
    pub content_type: &'static str,
    pub body: Bytes,
}

/// Serve `relative` from `root`.
///
/// Directories are only served through their `index.html`, never listed.
/// Returns `None` for anything that does not resolve to a regular file
/// inside `root`.
pub async fn serve_static(root: &Path, relative: &str) -> Result<Option<StaticFile>> {
    let Some(mut path) = resolve(root, relative) else {
        return Ok(None);
    };

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        path.push("index.html");
        match tokio::fs::metadata(&path).await {
            Ok(index) if index.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    } else if !metadata.is_file() {
        return Ok(None);
    }

    let body = tokio::fs::read(&path).await?;
    Ok(Some(StaticFile {
        content_type: content_type_for(&path),
        body: Bytes::from(body),
    }))
}

/// Join a URL path onto `root`, refusing anything that could escape it
fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        match Path::new(segment).components().next() {
            None | Some(Component::CurDir) => continue,
            Some(Component::Normal(name)) if name == segment => path.push(name),
            _ => return None,
        }
    }
    Some(path)
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
