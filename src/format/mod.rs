//! Output encodings for resolved keys
//!
//! A [`Formatter`] turns a resolved key set into a response body plus the
//! headers that describe it. Formatters are looked up by the extension of the
//! requested path; the empty extension selects [`Magic`], which picks a
//! machine- or human-oriented rendering from the client's `User-Agent`.

mod authorized_keys;
mod html;
mod shellscript;

pub use authorized_keys::AuthorizedKeys;
pub use html::{escape_html, Html};
pub use shellscript::ShellScript;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::keys::PublicKey;
use crate::repo::KeySource;

/// User-Agent products that get the plain authorized_keys rendering
const CLI_PRODUCTS: &[&str] = &[
    "curl",
    "HTTPie",
    "httpie-go",
    "Wget",
    "fetch libfetch",
    "Go",
    "Go-http-client",
    "ddclient",
    "Mikrotik",
    "xh",
];

/// Which kind of client asked for the keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientHint {
    Machine,
    Human,
}

impl ClientHint {
    /// Derive the hint from a `User-Agent` header value
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let product = user_agent
            .and_then(|ua| ua.split('/').next())
            .map(str::trim)
            .unwrap_or_default();

        if CLI_PRODUCTS.contains(&product) {
            Self::Machine
        } else {
            Self::Human
        }
    }
}

/// A rendered response body
#[derive(Debug, Clone)]
pub struct Rendered {
    pub content_type: &'static str,
    /// Download file name for `Content-Disposition: attachment`
    pub disposition: Option<&'static str>,
    pub body: Bytes,
}

impl Rendered {
    /// `Content-Disposition` header value, if any
    pub fn content_disposition(&self) -> Option<String> {
        self.disposition
            .map(|name| format!("attachment; filename=\"{name}\""))
    }
}

/// What a formatter renders
pub struct RenderContext<'a> {
    pub identity: &'a str,
    pub source: KeySource,
    pub keys: &'a [PublicKey],
    pub hint: ClientHint,
    pub generated_at: DateTime<Utc>,
}

impl<'a> RenderContext<'a> {
    pub fn new(identity: &'a str, source: KeySource, keys: &'a [PublicKey], hint: ClientHint) -> Self {
        Self {
            identity,
            source,
            keys,
            hint,
            generated_at: Utc::now(),
        }
    }

    pub(crate) fn timestamp(&self) -> String {
        self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Keys in canonical form, one per line
    pub(crate) fn key_lines(&self) -> String {
        let mut out = String::new();
        for key in self.keys {
            out.push_str(key.as_str());
            out.push('\n');
        }
        out
    }
}

pub trait Formatter: Send + Sync {
    fn render(&self, ctx: &RenderContext<'_>) -> Rendered;
}

/// Picks [`AuthorizedKeys`] for command line clients and [`Html`] otherwise
pub struct Magic {
    pub html: Html,
    pub authorized_keys: AuthorizedKeys,
}

impl Formatter for Magic {
    fn render(&self, ctx: &RenderContext<'_>) -> Rendered {
        match ctx.hint {
            ClientHint::Machine => self.authorized_keys.render(ctx),
            ClientHint::Human => self.html.render(ctx),
        }
    }
}

/// Formatters by (lowercase) path extension
#[derive(Clone)]
pub struct Formatters {
    by_extension: HashMap<String, Arc<dyn Formatter>>,
}

impl Formatters {
    pub fn new() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    /// The standard set: magic, authorized_keys, sh and html
    pub fn standard(suffix: Option<Bytes>) -> Self {
        let html = Html::new(suffix);
        let mut formatters = Self::new();
        formatters.register(
            "",
            Magic {
                html: html.clone(),
                authorized_keys: AuthorizedKeys,
            },
        );
        formatters.register("authorized_keys", AuthorizedKeys);
        formatters.register("sh", ShellScript);
        formatters.register("html", html);
        formatters
    }

    /// Register `formatter` for an extension; `""` is the bare path
    pub fn register(&mut self, extension: &str, formatter: impl Formatter + 'static) {
        self.by_extension
            .insert(extension.to_lowercase(), Arc::new(formatter));
    }

    pub fn get(&self, extension: &str) -> Option<&dyn Formatter> {
        self.by_extension
            .get(&extension.to_lowercase())
            .map(|f| f.as_ref())
    }
}

impl Default for Formatters {
    fn default() -> Self {
        Self::standard(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testdata::{key, ED25519_A};

    #[test]
    fn test_client_hint_from_user_agent() {
        for ua in [
            "curl/8.4.0",
            "Wget/1.21.4",
            "HTTPie/3.2.2",
            "Go-http-client/1.1",
            "fetch libfetch/2.0",
            "xh/0.20.0",
        ] {
            assert_eq!(ClientHint::from_user_agent(Some(ua)), ClientHint::Machine, "{ua}");
        }
        for ua in [
            "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0",
            "curly/1.0",
            "",
        ] {
            assert_eq!(ClientHint::from_user_agent(Some(ua)), ClientHint::Human, "{ua}");
        }
        assert_eq!(ClientHint::from_user_agent(None), ClientHint::Human);
    }

    #[test]
    fn test_magic_selects_by_hint() {
        let formatters = Formatters::default();
        let magic = formatters.get("").unwrap();
        let keys = [key(ED25519_A)];

        let machine = magic.render(&RenderContext::new("alice", KeySource::Disk, &keys, ClientHint::Machine));
        assert_eq!(machine.content_type, "text/plain");

        let human = magic.render(&RenderContext::new("alice", KeySource::Disk, &keys, ClientHint::Human));
        assert_eq!(human.content_type, "text/html");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let formatters = Formatters::default();
        assert!(formatters.get("SH").is_some());
        assert!(formatters.get("Authorized_Keys").is_some());
        assert!(formatters.get("json").is_none());
    }
}
