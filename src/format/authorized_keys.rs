use bytes::Bytes;

use super::{Formatter, RenderContext, Rendered};

/// Plain authorized_keys file
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizedKeys;

impl Formatter for AuthorizedKeys {
    fn render(&self, ctx: &RenderContext<'_>) -> Rendered {
        let body = format!(
            "# authorized_keys for {} ({}), generated {}\n{}",
            ctx.identity,
            ctx.source,
            ctx.timestamp(),
            ctx.key_lines()
        );

        Rendered {
            content_type: "text/plain",
            disposition: Some("authorized_keys"),
            body: Bytes::from(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ClientHint;
    use crate::keys::testdata::{key, ED25519_A, ED25519_B};
    use crate::repo::KeySource;

    #[test]
    fn test_renders_one_canonical_key_per_line() {
        let keys = [
            key(&format!("{ED25519_A} alice@laptop")),
            key(ED25519_B),
        ];
        let ctx = RenderContext::new("alice", KeySource::Disk, &keys, ClientHint::Machine);
        let rendered = AuthorizedKeys.render(&ctx);

        let body = String::from_utf8(rendered.body.to_vec()).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert!(lines[0].starts_with("# authorized_keys for alice (disk)"));
        assert_eq!(&lines[1..], &[ED25519_A, ED25519_B]);
        assert_eq!(
            rendered.content_disposition().as_deref(),
            Some("attachment; filename=\"authorized_keys\"")
        );
    }
}
