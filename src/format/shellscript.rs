use bytes::Bytes;

use super::{Formatter, RenderContext, Rendered};

/// Shell script that installs the keys as `~/.ssh/authorized_keys`.
///
/// Overwrites any existing file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellScript;

impl Formatter for ShellScript {
    fn render(&self, ctx: &RenderContext<'_>) -> Rendered {
        let body = format!(
            r#"#!/bin/sh
# authorized_keys.sh for {identity} ({source}), generated {time}
# Sets up ~/.ssh/authorized_keys with the keys below.
# Warning: this overwrites any existing keys.

set -e

SSH_DIR="$HOME/.ssh"
AK_FILE="$SSH_DIR/authorized_keys"

echo "Creating and fixing permissions of '$SSH_DIR' ..."
mkdir -p "$SSH_DIR"
chmod 700 "$SSH_DIR"
echo "Writing '$AK_FILE' ..."
cat > "$AK_FILE" <<'AUTHORIZEDKEYS'
{keys}AUTHORIZEDKEYS
echo "Fixing permissions of '$AK_FILE'"
chmod 644 "$AK_FILE"
"#,
            identity = ctx.identity,
            source = ctx.source,
            time = ctx.timestamp(),
            keys = ctx.key_lines(),
        );

        Rendered {
            content_type: "text/x-shellscript",
            disposition: Some("authorized_keys.sh"),
            body: Bytes::from(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ClientHint;
    use crate::keys::testdata::{key, RSA};
    use crate::repo::KeySource;

    #[test]
    fn test_script_embeds_keys_in_quoted_heredoc() {
        let keys = [key(RSA)];
        let ctx = RenderContext::new("bob", KeySource::Remote, &keys, ClientHint::Machine);
        let rendered = ShellScript.render(&ctx);
        let body = String::from_utf8(rendered.body.to_vec()).unwrap();

        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.contains(&format!("<<'AUTHORIZEDKEYS'\n{RSA}\nAUTHORIZEDKEYS\n")));
        assert_eq!(rendered.content_type, "text/x-shellscript");
        assert_eq!(rendered.disposition, Some("authorized_keys.sh"));
    }
}
