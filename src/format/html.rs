use bytes::{Bytes, BytesMut};

use super::{Formatter, RenderContext, Rendered};

/// Human-readable page listing the keys, followed by an optional suffix
#[derive(Debug, Clone, Default)]
pub struct Html {
    suffix: Option<Bytes>,
}

impl Html {
    pub fn new(suffix: Option<Bytes>) -> Self {
        Self { suffix }
    }
}

impl Formatter for Html {
    fn render(&self, ctx: &RenderContext<'_>) -> Rendered {
        let identity = escape_html(ctx.identity);

        let mut rows = String::new();
        for key in ctx.keys {
            rows.push_str(&format!(
                "<li><code>{}</code><br><small>{}</small></li>\n",
                escape_html(key.as_str()),
                escape_html(&key.fingerprint())
            ));
        }
        if rows.is_empty() {
            rows.push_str("<li><em>No keys</em></li>\n");
        }

        let page = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>SSH keys for {identity}</title>
</head>
<body>
<h1>SSH keys for {identity}</h1>
<p>Source: {source}. Generated {time}.</p>
<ul>
{rows}</ul>
<p>
Download as <a href="/{identity}.authorized_keys">authorized_keys</a>
or as a <a href="/{identity}.sh">setup script</a>.
</p>
</body>
</html>
"#,
            source = ctx.source,
            time = ctx.timestamp(),
        );

        let mut body = BytesMut::from(page.as_bytes());
        if let Some(suffix) = &self.suffix {
            body.extend_from_slice(suffix);
        }

        Rendered {
            content_type: "text/html",
            disposition: None,
            body: body.freeze(),
        }
    }
}

/// Escape text for use in HTML content and attribute values
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
