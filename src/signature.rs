//! Public identifier rendering and parsing.
//!
//! A [`SignatureTemplate`] is a string with named placeholders, for example
//! the default `{source}/{size}/{method}/{secret}{extension}`. The same
//! parsed template produces both directions:
//!
//! - [`render`](SignatureTemplate::render) substitutes descriptor fields.
//! - [`pattern`](SignatureTemplate::pattern) is the anchored regex with one
//!   named group per placeholder, and [`capture`](SignatureTemplate::capture)
//!   uses it to split an inbound identifier back into raw field strings.
//!
//! Because the regex is generated from the template, the two cannot drift
//! apart. Captured strings are not validated here; they go through
//! [`ThumbnailDescriptor::new`](crate::descriptor::ThumbnailDescriptor::new)
//! like any other request.

use crate::descriptor::ThumbnailDescriptor;
use regex::Regex;
use thiserror::Error;

/// Default identifier layout.
pub const DEFAULT_TEMPLATE: &str = "{source}/{size}/{method}/{secret}{extension}";

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("placeholder '{{{0}}}' is required")]
    MissingPlaceholder(&'static str),
    #[error("placeholder '{{{0}}}' appears more than once")]
    DuplicatePlaceholder(&'static str),
    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Source,
    Size,
    Method,
    Secret,
    Extension,
}

impl Placeholder {
    const ALL: [Placeholder; 5] = [
        Placeholder::Source,
        Placeholder::Size,
        Placeholder::Method,
        Placeholder::Secret,
        Placeholder::Extension,
    ];

    fn name(self) -> &'static str {
        match self {
            Placeholder::Source => "source",
            Placeholder::Size => "size",
            Placeholder::Method => "method",
            Placeholder::Secret => "secret",
            Placeholder::Extension => "extension",
        }
    }

    /// Capture pattern for the field. Source may span directories; the
    /// extension is a dot followed by anything but another dot or slash.
    fn capture(self) -> &'static str {
        match self {
            Placeholder::Source => ".+",
            Placeholder::Size | Placeholder::Method | Placeholder::Secret => "[^/]+",
            Placeholder::Extension => r"\.[^/.]+",
        }
    }

    fn required(self) -> bool {
        !matches!(self, Placeholder::Secret)
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// Raw field strings of an identifier, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFields {
    pub source: String,
    pub size: String,
    pub method: String,
    /// `None` when the template carries no `{secret}`.
    pub secret: Option<String>,
    pub extension: String,
}

impl From<&ThumbnailDescriptor> for SignatureFields {
    fn from(d: &ThumbnailDescriptor) -> Self {
        Self {
            source: d.source.clone(),
            size: d.size_string(),
            method: d.method.to_string(),
            secret: Some(d.secret.clone()),
            extension: d.extension.clone(),
        }
    }
}

/// A parsed identifier template and its matching pattern.
#[derive(Debug, Clone)]
pub struct SignatureTemplate {
    segments: Vec<Segment>,
    pattern: Regex,
}

impl SignatureTemplate {
    pub fn parse(template: &str) -> Result<Self, SignatureError> {
        let segments = tokenize(template)?;

        for placeholder in Placeholder::ALL {
            let count = segments
                .iter()
                .filter(|s| matches!(s, Segment::Field(p) if *p == placeholder))
                .count();
            if count == 0 && placeholder.required() {
                return Err(SignatureError::MissingPlaceholder(placeholder.name()));
            }
            if count > 1 {
                return Err(SignatureError::DuplicatePlaceholder(placeholder.name()));
            }
        }

        let mut pattern = String::from("^");
        for segment in &segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Field(p) => {
                    pattern.push_str(&format!("(?P<{}>{})", p.name(), p.capture()));
                }
            }
        }
        pattern.push('$');

        Ok(Self {
            segments,
            pattern: Regex::new(&pattern)?,
        })
    }

    /// Whether identifiers rendered by this template carry a secret.
    pub fn has_secret(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Field(Placeholder::Secret)))
    }

    /// Substitute a descriptor's fields into the template.
    pub fn render(&self, descriptor: &ThumbnailDescriptor) -> String {
        self.render_fields(&SignatureFields::from(descriptor))
    }

    /// Substitute raw field strings. A missing secret renders as nothing.
    pub fn render_fields(&self, fields: &SignatureFields) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(p) => out.push_str(match p {
                    Placeholder::Source => &fields.source,
                    Placeholder::Size => &fields.size,
                    Placeholder::Method => &fields.method,
                    Placeholder::Secret => fields.secret.as_deref().unwrap_or(""),
                    Placeholder::Extension => &fields.extension,
                }),
            }
        }
        out
    }

    /// The anchored pattern matching rendered identifiers.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Split an identifier into its fields, `None` when it does not match.
    pub fn capture(&self, identifier: &str) -> Option<SignatureFields> {
        let caps = self.pattern.captures(identifier)?;
        let field = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        Some(SignatureFields {
            source: field("source")?,
            size: field("size")?,
            method: field("method")?,
            secret: field("secret"),
            extension: field("extension")?,
        })
    }
}

fn tokenize(template: &str) -> Result<Vec<Segment>, SignatureError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find(['{', '}']) {
        if rest.as_bytes()[pos] == b'}' {
            return Err(SignatureError::UnbalancedBrace(offset + pos));
        }
        literal.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let close = after
            .find('}')
            .ok_or(SignatureError::UnbalancedBrace(offset + pos))?;
        let name = &after[..close];
        let placeholder = Placeholder::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| SignatureError::UnknownPlaceholder(name.to_string()))?;

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Field(placeholder));

        let consumed = pos + 1 + close + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn default_template() -> SignatureTemplate {
        SignatureTemplate::parse(DEFAULT_TEMPLATE).unwrap()
    }

    fn descriptor(source: &str) -> ThumbnailDescriptor {
        ThumbnailDescriptor::new(source, "200x", "crop", ".jpg", &Settings::with_secret_key("k"))
            .unwrap()
    }

    // =========================================================================
    // Template parsing
    // =========================================================================

    #[test]
    fn default_template_parses() {
        let t = default_template();
        assert!(t.has_secret());
        assert_eq!(
            t.pattern().as_str(),
            r"^(?P<source>.+)/(?P<size>[^/]+)/(?P<method>[^/]+)/(?P<secret>[^/]+)(?P<extension>\.[^/.]+)$"
        );
    }

    #[test]
    fn template_without_secret_is_allowed() {
        let t = SignatureTemplate::parse("{source}__{size}__{method}{extension}").unwrap();
        assert!(!t.has_secret());
    }

    #[test]
    fn template_errors() {
        assert!(matches!(
            SignatureTemplate::parse("{source}/{size}/{colour}{extension}"),
            Err(SignatureError::UnknownPlaceholder(name)) if name == "colour"
        ));
        assert!(matches!(
            SignatureTemplate::parse("{source}/{size}{extension}"),
            Err(SignatureError::MissingPlaceholder("method"))
        ));
        assert!(matches!(
            SignatureTemplate::parse("{source}/{size}/{method}/{size}{extension}"),
            Err(SignatureError::DuplicatePlaceholder("size"))
        ));
        assert!(matches!(
            SignatureTemplate::parse("{source/{size}/{method}{extension}"),
            Err(SignatureError::UnknownPlaceholder(_))
        ));
        assert!(matches!(
            SignatureTemplate::parse("{source}/{size}/{method}{extension"),
            Err(SignatureError::UnbalancedBrace(_))
        ));
        assert!(matches!(
            SignatureTemplate::parse("}{source}/{size}/{method}{extension}"),
            Err(SignatureError::UnbalancedBrace(0))
        ));
    }

    #[test]
    fn literal_regex_characters_are_escaped() {
        let t = SignatureTemplate::parse("t+{source}(x){size}.{method}{extension}").unwrap();
        let f = t.capture("t+a/b.png(x)10x10.crop.jpg").unwrap();
        assert_eq!(f.source, "a/b.png");
        assert_eq!(f.size, "10x10");
        assert_eq!(f.method, "crop");
        assert!(t.capture("tta/b.png(x)10x10.crop.jpg").is_none());
    }

    // =========================================================================
    // Render and capture
    // =========================================================================

    #[test]
    fn render_default_template() {
        let d = descriptor("animals/kitten.jpg");
        let id = default_template().render(&d);
        assert_eq!(id, format!("animals/kitten.jpg/200x0/crop/{}.jpg", d.secret));
    }

    #[test]
    fn capture_inverts_render() {
        let t = default_template();
        let d = descriptor("deep/ly/nested/kitten.png");
        let fields = t.capture(&t.render(&d)).unwrap();
        assert_eq!(fields, SignatureFields::from(&d));
    }

    #[test]
    fn capture_alternate_template() {
        let t = SignatureTemplate::parse("{source}__{size}__{method}{extension}").unwrap();
        let fields = t.capture("photos/a.jpg__100x50__smart.webp").unwrap();
        assert_eq!(fields.source, "photos/a.jpg");
        assert_eq!(fields.size, "100x50");
        assert_eq!(fields.method, "smart");
        assert_eq!(fields.secret, None);
        assert_eq!(fields.extension, ".webp");
    }

    #[test]
    fn capture_leaves_validation_to_the_descriptor() {
        let fields = default_template()
            .capture("a.jpg/huge/derp/abc.jpg")
            .unwrap();
        assert_eq!(fields.size, "huge");
        assert_eq!(fields.method, "derp");
    }

    #[test]
    fn non_matching_identifiers() {
        let t = default_template();
        assert!(t.capture("").is_none());
        assert!(t.capture("a.jpg/200x200/crop").is_none());
        assert!(t.capture("a.jpg/200x200/crop/secret").is_none());
    }
}
