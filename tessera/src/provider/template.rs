//! URL templates with `{token}` placeholders.

use std::convert::Infallible;
use std::fmt;

use super::types::{builtin_token, ProviderError};
use crate::tile::TileKey;

/// Caller-supplied token lookup, consulted before the built-in tokens.
pub trait TokenResolver: Send + Sync {
    /// Value for `token` when fetching `key`, or `None` to fall through.
    fn resolve(&self, token: &str, key: &TileKey) -> Option<String>;
}

impl<F> TokenResolver for F
where
    F: Fn(&str, &TileKey) -> Option<String> + Send + Sync,
{
    fn resolve(&self, token: &str, key: &TileKey) -> Option<String> {
        self(token, key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(String),
}

/// A parsed URL template.
///
/// # Example
///
/// ```
/// use tessera::provider::UrlTemplate;
/// use tessera::tile::TileKey;
///
/// let template = UrlTemplate::parse("https://x/{z}/{x}/{y}").unwrap();
/// assert_eq!(template.expand_tile(&TileKey::new(3, 5, 7, "osm")), "https://x/7/3/5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Fails for an empty template or a `{` without a closing `}`.
    pub fn parse(source: &str) -> Result<Self, ProviderError> {
        if source.trim().is_empty() {
            return Err(ProviderError::InvalidTemplate("empty template".to_string()));
        }

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                ProviderError::InvalidTemplate(format!("unclosed '{{' in {}", source))
            })?;
            segments.push(Segment::Token(after[..close].to_string()));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of all tokens, in order of appearance.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Token(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Expand tokens through a fallible lookup. `Ok(None)` keeps the token
    /// literally, braces included.
    pub fn try_expand<F, E>(&self, mut lookup: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<Option<String>, E>,
    {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(name) => match lookup(name)? {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        Ok(out)
    }

    /// Expand tokens through an infallible lookup.
    pub fn expand<F>(&self, mut lookup: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        match self.try_expand(|token| Ok::<_, Infallible>(lookup(token))) {
            Ok(url) => url,
            Err(never) => match never {},
        }
    }

    /// Expand only the built-in tile tokens (`z`, `zoom`, `x`, `y`, `-y`,
    /// `quadkey`).
    pub fn expand_tile(&self, key: &TileKey) -> String {
        self.expand(|token| builtin_token(token, key, &[]))
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_substitution() {
        let template = UrlTemplate::parse("https://x/{z}/{x}/{y}").unwrap();
        assert_eq!(
            template.expand_tile(&TileKey::new(3, 5, 7, "l")),
            "https://x/7/3/5"
        );
    }

    #[test]
    fn test_zoom_alias_and_quadkey() {
        let template = UrlTemplate::parse("https://t/{quadkey}.jpeg?z={zoom}").unwrap();
        assert_eq!(
            template.expand_tile(&TileKey::new(1, 1, 1, "l")),
            "https://t/3.jpeg?z=1"
        );
    }

    #[test]
    fn test_resolver_consulted_first() {
        let template = UrlTemplate::parse("https://x/{z}/{style}").unwrap();
        let key = TileKey::new(0, 0, 4, "l");
        let resolver = |token: &str, _key: &TileKey| match token {
            "z" => Some("override".to_string()),
            "style" => Some("dark".to_string()),
            _ => None,
        };
        let url = template.expand(|t| resolver.resolve(t, &key));
        assert_eq!(url, "https://x/override/dark");
    }

    #[test]
    fn test_unknown_token_kept_literally() {
        let template = UrlTemplate::parse("https://x/{unknown}/{z}").unwrap();
        assert_eq!(
            template.expand_tile(&TileKey::new(0, 0, 2, "l")),
            "https://x/{unknown}/2"
        );
    }

    #[test]
    fn test_tokens_listed_in_order() {
        let template = UrlTemplate::parse("{s}/{z}/{x}/{y}?k={apikey}").unwrap();
        let tokens: Vec<&str> = template.tokens().collect();
        assert_eq!(tokens, vec!["s", "z", "x", "y", "apikey"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            UrlTemplate::parse(""),
            Err(ProviderError::InvalidTemplate(_))
        ));
        assert!(matches!(
            UrlTemplate::parse("https://x/{z"),
            Err(ProviderError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_try_expand_propagates_error() {
        let template = UrlTemplate::parse("https://x/{secret}").unwrap();
        let result: Result<String, &str> = template.try_expand(|_| Err("nope"));
        assert_eq!(result, Err("nope"));
    }
}
