//! Scraping login artifacts out of responses.
//!
//! Login pages hand state back to the browser in hidden form fields, for
//! example CAS's `execution` and `_eventId`, or the `RelayState` and
//! `SAMLResponse` an identity provider auto-posts to a service provider. Flows
//! only ever ask for a field by name through [`FieldExtractor`], so the
//! matching strategy can change without touching them.
//!
//! [`RegexExtractor`] compiles its patterns once, and the same instance is
//! shared by every simulated user.

use regex::Regex;
use std::borrow::Cow;
use url::Url;

/// Extracts values from HTML pages returned by the servers under test.
pub trait FieldExtractor: Send + Sync {
    /// Returns the HTML-unescaped `value` of the first `<input>` named `name`,
    /// or `None` if there is no such input or it has no value.
    fn hidden_field(&self, html: &str, name: &str) -> Option<String>;

    /// Returns the HTML-unescaped `action` of the first `<form>`, or `None`.
    fn form_action(&self, html: &str) -> Option<String>;
}

/// A [`FieldExtractor`] matching tags and attributes with regular expressions.
///
/// Attribute order and quoting style don't matter, and quoted values may
/// contain `>`:
///
/// ```rust
/// use cas_loadtest::extract::{FieldExtractor, RegexExtractor};
///
/// let extractor = RegexExtractor::new().unwrap();
/// let html = r#"<input value='e1s1' type="hidden" name="execution"/>"#;
/// assert_eq!(extractor.hidden_field(html, "execution"), Some("e1s1".to_string()));
/// ```
#[derive(Clone, Debug)]
pub struct RegexExtractor {
    input: Regex,
    form: Regex,
    attribute: Regex,
}

impl RegexExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(RegexExtractor {
            input: Regex::new(r#"(?i)<input\b(?:[^>"']|"[^"]*"|'[^']*')*>"#)?,
            form: Regex::new(r#"(?i)<form\b(?:[^>"']|"[^"]*"|'[^']*')*>"#)?,
            attribute: Regex::new(
                r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
            )?,
        })
    }

    /// Returns the raw (still escaped) value of attribute `name` in `tag`.
    fn attribute<'t>(&self, tag: &'t str, name: &str) -> Option<&'t str> {
        self.attribute.captures_iter(tag).find_map(|captures| {
            let key = captures.get(1)?.as_str();
            if key.eq_ignore_ascii_case(name) {
                captures
                    .get(2)
                    .or_else(|| captures.get(3))
                    .map(|value| value.as_str())
            } else {
                None
            }
        })
    }
}

impl FieldExtractor for RegexExtractor {
    fn hidden_field(&self, html: &str, name: &str) -> Option<String> {
        for tag in self.input.find_iter(html) {
            let tag = tag.as_str();
            if self.attribute(tag, "name").map(unescape_html).as_deref() != Some(name) {
                continue;
            }
            let value = self.attribute(tag, "value");
            trace!("input {} has value {:?}", name, value);
            return value.map(|value| unescape_html(value).into_owned());
        }
        trace!("no input named {}", name);
        None
    }

    fn form_action(&self, html: &str) -> Option<String> {
        let tag = self.form.find(html)?;
        self.attribute(tag.as_str(), "action")
            .map(|action| unescape_html(action).into_owned())
    }
}

/// Decode HTML character references.
///
/// Handles the named references a server escapes attribute values with
/// (`&amp;`, `&lt;`, `&gt;`, `&quot;`, `&apos;`) and all decimal (`&#58;`) and
/// hexadecimal (`&#x3a;`) references. Anything else is left as is.
///
/// # Example
/// ```rust
/// use cas_loadtest::extract::unescape_html;
///
/// assert_eq!(unescape_html("ss&#x3a;mem&#x3a;abc"), "ss:mem:abc");
/// assert_eq!(unescape_html("a &amp;&amp; b"), "a && b");
/// ```
pub fn unescape_html(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }

    let mut unescaped = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        unescaped.push_str(&rest[..start]);
        rest = &rest[start..];
        // The longest reference decoded is `&#x10FFFF;`.
        let decoded = rest
            .char_indices()
            .take(11)
            .find(|(_, c)| *c == ';')
            .and_then(|(end, _)| decode_reference(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                unescaped.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                unescaped.push('&');
                rest = &rest[1..];
            }
        }
    }
    unescaped.push_str(rest);

    Cow::Owned(unescaped)
}

// Decode the text between `&` and `;`.
fn decode_reference(reference: &str) -> Option<char> {
    match reference {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let number = reference.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Returns the decoded value of query parameter `name` in a redirect target.
///
/// `location` may be relative, it is resolved against `base`, the URL of the
/// request that was redirected.
///
/// # Example
/// ```rust
/// use cas_loadtest::extract::query_parameter;
/// use url::Url;
///
/// let base = Url::parse("https://idp.example.org/cas/login").unwrap();
/// let location = "/cas/serviceValidate?service=https%3A%2F%2Fapp&ticket=ST-1";
/// assert_eq!(query_parameter(&base, location, "ticket"), Some("ST-1".to_string()));
/// ```
pub fn query_parameter(base: &Url, location: &str, name: &str) -> Option<String> {
    base.join(location)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
