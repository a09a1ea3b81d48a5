use std::collections::HashMap;

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Parse an `application/x-www-form-urlencoded` body.
///
/// Handles URL decoding (including `+` as space) and returns a HashMap of
/// field values. Repeated fields keep only the last value.
///
/// # Example
/// ```
/// let fields = social::core::form::parse_form(b"title=Hi+there&content=a%26b");
/// assert_eq!(fields.get("title"), Some(&"Hi there".to_string()));
/// assert_eq!(fields.get("content"), Some(&"a&b".to_string()));
/// ```
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let body = String::from_utf8_lossy(body);

    for pair in body.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => {
                fields.insert(decode(key), decode(value));
            }
            None => {
                fields.insert(decode(pair), String::new());
            }
        }
    }

    fields
}

/// Get a field, or an empty string when absent.
pub fn get_string(fields: &HashMap<String, String>, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

/// Find a cookie value in a `Cookie` request header.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Per-field messages collected while validating a submitted form.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<(&'static str, String)>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|(f, _)| *f == field)
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(f, _)| *f == field)
            .map(|(_, message)| message.as_str())
    }
}
