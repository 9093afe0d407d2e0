//!
//! Typing of `key:value` header overrides.
//!
use crate::error::ClientError;
use crate::properties::{HeaderMap, NormalizedValue};

/// Parses a `key:value` header. The value is split at the first `:` and typed
/// as boolean, then integer, then float, falling back to the raw string.
pub fn parse_header(input: &str) -> Result<(String, NormalizedValue), ClientError> {
    let (key, value) = input
        .split_once(':')
        .ok_or_else(|| ClientError::InvalidHeader(input.to_owned()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ClientError::InvalidHeader(input.to_owned()));
    }
    Ok((key.to_owned(), type_value(value)))
}

pub fn parse_headers<'a, I>(inputs: I) -> Result<HeaderMap, ClientError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headers = HeaderMap::new();
    for input in inputs {
        let (key, value) = parse_header(input)?;
        headers.insert(key, value);
    }
    Ok(headers)
}

pub fn type_value(raw: &str) -> NormalizedValue {
    if raw.eq_ignore_ascii_case("true") {
        return NormalizedValue::Boolean(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return NormalizedValue::Boolean(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return NormalizedValue::Integer(i);
    }
    // `f64::from_str` also accepts "inf" and "NaN"; those stay strings.
    if raw.bytes().any(|b| b.is_ascii_digit()) {
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return NormalizedValue::Float(f);
            }
        }
    }
    NormalizedValue::String(raw.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typing_order() {
        assert_eq!(type_value("TRUE"), NormalizedValue::Boolean(true));
        assert_eq!(type_value("false"), NormalizedValue::Boolean(false));
        assert_eq!(type_value("42"), NormalizedValue::Integer(42));
        assert_eq!(type_value("-7"), NormalizedValue::Integer(-7));
        assert_eq!(type_value("3.5"), NormalizedValue::Float(3.5));
        assert_eq!(type_value("1e3"), NormalizedValue::Float(1000.0));
        assert_eq!(type_value("3,5"), NormalizedValue::from("3,5"));
        assert_eq!(type_value("inf"), NormalizedValue::from("inf"));
        assert_eq!(type_value("NaN"), NormalizedValue::from("NaN"));
        assert_eq!(type_value(""), NormalizedValue::from(""));
    }

    #[test]
    fn test_parse_header_splits_on_first_colon() -> Result<(), Box<dyn std::error::Error>> {
        let (key, value) = parse_header("x-url:http://example.com:8080")?;
        assert_eq!(key, "x-url");
        assert_eq!(value, NormalizedValue::from("http://example.com:8080"));
        Ok(())
    }

    #[test]
    fn test_parse_header_rejects_malformed() {
        assert!(matches!(
            parse_header("no-separator"),
            Err(ClientError::InvalidHeader(_))
        ));
        assert!(matches!(
            parse_header(" :value"),
            Err(ClientError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_parse_headers_last_wins() -> Result<(), Box<dyn std::error::Error>> {
        let headers = parse_headers(["x-retry:1", "x-retry:2", "x-flag:true"])?;
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-retry"), Some(&NormalizedValue::Integer(2)));
        assert_eq!(headers.get("x-flag"), Some(&NormalizedValue::Boolean(true)));
        Ok(())
    }
}
