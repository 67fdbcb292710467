use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use thiserror::Error;

/// Invalid user configuration.
///
/// Carries a message naming the offending field or value. Callers surface it
/// verbatim as the failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigError(String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Label selector for backend pods
pub type Selector = BTreeMap<String, String>;

/// Annotations applied to the managed Service
pub type Annotations = BTreeMap<String, String>;

/// Lowest valid TCP port
pub const MIN_PORT: i64 = 1;
/// Highest valid TCP port
pub const MAX_PORT: i64 = 65535;

/// Maximum length of a qualified annotation key, prefix included
const MAX_KEY_LENGTH: usize = 253;
/// Maximum length of the name part of a qualified key
const MAX_NAME_LENGTH: usize = 63;

// DNS-1123 subdomain: dot-separated lowercase labels, alphanumeric at both ends
static DNS1123_SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});

static QUALIFIED_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid regex")
});

/// Validates that a port lies in 1..=65535.
///
/// `name` is the configuration field, used in the error message.
pub fn validate_port(name: &str, value: i64) -> ConfigResult<i32> {
    if !(MIN_PORT..=MAX_PORT).contains(&value) {
        return Err(ConfigError::new(format!(
            "{name} must be between {MIN_PORT} and {MAX_PORT}"
        )));
    }
    // Range check above guarantees the value fits
    Ok(value as i32)
}

/// Parses a textual port value and validates its range.
pub fn parse_port(name: &str, raw: &str) -> ConfigResult<i32> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::new(format!("{name} must be an integer")))?;
    validate_port(name, value)
}

/// Parses a selector into a label map.
///
/// Accepted formats:
/// - comma-separated pairs: `app=myapp,tier=backend`
/// - JSON object: `{"app": "myapp", "tier": "backend"}`
///
/// Duplicate keys in the pair form keep the last value.
pub fn parse_selector(raw: &str) -> ConfigResult<Selector> {
    let selector = raw.trim();
    if selector.is_empty() {
        return Err(ConfigError::new("selector must not be empty"));
    }

    let result = if selector.starts_with('{') {
        parse_selector_json(selector)?
    } else {
        parse_selector_pairs(selector)?
    };

    if result.is_empty() {
        return Err(ConfigError::new("selector must not be empty"));
    }
    Ok(result)
}

fn parse_selector_json(selector: &str) -> ConfigResult<Selector> {
    let parsed: serde_json::Value = serde_json::from_str(selector)
        .map_err(|e| ConfigError::new(format!("selector JSON is invalid: {e}")))?;

    let serde_json::Value::Object(object) = parsed else {
        return Err(ConfigError::new(
            "selector JSON must be an object of string:string",
        ));
    };

    let mut result = Selector::new();
    for (key, value) in object {
        let serde_json::Value::String(value) = value else {
            return Err(ConfigError::new(
                "selector JSON must be an object of string:string",
            ));
        };
        if key.is_empty() || value.is_empty() {
            return Err(ConfigError::new("selector contains an empty key or value"));
        }
        result.insert(key, value);
    }
    Ok(result)
}

fn parse_selector_pairs(selector: &str) -> ConfigResult<Selector> {
    let mut result = Selector::new();
    for part in selector.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            return Err(ConfigError::new(
                "selector must be in 'key=value' format (comma-separated) or JSON object",
            ));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(ConfigError::new("selector contains an empty key or value"));
        }
        result.insert(key.to_string(), value.to_string());
    }
    Ok(result)
}

/// Checks an annotation key against the Kubernetes qualified-name grammar.
///
/// Rules:
/// - Optional `prefix/` where prefix is a DNS-1123 subdomain
/// - Name: 1-63 chars, alphanumeric at both ends, `-`, `_`, `.` inside
/// - Whole key at most 253 characters, at most one `/`
pub fn is_valid_annotation_key(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if name.contains('/') {
                return false;
            }
            if prefix.is_empty() || !DNS1123_SUBDOMAIN_REGEX.is_match(prefix) {
                return false;
            }
            name
        }
        None => key,
    };

    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && QUALIFIED_NAME_REGEX.is_match(name)
}

/// Parses `key=value` annotation pairs.
///
/// Annotations are optional: `None`, blank input or a lone run of commas
/// yields an empty map. Values may be empty (`key=`).
pub fn parse_annotations(raw: Option<&str>) -> ConfigResult<Annotations> {
    let mut result = Annotations::new();
    let Some(raw) = raw else {
        return Ok(result);
    };

    let text = raw.trim().trim_end_matches(',');
    for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ConfigError::new(
                "loadbalancer-annotations must be in 'key=value' format (comma-separated)",
            ));
        };
        let (key, value) = (key.trim(), value.trim());
        if !is_valid_annotation_key(key) {
            return Err(ConfigError::new(format!("invalid annotation key: '{key}'")));
        }
        result.insert(key.to_string(), value.to_string());
    }
    Ok(result)
}

/// Parses the optional fixed IP.
///
/// Returns the canonical textual form of the address, or `None` when unset.
pub fn parse_fixed_ip(raw: Option<&str>) -> ConfigResult<Option<String>> {
    let text = raw.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Ok(None);
    }

    text.parse::<IpAddr>()
        .map(|ip| Some(ip.to_string()))
        .map_err(|_| ConfigError::new("fixed-ip must be a valid IPv4 or IPv6 address"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_pairs() {
        let selector = parse_selector("app=myapp,tier=backend").unwrap();
        assert_eq!(selector, map(&[("app", "myapp"), ("tier", "backend")]));
    }

    #[test]
    fn test_selector_pairs_are_trimmed() {
        let selector = parse_selector("  app = myapp ,  tier=backend  ").unwrap();
        assert_eq!(selector, map(&[("app", "myapp"), ("tier", "backend")]));
    }

    #[test]
    fn test_selector_skips_empty_segments() {
        let selector = parse_selector("app=myapp,,tier=backend,").unwrap();
        assert_eq!(selector.len(), 2);
    }

    #[test]
    fn test_selector_duplicate_key_keeps_last() {
        let selector = parse_selector("app=first,app=second").unwrap();
        assert_eq!(selector, map(&[("app", "second")]));
    }

    #[test]
    fn test_selector_value_may_contain_equals() {
        let selector = parse_selector("app.kubernetes.io/name=a=b").unwrap();
        assert_eq!(selector, map(&[("app.kubernetes.io/name", "a=b")]));
    }

    #[test]
    fn test_selector_empty_inputs_rejected() {
        for raw in ["", "   ", "{}", ",", " , , "] {
            let err = parse_selector(raw).unwrap_err();
            assert_eq!(err.message(), "selector must not be empty", "input {raw:?}");
        }
    }

    #[test]
    fn test_selector_json() {
        let selector = parse_selector(r#"{"a":"b","c":"d"}"#).unwrap();
        assert_eq!(selector, map(&[("a", "b"), ("c", "d")]));
    }

    #[test]
    fn test_selector_invalid_json() {
        let err = parse_selector(r#"{"a": "b""#).unwrap_err();
        assert!(err.message().starts_with("selector JSON is invalid"));
    }

    #[test]
    fn test_selector_json_non_string_value() {
        let err = parse_selector(r#"{"replicas": 3}"#).unwrap_err();
        assert_eq!(
            err.message(),
            "selector JSON must be an object of string:string"
        );
    }

    #[test]
    fn test_selector_json_empty_value() {
        let err = parse_selector(r#"{"app": ""}"#).unwrap_err();
        assert_eq!(err.message(), "selector contains an empty key or value");
    }

    #[test]
    fn test_selector_missing_equals() {
        let err = parse_selector("not-a-kv").unwrap_err();
        assert!(err.message().contains("'key=value' format"));
    }

    #[test]
    fn test_selector_empty_key_or_value() {
        assert!(parse_selector("=myapp").is_err());
        assert!(parse_selector("app=").is_err());
        assert!(parse_selector("app= ").is_err());
    }

    #[test]
    fn test_annotations_none_and_blank() {
        assert!(parse_annotations(None).unwrap().is_empty());
        assert!(parse_annotations(Some("")).unwrap().is_empty());
        assert!(parse_annotations(Some("   ")).unwrap().is_empty());
        assert!(parse_annotations(Some(",,")).unwrap().is_empty());
    }

    #[test]
    fn test_annotations_single_qualified_key() {
        let annotations =
            parse_annotations(Some("service.beta.kubernetes.io/aws-load-balancer-type=nlb"))
                .unwrap();
        assert_eq!(
            annotations,
            map(&[("service.beta.kubernetes.io/aws-load-balancer-type", "nlb")])
        );
    }

    #[test]
    fn test_annotations_empty_value_and_trailing_comma() {
        let annotations = parse_annotations(Some("a=1, metallb.universe.tf/allow-shared-ip=,"))
            .unwrap();
        assert_eq!(
            annotations,
            map(&[("a", "1"), ("metallb.universe.tf/allow-shared-ip", "")])
        );
    }

    #[test]
    fn test_annotations_key_with_space_rejected() {
        let err = parse_annotations(Some("not a key=value")).unwrap_err();
        assert_eq!(err.message(), "invalid annotation key: 'not a key'");
    }

    #[test]
    fn test_annotations_missing_equals() {
        let err = parse_annotations(Some("a=1,novalue")).unwrap_err();
        assert!(err.message().starts_with("loadbalancer-annotations must be"));
    }

    #[test]
    fn test_annotation_key_grammar() {
        assert!(is_valid_annotation_key("simple"));
        assert!(is_valid_annotation_key("with_underscore.and-dash"));
        assert!(is_valid_annotation_key("example.com/name"));
        assert!(is_valid_annotation_key("a/B"));

        assert!(!is_valid_annotation_key(""));
        assert!(!is_valid_annotation_key("/name"));
        assert!(!is_valid_annotation_key("example.com/"));
        assert!(!is_valid_annotation_key("a/b/c"));
        assert!(!is_valid_annotation_key("Example.com/name")); // uppercase prefix
        assert!(!is_valid_annotation_key("-name"));
        assert!(!is_valid_annotation_key("name-"));
        assert!(!is_valid_annotation_key("bad..prefix./name"));
        assert!(!is_valid_annotation_key("has space"));
    }

    #[test]
    fn test_annotation_key_lengths() {
        assert!(is_valid_annotation_key(&"a".repeat(63)));
        assert!(!is_valid_annotation_key(&"a".repeat(64)));

        // 189-char prefix + '/' + 63-char name = 253
        let prefix = format!("{}.{}.{}", "p".repeat(63), "p".repeat(63), "p".repeat(61));
        let key = format!("{}/{}", prefix, "n".repeat(63));
        assert_eq!(key.len(), 253);
        assert!(is_valid_annotation_key(&key));

        let too_long = format!("{}p/{}", prefix, "n".repeat(63));
        assert_eq!(too_long.len(), 254);
        assert!(!is_valid_annotation_key(&too_long));
    }

    #[test]
    fn test_fixed_ip() {
        assert_eq!(parse_fixed_ip(Some("10.0.0.1")).unwrap().as_deref(), Some("10.0.0.1"));
        assert_eq!(parse_fixed_ip(Some(" 10.0.0.1 ")).unwrap().as_deref(), Some("10.0.0.1"));
        assert_eq!(parse_fixed_ip(Some("")).unwrap(), None);
        assert_eq!(parse_fixed_ip(Some("  ")).unwrap(), None);
        assert_eq!(parse_fixed_ip(None).unwrap(), None);
    }

    #[test]
    fn test_fixed_ip_ipv6_is_normalized() {
        assert_eq!(
            parse_fixed_ip(Some("2001:0db8:0000:0000:0000:0000:0000:0001"))
                .unwrap()
                .as_deref(),
            Some("2001:db8::1")
        );
        assert_eq!(parse_fixed_ip(Some("::1")).unwrap().as_deref(), Some("::1"));
    }

    #[test]
    fn test_fixed_ip_invalid() {
        for raw in ["not-an-ip", "256.1.1.1", "10.0.0", "gggg::1"] {
            let err = parse_fixed_ip(Some(raw)).unwrap_err();
            assert_eq!(err.message(), "fixed-ip must be a valid IPv4 or IPv6 address");
        }
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port("target-port", 8080).unwrap(), 8080);
        assert_eq!(validate_port("lb-port", 1).unwrap(), 1);
        assert_eq!(validate_port("lb-port", 65535).unwrap(), 65535);

        let err = validate_port("target-port", 0).unwrap_err();
        assert_eq!(err.message(), "target-port must be between 1 and 65535");
        let err = validate_port("lb-port", 65536).unwrap_err();
        assert_eq!(err.message(), "lb-port must be between 1 and 65535");
        assert!(validate_port("lb-port", -80).is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("lb-port", " 80 ").unwrap(), 80);

        let err = parse_port("lb-port", "eighty").unwrap_err();
        assert_eq!(err.message(), "lb-port must be an integer");
        let err = parse_port("target-port", "70000").unwrap_err();
        assert_eq!(err.message(), "target-port must be between 1 and 65535");
    }
}
