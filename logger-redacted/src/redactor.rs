use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const REDACTED: &str = "[REDACTED]";

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"\b(?:\+1[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref IP_REGEX: Regex = Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").unwrap();
}

/// Which PII patterns are scrubbed from free text.
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_ssn: bool,
    pub redact_ip_addresses: bool,
    /// Replace matches with a short stable hash so log lines stay correlatable.
    pub hash_for_correlation: bool,
    pub sensitive_keys: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            redact_phones: true,
            redact_ssn: true,
            redact_ip_addresses: true,
            hash_for_correlation: true,
            sensitive_keys: vec!["password".to_string()],
        }
    }
}

/// Scrubs user attributes before they reach a log line.
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new(RedactionConfig::default())
    }
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn with_sensitive_keys(keys: &[String]) -> Self {
        Self::new(RedactionConfig {
            sensitive_keys: keys.to_vec(),
            ..RedactionConfig::default()
        })
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        if self.config.redact_emails {
            result = self.replace(&EMAIL_REGEX, &result, "EMAIL", |m| {
                match m.split_once('@') {
                    Some((local, domain)) => format!(
                        "{}***@{}***",
                        local.chars().next().unwrap_or('*'),
                        domain.chars().next().unwrap_or('*')
                    ),
                    None => "***@***".to_string(),
                }
            });
        }
        if self.config.redact_ssn {
            result = self.replace(&SSN_REGEX, &result, "SSN", |_| "***-**-****".to_string());
        }
        if self.config.redact_phones {
            result = self.replace(&PHONE_REGEX, &result, "PHONE", |_| "(***) ***-****".to_string());
        }
        if self.config.redact_ip_addresses {
            result = self.replace(&IP_REGEX, &result, "IP", |m| {
                let parts: Vec<&str> = m.split('.').collect();
                match (parts.first(), parts.last()) {
                    (Some(first), Some(last)) if parts.len() == 4 => format!("{first}.***.***.{last}"),
                    _ => "***.***.***.***".to_string(),
                }
            });
        }
        result
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.config
            .sensitive_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Masks sensitive keys and scrubs PII from every string, recursively.
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.redact(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(self.redact_map(map)),
            other => other.clone(),
        }
    }

    /// Loggable copy of a process variable map.
    pub fn redact_variables(&self, variables: &Map<String, Value>) -> Value {
        Value::Object(self.redact_map(variables))
    }

    fn redact_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let redacted = if self.is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.redact_value(value)
                };
                (key.clone(), redacted)
            })
            .collect()
    }

    fn replace<F>(&self, pattern: &Regex, text: &str, label: &str, mask: F) -> String
    where
        F: Fn(&str) -> String,
    {
        pattern
            .replace_all(text, |caps: &regex::Captures| {
                let matched = caps.get(0).map_or("", |m| m.as_str());
                if self.config.hash_for_correlation {
                    format!("{label}[{}]", hash_value(matched))
                } else {
                    mask(matched)
                }
            })
            .into_owned()
    }
}

fn hash_value(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    // first 8 bytes keep the tag short
    general_purpose::STANDARD_NO_PAD.encode(digest.get(..8).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn masking() -> PiiRedactor {
        PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_email_redaction() {
        let redacted = masking().redact("User john.doe@example.com registered");
        assert!(redacted.contains("j***@e***"));
        assert!(!redacted.contains("john.doe"));
    }

    #[test]
    fn test_phone_and_ssn_redaction() {
        let redacted = masking().redact("Call (555) 123-4567, SSN 123-45-6789");
        assert!(redacted.contains("(***) ***-****"));
        assert!(redacted.contains("***-**-****"));
    }

    #[test]
    fn test_hashes_are_stable() {
        let redactor = PiiRedactor::default();
        let first = redactor.redact("alice@example.com");
        let second = redactor.redact("alice@example.com");
        assert!(first.starts_with("EMAIL["));
        assert_eq!(first, second);
        assert_ne!(first, redactor.redact("bob@example.com"));
    }

    #[test]
    fn test_redact_variables_masks_sensitive_keys() {
        let redactor = PiiRedactor::with_sensitive_keys(&["password".to_string()]);
        let vars = json!({
            "username": "alice",
            "Password": "hunter2",
            "profile": {"email": "alice@example.com", "password": "nested"},
            "approve": true
        });
        let Value::Object(map) = vars else { unreachable!() };

        let redacted = redactor.redact_variables(&map);
        assert_eq!(redacted["username"], json!("alice"));
        assert_eq!(redacted["Password"], json!(REDACTED));
        assert_eq!(redacted["profile"]["password"], json!(REDACTED));
        assert!(redacted["profile"]["email"].as_str().unwrap().starts_with("EMAIL["));
        assert_eq!(redacted["approve"], json!(true));
    }
}
