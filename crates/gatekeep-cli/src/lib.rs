use anyhow::{anyhow, Result};
use gatekeep_core::ConsumerContext;
use serde_json::Value;

/// Parse a `key=value` context entry. Values that parse as JSON are kept as JSON,
/// anything else is taken as a plain string.
pub fn parse_context_entry(entry: &str) -> Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Context entry must be key=value, got {:?}", entry))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Context key must not be empty in {:?}", entry));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Build a consumer context from repeated `key=value` entries.
pub fn build_context(entries: &[String]) -> Result<ConsumerContext> {
    entries
        .iter()
        .map(|entry| parse_context_entry(entry))
        .collect()
}

/// Initialize tracing for CLI binaries. Set LOG_FORMAT=json for JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_context_entry_json_values() {
        assert_eq!(
            parse_context_entry("enableQueueLimit=true").unwrap(),
            ("enableQueueLimit".to_string(), json!(true))
        );
        assert_eq!(
            parse_context_entry("attempt=3").unwrap(),
            ("attempt".to_string(), json!(3))
        );
    }

    #[test]
    fn parse_context_entry_plain_strings() {
        assert_eq!(
            parse_context_entry("releaseEntityId=exec-42").unwrap(),
            ("releaseEntityId".to_string(), json!("exec-42"))
        );
        assert_eq!(
            parse_context_entry("note=a=b").unwrap(),
            ("note".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn parse_context_entry_invalid() {
        assert!(parse_context_entry("no-separator").is_err());
        assert!(parse_context_entry("=value").is_err());
    }

    #[test]
    fn build_context_later_entries_win() {
        let context = build_context(&["k=1".to_string(), "k=2".to_string()]).unwrap();
        assert_eq!(context.get("k"), Some(&json!(2)));
    }
}
