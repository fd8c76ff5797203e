use std::env;
use std::str::FromStr;

/// Retrieves an environment variable, falling back to a default when unset.
pub fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Retrieves and parses an environment variable, falling back to a default
/// when unset or unparseable.
pub fn var_parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
