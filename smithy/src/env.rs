use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source of environment variables. The process environment in production, a
/// plain map in tests.
pub trait EnvLoader: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from `std::env`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvLoader for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLoader for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvLoader for HashMap<&'static str, &'static str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| v.to_string())
    }
}

/// Value of `key`, treating empty strings as unset.
pub(crate) fn lookup(env: &dyn EnvLoader, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty())
}

/// Parses `key` when present; `Ok(None)` when unset.
pub(crate) fn parse_opt<T>(env: &dyn EnvLoader, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(env, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Parses `key`, falling back to `default` when unset.
pub(crate) fn parse_or<T>(env: &dyn EnvLoader, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_opt(env, key)?.unwrap_or(default))
}
