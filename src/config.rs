// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Zonetune reads an optional user-scoped configuration file at
//! `$XDG_CONFIG_HOME/zonetune/config.toml`. The only load-bearing entry is
//! the API token; a default domain can be stored as a convenience. The
//! `CF_API_TOKEN` environment variable overrides the file so CI and batch
//! invocations never need one on disk.
//!
//! The token is read into process memory only; this module never writes it
//! anywhere.

use serde::Deserialize;
use std::{
    env,
    path::PathBuf,
    str::FromStr,
};

/// Environment variable that overrides the configured token.
pub const TOKEN_ENV_VAR: &str = "CF_API_TOKEN";

/// User-scoped configuration file layout.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Cloudflare API token, key `CF_API_TOKEN`.
    #[serde(rename = "CF_API_TOKEN")]
    pub cf_api_token: Option<String>,

    /// Default zone domain to offer in interactive mode.
    pub domain: Option<String>,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error; it yields an empty configuration so
    /// interactive mode can fall back to prompting.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoConfigDir`] if no config directory exists.
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] on malformed TOML.
    pub fn load() -> Result<Self> {
        let path = default_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Read { source, path })?
            .parse()
    }

    /// Resolve the API token: environment first, then the config file.
    pub fn api_token(&self) -> Option<String> {
        env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|token| !token.is_empty())
            .or_else(|| self.cf_api_token.clone())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(toml::de::from_str(data)?)
    }
}

/// Default absolute path to the configuration file.
///
/// Does not check that the path actually exists.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("zonetune").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No way to determine the user's config directory.
    #[error("cannot determine absolute path to user's config directory")]
    NoConfigDir,

    /// Configuration file exists but cannot be read.
    #[error("failed to read config file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn deserialize_config() {
        let result: Config = indoc! {r#"
            CF_API_TOKEN = "secret-token"
            domain = "acme.test"
        "#}
        .parse()
        .unwrap();

        let expect = Config {
            cf_api_token: Some("secret-token".to_string()),
            domain: Some("acme.test".to_string()),
        };

        assert_eq!(result, expect);
    }

    #[test]
    fn deserialize_empty_config() {
        let result: Config = "".parse().unwrap();

        assert_eq!(result, Config::default());
    }

    #[sealed_test(env = [("CF_API_TOKEN", "from-env")])]
    fn environment_overrides_file_token() {
        let config = Config {
            cf_api_token: Some("from-file".to_string()),
            domain: None,
        };

        assert_eq!(config.api_token(), Some("from-env".to_string()));
    }

    #[sealed_test]
    fn file_token_used_without_environment() {
        let config = Config {
            cf_api_token: Some("from-file".to_string()),
            domain: None,
        };

        assert_eq!(config.api_token(), Some("from-file".to_string()));
    }

    #[sealed_test]
    fn missing_token_everywhere_yields_none() {
        assert_eq!(Config::default().api_token(), None);
    }
}
