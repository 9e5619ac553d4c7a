use serde::{Deserialize, Serialize};

pub mod token_files;

pub use token_files::{
    TokenFileEntry, TokenFileError, discover_token_files, normalize_token_files, resolve_path,
    validate_token_files,
};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Directory used to resolve relative token paths and to discover token files.
    pub auth_dir: Option<String>,
    /// Explicit credential locations, in rotation order.
    pub token_files: Vec<TokenFileEntry>,
    /// Extra substrings that mark an upstream "malformed request" rejection.
    pub malformed_markers: Vec<String>,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<String>,
    pub auth_dir: Option<String>,
    pub token_files: Option<Vec<TokenFileEntry>>,
    pub malformed_markers: Option<Vec<String>>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.auth_dir.is_some() {
            self.auth_dir = other.auth_dir;
        }
        if other.token_files.is_some() {
            self.token_files = other.token_files;
        }
        if other.malformed_markers.is_some() {
            self.malformed_markers = other.malformed_markers;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let host = self.host.unwrap_or_else(|| "127.0.0.1".to_string());
        if host.trim().is_empty() {
            return Err(GlobalConfigError::MissingField("host"));
        }
        Ok(GlobalConfig {
            host,
            port: self.port.unwrap_or(8787),
            proxy: self.proxy.filter(|value| !value.trim().is_empty()),
            auth_dir: self.auth_dir.filter(|value| !value.trim().is_empty()),
            token_files: self.token_files.unwrap_or_default(),
            malformed_markers: self.malformed_markers.unwrap_or_default(),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            proxy: value.proxy,
            auth_dir: value.auth_dir,
            token_files: Some(value.token_files),
            malformed_markers: Some(value.malformed_markers),
        }
    }
}
