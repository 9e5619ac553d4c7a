use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DISCOVERY_PREFIX: &str = "kiro-";
const DISCOVERY_SUFFIX: &str = ".json";

#[derive(Debug, thiserror::Error)]
pub enum TokenFileError {
    #[error("token file path is required")]
    EmptyPath,
    #[error("token file path {0:?} is relative but no auth dir is configured")]
    RelativeWithoutAuthDir(String),
    #[error("cannot resolve home directory for {0:?}")]
    NoHomeDir(String),
    #[error("token file[{index}]: {path} does not exist")]
    NotFound { index: usize, path: String },
    #[error("token file[{index}]: {path} is a directory")]
    IsDirectory { index: usize, path: String },
    #[error("token file[{index}]: failed to stat {path}: {source}")]
    Stat {
        index: usize,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid token file spec {0:?}, expected path[,region[,label]]")]
    InvalidSpec(String),
    #[error("failed to read auth dir {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// One configured credential location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFileEntry {
    #[serde(rename = "token-file-path", alias = "path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

impl TokenFileEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            region: String::new(),
            label: String::new(),
        }
    }

    /// Parses the `path[,region[,label]]` command line form.
    pub fn parse_spec(spec: &str) -> Result<Self, TokenFileError> {
        let mut parts = spec.splitn(3, ',').map(str::trim);
        let path = parts.next().unwrap_or_default();
        if path.is_empty() {
            return Err(TokenFileError::InvalidSpec(spec.to_string()));
        }
        Ok(Self {
            path: path.to_string(),
            region: parts.next().unwrap_or_default().to_string(),
            label: parts.next().unwrap_or_default().to_string(),
        })
    }

    fn normalize(&mut self) {
        self.path = self.path.trim().to_string();
        self.region = self.region.trim().to_string();
        self.label = self.label.trim().to_string();
    }

    /// Absolute location of this entry, resolved against `auth_dir` when relative.
    pub fn resolve_path(&self, auth_dir: Option<&str>) -> Result<PathBuf, TokenFileError> {
        resolve_path(&self.path, auth_dir)
    }
}

pub fn resolve_path(raw: &str, auth_dir: Option<&str>) -> Result<PathBuf, TokenFileError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TokenFileError::EmptyPath);
    }
    let path = expand_user_path(raw)?;
    if path.is_absolute() {
        return Ok(path);
    }
    let base = auth_dir
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .ok_or_else(|| TokenFileError::RelativeWithoutAuthDir(raw.to_string()))?;
    Ok(expand_user_path(base)?.join(path))
}

fn expand_user_path(raw: &str) -> Result<PathBuf, TokenFileError> {
    let Some(rest) = raw.strip_prefix('~') else {
        return Ok(PathBuf::from(raw));
    };
    let home = dirs::home_dir().ok_or_else(|| TokenFileError::NoHomeDir(raw.to_string()))?;
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        return Ok(home);
    }
    Ok(home.join(rest))
}

/// Trims entries and drops duplicates by
/// case-insensitive `path|region`, keeping the first occurrence.
pub fn normalize_token_files(entries: Vec<TokenFileEntry>) -> Vec<TokenFileEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for mut entry in entries {
        entry.normalize();
        if entry.path.is_empty() {
            continue;
        }
        let key = format!("{}|{}", entry.path, entry.region).to_lowercase();
        if !seen.insert(key) {
            continue;
        }
        out.push(entry);
    }
    out
}

/// Every entry must resolve to an existing regular file.
pub fn validate_token_files(
    entries: &[TokenFileEntry],
    auth_dir: Option<&str>,
) -> Result<(), TokenFileError> {
    for (index, entry) in entries.iter().enumerate() {
        let path = entry.resolve_path(auth_dir)?;
        let display = path.display().to_string();
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TokenFileError::NotFound {
                    index,
                    path: display,
                });
            }
            Err(source) => {
                return Err(TokenFileError::Stat {
                    index,
                    path: display,
                    source,
                });
            }
        };
        if meta.is_dir() {
            return Err(TokenFileError::IsDirectory {
                index,
                path: display,
            });
        }
    }
    Ok(())
}

/// Finds `kiro-*.json` files (case-insensitive) directly under `auth_dir`,
/// sorted by file name and labelled with it.
pub fn discover_token_files(auth_dir: &str) -> Result<Vec<TokenFileEntry>, TokenFileError> {
    let dir = expand_user_path(auth_dir.trim())?;
    let read = match fs::read_dir(&dir) {
        Ok(read) => read,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(TokenFileError::ReadDir {
                path: dir.display().to_string(),
                source,
            });
        }
    };

    let mut names = Vec::new();
    for item in read.flatten() {
        let path = item.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if is_discoverable(name) {
            names.push((name.to_string(), path));
        }
    }
    names.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(names
        .into_iter()
        .map(|(name, path)| TokenFileEntry {
            path: path_string(&path),
            region: String::new(),
            label: name,
        })
        .collect())
}

fn is_discoverable(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(DISCOVERY_PREFIX)
        && lower.ends_with(DISCOVERY_SUFFIX)
        && lower.len() > DISCOVERY_PREFIX.len() + DISCOVERY_SUFFIX.len()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_dedupes_by_path_and_region() {
        let entries = vec![
            TokenFileEntry::new(" /tmp/a.json "),
            TokenFileEntry {
                path: "/TMP/A.json".to_string(),
                region: String::new(),
                label: "dup".to_string(),
            },
            TokenFileEntry {
                path: "/tmp/a.json".to_string(),
                region: "eu-west-1".to_string(),
                label: String::new(),
            },
            TokenFileEntry::new("   "),
        ];
        let out = normalize_token_files(entries);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "/tmp/a.json");
        assert_eq!(out[0].region, "");
        assert_eq!(out[1].region, "eu-west-1");
    }

    #[test]
    fn relative_path_requires_auth_dir() {
        let err = resolve_path("kiro.json", None).expect_err("relative");
        assert!(matches!(err, TokenFileError::RelativeWithoutAuthDir(_)));

        let resolved = resolve_path("kiro.json", Some("/var/auth")).expect("resolved");
        assert_eq!(resolved, PathBuf::from("/var/auth/kiro.json"));
    }

    #[test]
    fn parse_spec_reads_optional_fields() {
        let entry = TokenFileEntry::parse_spec("a.json, eu-west-1 ,work").expect("spec");
        assert_eq!(entry.path, "a.json");
        assert_eq!(entry.region, "eu-west-1");
        assert_eq!(entry.label, "work");
        assert!(TokenFileEntry::parse_spec(",x").is_err());
    }

    #[test]
    fn discovery_matches_prefix_case_insensitively() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["kiro-b.json", "KIRO-a.JSON", "other.json", "kiro-.json"] {
            fs::write(dir.path().join(name), "{}").expect("write");
        }
        fs::create_dir(dir.path().join("kiro-dir.json")).expect("mkdir");

        let found = discover_token_files(&dir.path().to_string_lossy()).expect("discover");
        let labels: Vec<_> = found.iter().map(|entry| entry.label.as_str()).collect();
        assert_eq!(labels, vec!["KIRO-a.JSON", "kiro-b.json"]);
        assert!(found.iter().all(|entry| entry.region.is_empty()));
    }

    #[test]
    fn validate_rejects_missing_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let auth = dir.path().to_string_lossy().into_owned();
        fs::write(dir.path().join("ok.json"), "{}").expect("write");

        assert!(validate_token_files(&[TokenFileEntry::new("ok.json")], Some(&auth)).is_ok());
        let err = validate_token_files(&[TokenFileEntry::new("missing.json")], Some(&auth))
            .expect_err("missing");
        assert!(matches!(err, TokenFileError::NotFound { index: 0, .. }));
        let err = validate_token_files(&[TokenFileEntry::new(auth.clone())], None)
            .expect_err("directory");
        assert!(matches!(err, TokenFileError::IsDirectory { .. }));
    }
}
