use std::path::Path;

use tracing::warn;

use kgate_provider_core::{KiroCredential, ProviderError, ProviderResult, RotatorEntry};

/// Reads and validates the credential at `entry`. A configured region on the
/// entry overrides whatever the file says.
pub async fn load_credential(entry: &RotatorEntry) -> ProviderResult<KiroCredential> {
    let path = &entry.path;
    let raw = tokio::fs::read(path)
        .await
        .map_err(|err| ProviderError::Credential(format!("read {}: {err}", path.display())))?;
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ProviderError::Credential(format!(
            "credential file {} is empty",
            path.display()
        )));
    }
    let mut cred: KiroCredential = serde_json::from_slice(&raw)
        .map_err(|err| ProviderError::Credential(format!("parse {}: {err}", path.display())))?;
    cred.validate()?;
    if let Some(previous) = cred.normalize_type() {
        warn!(
            event = "credential_type_normalized",
            path = %path.display(),
            previous = %previous
        );
    }
    if !entry.region.trim().is_empty() {
        cred.region = Some(entry.region.trim().to_string());
    }
    Ok(cred)
}

/// Writes `cred` back as pretty camelCase JSON, creating the parent directory.
pub async fn save_credential(path: &Path, cred: &KiroCredential) -> ProviderResult<()> {
    let mut cred = cred.clone();
    cred.normalize_type();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_private_dir(parent).await?;
    }
    let body = serde_json::to_vec_pretty(&cred)
        .map_err(|err| ProviderError::Credential(format!("encode credential: {err}")))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|err| ProviderError::Credential(format!("write {}: {err}", path.display())))
}

async fn create_private_dir(dir: &Path) -> ProviderResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|err| ProviderError::Credential(format!("create {}: {err}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, body: &str) -> RotatorEntry {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write fixture");
        RotatorEntry::new(path, "", name)
    }

    #[tokio::test]
    async fn load_normalizes_type_and_applies_region_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut entry = write(
            dir.path(),
            "kiro-a.json",
            &json!({
                "accessToken": "a",
                "refreshToken": "r",
                "expiresAt": "2020-01-01T00:00:00Z",
                "type": "amazonq",
                "region": "us-west-2"
            })
            .to_string(),
        );
        let cred = load_credential(&entry).await.expect("load");
        assert_eq!(cred.kind, "kiro");
        assert_eq!(cred.region.as_deref(), Some("us-west-2"));
        assert!(cred.is_expired());

        entry.region = "eu-west-1".to_string();
        let cred = load_credential(&entry).await.expect("load");
        assert_eq!(cred.region.as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn load_rejects_empty_and_incomplete_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = write(dir.path(), "empty.json", "  \n");
        assert!(matches!(
            load_credential(&empty).await,
            Err(ProviderError::Credential(_))
        ));
        let partial = write(dir.path(), "partial.json", r#"{"accessToken":"a","expiresAt":1}"#);
        assert!(matches!(
            load_credential(&partial).await,
            Err(ProviderError::MissingCredentialField("refreshToken"))
        ));
        let missing = RotatorEntry::new(dir.path().join("nope.json"), "", "");
        assert!(load_credential(&missing).await.is_err());
    }

    #[tokio::test]
    async fn save_creates_parent_and_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/kiro-b.json");
        let cred: KiroCredential = serde_json::from_value(json!({
            "accessToken": "a",
            "refreshToken": "r",
            "expiresAt": 1_735_689_600,
            "authMethod": "social",
            "type": "other"
        }))
        .expect("parse");
        save_credential(&path, &cred).await.expect("save");

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(written["type"], json!("kiro"));
        assert_eq!(written["expiresAt"], json!("2025-01-01T00:00:00Z"));

        let loaded = load_credential(&RotatorEntry::new(&path, "", ""))
            .await
            .expect("reload");
        assert_eq!(loaded.access_token, "a");
        assert!(loaded.is_social());
    }
}
