use kgate_common::{
    GlobalConfig, TokenFileError, discover_token_files, normalize_token_files,
    validate_token_files,
};
use kgate_provider_core::RotatorEntry;
use tracing::{info, warn};

/// Rotation order for the configured token files, or the auth dir's
/// `kiro-*.json` files when none are configured.
pub(crate) fn rotator_entries(
    config: &GlobalConfig,
    default_region: Option<&str>,
) -> Result<Vec<RotatorEntry>, TokenFileError> {
    let auth_dir = config.auth_dir.as_deref();
    let mut entries = normalize_token_files(config.token_files.clone());
    if entries.is_empty()
        && let Some(dir) = auth_dir
    {
        let mut discovered = discover_token_files(dir)?;
        if let Some(region) = default_region {
            for entry in &mut discovered {
                entry.region = region.to_string();
            }
        }
        info!(
            event = "token_files_discovered",
            auth_dir = %dir,
            count = discovered.len()
        );
        entries = normalize_token_files(discovered);
    }
    validate_token_files(&entries, auth_dir)?;

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.resolve_path(auth_dir)?;
        out.push(RotatorEntry::new(path, entry.region, entry.label));
    }
    if out.is_empty() {
        warn!(
            event = "no_credentials",
            "no kiro token files configured; chat requests will fail"
        );
    }
    Ok(out)
}
