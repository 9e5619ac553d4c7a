use clap::Parser;

use kgate_common::{GlobalConfigPatch, TokenFileEntry, TokenFileError};

#[derive(Parser, Debug)]
#[command(name = "kgate", version, about = "OpenAI-compatible gateway for Kiro")]
pub(crate) struct Cli {
    #[arg(long, env = "KGATE_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "KGATE_PORT", default_value_t = 8787)]
    pub(crate) port: u16,
    /// Outbound proxy for upstream calls.
    #[arg(long, env = "KGATE_PROXY")]
    pub(crate) proxy: Option<String>,
    /// Base for relative token paths; scanned for kiro-*.json when no
    /// token file is given.
    #[arg(long, env = "KGATE_AUTH_DIR")]
    pub(crate) auth_dir: Option<String>,
    /// `path[,region[,label]]`, repeatable. `;` separates entries in the env var.
    #[arg(long = "token-file", env = "KGATE_TOKEN_FILE", value_delimiter = ';')]
    pub(crate) token_files: Vec<String>,
    /// Region for entries that do not name one.
    #[arg(long, env = "KGATE_REGION")]
    pub(crate) region: Option<String>,
    /// Extra substring marking a "malformed request" rejection, repeatable.
    #[arg(long = "malformed-marker", env = "KGATE_MALFORMED_MARKER", value_delimiter = ';')]
    pub(crate) malformed_markers: Vec<String>,
}

impl Cli {
    pub(crate) fn region(&self) -> Option<String> {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty())
            .map(str::to_string)
    }

    pub(crate) fn to_patch(&self) -> Result<GlobalConfigPatch, TokenFileError> {
        let region = self.region();
        let mut token_files = Vec::with_capacity(self.token_files.len());
        for spec in self.token_files.iter().filter(|spec| !spec.trim().is_empty()) {
            let mut entry = TokenFileEntry::parse_spec(spec)?;
            if entry.region.is_empty()
                && let Some(region) = &region
            {
                entry.region = region.clone();
            }
            token_files.push(entry);
        }
        Ok(GlobalConfigPatch {
            host: Some(self.host.clone()),
            port: Some(self.port),
            proxy: self.proxy.clone(),
            auth_dir: self.auth_dir.clone(),
            token_files: (!token_files.is_empty()).then_some(token_files),
            malformed_markers: (!self.malformed_markers.is_empty())
                .then(|| self.malformed_markers.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_specs_take_the_default_region() {
        let cli = Cli::try_parse_from([
            "kgate",
            "--token-file",
            "a.json",
            "--token-file",
            "b.json,eu-west-1,work",
            "--region",
            "ap-southeast-1",
            "--malformed-marker",
            "input is too long",
        ])
        .expect("cli");
        let patch = cli.to_patch().expect("patch");
        let files = patch.token_files.expect("token files");
        assert_eq!(files[0].region, "ap-southeast-1");
        assert_eq!(files[1].region, "eu-west-1");
        assert_eq!(files[1].label, "work");
        assert_eq!(
            patch.malformed_markers,
            Some(vec!["input is too long".to_string()])
        );
    }

    #[test]
    fn no_token_files_leaves_discovery_open() {
        let cli = Cli::try_parse_from(["kgate", "--port", "9000"]).expect("cli");
        let config = cli.to_patch().expect("patch").into_config().expect("config");
        assert_eq!(config.port, 9000);
        assert!(config.token_files.is_empty());
    }
}
