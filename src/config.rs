use failure::{Error, ResultExt};
use log::debug;
use sec::Secret;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::hub::RepoType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub hub: HubConfig,
    pub snapshot: SnapshotConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        debug!("Reading config from {}", path.display());

        let contents = fs::read_to_string(path)
            .with_context(|_| format!("Unable to read {}", path.display()))?;

        Config::from_toml(&contents)
    }

    pub fn from_toml(src: &str) -> Result<Config, Error> {
        let cfg: Config = toml::from_str(src).context("Invalid config")?;
        Ok(cfg)
    }

    /// An example config which downloads the default model and shows off
    /// the optional settings.
    pub fn example() -> Config {
        let mut cfg = Config::default();
        cfg.snapshot.ignore_patterns = vec![String::from("*.md")];
        cfg.hub.token = Some(Secret::new(String::from("hf_XXXXXXXXXXXXXXXX")));
        cfg
    }

    pub fn as_toml(&self) -> String {
        toml::to_string_pretty(self).expect("Serializing to a string should never fail")
    }

    /// Fill in anything left at its default from the usual hub environment
    /// variables (`HF_ENDPOINT`, `HF_TOKEN`, `HUGGING_FACE_HUB_TOKEN`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.hub.endpoint.is_none() {
            if let Some(endpoint) = lookup("HF_ENDPOINT") {
                debug!("Using the hub endpoint from $HF_ENDPOINT");
                self.hub.endpoint = Some(endpoint);
            }
        }

        if self.hub.token.is_none() {
            let token = lookup("HF_TOKEN").or_else(|| lookup("HUGGING_FACE_HUB_TOKEN"));

            if let Some(token) = token.filter(|t| !t.is_empty()) {
                debug!("Using an access token from the environment");
                self.hub.token = Some(Secret::new(token));
            }
        }
    }
}

/// How to reach the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct HubConfig {
    /// Falls back to `$HF_ENDPOINT`, then the public hub, when left out.
    pub endpoint: Option<String>,
    pub token: Option<Secret<String>>,
    pub user_agent: String,
}

impl HubConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "https://huggingface.co";
    pub const DEFAULT_AGENT: &'static str = concat!("model-snapshot/", env!("CARGO_PKG_VERSION"));

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_ref()
            .map(String::as_str)
            .unwrap_or(HubConfig::DEFAULT_ENDPOINT)
    }
}

impl Default for HubConfig {
    fn default() -> HubConfig {
        HubConfig {
            endpoint: None,
            token: None,
            user_agent: HubConfig::DEFAULT_AGENT.to_string(),
        }
    }
}

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SnapshotConfig {
    pub repo_id: String,
    pub repo_type: RepoType,
    pub revision: String,
    /// The directory files are saved to. `~` and environment variables are
    /// expanded.
    pub local_dir: PathBuf,
    /// Only download files matching one of these patterns. Leave it out of a
    /// `[snapshot]` table to download the entire repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_patterns: Option<Vec<String>>,
    pub ignore_patterns: Vec<String>,
}

impl SnapshotConfig {
    pub const DEFAULT_REPO: &'static str = "onnx-community/TinyBERT-finetuned-NER-ONNX";
    pub const DEFAULT_LOCAL_DIR: &'static str = "web_model/bert-tiny-ner";
    pub const DEFAULT_REVISION: &'static str = "main";
    /// The quantized ONNX model plus everything needed to tokenize input for
    /// it.
    pub const DEFAULT_ALLOW_PATTERNS: &'static [&'static str] = &[
        "onnx/model_quantized.onnx",
        "config.json",
        "tokenizer.json",
        "tokenizer_config.json",
        "special_tokens_map.json",
        "vocab.txt",
    ];

    /// The destination directory with `~` and `$VARS` expanded.
    pub fn expanded_local_dir(&self) -> Result<PathBuf, Error> {
        let raw = self.local_dir.to_string_lossy();
        let expanded = shellexpand::full(&raw).context("Unable to expand wildcards")?;

        Ok(PathBuf::from(expanded.into_owned()))
    }
}

impl Default for SnapshotConfig {
    fn default() -> SnapshotConfig {
        SnapshotConfig {
            repo_id: SnapshotConfig::DEFAULT_REPO.to_string(),
            repo_type: RepoType::Model,
            revision: SnapshotConfig::DEFAULT_REVISION.to_string(),
            local_dir: PathBuf::from(SnapshotConfig::DEFAULT_LOCAL_DIR),
            allow_patterns: Some(
                SnapshotConfig::DEFAULT_ALLOW_PATTERNS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ignore_patterns: Vec::new(),
        }
    }
}
