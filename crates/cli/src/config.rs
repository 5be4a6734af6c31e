use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use iamsynth_aws::{Descriptions, StackSelection, DEFAULT_PACKAGE_NAME};
use iamsynth_core::Environment;

pub const DEFAULT_OUT: &str = "iamsynth.out";

/// YAML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)] pub package_name: Option<String>,
    #[serde(default)] pub stacks: Option<StackSelection>,
    #[serde(default)] pub out: Option<PathBuf>,
    #[serde(default)] pub account: Option<String>,
    #[serde(default)] pub region: Option<String>,
    #[serde(default)] pub descriptions: Descriptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&bytes).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        // an empty file is a valid, empty config
        if bytes.iter().all(u8::is_ascii_whitespace) { return Ok(Self::default()) }
        Ok(serde_yaml::from_slice(bytes)?)
    }
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub package_name: Option<String>,
    pub stacks: Option<StackSelection>,
    pub out: Option<PathBuf>,
    pub account: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub package_name: String,
    pub selection: StackSelection,
    pub out: PathBuf,
    pub environment: Environment,
    pub descriptions: Descriptions,
}

impl Settings {
    /// Defaults, then file, then process environment, then command line.
    pub fn resolve(file: FileConfig, env: Environment, cli: Overrides) -> Self {
        let environment = Environment::new(file.account, file.region)
            .overlay(env)
            .overlay(Environment::new(cli.account, cli.region));
        Self {
            package_name: cli.package_name.or(file.package_name)
                .unwrap_or_else(|| DEFAULT_PACKAGE_NAME.to_string()),
            selection: cli.stacks.or(file.stacks).unwrap_or_default(),
            out: cli.out.or(file.out).unwrap_or_else(|| PathBuf::from(DEFAULT_OUT)),
            environment,
            descriptions: file.descriptions,
        }
    }
}
