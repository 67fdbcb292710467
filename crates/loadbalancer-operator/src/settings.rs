use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::lifecycle::RawConfig;

pub const ENV_APP_NAME: &str = "LB_APP_NAME";
pub const ENV_NAMESPACE: &str = "LB_NAMESPACE";
pub const ENV_SELECTOR: &str = "LB_SELECTOR";
pub const ENV_TARGET_PORT: &str = "LB_TARGET_PORT";
pub const ENV_LB_PORT: &str = "LB_LB_PORT";
pub const ENV_FIXED_IP: &str = "LB_FIXED_IP";
pub const ENV_ANNOTATIONS: &str = "LB_ANNOTATIONS";

/// Effective settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    pub app_name: String,
    /// `None` means use the client's default namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub raw: RawConfig,
}

/// Values given on the command line; these win over env and file
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub app_name: Option<String>,
    pub namespace: Option<String>,
    pub selector: Option<String>,
    pub target_port: Option<String>,
    pub lb_port: Option<String>,
    pub fixed_ip: Option<String>,
    pub annotations: Option<String>,
}

/// Configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct SettingsFile {
    app_name: Option<String>,
    namespace: Option<String>,
    selector: Option<String>,
    target_port: Option<Scalar>,
    lb_port: Option<Scalar>,
    fixed_ip: Option<String>,
    loadbalancer_annotations: Option<String>,
}

/// Ports may be written as `8080` or `"8080"` in the file
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Str(String),
}

impl Scalar {
    fn into_raw(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Str(s) => s,
        }
    }
}

fn pick(cli: Option<&String>, env_key: &str, file: Option<String>) -> Option<String> {
    cli.cloned()
        .or_else(|| std::env::var(env_key).ok())
        .or(file)
}

impl Settings {
    /// Load settings with precedence: CLI > env > file
    pub fn load(config_path: Option<&Path>, cli: &SettingsOverrides) -> Result<Self> {
        let file = Self::load_from_file(config_path)?.unwrap_or_default();

        let app_name = pick(cli.app_name.as_ref(), ENV_APP_NAME, file.app_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                anyhow!("Application name required: use --app-name, {ENV_APP_NAME}, or config file")
            })?;

        let namespace = pick(cli.namespace.as_ref(), ENV_NAMESPACE, file.namespace)
            .filter(|ns| !ns.is_empty());

        let raw = RawConfig {
            selector: pick(cli.selector.as_ref(), ENV_SELECTOR, file.selector),
            target_port: pick(
                cli.target_port.as_ref(),
                ENV_TARGET_PORT,
                file.target_port.map(Scalar::into_raw),
            ),
            lb_port: pick(
                cli.lb_port.as_ref(),
                ENV_LB_PORT,
                file.lb_port.map(Scalar::into_raw),
            ),
            fixed_ip: pick(cli.fixed_ip.as_ref(), ENV_FIXED_IP, file.fixed_ip),
            annotations: pick(
                cli.annotations.as_ref(),
                ENV_ANNOTATIONS,
                file.loadbalancer_annotations,
            ),
        };

        Ok(Self {
            app_name,
            namespace,
            raw,
        })
    }

    /// Namespace to act in, falling back to `default` when unset
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }

    fn load_from_file(path: Option<&Path>) -> Result<Option<SettingsFile>> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Self::default_config_path();
                if !default.exists() {
                    return Ok(None);
                }
                default
            }
        };

        if !config_path.exists() {
            return Err(anyhow!("Config file not found: {:?}", config_path));
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;
        let file: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", config_path))?;
        Ok(Some(file))
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loadbalancer-operator")
            .join("config.toml")
    }
}
