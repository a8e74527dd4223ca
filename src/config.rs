use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::sandbox::{DEFAULT_MAX_OUTPUT_BYTES, ToolchainDescriptor};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_BIND_PORT: u16 = 8000;

#[derive(Parser)]
#[command(name = "coderun", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Whether to flush the existing usage database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or defaults without one
    pub fn to_config(&self) -> std::io::Result<Config> {
        let Some(path) = &self.config_path else {
            return Ok(Config::default());
        };
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Extra toolchains, or replacements for built-in ones with the same name
    #[serde(default)]
    pub languages: Vec<ToolchainDescriptor>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

impl ServerConfig {
    pub fn bind(&self) -> (String, u16) {
        (
            self.bind_address
                .clone()
                .unwrap_or(DEFAULT_BIND_ADDRESS.to_string()),
            self.bind_port.unwrap_or(DEFAULT_BIND_PORT),
        )
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct SandboxConfig {
    /// Directory under which per-request workspaces are created
    pub root: Option<PathBuf>,
    /// Per-stream cap on captured output
    pub max_output_bytes: Option<usize>,
}

impl SandboxConfig {
    pub fn root(&self) -> anyhow::Result<PathBuf> {
        use directories::ProjectDirs;

        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        let proj_dirs = ProjectDirs::from("", "", "coderun")
            .ok_or_else(|| anyhow::anyhow!("Unable to find user directory"))?;
        Ok(proj_dirs.cache_dir().join("workspaces"))
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES)
    }
}
