use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default = "Config::default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    /// Holds `gallery.json`, `settings.json` and `tv_schedules.json`.
    #[serde(default = "Config::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "Config::default_uploads_dir")]
    pub uploads_dir: PathBuf,
    /// Bearer token accepted from clients outside the local network.
    #[serde(default)]
    pub control_token: Option<String>,
    /// Seed for the shuffled slide order; a fixed seed keeps every display
    /// on the same permutation.
    #[serde(default = "Config::default_shuffle_seed")]
    pub shuffle_seed: u64,
    /// Zone the TV schedules are written in.
    #[serde(default = "Config::default_timezone")]
    pub timezone: Tz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            port: Self::default_port(),
            data_dir: Self::default_data_dir(),
            uploads_dir: Self::default_uploads_dir(),
            control_token: None,
            shuffle_seed: Self::default_shuffle_seed(),
            timezone: Self::default_timezone(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let cfg: Config = serde_yaml::from_slice(&data)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.data_dir != self.uploads_dir,
            "data-dir and uploads-dir must be different directories"
        );
        if let Some(token) = &self.control_token {
            ensure!(
                token.trim().len() >= 16,
                "control-token must be at least 16 characters"
            );
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    fn default_bind_address() -> IpAddr {
        IpAddr::from([0, 0, 0, 0])
    }

    const fn default_port() -> u16 {
        5000
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    fn default_uploads_dir() -> PathBuf {
        PathBuf::from("uploads")
    }

    const fn default_shuffle_seed() -> u64 {
        0xDEC0_D1A5
    }

    fn default_timezone() -> Tz {
        Tz::UTC
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::path::PathBuf;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("parse config");
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.uploads_dir, PathBuf::from("uploads"));
        assert!(cfg.control_token.is_none());
        assert_eq!(cfg.timezone, chrono_tz::Tz::UTC);
        cfg.validated().expect("defaults are valid");
    }

    #[test]
    fn parses_kebab_case_keys() {
        let cfg: Config = serde_yaml::from_str(
            r#"
bind-address: 127.0.0.1
port: 8080
data-dir: /var/lib/slideshow/data
uploads-dir: /var/lib/slideshow/uploads
control-token: 0123456789abcdef0123
shuffle-seed: 7
timezone: Europe/Paris
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.socket_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.shuffle_seed, 7);
        assert_eq!(cfg.timezone, chrono_tz::Europe::Paris);
        cfg.validated().expect("valid config");
    }

    #[test]
    fn rejects_short_token_and_shared_dirs() {
        let cfg: Config = serde_yaml::from_str("control-token: short").expect("parse config");
        assert!(cfg.validated().is_err());
        let cfg: Config =
            serde_yaml::from_str("data-dir: /srv/x\nuploads-dir: /srv/x").expect("parse config");
        assert!(cfg.validated().is_err());
    }
}
