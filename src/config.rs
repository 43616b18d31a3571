use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Which of the two configured sites this process mirrors.
///
/// Exactly one mode is active for the lifetime of a process; switching
/// requires a restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// The primary origin, cached under `raw/`.
    #[default]
    Normal,
    /// The alternate instance, cached under `raw_co/`.
    #[serde(alias = "college")]
    #[value(alias = "college")]
    Alternate,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub sites: Sites,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            listen: default_listen(),
            origin: OriginConfig::default(),
            sites: Sites::default(),
        }
    }
}

impl Config {
    /// The `{local_root, origin_prefix}` pair selected by [`Config::mode`].
    pub fn active_site(&self) -> &SiteConfig {
        match self.mode {
            Mode::Normal => &self.sites.normal,
            Mode::Alternate => &self.sites.alternate,
        }
    }

    /// Replace the listen address with `0.0.0.0:{port}`.
    pub fn set_port(&mut self, port: u16) {
        self.listen = format!("0.0.0.0:{port}");
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    /// `Referer` sent on every origin request.  The origin refuses to serve
    /// assets without it.
    #[serde(default = "default_referer")]
    pub referer: String,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout (headers and body) in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            referer: default_referer(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_referer() -> String {
    "https://games.poki.com/".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Sites {
    #[serde(default = "default_normal_site")]
    pub normal: SiteConfig,
    #[serde(default = "default_alternate_site", alias = "college")]
    pub alternate: SiteConfig,
}

impl Default for Sites {
    fn default() -> Self {
        Self {
            normal: default_normal_site(),
            alternate: default_alternate_site(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteConfig {
    /// Directory the cache tree is rooted at.
    pub local_root: String,
    /// Origin URL prefix; the request path is appended verbatim.
    pub origin_prefix: String,
}

fn default_normal_site() -> SiteConfig {
    SiteConfig {
        local_root: "raw/".to_string(),
        origin_prefix: "https://806e2242-df99-4dcd-b6ac-2c20175159a8.poki-gdn.com/9a5a5ef4-bd76-48fa-bf07-5ccbdc09b1f6".to_string(),
    }
}

fn default_alternate_site() -> SiteConfig {
    SiteConfig {
        local_root: "raw_co/".to_string(),
        origin_prefix: "https://72e5ba00-c3c7-45d5-b68b-abd8c280716d.poki-gdn.com/db71795e-0efa-4f47-927e-a141eea00e86".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    for (name, site) in [
        ("normal", &config.sites.normal),
        ("alternate", &config.sites.alternate),
    ] {
        anyhow::ensure!(
            !site.local_root.trim().is_empty(),
            "sites.{name}.local_root must not be empty"
        );
        anyhow::ensure!(
            site.origin_prefix.starts_with("http://") || site.origin_prefix.starts_with("https://"),
            "sites.{name}.origin_prefix must be an http(s) URL"
        );
        anyhow::ensure!(
            !site.origin_prefix.contains('?'),
            "sites.{name}.origin_prefix must not carry a query string"
        );
    }
    anyhow::ensure!(
        config.origin.connect_timeout_secs > 0 && config.origin.request_timeout_secs > 0,
        "origin timeouts must be greater than zero"
    );
    anyhow::ensure!(
        !config.origin.referer.is_empty(),
        "origin.referer must not be empty"
    );
    config
        .listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid listen address: {}", config.listen))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_builtin_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.mode, Mode::Normal);
        assert_eq!(config.listen, "0.0.0.0:8000");
        assert_eq!(config.origin.referer, "https://games.poki.com/");
        assert_eq!(config.active_site().local_root, "raw/");
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn mode_selects_site() {
        let yaml = r#"
mode: alternate
sites:
  normal:
    local_root: cache/a
    origin_prefix: https://a.example.com/x
  alternate:
    local_root: cache/b
    origin_prefix: https://b.example.com/y
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(
            config.active_site(),
            &SiteConfig {
                local_root: "cache/b".into(),
                origin_prefix: "https://b.example.com/y".into(),
            }
        );
    }

    #[test]
    fn college_is_accepted_as_alternate() {
        let config = parse_config("mode: college").unwrap();
        assert_eq!(config.mode, Mode::Alternate);
        assert_eq!(config.active_site().local_root, "raw_co/");
    }

    #[test]
    fn rejects_non_http_origin() {
        let yaml = r#"
sites:
  normal:
    local_root: raw/
    origin_prefix: ftp://example.com
"#;
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(parse_config("origin:\n  request_timeout_secs: 0").is_err());
    }

    #[test]
    fn rejects_bad_listen_address() {
        assert!(parse_config("listen: not-an-address").is_err());
    }

    #[test]
    fn set_port_rewrites_listen() {
        let mut config = Config::default();
        config.set_port(9123);
        assert_eq!(config.listen, "0.0.0.0:9123");
    }
}
