use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_PLUGIN_PROXY: &str = "https://gh-proxy.com";

/// Optional TOML file (`--config`). Every key may be overridden by env vars.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub file_root: Option<PathBuf>,
    #[serde(default)]
    pub direct_media_mode: Option<String>,
    #[serde(default)]
    pub plugin_proxy: Option<String>,
}

impl FileConfig {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

/// How `send_platform_message_direct` hands local media to platform adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectMediaMode {
    /// Try the local absolute path first, then fall back to upload + URL
    #[default]
    Auto,
    /// Always send local absolute paths
    Local,
    /// Always upload to AstrBot and send the hosted URL
    Upload,
}

impl DirectMediaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Local => "local",
            Self::Upload => "upload",
        }
    }
}

impl FromStr for DirectMediaMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "upload" => Ok(Self::Upload),
            _ => bail!(
                "Invalid ASTRBOTMCP_DIRECT_MEDIA_MODE {:?}; expected 'auto', 'local', or 'upload'.",
                s
            ),
        }
    }
}

/// Connection settings for one AstrBot instance.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub file_root: Option<PathBuf>,
    pub direct_media_mode: DirectMediaMode,
    pub plugin_proxy: String,
}

impl Settings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            username: None,
            password: None,
            default_provider: None,
            default_model: None,
            file_root: None,
            direct_media_mode: DirectMediaMode::Auto,
            plugin_proxy: DEFAULT_PLUGIN_PROXY.to_string(),
        }
    }

    /// Merge file values with variables from `lookup`; variables win.
    pub fn resolve(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let get = |names: &[&str]| -> Option<String> {
            names.iter().find_map(|name| non_empty(lookup(name)))
        };

        let base_url = get(&["ASTRBOT_BASE_URL"]).or_else(|| non_empty(file.base_url));
        let Some(base_url) = base_url else {
            bail!(
                "ASTRBOT_BASE_URL is not set. Please set it to the base URL \
                 of your AstrBot HTTP API, e.g. http://127.0.0.1:6185"
            );
        };

        let timeout_secs = match get(&["ASTRBOT_TIMEOUT"]) {
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("ASTRBOT_TIMEOUT must be a number (seconds)."))?,
            None => file.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            bail!("ASTRBOT_TIMEOUT must be a positive number of seconds.");
        }

        let direct_media_mode = get(&["ASTRBOTMCP_DIRECT_MEDIA_MODE", "ASTRBOT_MCP_DIRECT_MEDIA_MODE"])
            .or_else(|| non_empty(file.direct_media_mode))
            .map(|raw| raw.parse::<DirectMediaMode>())
            .transpose()?
            .unwrap_or_default();

        let mut settings = Self::new(base_url);
        settings.timeout = Duration::from_secs_f64(timeout_secs);
        settings.username = get(&["ASTRBOT_USERNAME"]).or_else(|| non_empty(file.username));
        settings.password = get(&["ASTRBOT_PASSWORD"]).or_else(|| non_empty(file.password));
        settings.default_provider =
            get(&["ASTRBOT_DEFAULT_PROVIDER"]).or_else(|| non_empty(file.default_provider));
        settings.default_model =
            get(&["ASTRBOT_DEFAULT_MODEL"]).or_else(|| non_empty(file.default_model));
        settings.file_root = get(&["ASTRBOTMCP_FILE_ROOT", "ASTRBOT_MCP_FILE_ROOT"])
            .map(PathBuf::from)
            .or(file.file_root);
        settings.direct_media_mode = direct_media_mode;
        if let Some(proxy) = get(&["ASTRBOTMCP_PLUGIN_PROXY", "ASTRBOT_MCP_PLUGIN_PROXY"])
            .or_else(|| non_empty(file.plugin_proxy))
        {
            settings.plugin_proxy = proxy;
        }
        Ok(settings)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_base_url_required() {
        let err = Settings::resolve(FileConfig::default(), lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("ASTRBOT_BASE_URL"));
    }

    #[test]
    fn test_env_values_are_trimmed_and_slash_stripped() {
        let settings = Settings::resolve(
            FileConfig::default(),
            lookup(&[
                ("ASTRBOT_BASE_URL", " http://127.0.0.1:6185/ "),
                ("ASTRBOT_USERNAME", "  "),
                ("ASTRBOT_TIMEOUT", "12.5"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.base_url, "http://127.0.0.1:6185");
        assert_eq!(settings.username, None);
        assert_eq!(settings.timeout, Duration::from_secs_f64(12.5));
        assert_eq!(settings.direct_media_mode, DirectMediaMode::Auto);
        assert_eq!(settings.plugin_proxy, DEFAULT_PLUGIN_PROXY);
    }

    #[test]
    fn test_invalid_timeout() {
        let err = Settings::resolve(
            FileConfig::default(),
            lookup(&[("ASTRBOT_BASE_URL", "http://x"), ("ASTRBOT_TIMEOUT", "soon")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            base_url: Some("http://from-file:1".to_string()),
            username: Some("file-user".to_string()),
            direct_media_mode: Some("local".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(
            file,
            lookup(&[
                ("ASTRBOT_BASE_URL", "http://from-env:2"),
                ("ASTRBOT_MCP_DIRECT_MEDIA_MODE", "UPLOAD"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.base_url, "http://from-env:2");
        assert_eq!(settings.username.as_deref(), Some("file-user"));
        assert_eq!(settings.direct_media_mode, DirectMediaMode::Upload);
    }

    #[test]
    fn test_invalid_media_mode() {
        let err = Settings::resolve(
            FileConfig::default(),
            lookup(&[
                ("ASTRBOT_BASE_URL", "http://x"),
                ("ASTRBOTMCP_DIRECT_MEDIA_MODE", "telepathy"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected 'auto'"));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = FileConfig::load(dir.path().join("nope.toml")).unwrap();
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("astrbot.toml");
        std::fs::write(
            &path,
            "base_url = \"http://127.0.0.1:6185\"\ntimeout = 5\nusername = \"astrbot\"\n",
        )
        .unwrap();
        let config = FileConfig::load(path).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://127.0.0.1:6185"));
        assert_eq!(config.timeout, Some(5.0));
    }
}
