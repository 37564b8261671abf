//! Relay configuration loader.
//!
//! A TOML file supplies the base values, environment variables override it,
//! and `validate` rejects anything the server cannot run with. Every section is
//! optional so an env-only deployment works without a file.

use relay_llm::Provider;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "jarvis-relay.toml";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Sei un assistente AI chiamato J.A.R.V.I.S. Rispondi in italiano. \
Sii conciso e diretto, ma sempre educato e disponibile. Se non hai informazioni, chiedi maggiori \
dettagli o ammetti di non sapere. Parli in modo leggermente formale ma amichevole.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_request_timeout_seconds() -> u64 {
    90
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("server.bind_addr {:?} is invalid: {e}", self.bind_addr))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    /// Defaults to the provider's chat model.
    #[serde(default)]
    pub model: Option<String>,
    /// Defaults to the provider's public endpoint.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_provider() -> Provider {
    Provider::DeepSeek
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_base: None,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.provider.default_api_base())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub pushover_user_key: Option<String>,
    #[serde(default)]
    pub pushover_api_token: Option<String>,
    #[serde(default)]
    pub pushover_api_url: Option<String>,
    #[serde(default = "default_reply_title")]
    pub reply_title: String,
    #[serde(default = "default_error_title")]
    pub error_title: String,
    /// Empty means every reply is pushed.
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default = "default_notify_on_error")]
    pub notify_on_error: bool,
}

fn default_notify_enabled() -> bool {
    true
}

fn default_reply_title() -> String {
    "J.A.R.V.I.S. ha risposto".to_string()
}

fn default_error_title() -> String {
    "Errore J.A.R.V.I.S.".to_string()
}

fn default_notify_on_error() -> bool {
    true
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
            pushover_user_key: None,
            pushover_api_token: None,
            pushover_api_url: None,
            reply_title: default_reply_title(),
            error_title: default_error_title(),
            trigger_keywords: Vec::new(),
            notify_on_error: default_notify_on_error(),
        }
    }
}

impl NotifyConfig {
    /// Both Pushover credentials, when notifications are on and both are set.
    pub fn pushover_credentials(&self) -> Option<(&str, &str)> {
        if !self.enabled {
            return None;
        }
        let token = non_blank(self.pushover_api_token.as_deref())?;
        let user = non_blank(self.pushover_user_key.as_deref())?;
        Some((token, user))
    }
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

impl RelayConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    /// Loads the config and reports which file it came from, if any.
    ///
    /// An explicit path must exist. The default path is optional.
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let (mut cfg, source) = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let cfg: RelayConfig = toml::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
                (cfg, Some(path))
            }
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults and environment");
                (RelayConfig::default(), None)
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok((cfg, source))
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.bind_addr = v.trim().to_string();
        }
        if let Some(v) = get("PORT") {
            self.server.port = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("PORT={v:?} is not a valid port: {e}"))?;
        }
        if let Some(v) = get("JARVIS_PROVIDER") {
            self.llm.provider = v.parse()?;
        }
        if let Some(v) = get("JARVIS_MODEL") {
            self.llm.model = Some(v);
        }
        if let Some(v) = get("JARVIS_API_BASE") {
            self.llm.api_base = Some(v);
        }
        if let Some(v) = get(self.llm.provider.api_key_env()) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("JARVIS_SYSTEM_PROMPT") {
            self.persona.system_prompt = v;
        }
        if let Some(v) = get("PUSHOVER_USER_KEY") {
            self.notify.pushover_user_key = Some(v);
        }
        if let Some(v) = get("PUSHOVER_API_TOKEN") {
            self.notify.pushover_api_token = Some(v);
        }
        if let Some(v) = get("JARVIS_TRIGGER_KEYWORDS") {
            self.notify.trigger_keywords = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        self.server.socket_addr()?;
        if self.server.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.request_timeout_seconds must be > 0"));
        }
        if self.server.max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.max_in_flight must be > 0"));
        }
        if self.llm.model().trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model must not be blank"));
        }
        let api_base = self.llm.api_base();
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            return Err(anyhow::anyhow!(
                "llm.api_base must start with http:// or https://, got {api_base:?}"
            ));
        }
        if self.persona.system_prompt.trim().is_empty() {
            return Err(anyhow::anyhow!("persona.system_prompt must not be blank"));
        }
        if self.notify.reply_title.trim().is_empty() || self.notify.error_title.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "notify.reply_title and notify.error_title must not be blank"
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    Path::new(".").join(DEFAULT_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn apply(cfg: &mut RelayConfig, vars: &HashMap<String, String>) -> anyhow::Result<()> {
        cfg.apply_overrides_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_target_deepseek_with_italian_persona() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.llm.provider, Provider::DeepSeek);
        assert_eq!(cfg.llm.model(), "deepseek-chat");
        assert_eq!(cfg.llm.api_base(), "https://api.deepseek.com/v1");
        assert!(cfg.persona.system_prompt.contains("J.A.R.V.I.S."));
        assert_eq!(cfg.server.port, 5000);
        assert!(cfg.notify.trigger_keywords.is_empty());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg: RelayConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg.server.bind_addr, "0.0.0.0");
        assert!(cfg.notify.enabled);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [llm]
            provider = "openai"
            model = "gpt-4o"

            [persona]
            system_prompt = "You are terse."

            [notify]
            trigger_keywords = ["urgente", "allarme"]
            notify_on_error = false
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.llm.provider, Provider::OpenAI);
        assert_eq!(cfg.llm.model(), "gpt-4o");
        assert_eq!(cfg.llm.api_base(), "https://api.openai.com/v1");
        assert_eq!(cfg.persona.system_prompt, "You are terse.");
        assert_eq!(cfg.notify.trigger_keywords, vec!["urgente", "allarme"]);
        assert!(!cfg.notify.notify_on_error);
    }

    #[test]
    fn example_config_parses_and_validates() {
        let cfg: RelayConfig =
            toml::from_str(include_str!("../../jarvis-relay.example.toml")).expect("parse example");
        cfg.validate().expect("example is valid");
        assert_eq!(cfg.llm.provider, Provider::DeepSeek);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<RelayConfig>("[llm]\ntemperature = 0.2\n")
            .expect_err("unknown key must fail");
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn env_api_key_follows_selected_provider() {
        let mut cfg = RelayConfig::default();
        let vars = env(&[
            ("JARVIS_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("DEEPSEEK_API_KEY", "sk-deepseek"),
        ]);
        apply(&mut cfg, &vars).expect("overrides");
        assert_eq!(cfg.llm.provider, Provider::OpenAI);
        assert_eq!(cfg.llm.api_key(), Some("sk-openai"));
        assert_eq!(cfg.llm.model(), "gpt-4o-mini");
    }

    #[test]
    fn env_overrides_server_and_notify_settings() {
        let mut cfg = RelayConfig::default();
        let vars = env(&[
            ("PORT", "10000"),
            ("PUSHOVER_USER_KEY", "u-key"),
            ("PUSHOVER_API_TOKEN", "a-token"),
            ("JARVIS_TRIGGER_KEYWORDS", " urgente, ,allarme "),
        ]);
        apply(&mut cfg, &vars).expect("overrides");
        assert_eq!(cfg.server.port, 10000);
        assert_eq!(cfg.notify.pushover_credentials(), Some(("a-token", "u-key")));
        assert_eq!(cfg.notify.trigger_keywords, vec!["urgente", "allarme"]);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = RelayConfig::default();
        let vars = env(&[("JARVIS_MODEL", "   "), ("DEEPSEEK_API_KEY", "")]);
        apply(&mut cfg, &vars).expect("overrides");
        assert_eq!(cfg.llm.model(), "deepseek-chat");
        assert_eq!(cfg.llm.api_key(), None);
    }

    #[test]
    fn invalid_port_env_is_an_error() {
        let mut cfg = RelayConfig::default();
        let vars = env(&[("PORT", "eighty")]);
        assert!(apply(&mut cfg, &vars).is_err());
    }

    #[test]
    fn unknown_provider_env_is_an_error() {
        let mut cfg = RelayConfig::default();
        let vars = env(&[("JARVIS_PROVIDER", "mistral")]);
        assert!(apply(&mut cfg, &vars).is_err());
    }

    #[test]
    fn pushover_credentials_require_both_keys_and_enabled_flag() {
        let mut notify = NotifyConfig {
            pushover_api_token: Some("tok".to_string()),
            ..NotifyConfig::default()
        };
        assert_eq!(notify.pushover_credentials(), None);
        notify.pushover_user_key = Some("usr".to_string());
        assert_eq!(notify.pushover_credentials(), Some(("tok", "usr")));
        notify.enabled = false;
        assert_eq!(notify.pushover_credentials(), None);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = RelayConfig::default();
        cfg.llm.api_base = Some("ftp://example.com".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.persona.system_prompt = "  ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.server.bind_addr = "not-an-ip".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.server.max_in_flight = 0;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        let err = RelayConfig::load_with_path(Some(missing))
            .await
            .expect_err("explicit path must exist");
        assert!(err.to_string().contains("read config"));
    }

    #[tokio::test]
    async fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.toml");
        tokio::fs::write(&path, "[server]\nrequest_timeout_seconds = 30\n")
            .await
            .expect("write config");
        let (cfg, source) = RelayConfig::load_with_path(Some(path.clone()))
            .await
            .expect("load");
        assert_eq!(source.as_deref(), Some(path.as_path()));
        assert_eq!(cfg.server.request_timeout_seconds, 30);
    }
}
