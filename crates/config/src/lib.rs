// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use protocol::{ModelConfig, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};

/// prefix shared by every environment override.
pub const ENV_PREFIX: &str = "MODELGATE_";

/// upper bound on `queue_depth`.
pub const MAX_QUEUE_DEPTH: usize = 1 << 20;

/// upper bound on `workers`.
pub const MAX_WORKERS: usize = 4096;

/// root configuration for a gateway process.
///
/// every field has a default, so an empty (or absent) file is valid.
/// precedence, lowest to highest: defaults, toml file, `MODELGATE_*`
/// environment variables, cli flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// inference worker count; `None` means one per available cpu.
    pub workers: Option<usize>,
    /// requests allowed to wait for a worker before new ones are refused.
    pub queue_depth: usize,
    pub default_batch_size: usize,
    pub require_api_key: bool,
    pub api_keys: Vec<String>,
    /// fallback tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// optional json file holding the startup model list.
    pub models_file: Option<PathBuf>,
    /// startup models declared inline as `[[models]]` tables.
    pub models: Vec<ModelConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
            queue_depth: 64,
            default_batch_size: DEFAULT_BATCH_SIZE,
            require_api_key: false,
            api_keys: Vec::new(),
            log_level: "info".to_string(),
            models_file: None,
            models: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// parse a toml document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: GatewayConfig = toml::from_str(raw).context("failed to parse gateway config")?;
        Ok(cfg)
    }

    /// apply `MODELGATE_*` overrides from an iterator of `(key, value)`
    /// pairs. unrelated keys are ignored.
    ///
    /// setting `MODELGATE_API_KEYS` to a non-empty list also turns on
    /// `require_api_key`.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "HOST" => self.host = value,
                "PORT" => self.port = parse_env(&key, &value)?,
                "WORKERS" => self.workers = Some(parse_env(&key, &value)?),
                "QUEUE_DEPTH" => self.queue_depth = parse_env(&key, &value)?,
                "DEFAULT_BATCH_SIZE" => self.default_batch_size = parse_env(&key, &value)?,
                "REQUIRE_API_KEY" => self.require_api_key = parse_env(&key, &value)?,
                "API_KEYS" => {
                    self.api_keys = value
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect();
                    if !self.api_keys.is_empty() {
                        self.require_api_key = true;
                    }
                }
                "LOG_LEVEL" => self.log_level = value,
                "MODELS_FILE" => self.models_file = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    /// reject combinations the gateway cannot serve with.
    pub fn validate(&self) -> Result<()> {
        if self.default_batch_size == 0 {
            bail!("default_batch_size must be at least 1");
        }
        if self.workers == Some(0) {
            bail!("workers must be at least 1 when set");
        }
        if self.workers.is_some_and(|w| w > MAX_WORKERS) {
            bail!("workers must be at most {MAX_WORKERS}");
        }
        if self.queue_depth > MAX_QUEUE_DEPTH {
            bail!("queue_depth must be at most {MAX_QUEUE_DEPTH}");
        }
        if self.require_api_key && self.api_keys.is_empty() {
            bail!("require_api_key is set but no api_keys are configured");
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| anyhow!("invalid host '{}': {e}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// startup models: inline `[[models]]` entries first, then the entries
    /// of `models_file` (if set), in file order.
    pub fn bootstrap_models(&self) -> Result<Vec<ModelConfig>> {
        let mut models = self.models.clone();
        if let Some(path) = &self.models_file {
            models.extend(load_models_file(path)?);
        }
        Ok(models)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid value '{value}' for {key}: {e}"))
}

/// read a toml config file.
pub fn load_from_file(path: &Path) -> Result<GatewayConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    GatewayConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))
}

/// resolve the effective config: file (if any) plus process environment.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig> {
    let mut cfg = match path {
        Some(path) => load_from_file(path)?,
        None => GatewayConfig::default(),
    };
    cfg.apply_env(std::env::vars())?;
    Ok(cfg)
}

/// read a json array of `{name, path, type, version}` records.
pub fn load_models_file(path: &Path) -> Result<Vec<ModelConfig>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read models file {}", path.display()))?;
    let models: Vec<ModelConfig> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse models file {}", path.display()))?;
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root() -> PathBuf {
        let mut dir = env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.push(format!("modelgate-config-test-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, GatewayConfig::default());
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.default_batch_size, 32);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inline_models_default_their_version() {
        let cfg = GatewayConfig::from_toml_str(
            r#"
            port = 9000
            workers = 2

            [[models]]
            name = "iris"
            path = "/models/iris.json"
            type = "sklearn"

            [[models]]
            name = "resnet"
            path = "/models/resnet.json"
            type = "onnx"
            version = "v3"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.workers, Some(2));
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.models[0].version, "latest");
        assert_eq!(cfg.models[1].version, "v3");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = GatewayConfig::default();
        cfg.apply_env(vars(&[
            ("MODELGATE_PORT", "8081"),
            ("MODELGATE_WORKERS", "3"),
            ("MODELGATE_API_KEYS", "alpha, beta,,"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.workers, Some(3));
        assert_eq!(cfg.api_keys, vec!["alpha".to_string(), "beta".to_string()]);
        assert!(cfg.require_api_key);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut cfg = GatewayConfig::default();
        let err = cfg
            .apply_env(vars(&[("MODELGATE_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("MODELGATE_PORT"));
    }

    #[test]
    fn validate_rejects_key_requirement_without_keys() {
        let cfg = GatewayConfig {
            require_api_key: true,
            ..GatewayConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GatewayConfig {
            host: "not-an-ip".into(),
            ..GatewayConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_caps_pool_sizes() {
        let mut cfg = GatewayConfig::default();
        cfg.apply_env(vars(&[("MODELGATE_QUEUE_DEPTH", "18446744073709551615")]))
            .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("queue_depth"));

        let cfg = GatewayConfig {
            queue_depth: MAX_QUEUE_DEPTH,
            workers: Some(MAX_WORKERS + 1),
            ..GatewayConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("workers"));

        let cfg = GatewayConfig {
            queue_depth: MAX_QUEUE_DEPTH,
            workers: Some(MAX_WORKERS),
            ..GatewayConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bootstrap_merges_inline_and_file_models() {
        let root = temp_root();
        let models_path = root.join("models.json");
        fs::write(
            &models_path,
            r#"[{"name":"a","path":"/m/a.json","type":"pytorch","version":"v1"},
                {"name":"b","path":"/m/b.json","type":"onnx"}]"#,
        )
        .unwrap();

        let cfg = GatewayConfig {
            models: vec![ModelConfig {
                name: "inline".into(),
                path: "/m/inline.json".into(),
                kind: "sklearn".into(),
                version: "latest".into(),
            }],
            models_file: Some(models_path),
            ..GatewayConfig::default()
        };

        let names: Vec<String> = cfg
            .bootstrap_models()
            .unwrap()
            .into_iter()
            .map(|m| format!("{}:{}", m.name, m.version))
            .collect();
        assert_eq!(names, vec!["inline:latest", "a:v1", "b:latest"]);

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_models_file_is_an_error() {
        let root = temp_root();
        let cfg = GatewayConfig {
            models_file: Some(root.join("absent.json")),
            ..GatewayConfig::default()
        };
        assert!(cfg.bootstrap_models().is_err());
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn load_from_file_reads_toml() {
        let root = temp_root();
        let path = root.join("modelgate.toml");
        fs::write(&path, "host = \"127.0.0.1\"\nqueue_depth = 5\n").unwrap();

        let cfg = load_from_file(&path).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.queue_depth, 5);
        assert_eq!(
            cfg.socket_addr().unwrap(),
            "127.0.0.1:8000".parse().unwrap()
        );

        fs::remove_dir_all(root).ok();
    }
}
