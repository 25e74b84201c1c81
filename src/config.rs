use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Effective configuration, read once at startup
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub export_interval_ms: u64,
    pub shutdown_timeout_secs: u64,
    /// Finished spans waiting for export; spans beyond this are dropped
    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
}

impl TelemetryConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:4318".to_string(),
            service_name: "products-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            export_interval_ms: 5000,
            shutdown_timeout_secs: 5,
            max_queue_size: 2048,
            max_export_batch_size: 512,
        }
    }
}

/// Flat view of the environment variables, keys lowercased by `config`
#[derive(Debug, Deserialize)]
struct EnvSettings {
    server_host: String,
    server_port: u16,
    server_request_timeout_secs: u64,
    otel_enabled: String,
    otel_exporter_otlp_endpoint: String,
    otel_service_name: String,
    otel_environment: String,
    otel_export_interval_ms: u64,
    otel_shutdown_timeout_secs: u64,
    otel_bsp_max_queue_size: usize,
    otel_bsp_max_export_batch_size: usize,
    log_level: String,
}

pub fn load_config() -> anyhow::Result<Config> {
    load_from(config::Environment::default())
}

/// Load from the given environment source, applying defaults for unset or
/// empty variables
pub fn load_from(environment: config::Environment) -> anyhow::Result<Config> {
    let settings = config::Config::builder()
        .set_default("server_host", "0.0.0.0")?
        .set_default("server_port", "8080")?
        .set_default("server_request_timeout_secs", "30")?
        .set_default("otel_enabled", "true")?
        .set_default("otel_exporter_otlp_endpoint", "http://localhost:4318")?
        .set_default("otel_service_name", "products-api")?
        .set_default("otel_environment", "development")?
        .set_default("otel_export_interval_ms", "5000")?
        .set_default("otel_shutdown_timeout_secs", "5")?
        .set_default("otel_bsp_max_queue_size", "2048")?
        .set_default("otel_bsp_max_export_batch_size", "512")?
        .set_default("log_level", "debug")?
        .add_source(environment.ignore_empty(true))
        .build()?;

    let env: EnvSettings = settings.try_deserialize()?;

    let cfg = Config {
        server: ServerConfig {
            host: env.server_host,
            port: env.server_port,
            request_timeout_secs: env.server_request_timeout_secs,
        },
        telemetry: TelemetryConfig {
            enabled: parse_flag(&env.otel_enabled),
            endpoint: normalize_endpoint(&env.otel_exporter_otlp_endpoint),
            service_name: env.otel_service_name,
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env.otel_environment,
            export_interval_ms: env.otel_export_interval_ms,
            shutdown_timeout_secs: env.otel_shutdown_timeout_secs,
            max_queue_size: env.otel_bsp_max_queue_size,
            max_export_batch_size: env.otel_bsp_max_export_batch_size,
        },
        log_level: env.log_level,
    };
    validate_config(&cfg)?;

    Ok(cfg)
}

/// `true`, `1` and `yes` (any case) enable; anything else disables
fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.host.is_empty() {
        anyhow::bail!("SERVER_HOST cannot be empty");
    }

    if cfg.server.request_timeout_secs == 0 {
        anyhow::bail!("SERVER_REQUEST_TIMEOUT_SECS must be positive");
    }

    if cfg.telemetry.service_name.trim().is_empty() {
        anyhow::bail!("OTEL_SERVICE_NAME cannot be empty");
    }

    if cfg.telemetry.export_interval_ms == 0 {
        anyhow::bail!("OTEL_EXPORT_INTERVAL_MS must be positive");
    }

    if cfg.telemetry.shutdown_timeout_secs == 0 {
        anyhow::bail!("OTEL_SHUTDOWN_TIMEOUT_SECS must be positive");
    }

    if cfg.telemetry.max_queue_size == 0 || cfg.telemetry.max_export_batch_size == 0 {
        anyhow::bail!("OTEL_BSP_MAX_QUEUE_SIZE and OTEL_BSP_MAX_EXPORT_BATCH_SIZE must be positive");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_from(config::Environment::default().source(Some(source)))
    }

    #[test]
    fn test_defaults() {
        let cfg = load(&[]).unwrap();

        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.request_timeout(), Duration::from_secs(30));
        assert!(cfg.telemetry.enabled);
        assert_eq!(cfg.telemetry.endpoint, "http://localhost:4318");
        assert_eq!(cfg.telemetry.service_name, "products-api");
        assert_eq!(cfg.telemetry.environment, "development");
        assert_eq!(cfg.telemetry.export_interval(), Duration::from_secs(5));
        assert_eq!(cfg.telemetry.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.telemetry.max_queue_size, 2048);
        assert_eq!(cfg.telemetry.max_export_batch_size, 512);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("SERVER_PORT", "9090"),
            ("OTEL_ENABLED", "no"),
            ("OTEL_SERVICE_NAME", "catalog"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "collector:4318/"),
        ])
        .unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert!(!cfg.telemetry.enabled);
        assert_eq!(cfg.telemetry.service_name, "catalog");
        assert_eq!(cfg.telemetry.endpoint, "http://collector:4318");
    }

    #[test]
    fn test_empty_value_uses_default() {
        let cfg = load(&[("SERVER_HOST", ""), ("OTEL_ENVIRONMENT", "")]).unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.telemetry.environment, "development");
    }

    #[test]
    fn test_flag_parsing() {
        for on in ["true", "TRUE", "1", "yes", "Yes"] {
            assert!(parse_flag(on), "{on}");
        }
        for off in ["false", "0", "no", "off", "enabled"] {
            assert!(!parse_flag(off), "{off}");
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("SERVER_PORT", "not-a-port")]).is_err());
        assert!(load(&[("OTEL_SERVICE_NAME", "   ")]).is_err());
        assert!(load(&[("OTEL_SHUTDOWN_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("OTEL_BSP_MAX_QUEUE_SIZE", "0")]).is_err());
    }
}
