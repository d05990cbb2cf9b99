//! Configuration for the pipeline, built from defaults plus environment
//! overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Upstream PostgreSQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Table the producer pages through, in `id` order.
    pub table: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
            table: "items".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Apply environment variable overrides.
    ///
    /// Supported env vars: `PG_HOST`, `PG_PORT`, `PG_USER`, `PG_PASSWORD`,
    /// `PG_DATABASE`, `PG_TABLE`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("PG_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("PG_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("PG_USER") {
            self.user = val;
        }
        if let Ok(val) = std::env::var("PG_PASSWORD") {
            self.password = val;
        }
        if let Ok(val) = std::env::var("PG_DATABASE") {
            self.database = val;
        }
        if let Ok(val) = std::env::var("PG_TABLE") {
            self.table = val;
        }
        self
    }

    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database);
        config
    }
}

/// Top-level settings for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub upstream: UpstreamConfig,
    /// Base URL of the remote delay endpoint.
    pub httpbin_url: String,
    /// Path of the queue file; created fresh each run.
    pub queue_db_path: PathBuf,
    /// When true, consumers run a deterministic CPU burn after each
    /// completed item to exercise multi-core scheduling.
    pub mock_cpu_load: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            httpbin_url: "http://localhost:8080".to_string(),
            queue_db_path: PathBuf::from("work_queue.db"),
            mock_cpu_load: false,
        }
    }
}

impl Settings {
    /// Apply environment variable overrides.
    ///
    /// Supported env vars: the `PG_*` set, `HTTPBIN_URL`, `QUEUE_DB_PATH`,
    /// `MOCK_CPU_LOAD`.
    pub fn with_env_overrides(mut self) -> Self {
        self.upstream = self.upstream.with_env_overrides();
        if let Ok(val) = std::env::var("HTTPBIN_URL") {
            self.httpbin_url = val;
        }
        if let Ok(val) = std::env::var("QUEUE_DB_PATH") {
            self.queue_db_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("MOCK_CPU_LOAD") {
            self.mock_cpu_load = val.eq_ignore_ascii_case("true") || val == "1";
        }
        self
    }
}

/// Map `LOG_LEVEL` (`debug|info|warn|error|fatal`) to a default tracing
/// filter directive. Unknown or unset values fall back to `info`; `RUST_LOG`
/// still wins when set.
pub fn log_filter() -> String {
    level_directive(std::env::var("LOG_LEVEL").ok().as_deref())
}

fn level_directive(level: Option<&str>) -> String {
    let level = match level {
        Some("debug") => "debug",
        Some("warn") => "warn",
        // tracing has no fatal level; fatal conditions surface as errors.
        Some("error") | Some("fatal") => "error",
        _ => "info",
    };
    format!("drainpipe={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.httpbin_url, "http://localhost:8080");
        assert_eq!(settings.queue_db_path, PathBuf::from("work_queue.db"));
        assert!(!settings.mock_cpu_load);
        assert_eq!(settings.upstream.port, 5432);
        assert_eq!(settings.upstream.table, "items");
    }

    #[test]
    fn test_level_directive_mapping() {
        assert_eq!(level_directive(Some("debug")), "drainpipe=debug");
        assert_eq!(level_directive(Some("warn")), "drainpipe=warn");
        assert_eq!(level_directive(Some("error")), "drainpipe=error");
        assert_eq!(level_directive(Some("fatal")), "drainpipe=error");
        assert_eq!(level_directive(Some("verbose")), "drainpipe=info");
        assert_eq!(level_directive(None), "drainpipe=info");
    }

    #[test]
    fn test_pg_config_assembly() {
        let upstream = UpstreamConfig {
            host: "db.internal".to_string(),
            port: 5433,
            ..UpstreamConfig::default()
        };
        let config = upstream.pg_config();
        assert_eq!(config.get_ports(), &[5433]);
        assert_eq!(config.get_dbname(), Some("postgres"));
    }

    #[test]
    fn test_env_overrides_applied() {
        // Only this test touches these variables; the passthrough ones are
        // cleared up front in case the ambient environment sets them.
        std::env::remove_var("PG_PORT");
        std::env::remove_var("HTTPBIN_URL");
        std::env::set_var("PG_HOST", "upstream.test");
        std::env::set_var("PG_TABLE", "staging_rows");
        std::env::set_var("QUEUE_DB_PATH", "/tmp/override.db");
        std::env::set_var("MOCK_CPU_LOAD", "true");

        let settings = Settings::default().with_env_overrides();
        assert_eq!(settings.upstream.host, "upstream.test");
        assert_eq!(settings.upstream.table, "staging_rows");
        assert_eq!(settings.queue_db_path, PathBuf::from("/tmp/override.db"));
        assert!(settings.mock_cpu_load);

        // Unset variables fall through to the defaults.
        assert_eq!(settings.upstream.port, 5432);
        assert_eq!(settings.httpbin_url, "http://localhost:8080");

        // Anything other than "true"/"1" leaves the CPU burn disabled.
        std::env::set_var("MOCK_CPU_LOAD", "yes");
        assert!(!Settings::default().with_env_overrides().mock_cpu_load);

        std::env::remove_var("PG_HOST");
        std::env::remove_var("PG_TABLE");
        std::env::remove_var("QUEUE_DB_PATH");
        std::env::remove_var("MOCK_CPU_LOAD");
    }
}
