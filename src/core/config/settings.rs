use super::parsing::{
    env_optional, env_or_default, is_http_url, parse_bool, parse_cors_origins, parse_environment,
    parse_u16, parse_u64, parse_usize,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, GradingSettings, PortalSettings, RedisSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, StatisticsSettings,
    TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("GRADEBOARD_HOST", "0.0.0.0");
        let port = env_or_default("GRADEBOARD_PORT", "8080");

        let environment = parse_environment(
            env_optional("GRADEBOARD_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("GRADEBOARD_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Gradeboard");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("GRADEBOARD_API_PREFIX", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let portal_base_url = env_or_default("PORTAL_API_BASE_URL", "http://localhost:5000/api");
        let portal_token = env_or_default("PORTAL_API_TOKEN", "");
        let portal_timeout_seconds = parse_u64(
            "PORTAL_API_TIMEOUT_SECONDS",
            env_or_default("PORTAL_API_TIMEOUT_SECONDS", "30"),
        )?;

        let cache_ttl_seconds = parse_u64(
            "GRADING_CACHE_TTL_SECONDS",
            env_or_default("GRADING_CACHE_TTL_SECONDS", "60"),
        )?;
        let poll_interval_seconds = parse_u64(
            "GRADING_POLL_INTERVAL_SECONDS",
            env_or_default("GRADING_POLL_INTERVAL_SECONDS", "2"),
        )?;
        let poll_timeout_seconds = parse_u64(
            "GRADING_POLL_TIMEOUT_SECONDS",
            env_or_default("GRADING_POLL_TIMEOUT_SECONDS", "300"),
        )?;

        let statistics_concurrency = parse_usize(
            "GRADEBOARD_STATISTICS_CONCURRENCY",
            env_or_default("GRADEBOARD_STATISTICS_CONCURRENCY", "16"),
        )?;
        let top_n = parse_usize("GRADEBOARD_TOP_N", env_or_default("GRADEBOARD_TOP_N", "20"))?;

        let log_level = env_or_default("GRADEBOARD_LOG_LEVEL", "info");
        let json = env_optional("GRADEBOARD_LOG_JSON")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let prometheus_enabled = env_optional("PROMETHEUS_ENABLED")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            portal: PortalSettings {
                base_url: portal_base_url,
                token: portal_token,
                timeout_seconds: portal_timeout_seconds,
            },
            grading: GradingSettings {
                poll_interval_seconds,
                poll_timeout_seconds,
                cache_ttl_seconds,
            },
            statistics: StatisticsSettings { concurrency: statistics_concurrency, top_n },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn portal(&self) -> &PortalSettings {
        &self.portal
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn statistics(&self) -> &StatisticsSettings {
        &self.statistics
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(&self.portal.base_url) {
            return Err(ConfigError::InvalidValue {
                field: "PORTAL_API_BASE_URL",
                value: self.portal.base_url.clone(),
            });
        }

        if self.portal.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PORTAL_API_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.grading.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.grading.poll_timeout_seconds < self.grading.poll_interval_seconds {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_POLL_TIMEOUT_SECONDS",
                value: self.grading.poll_timeout_seconds.to_string(),
            });
        }

        if self.statistics.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADEBOARD_STATISTICS_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.statistics.top_n == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADEBOARD_TOP_N",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.portal.token.is_empty() {
            return Err(ConfigError::MissingSecret("PORTAL_API_TOKEN"));
        }

        Ok(())
    }
}
