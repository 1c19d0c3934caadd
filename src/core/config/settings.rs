use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_coordinate_origin, parse_cors_origins,
    parse_environment, parse_positive_usize, parse_score_scale, parse_string_list, parse_u16,
    parse_u32, parse_u64,
};
use super::types::{
    AnnotationSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, GradingSettings,
    OcrSettings, PipelineSettings, RuntimeSettings, S3Settings, ServerHost, ServerPort,
    ServerSettings, Settings, TelemetrySettings,
};

const DEFAULT_CONTENT_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg"];

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("AUTOGRADER_HOST", "0.0.0.0");
        let port = env_or_default("AUTOGRADER_PORT", "8000");

        let environment = parse_environment(
            env_optional("AUTOGRADER_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("AUTOGRADER_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Autograder API");
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "autograder");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "autograder_db");
        let database_url = env_optional("DATABASE_URL");

        let s3_endpoint = env_or_default("S3_ENDPOINT", "https://s3.amazonaws.com");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_bucket = env_or_default("S3_BUCKET", "autograder-answer-sheets");
        let s3_region = env_or_default("S3_REGION", "eu-west-3");
        let s3_timeout_seconds =
            parse_u64("S3_TIMEOUT_SECONDS", env_or_default("S3_TIMEOUT_SECONDS", "30"))?;

        let ocr_api_key = env_or_default("OCR_API_KEY", "");
        let ocr_base_url = env_or_default("OCR_BASE_URL", "https://www.datalab.to/api/v1");
        let ocr_timeout_seconds =
            parse_u64("OCR_TIMEOUT_SECONDS", env_or_default("OCR_TIMEOUT_SECONDS", "120"))?;
        let ocr_poll_interval_seconds = parse_u64(
            "OCR_POLL_INTERVAL_SECONDS",
            env_or_default("OCR_POLL_INTERVAL_SECONDS", "2"),
        )?;
        let ocr_max_poll_attempts =
            parse_u32("OCR_MAX_POLL_ATTEMPTS", env_or_default("OCR_MAX_POLL_ATTEMPTS", "60"))?;

        let grading_service_url =
            env_or_default("GRADING_SERVICE_URL", "http://flask-service:5000");
        let grading_timeout_seconds =
            parse_u64("GRADING_TIMEOUT_SECONDS", env_or_default("GRADING_TIMEOUT_SECONDS", "120"))?;

        let font_path = env_optional("ANNOTATION_FONT_PATH").map(PathBuf::from);
        let score_scale = parse_score_scale(env_optional("SCORE_SCALE"))?;
        let coordinate_origin = parse_coordinate_origin(env_optional("COORDINATE_ORIGIN"))?;

        let correction_concurrency = parse_positive_usize(
            "CORRECTION_CONCURRENCY",
            env_or_default("CORRECTION_CONCURRENCY", "1"),
        )?;
        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "20"))?;
        let allowed_content_types =
            parse_string_list(env_optional("ALLOWED_SHEET_CONTENT_TYPES"), DEFAULT_CONTENT_TYPES);

        let log_level = env_or_default("LOG_LEVEL", "info");
        let json = env_optional("LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
                timeout_seconds: s3_timeout_seconds,
            },
            ocr: OcrSettings {
                api_key: ocr_api_key,
                base_url: ocr_base_url,
                timeout_seconds: ocr_timeout_seconds,
                poll_interval_seconds: ocr_poll_interval_seconds,
                max_poll_attempts: ocr_max_poll_attempts,
            },
            grading: GradingSettings {
                service_url: grading_service_url,
                timeout_seconds: grading_timeout_seconds,
            },
            annotation: AnnotationSettings { font_path, score_scale, coordinate_origin },
            pipeline: PipelineSettings {
                correction_concurrency,
                max_upload_size_mb,
                allowed_content_types,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn annotation(&self) -> &AnnotationSettings {
        &self.annotation
    }

    pub(crate) fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.allowed_content_types.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_SHEET_CONTENT_TYPES",
                value: String::from("<empty>"),
            });
        }

        for content_type in &self.pipeline.allowed_content_types {
            if !is_supported_sheet_content_type(content_type) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_SHEET_CONTENT_TYPES",
                    value: content_type.clone(),
                });
            }
        }

        if self.ocr.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.ocr.max_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_MAX_POLL_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        for (field, value) in [
            ("S3_TIMEOUT_SECONDS", self.s3.timeout_seconds),
            ("OCR_TIMEOUT_SECONDS", self.ocr.timeout_seconds),
            ("GRADING_TIMEOUT_SECONDS", self.grading.timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue { field, value: "0".to_string() });
            }
        }

        if let Some(path) = &self.annotation.font_path {
            if !path.is_file() {
                return Err(ConfigError::InvalidValue {
                    field: "ANNOTATION_FONT_PATH",
                    value: path.display().to_string(),
                });
            }
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if !self.s3.is_configured() {
            return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
        }
        if self.ocr.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OCR_API_KEY"));
        }
        if self.grading.service_url.is_empty() {
            return Err(ConfigError::MissingSecret("GRADING_SERVICE_URL"));
        }

        Ok(())
    }
}

fn is_supported_sheet_content_type(content_type: &str) -> bool {
    matches!(content_type, "application/pdf" | "image/png" | "image/jpeg" | "image/jpg")
}
