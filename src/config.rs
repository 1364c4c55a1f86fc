use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::EngineConfig;
use crate::geometry::AccessFace;
use crate::logging::LogFormat;
use crate::placement::PlacementConfig;
use crate::retrieval::RetrievalConfig;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub planning: PlanningConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            planning: PlanningConfig::from_env(),
        }
    }
}

/// Reads `STOWAGE_LOG_FORMAT`.
///
/// Runs before the subscriber exists, so an unknown value is handed back to
/// the caller for reporting once logging is up.
pub fn log_format_from_env() -> Result<LogFormat, String> {
    match env_string("STOWAGE_LOG_FORMAT") {
        Some(raw) => raw.parse::<LogFormat>().map_err(|_| raw),
        None => Ok(LogFormat::default()),
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8000;

    fn from_env() -> Self {
        let host_value =
            env_string("STOWAGE_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, display_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    value = %host_value,
                    error = %err,
                    "Could not parse STOWAGE_API_HOST. Using {}.",
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = parse_port(env_string("STOWAGE_API_PORT"), Self::DEFAULT_PORT);

        let static_dir = env_string("STOWAGE_STATIC_DIR").map(PathBuf::from);
        if let Some(dir) = &static_dir {
            if !dir.is_dir() {
                warn!(path = %dir.display(), "STOWAGE_STATIC_DIR is not a directory; static files will 404");
            }
        }

        Self {
            bind_ip,
            display_host,
            port,
            static_dir,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Directory served under `/static`, if configured.
    pub fn static_dir(&self) -> Option<&PathBuf> {
        self.static_dir.as_ref()
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Planner and commit settings.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanningConfig {
    pub allow_rotation: bool,
    pub epsilon: f64,
    pub access_faces: Vec<AccessFace>,
    pub commit_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            allow_rotation: PlacementConfig::DEFAULT_ALLOW_ROTATION,
            epsilon: PlacementConfig::DEFAULT_EPSILON,
            access_faces: vec![AccessFace::Front],
            commit_attempts: Self::DEFAULT_COMMIT_ATTEMPTS,
            retry_backoff: Duration::from_millis(Self::DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl PlanningConfig {
    const ALLOW_ROTATION_VAR: &'static str = "STOWAGE_ALLOW_ROTATION";
    const EPSILON_VAR: &'static str = "STOWAGE_EPSILON";
    const ACCESS_FACES_VAR: &'static str = "STOWAGE_ACCESS_FACES";
    const COMMIT_ATTEMPTS_VAR: &'static str = "STOWAGE_COMMIT_ATTEMPTS";
    const RETRY_BACKOFF_VAR: &'static str = "STOWAGE_RETRY_BACKOFF_MS";

    const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;
    const DEFAULT_RETRY_BACKOFF_MS: u64 = 25;

    fn from_env() -> Self {
        let defaults = Self::default();

        let allow_rotation = env_string(Self::ALLOW_ROTATION_VAR)
            .and_then(|raw| parse_bool(&raw, Self::ALLOW_ROTATION_VAR))
            .unwrap_or(defaults.allow_rotation);

        let epsilon = load_f64_with_warning(
            Self::EPSILON_VAR,
            defaults.epsilon,
            |value| value > 0.0 && value < 1.0,
            "must be between 0 and 1 (exclusive)",
            "Adjusted tolerance changes which boxes count as touching",
        );

        let access_faces = match env_string(Self::ACCESS_FACES_VAR) {
            Some(raw) => parse_faces(&raw).unwrap_or_else(|err| {
                warn!(value = %raw, error = %err, "Could not parse {}. Using front.", Self::ACCESS_FACES_VAR);
                defaults.access_faces.clone()
            }),
            None => defaults.access_faces.clone(),
        };

        let commit_attempts = load_u64_with_warning(
            Self::COMMIT_ATTEMPTS_VAR,
            u64::from(defaults.commit_attempts),
            |value| (1..=20).contains(&value),
            "must be between 1 and 20",
        ) as u32;

        let retry_backoff = Duration::from_millis(load_u64_with_warning(
            Self::RETRY_BACKOFF_VAR,
            Self::DEFAULT_RETRY_BACKOFF_MS,
            |value| value <= 10_000,
            "must not exceed 10000",
        ));

        Self {
            allow_rotation,
            epsilon,
            access_faces,
            commit_attempts,
            retry_backoff,
        }
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            placement: PlacementConfig::builder()
                .allow_rotation(self.allow_rotation)
                .epsilon(self.epsilon)
                .build(),
            retrieval: RetrievalConfig::default()
                .with_faces(self.access_faces.clone())
                .with_epsilon(self.epsilon),
            commit_attempts: self.commit_attempts,
            retry_backoff: self.retry_backoff,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!(variable = name, error = %err, "Environment access failed. Using default value.");
            None
        }
    }
}

fn parse_port(raw: Option<String>, default: u16) -> u16 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<u16>() {
        Ok(value) if value != 0 => value,
        Ok(_) => {
            warn!("STOWAGE_API_PORT must not be 0. Using {default}.");
            default
        }
        Err(err) => {
            warn!(value = %raw, error = %err, "Could not parse STOWAGE_API_PORT. Using {default}.");
            default
        }
    }
}

/// Parses a comma separated face list, keeping the first occurrence of each face.
fn parse_faces(raw: &str) -> Result<Vec<AccessFace>, String> {
    let mut faces = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let face = part.parse::<AccessFace>()?;
        if !faces.contains(&face) {
            faces.push(face);
        }
    }
    if faces.is_empty() {
        return Err("no access face listed".to_string());
    }
    Ok(faces)
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            warn!(
                variable = var_name,
                value = other,
                "Could not interpret value as boolean. Using default value."
            );
            None
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    note: &str,
) -> f64 {
    match env_string(var_name) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if !validator(value) => {
                warn!(variable = var_name, value = %raw, "Invalid value: {invalid_hint}. Using {default}.");
                default
            }
            Ok(value) => {
                let tolerance = default.abs().max(1.0) * 1e-9;
                if (value - default).abs() > tolerance {
                    info!(variable = var_name, value, "{note}");
                }
                value
            }
            Err(err) => {
                warn!(variable = var_name, value = %raw, error = %err, "Could not parse number. Using {default}.");
                default
            }
        },
        None => default,
    }
}

fn load_u64_with_warning(
    var_name: &str,
    default: u64,
    validator: impl Fn(u64) -> bool,
    invalid_hint: &str,
) -> u64 {
    match env_string(var_name) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if validator(value) => value,
            Ok(_) => {
                warn!(variable = var_name, value = %raw, "Invalid value: {invalid_hint}. Using {default}.");
                default
            }
            Err(err) => {
                warn!(variable = var_name, value = %raw, error = %err, "Could not parse integer. Using {default}.");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_true_values() {
        for raw in ["1", "true", "yes", "y", "on", "TRUE", "Yes", " on ", "  1  "] {
            assert_eq!(parse_bool(raw, "TEST_VAR"), Some(true), "{raw:?}");
        }
    }

    #[test]
    fn test_parse_bool_false_values() {
        for raw in ["0", "false", "no", "n", "off", "FALSE", "No", " off ", "  0  "] {
            assert_eq!(parse_bool(raw, "TEST_VAR"), Some(false), "{raw:?}");
        }
    }

    #[test]
    fn test_parse_bool_invalid_values() {
        assert_eq!(parse_bool("invalid", "TEST_VAR"), None);
        assert_eq!(parse_bool("2", "TEST_VAR"), None);
        assert_eq!(parse_bool("", "TEST_VAR"), None);
    }

    #[test]
    fn test_parse_faces() {
        assert_eq!(
            parse_faces("front, TOP,front"),
            Ok(vec![AccessFace::Front, AccessFace::Top])
        );
        assert!(parse_faces("front,sideways").is_err());
        assert!(parse_faces(" , ").is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(None, 8000), 8000);
        assert_eq!(parse_port(Some("9090".into()), 8000), 9090);
        assert_eq!(parse_port(Some("0".into()), 8000), 8000);
        assert_eq!(parse_port(Some("http".into()), 8000), 8000);
    }

    #[test]
    fn test_engine_config_carries_planning_settings() {
        let planning = PlanningConfig {
            allow_rotation: true,
            epsilon: 1e-4,
            access_faces: vec![AccessFace::Top],
            ..PlanningConfig::default()
        };
        let engine = planning.engine_config();
        assert!(engine.placement.allow_rotation);
        assert_eq!(engine.placement.epsilon, 1e-4);
        assert_eq!(engine.retrieval.faces, vec![AccessFace::Top]);
        assert_eq!(engine.retrieval.epsilon, 1e-4);
        assert_eq!(engine.commit_attempts, 3);
    }
}
