use std::{collections::HashSet, env, fmt, net::SocketAddr, time::Duration};

use thiserror::Error;
use uuid::Uuid;

use crate::domain::model::{AuthenticatedUser, Prompt, UserRole};
use crate::logging::LogFormat;
use crate::mcp::server::ServerSettings;

const DEFAULT_API_USER: &str = "mcp-agent";
const SYSTEM_PROMPT_NAME: &str = "system";

/// A bearer token and the identity it authenticates.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub user: AuthenticatedUser,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Vec<Credential>,
    pub bind_addr: String,
    pub bind_port: u16,
    pub slow_operation_threshold: Duration,
    pub request_timeout: Duration,
    pub resources_list_timeout: Duration,
    pub system_prompt: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SPEXUS_API_TOKEN or SPEXUS_API_TOKENS is required and must not be empty")]
    MissingApiToken,
    #[error("SPEXUS_API_TOKENS entries must be token:username:role, got '{0}'")]
    InvalidCredential(String),
    #[error("the same bearer token is configured twice")]
    DuplicateToken,
    #[error("user '{0}' is configured twice")]
    DuplicateUser(String),
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("{0} must be a positive integer")]
    InvalidDuration(&'static str),
    #[error("SPEXUS_LOG_FORMAT must be 'compact' or 'json'")]
    InvalidLogFormat,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut credentials = Vec::new();
        if let Some(token) = value("SPEXUS_API_TOKEN") {
            let username = value("SPEXUS_API_USER").unwrap_or_else(|| DEFAULT_API_USER.to_string());
            credentials.push(Credential {
                token,
                user: AuthenticatedUser::new(username, UserRole::Administrator),
            });
        }
        if let Some(entries) = value("SPEXUS_API_TOKENS") {
            for entry in entries.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
                credentials.push(parse_credential(entry)?);
            }
        }
        if credentials.is_empty() {
            return Err(ConfigError::MissingApiToken);
        }
        check_unique(&credentials)?;

        let bind_addr = value("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = value("BIND_PORT")
            .map(|port| port.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let log_format = value("SPEXUS_LOG_FORMAT")
            .map(|format| LogFormat::parse(&format).ok_or(ConfigError::InvalidLogFormat))
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            credentials,
            bind_addr,
            bind_port,
            slow_operation_threshold: Duration::from_millis(positive(
                value("SPEXUS_SLOW_OPERATION_MS"),
                "SPEXUS_SLOW_OPERATION_MS",
                100,
            )?),
            request_timeout: Duration::from_secs(positive(
                value("SPEXUS_REQUEST_TIMEOUT_SECS"),
                "SPEXUS_REQUEST_TIMEOUT_SECS",
                60,
            )?),
            resources_list_timeout: Duration::from_secs(positive(
                value("SPEXUS_RESOURCES_LIST_TIMEOUT_SECS"),
                "SPEXUS_RESOURCES_LIST_TIMEOUT_SECS",
                30,
            )?),
            system_prompt: value("SPEXUS_SYSTEM_PROMPT"),
            log_format,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            slow_operation_threshold: self.slow_operation_threshold,
            resources_list_timeout: self.resources_list_timeout,
        }
    }

    pub fn users(&self) -> Vec<AuthenticatedUser> {
        self.credentials
            .iter()
            .map(|credential| credential.user.clone())
            .collect()
    }

    /// The configured system prompt, if any, as the active prompt record.
    pub fn seed_prompts(&self) -> Vec<Prompt> {
        self.system_prompt
            .iter()
            .map(|content| Prompt {
                id: Uuid::new_v4(),
                name: SYSTEM_PROMPT_NAME.to_string(),
                title: "System instructions".to_string(),
                description: Some("Instructions returned by initialize".to_string()),
                content: content.clone(),
                is_active: true,
            })
            .collect()
    }
}

fn parse_credential(entry: &str) -> Result<Credential, ConfigError> {
    let invalid = || ConfigError::InvalidCredential(entry.to_string());

    let mut parts = entry.split(':').map(str::trim);
    let (Some(token), Some(username), Some(role), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    if token.is_empty() || username.is_empty() {
        return Err(invalid());
    }
    let role = UserRole::parse(role).ok_or_else(invalid)?;

    Ok(Credential {
        token: token.to_string(),
        user: AuthenticatedUser::new(username, role),
    })
}

fn check_unique(credentials: &[Credential]) -> Result<(), ConfigError> {
    let mut tokens = HashSet::new();
    let mut usernames = HashSet::new();
    for credential in credentials {
        if !tokens.insert(credential.token.as_str()) {
            return Err(ConfigError::DuplicateToken);
        }
        if !usernames.insert(credential.user.username.as_str()) {
            return Err(ConfigError::DuplicateUser(credential.user.username.clone()));
        }
    }
    Ok(())
}

fn positive(raw: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or(ConfigError::InvalidDuration(key)),
    }
}
