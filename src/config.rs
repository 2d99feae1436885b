use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

use secrecy::SecretString;

use crate::{
    transport::{Credentials, Endpoint},
    Error, SailResult,
};

/// Agent settings, loaded from JSON. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name, also used as the resource when logging in and joining.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Room to join after login, if any.
    #[serde(default)]
    pub room: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            connection: ConnectionConfig::default(),
            credentials: CredentialsConfig::default(),
            room: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ConnectionConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

// plain strings on disk; wrapped in a SecretString before use
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl CredentialsConfig {
    pub fn to_credentials(&self, resource: &str) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: SecretString::from(self.password.clone()),
            resource: resource.to_string(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> SailResult<T> {
    let file = File::open(path.as_ref()).map_err(|e| {
        Error::config(format!(
            "Failed to open config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> SailResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_name() -> String {
    "SailAgent".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    crate::agent::DEFAULT_PORT
}
