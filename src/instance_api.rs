use serde::{Deserialize, Serialize};
use serde_json::json;
use ureq::Agent;

use crate::client::{ApiError, Method, Payload, api_agent, base_url};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub rabbitmq_version: String,
    #[serde(default)]
    pub erlang_version: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub disk_size: i64,
    #[serde(default)]
    pub additional_disk_size: i64,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub hostname_internal: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub rabbitmq_versions: Vec<String>,
    #[serde(default)]
    pub erlang_versions: Vec<String>,
}

/// Client for the instance-scoped API, authenticated with a per-instance key.
pub struct InstanceApiClient {
    api_key: String,
    base_url: String,
    agent: Agent,
}

impl InstanceApiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, base_url())
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            agent: api_agent(),
        }
    }

    fn call(&self, method: Method, endpoint: &str, payload: Payload) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        crate::client::request(&self.agent, method, &url, &self.api_key, payload)
    }

    fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
        serde_json::from_str(body)
            .map_err(|err| ApiError::Transport(format!("decode response: {err}")))
    }

    pub fn list_nodes(&self) -> Result<Vec<Node>, ApiError> {
        Self::parse(&self.call(Method::Get, "/nodes", Payload::Empty)?)
    }

    /// RabbitMQ and Erlang versions the instance can be upgraded to.
    pub fn available_versions(&self) -> Result<VersionInfo, ApiError> {
        Self::parse(&self.call(Method::Get, "/nodes/available-versions", Payload::Empty)?)
    }

    pub fn list_plugins(&self) -> Result<Vec<Plugin>, ApiError> {
        Self::parse(&self.call(Method::Get, "/plugins", Payload::Empty)?)
    }

    pub fn rotate_password(&self) -> Result<(), ApiError> {
        self.call(Method::Post, "/account/rotate-password", Payload::Empty)?;
        Ok(())
    }

    pub fn rotate_api_key(&self) -> Result<(), ApiError> {
        self.call(Method::Post, "/account/rotate-apikey", Payload::Empty)?;
        Ok(())
    }

    fn node_action(&self, endpoint: &str, nodes: &[String]) -> Result<(), ApiError> {
        if nodes.is_empty() {
            self.call(Method::Post, endpoint, Payload::Empty)?;
        } else {
            let body = json!({ "nodes": nodes });
            self.call(Method::Post, endpoint, Payload::Json(&body))?;
        }
        Ok(())
    }

    pub fn restart_rabbitmq(&self, nodes: &[String]) -> Result<(), ApiError> {
        self.node_action("/actions/restart", nodes)
    }

    pub fn restart_management(&self, nodes: &[String]) -> Result<(), ApiError> {
        self.node_action("/actions/mgmt-restart", nodes)
    }

    pub fn stop(&self, nodes: &[String]) -> Result<(), ApiError> {
        self.node_action("/actions/stop", nodes)
    }

    pub fn start(&self, nodes: &[String]) -> Result<(), ApiError> {
        self.node_action("/actions/start", nodes)
    }

    pub fn reboot(&self, nodes: &[String]) -> Result<(), ApiError> {
        self.node_action("/actions/reboot", nodes)
    }

    pub fn restart_cluster(&self) -> Result<(), ApiError> {
        self.call(Method::Post, "/actions/cluster-restart", Payload::Empty)?;
        Ok(())
    }

    pub fn stop_cluster(&self) -> Result<(), ApiError> {
        self.call(Method::Post, "/actions/cluster-stop", Payload::Empty)?;
        Ok(())
    }

    pub fn start_cluster(&self) -> Result<(), ApiError> {
        self.call(Method::Post, "/actions/cluster-start", Payload::Empty)?;
        Ok(())
    }

    pub fn upgrade_erlang(&self) -> Result<(), ApiError> {
        self.call(Method::Post, "/actions/upgrade-erlang", Payload::Empty)?;
        Ok(())
    }

    pub fn upgrade_rabbitmq(&self, version: Option<&str>) -> Result<(), ApiError> {
        match version {
            Some(version) => {
                let body = json!({ "version": version });
                self.call(Method::Post, "/actions/upgrade-rabbitmq", Payload::Json(&body))?;
            }
            None => {
                self.call(Method::Post, "/actions/upgrade-rabbitmq", Payload::Empty)?;
            }
        }
        Ok(())
    }

    /// Upgrade RabbitMQ and Erlang together, always to the latest compatible
    /// versions.
    pub fn upgrade_rabbitmq_erlang(&self) -> Result<(), ApiError> {
        self.call(
            Method::Post,
            "/actions/upgrade-rabbitmq-erlang",
            Payload::Empty,
        )?;
        Ok(())
    }

    /// Versions a pending `upgrade-all` would move to.
    pub fn upgrade_versions(&self) -> Result<serde_json::Map<String, serde_json::Value>, ApiError> {
        Self::parse(&self.call(
            Method::Get,
            "/actions/new-rabbitmq-erlang-versions",
            Payload::Empty,
        )?)
    }
}
