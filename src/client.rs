use std::env;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ureq::Agent;

const DEFAULT_BASE_URL: &str = "https://customer.mqcloud.io/api";
const BASE_URL_ENV: &str = "MQCLOUD_API_URL";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub(crate) enum Payload<'a> {
    Empty,
    Form(&'a [(&'a str, String)]),
    Json(&'a Value),
}

pub(crate) enum Method {
    Get,
    Post,
    Put,
    Delete,
}

pub(crate) fn api_agent() -> Agent {
    // Non-2xx statuses are mapped to ApiError below, with the body's error
    // field attached when the server provides one.
    Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into()
}

pub(crate) fn base_url() -> String {
    env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn auth_header(api_key: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!(":{api_key}"));
    format!("Basic {token}")
}

pub(crate) fn request(
    agent: &Agent,
    method: Method,
    url: &str,
    api_key: &str,
    payload: Payload,
) -> Result<String, ApiError> {
    let auth = auth_header(api_key);
    let result = match (method, payload) {
        (Method::Get, _) => agent.get(url).header("Authorization", &auth).call(),
        (Method::Delete, _) => agent.delete(url).header("Authorization", &auth).call(),
        (Method::Post, Payload::Empty) => {
            agent.post(url).header("Authorization", &auth).send_empty()
        }
        (Method::Post, Payload::Form(fields)) => agent
            .post(url)
            .header("Authorization", &auth)
            .send_form(fields.iter().map(|(name, value)| (*name, value.as_str()))),
        (Method::Post, Payload::Json(body)) => {
            agent.post(url).header("Authorization", &auth).send_json(body)
        }
        (Method::Put, Payload::Empty) => agent.put(url).header("Authorization", &auth).send_empty(),
        (Method::Put, Payload::Form(fields)) => agent
            .put(url)
            .header("Authorization", &auth)
            .send_form(fields.iter().map(|(name, value)| (*name, value.as_str()))),
        (Method::Put, Payload::Json(body)) => {
            agent.put(url).header("Authorization", &auth).send_json(body)
        }
    };

    let mut resp = result.map_err(|err| ApiError::Transport(err.to_string()))?;
    let status = resp.status().as_u16();
    let body = resp
        .body_mut()
        .read_to_string()
        .map_err(|err| ApiError::Transport(format!("read response: {err}")))?;

    if status >= 400 {
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.error)
            .filter(|message| !message.is_empty())
            .unwrap_or(body);
        return Err(ApiError::Status { status, message });
    }

    Ok(body)
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body)
        .map_err(|err| ApiError::Transport(format!("decode response: {err}")))
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub plan: String,
    pub region: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub providerid: String,
    #[serde(default)]
    pub vpc_id: Option<i64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub apikey: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub rmq_version: String,
    #[serde(default)]
    pub hostname_external: String,
    #[serde(default)]
    pub hostname_internal: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceCreateResponse {
    pub id: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub apikey: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vpc {
    pub id: i64,
    #[serde(default)]
    pub plan: String,
    pub region: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub providerid: String,
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub instances: Vec<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VpcCreateResponse {
    pub id: i64,
    #[serde(default)]
    pub apikey: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    pub provider: String,
    pub region: String,
    pub name: String,
    #[serde(default)]
    pub has_shared_plans: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub tfa_auth_enabled: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyRotateResponse {
    pub apikey: String,
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InstanceCreateRequest {
    pub name: String,
    pub plan: String,
    pub region: String,
    pub tags: Vec<String>,
    pub vpc_subnet: Option<String>,
    pub vpc_id: Option<i64>,
}

#[derive(Debug, Default)]
pub struct InstanceUpdateRequest {
    pub name: Option<String>,
    pub plan: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct VpcCreateRequest {
    pub name: String,
    pub region: String,
    pub subnet: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct VpcUpdateRequest {
    pub name: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TeamInviteRequest {
    pub email: String,
    pub role: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TeamUpdateRequest {
    pub role: Option<String>,
    pub tags: Vec<String>,
}

/// Client for the account-scoped provisioning API, authenticated with the
/// main API key.
pub struct Client {
    api_key: String,
    base_url: String,
    agent: Agent,
}

impl Client {
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
        request(&self.agent, method, &url, &self.api_key, payload)
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>, ApiError> {
        parse(&self.call(Method::Get, "/instances", Payload::Empty)?)
    }

    pub fn get_instance(&self, id: i64) -> Result<Instance, ApiError> {
        parse(&self.call(Method::Get, &format!("/instances/{id}"), Payload::Empty)?)
    }

    pub fn create_instance(
        &self,
        req: &InstanceCreateRequest,
    ) -> Result<InstanceCreateResponse, ApiError> {
        let mut fields = vec![
            ("name", req.name.clone()),
            ("plan", req.plan.clone()),
            ("region", req.region.clone()),
        ];
        for tag in &req.tags {
            fields.push(("tags[]", tag.clone()));
        }
        if let Some(subnet) = &req.vpc_subnet {
            fields.push(("vpc_subnet", subnet.clone()));
        }
        if let Some(vpc_id) = req.vpc_id {
            fields.push(("vpc_id", vpc_id.to_string()));
        }
        parse(&self.call(Method::Post, "/instances", Payload::Form(&fields))?)
    }

    pub fn update_instance(&self, id: i64, req: &InstanceUpdateRequest) -> Result<(), ApiError> {
        let mut fields = Vec::new();
        if let Some(name) = &req.name {
            fields.push(("name", name.clone()));
        }
        if let Some(plan) = &req.plan {
            fields.push(("plan", plan.clone()));
        }
        for tag in &req.tags {
            fields.push(("tags[]", tag.clone()));
        }
        self.call(Method::Put, &format!("/instances/{id}"), Payload::Form(&fields))?;
        Ok(())
    }

    pub fn delete_instance(&self, id: i64) -> Result<(), ApiError> {
        self.call(Method::Delete, &format!("/instances/{id}"), Payload::Empty)?;
        Ok(())
    }

    pub fn resize_instance_disk(
        &self,
        id: i64,
        extra_disk_size: i64,
        allow_downtime: bool,
    ) -> Result<(), ApiError> {
        let mut fields = vec![("extra_disk_size", extra_disk_size.to_string())];
        if allow_downtime {
            fields.push(("allow_downtime", "true".to_string()));
        }
        self.call(
            Method::Put,
            &format!("/instances/{id}/disk"),
            Payload::Form(&fields),
        )?;
        Ok(())
    }

    pub fn list_vpcs(&self) -> Result<Vec<Vpc>, ApiError> {
        parse(&self.call(Method::Get, "/vpcs", Payload::Empty)?)
    }

    pub fn get_vpc(&self, id: i64) -> Result<Vpc, ApiError> {
        parse(&self.call(Method::Get, &format!("/vpcs/{id}"), Payload::Empty)?)
    }

    pub fn create_vpc(&self, req: &VpcCreateRequest) -> Result<VpcCreateResponse, ApiError> {
        let mut fields = vec![
            ("name", req.name.clone()),
            ("region", req.region.clone()),
            ("subnet", req.subnet.clone()),
        ];
        for tag in &req.tags {
            fields.push(("tags[]", tag.clone()));
        }
        parse(&self.call(Method::Post, "/vpcs", Payload::Form(&fields))?)
    }

    pub fn update_vpc(&self, id: i64, req: &VpcUpdateRequest) -> Result<(), ApiError> {
        let mut fields = Vec::new();
        if let Some(name) = &req.name {
            fields.push(("name", name.clone()));
        }
        for tag in &req.tags {
            fields.push(("tags[]", tag.clone()));
        }
        self.call(Method::Put, &format!("/vpcs/{id}"), Payload::Form(&fields))?;
        Ok(())
    }

    pub fn delete_vpc(&self, id: i64) -> Result<(), ApiError> {
        self.call(Method::Delete, &format!("/vpcs/{id}"), Payload::Empty)?;
        Ok(())
    }

    pub fn list_regions(&self, provider: Option<&str>) -> Result<Vec<Region>, ApiError> {
        let mut endpoint = "/regions".to_string();
        if let Some(provider) = provider {
            endpoint.push_str(&format!("?provider={provider}"));
        }
        parse(&self.call(Method::Get, &endpoint, Payload::Empty)?)
    }

    pub fn list_plans(&self, backend: Option<&str>) -> Result<Vec<Plan>, ApiError> {
        let mut endpoint = "/plans".to_string();
        if let Some(backend) = backend {
            endpoint.push_str(&format!("?backend={backend}"));
        }
        parse(&self.call(Method::Get, &endpoint, Payload::Empty)?)
    }

    pub fn list_team_members(&self) -> Result<Vec<TeamMember>, ApiError> {
        parse(&self.call(Method::Get, "/team", Payload::Empty)?)
    }

    pub fn invite_team_member(&self, req: &TeamInviteRequest) -> Result<TeamResponse, ApiError> {
        let mut fields = vec![("email", req.email.clone())];
        if let Some(role) = &req.role {
            fields.push(("role", role.clone()));
        }
        for tag in &req.tags {
            fields.push(("tags[]", tag.clone()));
        }
        parse(&self.call(Method::Post, "/team/invite", Payload::Form(&fields))?)
    }

    pub fn update_team_member(
        &self,
        user_id: &str,
        req: &TeamUpdateRequest,
    ) -> Result<TeamResponse, ApiError> {
        let mut fields = Vec::new();
        if let Some(role) = &req.role {
            fields.push(("role", role.clone()));
        }
        for tag in &req.tags {
            fields.push(("tags[]", tag.clone()));
        }
        parse(&self.call(Method::Put, &format!("/team/{user_id}"), Payload::Form(&fields))?)
    }

    pub fn remove_team_member(&self, email: &str) -> Result<TeamResponse, ApiError> {
        let fields = [("email", email.to_string())];
        parse(&self.call(Method::Post, "/team/remove", Payload::Form(&fields))?)
    }

    /// Audit log for the latest month, or the `YYYY-MM` month given.
    pub fn audit_log_csv(&self, timestamp: Option<&str>) -> Result<String, ApiError> {
        let mut endpoint = "/auditlog/csv".to_string();
        if let Some(timestamp) = timestamp {
            endpoint.push_str(&format!("?timestamp={timestamp}"));
        }
        self.call(Method::Get, &endpoint, Payload::Empty)
    }

    pub fn rotate_api_key(&self) -> Result<ApiKeyRotateResponse, ApiError> {
        parse(&self.call(Method::Post, "/apikeys/rotate-apikey", Payload::Empty)?)
    }
}
