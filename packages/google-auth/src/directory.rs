// ABOUTME: Best-effort Google directory calls made with a user credential
// ABOUTME: User info, token introspection, project listing and required API enablement

use std::collections::HashSet;

use reqwest::{
    header::{CONTENT_TYPE, USER_AGENT},
    StatusCode,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::{join_url, Endpoint},
    error::{AuthError, AuthResult, FailureKind, RequestError},
    oauth::{
        provider::{REQUIRED_SERVICES, USER_AGENT as CLIENT_USER_AGENT},
        token_client::TokenClient,
        types::{CredentialRecord, Project, ProjectList, UserInfo},
        user::UserCredential,
    },
};

/// Client for the directory-style Google APIs.
///
/// None of these calls propagate errors. Failures are logged and surface as
/// `None`, an empty list, or `false`.
#[derive(Clone)]
pub struct DirectoryClient {
    tokens: TokenClient,
}

impl DirectoryClient {
    /// Share the token client's HTTP pool and endpoint provider
    pub fn new(tokens: TokenClient) -> Self {
        Self { tokens }
    }

    pub fn token_client(&self) -> &TokenClient {
        &self.tokens
    }

    /// Fetch the signed-in user's profile, refreshing the credential first if needed
    pub async fn fetch_user_info(&self, credential: &mut UserCredential) -> Option<UserInfo> {
        match self.try_fetch_user_info(credential).await {
            Ok(info) => Some(info),
            Err(e) => {
                error!("Failed to fetch user info: {}", e);
                None
            }
        }
    }

    async fn try_fetch_user_info(&self, credential: &mut UserCredential) -> AuthResult<UserInfo> {
        credential.refresh_if_needed(&self.tokens).await?;
        let token = bearer(credential)?;

        let base = self.tokens.base_url(Endpoint::GoogleApis).await?;
        let url = join_url(&base, "oauth2/v2/userinfo");

        let response = self
            .tokens
            .http()
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RequestError::network(format!("Userinfo request failed: {}", e)))?;

        Ok(json_body(response).await?)
    }

    pub async fn fetch_user_email(&self, credential: &mut UserCredential) -> Option<String> {
        let info = self.fetch_user_info(credential).await?;
        match info.email.filter(|e| !e.is_empty()) {
            Some(email) => {
                info!("Fetched user email: {}", email);
                Some(email)
            }
            None => {
                warn!("Userinfo response has no email");
                None
            }
        }
    }

    /// Build a credential from a stored record and look up its email
    pub async fn fetch_user_email_from_record(&self, record: &CredentialRecord) -> Option<String> {
        let mut credential = match UserCredential::from_record(record) {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Could not build credential from record: {}", e);
                return None;
            }
        };

        if credential.access_token.is_none() {
            warn!("Credential record has no access token");
            return None;
        }

        self.fetch_user_email(&mut credential).await
    }

    /// Introspect an access token through the tokeninfo endpoint
    pub async fn validate_token(&self, token: &str) -> Option<Value> {
        match self.try_validate_token(token).await {
            Ok(info) => Some(info),
            Err(e) => {
                error!("Token validation failed: {}", e);
                None
            }
        }
    }

    async fn try_validate_token(&self, token: &str) -> AuthResult<Value> {
        let base = self.tokens.base_url(Endpoint::OAuth).await?;
        let mut url = parse_url(&join_url(&base, "tokeninfo"))?;
        url.query_pairs_mut().append_pair("access_token", token);

        let response = self
            .tokens
            .http()
            .get(url)
            .send()
            .await
            .map_err(|e| RequestError::network(format!("Tokeninfo request failed: {}", e)))?;

        Ok(json_body(response).await?)
    }

    /// List the user's projects in the ACTIVE lifecycle state, following pagination
    pub async fn list_active_projects(&self, credential: &mut UserCredential) -> Vec<Project> {
        match self.try_list_projects(credential).await {
            Ok(projects) => {
                let active: Vec<Project> = projects.into_iter().filter(Project::is_active).collect();
                info!("Found {} active projects", active.len());
                active
            }
            Err(e) => {
                error!("Failed to list projects: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_list_projects(&self, credential: &mut UserCredential) -> AuthResult<Vec<Project>> {
        self.ensure_fresh(credential).await?;
        let token = bearer(credential)?;

        let base = self.tokens.base_url(Endpoint::ResourceManager).await?;
        let list_url = join_url(&base, "v1/projects");
        debug!("Listing projects from {}", list_url);

        let mut projects = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let mut url = parse_url(&list_url)?;
            if let Some(page_token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", page_token);
            }

            let response = self
                .tokens
                .http()
                .get(url)
                .bearer_auth(&token)
                .header(USER_AGENT, CLIENT_USER_AGENT)
                .send()
                .await
                .map_err(|e| RequestError::network(format!("Project list request failed: {}", e)))?;

            let page: ProjectList = json_body(response).await?;
            projects.extend(page.projects);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if seen_tokens.insert(next.clone()) => page_token = Some(next),
                Some(next) => {
                    warn!("Project list returned page token {} again, stopping", next);
                    break;
                }
                None => break,
            }
        }

        Ok(projects)
    }

    /// Enable the services the Gemini APIs depend on.
    ///
    /// Per-service failures are logged and skipped. Returns `false` only when
    /// the credential or the service usage endpoint could not be prepared.
    pub async fn enable_required_apis(
        &self,
        credential: &mut UserCredential,
        project_id: &str,
    ) -> bool {
        let prepared = async {
            self.ensure_fresh(credential).await?;
            let token = bearer(credential)?;
            let base = self.tokens.base_url(Endpoint::ServiceUsage).await?;
            Ok::<_, AuthError>((token, base))
        }
        .await;

        let (token, base) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Failed to enable required APIs: {}", e);
                return false;
            }
        };

        for service in REQUIRED_SERVICES {
            info!("Checking service {} for project {}", service, project_id);
            let service_url = join_url(&base, &format!("v1/projects/{}/services/{}", project_id, service));

            if self.is_service_enabled(&service_url, &token).await {
                info!("Service {} is already enabled", service);
                continue;
            }

            self.enable_service(&format!("{}:enable", service_url), &token, service)
                .await;
        }

        true
    }

    async fn is_service_enabled(&self, url: &str, token: &str) -> bool {
        let response = match self
            .tokens
            .http()
            .get(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Service state check failed, will try enabling: {}", e);
                return false;
            }
        };

        if response.status() != StatusCode::OK {
            debug!("Service state check returned {}", response.status());
            return false;
        }

        match response.json::<Value>().await {
            Ok(body) => body.get("state").and_then(Value::as_str) == Some("ENABLED"),
            Err(e) => {
                debug!("Unreadable service state response: {}", e);
                false
            }
        }
    }

    async fn enable_service(&self, url: &str, token: &str, service: &str) {
        let response = match self
            .tokens
            .http()
            .post(url)
            .bearer_auth(token)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .json(&serde_json::json!({}))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to enable service {}: {}", service, e);
                return;
            }
        };

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!("Enabled service {}", service);
            return;
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && is_already_enabled(&body) {
            info!("Service {} was already enabled", service);
        } else {
            warn!("Failed to enable service {}: {} - {}", service, status, body);
        }
    }

    /// Refresh only when expired and a refresh token is available; never fails otherwise
    async fn ensure_fresh(&self, credential: &mut UserCredential) -> AuthResult<()> {
        if credential.is_expired() && credential.has_refresh_token() {
            credential.refresh(&self.tokens).await?;
        }
        Ok(())
    }
}

/// Pick a default project: the first whose display name or id mentions
/// "default" (case-insensitive), otherwise the first project.
pub fn select_default_project(projects: &[Project]) -> Option<String> {
    let chosen = projects
        .iter()
        .find(|p| {
            let display_name = p.display_name.as_deref().unwrap_or_default();
            contains_default(display_name) || contains_default(&p.project_id)
        })
        .or_else(|| projects.first())?;

    info!(
        "Selected default project: {} ({})",
        chosen.project_id,
        chosen.display_name.as_deref().unwrap_or(&chosen.project_id)
    );
    Some(chosen.project_id.clone())
}

fn contains_default(value: &str) -> bool {
    value.to_lowercase().contains("default")
}

fn is_already_enabled(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(|m| m.to_lowercase().contains("already enabled"))
        })
        .unwrap_or(false)
}

fn bearer(credential: &UserCredential) -> AuthResult<String> {
    credential
        .access_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingField("access_token"))
}

fn parse_url(url: &str) -> AuthResult<Url> {
    Url::parse(url).map_err(|e| AuthError::Configuration(format!("Invalid URL {}: {}", url, e)))
}

async fn json_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RequestError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RequestError::new(
            FailureKind::from_status(status.as_u16()),
            format!("{}: {}", status, body),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| RequestError::malformed(format!("Unexpected response body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: &str, display_name: Option<&str>) -> Project {
        Project {
            project_id: id.to_string(),
            display_name: display_name.map(str::to_string),
            lifecycle_state: Some("ACTIVE".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_default_by_id() {
        let projects = vec![project("proj-1", None), project("my-default-proj", None)];
        assert_eq!(
            select_default_project(&projects).as_deref(),
            Some("my-default-proj")
        );
    }

    #[test]
    fn test_select_default_by_display_name() {
        let projects = vec![
            project("proj-1", Some("Sandbox")),
            project("proj-2", Some("My DEFAULT Project")),
        ];
        assert_eq!(select_default_project(&projects).as_deref(), Some("proj-2"));
    }

    #[test]
    fn test_select_default_falls_back_to_first() {
        let projects = vec![project("proj-1", None), project("proj-2", None)];
        assert_eq!(select_default_project(&projects).as_deref(), Some("proj-1"));
    }

    #[test]
    fn test_select_default_empty() {
        assert_eq!(select_default_project(&[]), None);
    }

    #[test]
    fn test_already_enabled_detection() {
        assert!(is_already_enabled(
            r#"{"error":{"code":400,"message":"Service is Already Enabled for project"}}"#
        ));
        assert!(!is_already_enabled(r#"{"error":{"message":"permission denied"}}"#));
        assert!(!is_already_enabled("not json"));
    }
}
