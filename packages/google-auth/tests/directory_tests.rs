// ABOUTME: Integration tests for the best-effort directory calls
// ABOUTME: User info, token validation, project listing with pagination and API enablement

mod common;

use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use orkee_google_auth::{
    select_default_project, CredentialRecord, DirectoryClient, UserCredential,
};

fn directory(server: &MockServer) -> DirectoryClient {
    DirectoryClient::new(common::token_client(server))
}

#[tokio::test]
async fn test_fetch_user_info_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .and(header("authorization", "Bearer ya29.current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1234",
            "email": "dev@example.com",
            "verified_email": true,
            "name": "Dev"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    let info = directory(&server).fetch_user_info(&mut credential).await.unwrap();

    assert_eq!(info.email.as_deref(), Some("dev@example.com"));
    assert_eq!(info.verified_email, Some(true));
}

#[tokio::test]
async fn test_fetch_user_email_refreshes_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.new",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .and(header("authorization", "Bearer ya29.new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "dev@example.com"})))
        .mount(&server)
        .await;

    let mut credential = common::expired_user_credential();
    let email = directory(&server).fetch_user_email(&mut credential).await;

    assert_eq!(email.as_deref(), Some("dev@example.com"));
    assert_eq!(credential.access_token.as_deref(), Some("ya29.new"));
}

#[tokio::test]
async fn test_fetch_user_info_failure_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.rejected");
    let directory = directory(&server);

    assert!(directory.fetch_user_info(&mut credential).await.is_none());
    assert!(directory.fetch_user_email(&mut credential).await.is_none());
}

#[tokio::test]
async fn test_fetch_user_email_without_email_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1234"})))
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    assert!(directory(&server)
        .fetch_user_email(&mut credential)
        .await
        .is_none());
}

#[tokio::test]
async fn test_fetch_user_email_from_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .and(header("authorization", "Bearer ya29.stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "stored@example.com"})))
        .mount(&server)
        .await;

    let directory = directory(&server);
    let record = CredentialRecord {
        token: Some("ya29.stored".to_string()),
        expiry: Some("2099-01-01T00:00:00Z".to_string()),
        ..Default::default()
    };
    assert_eq!(
        directory.fetch_user_email_from_record(&record).await.as_deref(),
        Some("stored@example.com")
    );

    // Neither a bearer nor a refresh token
    assert!(directory
        .fetch_user_email_from_record(&CredentialRecord::default())
        .await
        .is_none());
}

#[tokio::test]
async fn test_validate_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tokeninfo"))
        .and(query_param("access_token", "ya29.good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "azp": "client-id",
            "scope": "https://www.googleapis.com/auth/cloud-platform",
            "expires_in": "3599"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tokeninfo"))
        .and(query_param("access_token", "ya29.bad"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_token"})))
        .mount(&server)
        .await;

    let directory = directory(&server);
    let info = directory.validate_token("ya29.good").await.unwrap();
    assert_eq!(info["azp"], "client-id");
    assert!(directory.validate_token("ya29.bad").await.is_none());
}

#[tokio::test]
async fn test_list_active_projects_follows_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .and(query_param("pageToken", "page-2"))
        .and(header("user-agent", "geminicli-oauth/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [
                {"projectId": "proj-3", "name": "Third", "lifecycleState": "ACTIVE"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .and(header("authorization", "Bearer ya29.current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [
                {"projectId": "proj-1", "name": "First", "lifecycleState": "ACTIVE"},
                {"projectId": "proj-2", "name": "Second", "lifecycleState": "DELETE_REQUESTED"}
            ],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    let projects = directory(&server).list_active_projects(&mut credential).await;

    let ids: Vec<&str> = projects.iter().map(|p| p.project_id.as_str()).collect();
    assert_eq!(ids, vec!["proj-1", "proj-3"]);
}

#[tokio::test]
async fn test_list_projects_expired_without_refresh_token_still_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .and(header("authorization", "Bearer ya29.expired"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [{"projectId": "only", "lifecycleState": "ACTIVE"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = UserCredential {
        refresh_token: None,
        ..common::expired_user_credential()
    };
    let projects = directory(&server).list_active_projects(&mut credential).await;

    assert_eq!(projects.len(), 1);
    assert_eq!(select_default_project(&projects).as_deref(), Some("only"));
}

#[tokio::test]
async fn test_list_projects_failure_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    assert!(directory(&server)
        .list_active_projects(&mut credential)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_enable_required_apis() {
    let server = MockServer::start().await;
    let base = "/v1/projects/my-project/services";

    // Already enabled: no enable call
    Mock::given(method("GET"))
        .and(path(format!("{}/geminicloudassist.googleapis.com", base)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "ENABLED"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/geminicloudassist.googleapis.com:enable", base)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // Disabled: enable is issued with an empty JSON body
    Mock::given(method("GET"))
        .and(path(format!("{}/cloudaicompanion.googleapis.com", base)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "DISABLED"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/cloudaicompanion.googleapis.com:enable", base)))
        .and(header("authorization", "Bearer ya29.current"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "operations/1"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    assert!(
        directory(&server)
            .enable_required_apis(&mut credential, "my-project")
            .await
    );
}

#[tokio::test]
async fn test_enable_required_apis_tolerates_failures() {
    let server = MockServer::start().await;
    let base = "/v1/projects/p/services";

    // State checks fail, so both services get an enable attempt
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/geminicloudassist.googleapis.com:enable", base)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "Service is already enabled"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/cloudaicompanion.googleapis.com:enable", base)))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    assert!(
        directory(&server)
            .enable_required_apis(&mut credential, "p")
            .await
    );
}

#[tokio::test]
async fn test_enable_required_apis_refresh_failure_is_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = common::expired_user_credential();
    assert!(
        !directory(&server)
            .enable_required_apis(&mut credential, "p")
            .await
    );
}

#[tokio::test]
async fn test_list_projects_stops_on_cycling_page_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .and(query_param("pageToken", "token-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [{"projectId": "from-a", "lifecycleState": "ACTIVE"}],
            "nextPageToken": "token-b"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .and(query_param("pageToken", "token-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [{"projectId": "from-b", "lifecycleState": "ACTIVE"}],
            "nextPageToken": "token-a"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [{"projectId": "first", "lifecycleState": "ACTIVE"}],
            "nextPageToken": "token-a"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut credential = common::fresh_user_credential("ya29.current");
    let projects = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        directory(&server).list_active_projects(&mut credential),
    )
    .await
    .expect("pagination should terminate");

    let ids: Vec<&str> = projects.iter().map(|p| p.project_id.as_str()).collect();
    assert_eq!(ids, vec!["first", "from-a", "from-b"]);
}
