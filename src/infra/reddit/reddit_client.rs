use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::core::platform::{
    CategoryTemplate, InboxMessage, ModLogEntry, Permissions, PlatformClient, PlatformError,
    Submission, SubmissionTag,
};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_URL: &str = "https://oauth.reddit.com";
/// Listing page size and `/api/info` batch size.
const PAGE_SIZE: usize = 100;

/// Script-app credentials for the password grant.
#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Reddit OAuth API client. Only the calls the engine needs are exposed.
pub struct RedditClient {
    client: Client,
    credentials: RedditCredentials,
    token: RwLock<Option<CachedToken>>,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&credentials.user_agent)?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Bearer token, refreshed a minute before it runs out.
    async fn token(&self) -> Result<String, PlatformError> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() + Duration::seconds(60) {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut slot = self.token.write().await;
        let resp = self
            .client
            .post(AUTH_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(map_network)?;
        let grant: ApiToken = check(resp, "access token").await?.json().await.map_err(map_body)?;

        let Some(value) = grant.access_token else {
            return Err(PlatformError::Forbidden(
                grant.error.unwrap_or_else(|| "no access token granted".to_string()),
            ));
        };
        tracing::debug!(expires_in = grant.expires_in, "Refreshed Reddit access token");
        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
        });
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let request = self.client.get(format!("{}{}", API_URL, path)).query(query);
        let resp = self.send(request, path).await?;
        resp.json().await.map_err(map_body)
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<(), PlatformError> {
        let request = self.client.post(format!("{}{}", API_URL, path)).form(form);
        self.send(request, path).await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, PlatformError> {
        let token = self.token().await?;
        let resp = request
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .send()
            .await
            .map_err(map_network)?;
        check(resp, what).await
    }
}

async fn check(resp: Response, what: &str) -> Result<Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(map_status(status, what))
}

fn map_status(status: StatusCode, what: &str) -> PlatformError {
    let message = format!("Reddit returned {} for {}", status, what);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Forbidden(message),
        StatusCode::NOT_FOUND => PlatformError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::Transient(message),
        s if s.is_server_error() => PlatformError::Transient(message),
        _ => PlatformError::Api(message),
    }
}

fn map_network(err: reqwest::Error) -> PlatformError {
    PlatformError::Transient(err.to_string())
}

fn map_body(err: reqwest::Error) -> PlatformError {
    PlatformError::Api(format!("Unexpected response body: {}", err))
}

fn timestamp(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty() && v != "[deleted]")
}

// ============================================================================
// API SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiToken {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ApiSubmission {
    id: String,
    subreddit: String,
    author: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    permalink: String,
    created_utc: f64,
    link_flair_text: Option<String>,
    link_flair_css_class: Option<String>,
    link_flair_template_id: Option<String>,
    /// A moderator name, `true` for spam-filtered posts, or null.
    #[serde(default)]
    banned_by: serde_json::Value,
    num_reports: Option<i64>,
}

impl ApiSubmission {
    fn into_submission(self) -> Submission {
        let removed_by = match self.banned_by {
            serde_json::Value::String(name) => Some(name),
            serde_json::Value::Bool(true) => Some("reddit".to_string()),
            _ => None,
        };
        Submission {
            id: self.id,
            community: self.subreddit.to_lowercase(),
            author: present(self.author),
            title: self.title,
            permalink: self.permalink,
            created_utc: timestamp(self.created_utc),
            flair_text: present(self.link_flair_text),
            flair_css_class: present(self.link_flair_css_class),
            flair_template_id: present(self.link_flair_template_id),
            removed_by,
            num_reports: self.num_reports,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiModerator {
    name: String,
    #[serde(default)]
    mod_permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTemplate {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    mod_only: bool,
}

#[derive(Debug, Deserialize)]
struct ApiModAction {
    #[serde(rename = "mod")]
    moderator: String,
    action: String,
    target_fullname: Option<String>,
    created_utc: f64,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    author: Option<String>,
    subreddit: Option<String>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    parent_id: Option<String>,
    #[serde(default)]
    was_comment: bool,
    created_utc: f64,
}

impl ApiMessage {
    fn into_message(self) -> InboxMessage {
        InboxMessage {
            id: self.id,
            author: present(self.author),
            community: present(self.subreddit).map(|s| s.to_lowercase()),
            subject: self.subject,
            body: self.body,
            parent_id: present(self.parent_id),
            is_private: !self.was_comment,
            created_utc: timestamp(self.created_utc),
        }
    }
}

fn fullname(message: &InboxMessage) -> String {
    let prefix = if message.is_private { "t4_" } else { "t1_" };
    format!("{}{}", prefix, message.id)
}

// ============================================================================
// PORT IMPLEMENTATION
// ============================================================================

#[async_trait]
impl PlatformClient for RedditClient {
    fn username(&self) -> &str {
        &self.credentials.username
    }

    async fn list_new(
        &self,
        communities: &[String],
        limit: usize,
    ) -> Result<Vec<Submission>, PlatformError> {
        if communities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let path = format!("/r/{}/new", communities.join("+"));
        let mut found = Vec::new();
        let mut after: Option<String> = None;

        while found.len() < limit {
            let page = PAGE_SIZE.min(limit - found.len());
            let mut query = vec![("limit", page.to_string())];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }
            let listing: Listing<ApiSubmission> = self.get(&path, &query).await?;
            let count = listing.data.children.len();
            found.extend(listing.data.children.into_iter().map(|t| t.data.into_submission()));

            after = listing.data.after;
            if count < page || after.is_none() {
                break;
            }
        }
        Ok(found)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Submission>, PlatformError> {
        let mut found = Vec::with_capacity(ids.len());
        for batch in ids.chunks(PAGE_SIZE) {
            let names = batch
                .iter()
                .map(|id| format!("t3_{}", id.trim_start_matches("t3_")))
                .collect::<Vec<_>>()
                .join(",");
            let listing: Listing<ApiSubmission> =
                self.get("/api/info", &[("id", names)]).await?;
            found.extend(listing.data.children.into_iter().map(|t| t.data.into_submission()));
        }
        Ok(found)
    }

    async fn get_permissions(&self, community: &str) -> Result<Permissions, PlatformError> {
        let path = format!("/r/{}/about/moderators", community);
        let listing: Listing<ApiModerator> = match self
            .get(&path, &[("user", self.credentials.username.clone())])
            .await
        {
            Ok(listing) => listing,
            // Private or banned communities answer 403 to non-moderators.
            Err(PlatformError::Forbidden(_)) | Err(PlatformError::NotFound(_)) => {
                return Ok(Permissions::not_moderator())
            }
            Err(err) => return Err(err),
        };

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|t| t.data)
            .find(|m| m.name.eq_ignore_ascii_case(&self.credentials.username))
            .map(|m| Permissions {
                is_moderator: true,
                scopes: m.mod_permissions,
            })
            .unwrap_or_else(Permissions::not_moderator))
    }

    async fn list_moderators(&self, community: &str) -> Result<Vec<String>, PlatformError> {
        let path = format!("/r/{}/about/moderators", community);
        let listing: Listing<ApiModerator> = self.get(&path, &[]).await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|t| t.data.name)
            .collect())
    }

    async fn list_category_templates(
        &self,
        community: &str,
    ) -> Result<Vec<CategoryTemplate>, PlatformError> {
        let path = format!("/r/{}/api/link_flair_v2", community);
        let templates: Vec<ApiTemplate> = match self.get(&path, &[]).await {
            Ok(templates) => templates,
            // Flair disabled on the community.
            Err(PlatformError::Forbidden(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(templates
            .into_iter()
            .filter(|t| !t.mod_only && !t.text.trim().is_empty())
            .map(|t| CategoryTemplate {
                id: t.id,
                text: t.text,
                mod_only: t.mod_only,
            })
            .collect())
    }

    async fn remove(&self, submission: &Submission) -> Result<(), PlatformError> {
        let id = format!("t3_{}", submission.id);
        self.post("/api/remove", &[("id", id.as_str()), ("spam", "false")])
            .await
    }

    async fn approve(&self, submission: &Submission) -> Result<(), PlatformError> {
        let id = format!("t3_{}", submission.id);
        self.post("/api/approve", &[("id", id.as_str())]).await
    }

    async fn set_category(
        &self,
        submission: &Submission,
        template_id: &str,
    ) -> Result<(), PlatformError> {
        let path = format!("/r/{}/api/selectflair", submission.community);
        let link = format!("t3_{}", submission.id);
        self.post(
            &path,
            &[("link", link.as_str()), ("flair_template_id", template_id)],
        )
        .await
    }

    async fn send_message(
        &self,
        user: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), PlatformError> {
        // Reddit caps subjects at 100 characters.
        let subject: String = subject.chars().take(100).collect();
        self.post(
            "/api/compose",
            &[
                ("api_type", "json"),
                ("to", user),
                ("subject", subject.as_str()),
                ("text", body),
            ],
        )
        .await
    }

    async fn get_mod_log(
        &self,
        community: &str,
        action: &str,
        limit: usize,
    ) -> Result<Vec<ModLogEntry>, PlatformError> {
        let path = format!("/r/{}/about/log", community);
        let listing: Listing<ApiModAction> = self
            .get(
                &path,
                &[
                    ("type", action.to_string()),
                    ("limit", limit.min(PAGE_SIZE * 5).to_string()),
                ],
            )
            .await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|t| ModLogEntry {
                moderator: t.data.moderator,
                action: t.data.action,
                target_fullname: t.data.target_fullname,
                created_utc: timestamp(t.data.created_utc),
            })
            .collect())
    }

    async fn apply_tag(
        &self,
        submission: &Submission,
        tag: SubmissionTag,
    ) -> Result<(), PlatformError> {
        let id = format!("t3_{}", submission.id);
        match tag {
            SubmissionTag::Nsfw => self.post("/api/marknsfw", &[("id", id.as_str())]).await,
            SubmissionTag::Spoiler => self.post("/api/spoiler", &[("id", id.as_str())]).await,
            SubmissionTag::Oc => {
                self.post(
                    "/api/set_original_content",
                    &[("id", id.as_str()), ("should_set_oc", "true")],
                )
                .await
            }
        }
    }

    async fn unread_messages(&self) -> Result<Vec<InboxMessage>, PlatformError> {
        let listing: Listing<ApiMessage> = self
            .get("/message/unread", &[("limit", PAGE_SIZE.to_string())])
            .await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|t| t.data.into_message())
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<Option<InboxMessage>, PlatformError> {
        let path = format!("/message/messages/{}", id.trim_start_matches("t4_"));
        match self.get::<Listing<ApiMessage>>(&path, &[]).await {
            Ok(listing) => Ok(listing
                .data
                .children
                .into_iter()
                .next()
                .map(|t| t.data.into_message())),
            Err(PlatformError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn mark_read(&self, message: &InboxMessage) -> Result<(), PlatformError> {
        let id = fullname(message);
        self.post("/api/read_message", &[("id", id.as_str())]).await
    }

    async fn reply(&self, message: &InboxMessage, body: &str) -> Result<(), PlatformError> {
        let thing = fullname(message);
        self.post(
            "/api/comment",
            &[("api_type", "json"), ("thing_id", thing.as_str()), ("text", body)],
        )
        .await
    }

    async fn accept_invite(&self, community: &str) -> Result<(), PlatformError> {
        let path = format!("/r/{}/api/accept_moderator_invite", community);
        self.post(&path, &[("api_type", "json")]).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, "approve"),
            PlatformError::Forbidden(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "approve"),
            PlatformError::Forbidden(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "info"),
            PlatformError::NotFound(_)
        ));
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, "new").is_transient());
        assert!(map_status(StatusCode::BAD_GATEWAY, "new").is_transient());
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "compose"),
            PlatformError::Api(_)
        ));
    }

    #[test]
    fn test_listing_maps_to_submissions() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    {"kind": "t3", "data": {
                        "id": "abc123", "subreddit": "Pics", "author": "alice",
                        "title": "A title", "permalink": "/r/Pics/comments/abc123/a_title/",
                        "created_utc": 1718015400.0, "link_flair_text": null,
                        "link_flair_css_class": "", "link_flair_template_id": null,
                        "banned_by": "flairwarden", "num_reports": null
                    }},
                    {"kind": "t3", "data": {
                        "id": "def456", "subreddit": "pics", "author": "[deleted]",
                        "title": "Gone", "permalink": "/r/pics/comments/def456/gone/",
                        "created_utc": 1718015000.0, "link_flair_text": "Help",
                        "banned_by": true, "num_reports": -5
                    }}
                ]
            }
        }"#;
        let listing: Listing<ApiSubmission> = serde_json::from_str(raw).unwrap();
        let subs: Vec<Submission> = listing
            .data
            .children
            .into_iter()
            .map(|t| t.data.into_submission())
            .collect();

        assert_eq!(subs[0].community, "pics");
        assert_eq!(subs[0].removed_by.as_deref(), Some("flairwarden"));
        assert!(!subs[0].is_categorized());
        assert_eq!(subs[0].created_utc, Utc.with_ymd_and_hms(2024, 6, 10, 10, 30, 0).unwrap());

        assert_eq!(subs[1].author, None);
        assert_eq!(subs[1].removed_by.as_deref(), Some("reddit"));
        assert!(subs[1].is_categorized());
        assert_eq!(subs[1].num_reports, Some(-5));
    }

    #[test]
    fn test_inbox_items_keep_their_kind() {
        let raw = r#"{"data": {"after": null, "children": [
            {"kind": "t4", "data": {"id": "m1", "author": null, "subreddit": "Pics",
              "subject": "invitation to moderate /r/pics", "body": "", "parent_id": null,
              "was_comment": false, "created_utc": 1718015400.0}},
            {"kind": "t1", "data": {"id": "c1", "author": "bob", "subreddit": "pics",
              "subject": "comment reply", "body": "hi", "parent_id": "t3_abc",
              "was_comment": true, "created_utc": 1718015400.0}}
        ]}}"#;
        let listing: Listing<ApiMessage> = serde_json::from_str(raw).unwrap();
        let messages: Vec<InboxMessage> = listing
            .data
            .children
            .into_iter()
            .map(|t| t.data.into_message())
            .collect();

        assert_eq!(messages[0].community.as_deref(), Some("pics"));
        assert_eq!(fullname(&messages[0]), "t4_m1");
        assert_eq!(fullname(&messages[1]), "t1_c1");
    }
}
