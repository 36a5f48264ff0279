//! HomeCase portal client.
//!
//! Logs in with the portal's anti-forgery flow, then retrieves consumption
//! notices over the BFF JSON API. When the API path fails for any reason
//! the messages page is scraped instead; callers get the same
//! [`RawMessage`] shape either way.
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET`  | `portal.login_url` | Session cookies + anti-forgery token |
//! | `POST` | `/login/withEmail` | JSON credential login |
//! | `GET`  | `/api/v1/bff/customers/{ct}/facilityObjects/{fo}/activities` | Activity list |
//! | `GET`  | `/api/v1/bff/customers/{ct}/activities/{id}/contacts` | Messages of one activity |
//! | `GET`  | `portal.messages_url` | HTML fallback |
//!
//! Every request goes through one throttle so that successive requests are
//! at least `portal.request_delay_ms` apart.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PortalConfig;
use crate::error::{AuthError, FetchError};
use crate::models::{ContentHash, RawMessage};
use crate::scrape;
use crate::traits::MessageSource;

pub const LOGIN_API_PATH: &str = "/login/withEmail";
pub const BFF_API_PATH: &str = "/api/v1/bff/";
/// Cookie name fragment of the ASP.NET Core anti-forgery cookie.
pub const ANTIFORGERY_COOKIE_PREFIX: &str = ".AspNetCore.Antiforgery";
/// Path fragment the portal redirects to when a session is not logged in.
const LOGIN_REDIRECT_MARKER: &str = "/anmelden";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:147.0) Gecko/20100101 Firefox/147.0";

/// An authenticated portal session.
///
/// Holds the HTTP client whose cookie jar carries the login cookies.
pub struct Session {
    client: Client,
}

/// Enforces a minimum gap between successive requests.
struct Throttle {
    delay: Duration,
    last: Option<Instant>,
}

impl Throttle {
    fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    async fn wait(&self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                let wait = self.delay - elapsed;
                tracing::debug!(wait_ms = wait.as_millis() as u64, "Throttling portal request");
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// Failure on the BFF path. Never surfaces to callers: it triggers the
/// HTML fallback.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("messages URL does not contain /<customer>/objekte/<object>/nachrichten")]
    NoUrlContext,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Schema(String),
}

/// Identifiers encoded in the messages URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlContext {
    pub customer_token: String,
    pub facility_object_id: String,
    pub activity_id: Option<String>,
}

/// Parse `/{customerToken}/objekte/{facilityObjectId}/nachrichten/{activityId?}`.
pub fn parse_url_context(messages_url: &Url) -> Option<UrlContext> {
    let parts: Vec<&str> = messages_url
        .path_segments()?
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 4 || parts[1] != "objekte" || parts[3] != "nachrichten" {
        return None;
    }
    Some(UrlContext {
        customer_token: parts[0].to_string(),
        facility_object_id: parts[2].to_string(),
        activity_id: parts.get(4).map(|s| s.to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct Activity {
    id: Option<Value>,
    #[serde(rename = "changedDateUTC")]
    changed: Option<String>,
    #[serde(rename = "createdDateUTC")]
    created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    id: Option<Value>,
    text: Option<String>,
    #[serde(rename = "createdDateUTC")]
    created: Option<String>,
    #[serde(rename = "changedDateUTC")]
    changed: Option<String>,
}

/// A consumption block found in a contact, before de-duplication.
struct Candidate {
    timestamp: String,
    id: String,
    text: String,
}

/// Portal client implementing [`MessageSource`].
pub struct PortalClient {
    config: PortalConfig,
    throttle: Throttle,
}

impl PortalClient {
    pub fn new(config: &PortalConfig) -> Self {
        Self {
            config: config.clone(),
            throttle: Throttle::new(config.request_delay()),
        }
    }

    /// Send a request through the throttle.
    async fn send(&mut self, request: RequestBuilder) -> reqwest::Result<Response> {
        self.throttle.wait().await;
        let result = request.send().await;
        self.throttle.mark();
        result
    }

    fn build_client(&self, origin: &str) -> Result<Client, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE,de;q=0.9,en;q=0.8"));
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(ORIGIN, value);
        }

        Ok(Client::builder()
            .cookie_store(true)
            .timeout(self.config.timeout())
            .default_headers(headers)
            .build()?)
    }

    fn messages_url(&self) -> Result<Url, FetchError> {
        Url::parse(&self.config.messages_url).map_err(|e| FetchError::Url(e.to_string()))
    }

    // ============ BFF API ============

    async fn api_get(&mut self, session: &Session, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let base = self.messages_url().map_err(|e| ApiError::Schema(e.to_string()))?;
        let url = base
            .join(BFF_API_PATH)
            .and_then(|bff| bff.join(path.trim_start_matches('/')))
            .map_err(|e| ApiError::Schema(e.to_string()))?;

        let request = session
            .client
            .get(url)
            .query(query)
            .header(ACCEPT, "application/json")
            .header("X-Requested-With", "XMLHttpRequest")
            .header(REFERER, self.config.messages_url.as_str());
        let response = self.send(request).await?.error_for_status()?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Schema(e.to_string()))
    }

    async fn list_activities(&mut self, session: &Session, ctx: &UrlContext) -> Result<Vec<Activity>, ApiError> {
        let path = format!(
            "customers/{}/facilityObjects/{}/activities",
            ctx.customer_token, ctx.facility_object_id
        );
        let value = self
            .api_get(session, &path, &[("filterType", "Default")])
            .await?;
        let Value::Array(items) = value else {
            return Err(ApiError::Schema("activities response is not a list".to_string()));
        };

        let mut activities: Vec<Activity> = items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        activities.sort_by(|a, b| {
            let key_a = a.changed.as_deref().or(a.created.as_deref()).unwrap_or("");
            let key_b = b.changed.as_deref().or(b.created.as_deref()).unwrap_or("");
            key_b.cmp(key_a)
        });
        Ok(activities)
    }

    /// Activity ids to scan, newest first, with the one from the URL leading.
    ///
    /// A failed activity list is only fatal when the URL names no activity.
    async fn collect_activity_ids(&mut self, session: &Session, ctx: &UrlContext) -> Result<Vec<String>, ApiError> {
        let activities = match self.list_activities(session, ctx).await {
            Ok(activities) => activities,
            Err(e) if ctx.activity_id.is_some() => {
                tracing::warn!(error = %e, "Activity list unavailable, scanning URL activity only");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut ids: Vec<String> = ctx.activity_id.iter().cloned().collect();
        for activity in activities {
            if let Some(id) = activity.id.as_ref().and_then(id_string) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids.truncate(self.config.max_activities);
        Ok(ids)
    }

    async fn collect_candidates(&mut self, session: &Session, ctx: &UrlContext, activity_ids: &[String]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for activity_id in activity_ids {
            let path = format!(
                "customers/{}/activities/{}/contacts",
                ctx.customer_token, activity_id
            );
            let contacts = match self.api_get(session, &path, &[]).await {
                Ok(Value::Array(items)) => items,
                Ok(_) => {
                    tracing::debug!(activity_id = %activity_id, "Contacts response is not a list, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(activity_id = %activity_id, error = %e, "Failed to fetch contacts");
                    continue;
                }
            };

            for (index, item) in contacts.into_iter().enumerate() {
                let Ok(contact) = serde_json::from_value::<Contact>(item) else {
                    continue;
                };
                let Some(text) = contact.text.as_deref().and_then(scrape::extract_consumption_text) else {
                    continue;
                };
                let id = contact
                    .id
                    .as_ref()
                    .and_then(id_string)
                    .unwrap_or_else(|| format!("{}:{}", activity_id, index));
                candidates.push(Candidate {
                    timestamp: contact.created.or(contact.changed).unwrap_or_default(),
                    id,
                    text,
                });
            }
        }

        candidates
    }

    async fn fetch_via_api(&mut self, session: &Session) -> Result<Vec<RawMessage>, ApiError> {
        let url = self.messages_url().map_err(|e| ApiError::Schema(e.to_string()))?;
        let ctx = parse_url_context(&url).ok_or(ApiError::NoUrlContext)?;

        let activity_ids = self.collect_activity_ids(session, &ctx).await?;
        let mut candidates = self.collect_candidates(session, &ctx, &activity_ids).await;

        // Newest first; ISO timestamps sort lexicographically.
        candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut seen = std::collections::HashSet::new();
        let messages = candidates
            .into_iter()
            .filter(|c| seen.insert(scrape::normalize_whitespace(&c.text)))
            .take(self.config.message_limit)
            .map(|c| RawMessage {
                date: parse_portal_timestamp(&c.timestamp),
                id: c.id,
                body_text: c.text,
            })
            .collect();
        Ok(messages)
    }

    // ============ HTML fallback ============

    async fn fetch_via_html(&mut self, session: &Session) -> Result<Vec<RawMessage>, FetchError> {
        let url = self.messages_url()?;
        let response = self.send(session.client.get(url)).await?;

        if response.url().path().contains(LOGIN_REDIRECT_MARKER) {
            return Err(FetchError::NotAuthenticated);
        }
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let html = response.text().await?;
        let messages: Vec<RawMessage> = scrape::consumption_blocks(&html)
            .into_iter()
            .take(self.config.message_limit)
            .map(|body_text| RawMessage {
                id: format!("html:{}", ContentHash::of(&body_text).short()),
                date: None,
                body_text,
            })
            .collect();
        tracing::info!(count = messages.len(), "Found consumption message(s) via HTML page");
        Ok(messages)
    }
}

#[async_trait]
impl MessageSource for PortalClient {
    type Session = Session;

    async fn authenticate(&mut self) -> Result<Session, AuthError> {
        let login_url =
            Url::parse(&self.config.login_url).map_err(|e| AuthError::Url(e.to_string()))?;
        let origin = login_url.origin().ascii_serialization();
        let client = self.build_client(&origin)?;

        tracing::info!("Fetching login page for session and antiforgery token");
        let response = self
            .send(client.get(login_url.clone()).header(REFERER, format!("{}/", origin)))
            .await?
            .error_for_status()?;
        let cookie_token = response
            .cookies()
            .find(|c| c.name().contains(ANTIFORGERY_COOKIE_PREFIX))
            .map(|c| c.value().to_string());
        let html = response.text().await?;

        let token = scrape::antiforgery_token(&html)
            .or(cookie_token)
            .ok_or(AuthError::MissingToken)?;
        let customer_token = scrape::window_string_field(&html, "__INITIAL_LOGIN_DATA__", "customerToken");

        let api_url = login_url
            .join(LOGIN_API_PATH)
            .map_err(|e| AuthError::Url(e.to_string()))?;
        let mut request = client
            .post(api_url)
            .json(&serde_json::json!({
                "email": self.config.username,
                "password": self.config.password,
            }))
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(REFERER, login_url.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .header("RequestVerificationToken", token);
        if let Some(ref ct) = customer_token {
            request = request.query(&[("customerToken", ct)]);
        }

        tracing::debug!("POST {} with JSON credentials", LOGIN_API_PATH);
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status >= 400 {
            let snippet: String = body.chars().take(500).collect::<String>().replace('\n', " ");
            tracing::error!(status, snippet = %snippet, "HomeCase login failed");
            return Err(AuthError::Rejected { status, snippet });
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&body) {
            if map.get("success") == Some(&Value::Bool(false)) {
                let message = map
                    .get("message")
                    .or_else(|| map.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("Login failed");
                return Err(AuthError::Denied(message.to_string()));
            }
        }
        if status != 200 && status != 204 {
            return Err(AuthError::UnexpectedStatus(status));
        }

        tracing::info!("Login successful");
        Ok(Session { client })
    }

    async fn fetch_messages(&mut self, session: &Session) -> Result<Vec<RawMessage>, FetchError> {
        tracing::info!("Searching for consumption messages");

        match self.fetch_via_api(session).await {
            Ok(messages) if !messages.is_empty() => {
                tracing::info!(count = messages.len(), "Found consumption message(s) via HomeCase API");
                return Ok(messages);
            }
            Ok(_) => tracing::warn!("API returned no consumption messages, falling back to HTML parsing"),
            Err(e) => tracing::warn!(error = %e, "API message fetch failed, falling back to HTML parsing"),
        }

        self.fetch_via_html(session).await
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Portal timestamps come with or without an offset; offset-less ones are UTC.
fn parse_portal_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if ts.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
