use std::collections::VecDeque;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Credentials;

const DEFAULT_USER_AGENT: &str = "helpcopy/0.1";
const MAX_ERROR_BODY_CHARS: usize = 600;

/// A Help Center category as returned by the remote instance.
///
/// Identifiers are always assigned by the owning instance; this crate never
/// mints them.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Section {
    pub id: u64,
    pub category_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    pub id: u64,
    pub section_id: u64,
    pub title: String,
    /// Opaque markup blob; copied byte-for-byte, never inspected.
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub promoted: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PermissionGroup {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub locale: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSection {
    pub name: String,
    pub description: String,
    pub locale: String,
    pub position: i64,
}

/// Attribute bundle for article creation. `user_segment_id` is serialized
/// even when `None` so the destination receives an explicit JSON null and
/// the article stays visible to all users.
#[derive(Debug, Clone, Serialize)]
pub struct NewArticle {
    pub title: String,
    pub body: String,
    pub locale: String,
    pub position: i64,
    pub draft: bool,
    pub promoted: bool,
    pub permission_group_id: u64,
    pub user_segment_id: Option<u64>,
}

pub trait HelpCenterReadApi {
    /// Cheap pre-flight check; fails with credential guidance on 401/403.
    fn test_connection(&mut self) -> Result<()>;
    fn list_categories(&mut self) -> Box<dyn Iterator<Item = Result<Category>> + '_>;
    fn list_sections(&mut self, category_id: u64)
    -> Box<dyn Iterator<Item = Result<Section>> + '_>;
    fn list_articles(&mut self, section_id: u64) -> Box<dyn Iterator<Item = Result<Article>> + '_>;
    fn list_permission_groups(&mut self) -> Result<Vec<PermissionGroup>>;
    fn request_count(&self) -> usize;
}

pub trait HelpCenterWriteApi: HelpCenterReadApi {
    fn create_category(&mut self, attrs: &NewCategory) -> Result<Category>;
    fn create_section(&mut self, category_id: u64, attrs: &NewSection) -> Result<Section>;
    fn create_article(&mut self, section_id: u64, attrs: &NewArticle) -> Result<Article>;
    fn delete_category(&mut self, category_id: u64) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HelpCenterClientConfig {
    pub subdomain: String,
    pub email: String,
    pub api_token: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl HelpCenterClientConfig {
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            subdomain: credentials.subdomain.clone(),
            email: credentials.email.clone(),
            api_token: credentials.api_token.clone(),
            user_agent: env_value("HELPCOPY_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_ms: env_value_u64("HELPCOPY_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("HELPCOPY_RATE_LIMIT_READ", 200),
            rate_limit_write_ms: env_value_u64("HELPCOPY_RATE_LIMIT_WRITE", 500),
            max_retries: env_value_usize("HELPCOPY_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("HELPCOPY_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Blocking client for one Help Center instance.
///
/// Reads are retried on transient failures; creates and deletes are issued
/// exactly once because they are not idempotent on the remote side.
#[derive(Debug)]
pub struct HelpCenterClient {
    client: Client,
    config: HelpCenterClientConfig,
    base_url: String,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl HelpCenterClient {
    pub fn new(config: HelpCenterClientConfig) -> Result<Self> {
        if config.subdomain.trim().is_empty() {
            bail!("help center subdomain cannot be empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build help center HTTP client")?;
        let base_url = format!("https://{}.zendesk.com/api/v2", config.subdomain.trim());

        Ok(Self {
            client,
            config,
            base_url,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn subdomain(&self) -> &str {
        &self.config.subdomain
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_username(&self) -> String {
        format!("{}/token", self.config.email)
    }

    fn request_json_get(&mut self, url: &str) -> Result<Value> {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(url)
                .basic_auth(self.auth_username(), Some(self.config.api_token.clone()))
                .header("User-Agent", self.config.user_agent.clone())
                .send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("help center API request failed with HTTP {status} for {url}");
                    }
                    return response
                        .json()
                        .context("failed to decode help center JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call help center API at {url}"));
                }
            }
        }

        bail!("help center API request exhausted retry budget")
    }

    fn request_json_post<B: Serialize + ?Sized>(&mut self, url: &str, body: &B) -> Result<Value> {
        self.apply_rate_limit(true);
        let response = self
            .client
            .post(url)
            .basic_auth(self.auth_username(), Some(self.config.api_token.clone()))
            .header("User-Agent", self.config.user_agent.clone())
            .json(body)
            .send()
            .with_context(|| format!("failed to call help center API at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!(
                "help center API rejected the request (HTTP {status}): {}",
                summarize_error_body(&detail)
            );
        }
        response
            .json()
            .context("failed to decode help center JSON response")
    }

    fn request_delete(&mut self, url: &str) -> Result<()> {
        self.apply_rate_limit(true);
        let response = self
            .client
            .delete(url)
            .basic_auth(self.auth_username(), Some(self.config.api_token.clone()))
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .with_context(|| format!("failed to call help center API at {url}"))?;
        let status = response.status();
        // Already-gone records count as deleted.
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!(
                "help center API rejected the delete (HTTP {status}): {}",
                summarize_error_body(&detail)
            );
        }
        Ok(())
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn listing<T: DeserializeOwned>(
        &mut self,
        path: &str,
        key: &'static str,
    ) -> Listing<T, impl FnMut(&str) -> Result<Value> + '_> {
        let first_url = self.endpoint(path);
        Listing::new(key, first_url, move |url: &str| self.request_json_get(url))
    }
}

impl HelpCenterReadApi for HelpCenterClient {
    fn test_connection(&mut self) -> Result<()> {
        let url = self.endpoint("/help_center/categories.json");
        self.apply_rate_limit(false);
        let response = self
            .client
            .get(&url)
            .basic_auth(self.auth_username(), Some(self.config.api_token.clone()))
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .with_context(|| format!("could not reach {}", self.base_url))?;
        connection_test_outcome(&self.base_url, response.status())
    }

    fn list_categories(&mut self) -> Box<dyn Iterator<Item = Result<Category>> + '_> {
        Box::new(self.listing("/help_center/categories.json", "categories"))
    }

    fn list_sections(
        &mut self,
        category_id: u64,
    ) -> Box<dyn Iterator<Item = Result<Section>> + '_> {
        let path = format!("/help_center/categories/{category_id}/sections.json");
        Box::new(self.listing(&path, "sections"))
    }

    fn list_articles(&mut self, section_id: u64) -> Box<dyn Iterator<Item = Result<Article>> + '_> {
        let path = format!("/help_center/sections/{section_id}/articles.json");
        Box::new(self.listing(&path, "articles"))
    }

    fn list_permission_groups(&mut self) -> Result<Vec<PermissionGroup>> {
        let mut groups = Vec::new();
        for item in self.listing("/guide/permission_groups.json", "permission_groups") {
            groups.push(item?);
        }
        Ok(groups)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl HelpCenterWriteApi for HelpCenterClient {
    fn create_category(&mut self, attrs: &NewCategory) -> Result<Category> {
        let url = self.endpoint("/help_center/categories.json");
        let payload = self.request_json_post(&url, &CategoryPayload { category: attrs })?;
        unwrap_record(payload, "category")
    }

    fn create_section(&mut self, category_id: u64, attrs: &NewSection) -> Result<Section> {
        let url = self.endpoint(&format!("/help_center/categories/{category_id}/sections.json"));
        let payload = self.request_json_post(&url, &SectionPayload { section: attrs })?;
        unwrap_record(payload, "section")
    }

    fn create_article(&mut self, section_id: u64, attrs: &NewArticle) -> Result<Article> {
        let url = self.endpoint(&format!("/help_center/sections/{section_id}/articles.json"));
        let payload = self.request_json_post(&url, &ArticlePayload { article: attrs })?;
        unwrap_record(payload, "article")
    }

    fn delete_category(&mut self, category_id: u64) -> Result<()> {
        let url = self.endpoint(&format!("/help_center/categories/{category_id}.json"));
        self.request_delete(&url)
    }
}

/// Lazy paginated listing over a Help Center collection endpoint.
///
/// Pages are fetched on demand by following the `next_page` URL the remote
/// returns. Records from pages that were fetched successfully are always
/// yielded; a page failure yields exactly one `Err` and ends the sequence
/// (buffer-then-fail). Sequences are finite and non-restartable.
pub struct Listing<T, F> {
    fetch: F,
    key: &'static str,
    buffered: VecDeque<T>,
    next_url: Option<String>,
}

impl<T, F> Listing<T, F> {
    fn new(key: &'static str, first_url: String, fetch: F) -> Self {
        Self {
            fetch,
            key,
            buffered: VecDeque::new(),
            next_url: Some(first_url),
        }
    }
}

impl<T, F> Iterator for Listing<T, F>
where
    T: DeserializeOwned,
    F: FnMut(&str) -> Result<Value>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            let url = self.next_url.take()?;
            let payload = match (self.fetch)(&url) {
                Ok(payload) => payload,
                Err(error) => return Some(Err(error)),
            };
            match parse_page(payload, self.key) {
                Ok((records, next_page)) => {
                    self.buffered.extend(records);
                    self.next_url = next_page;
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

fn parse_page<T: DeserializeOwned>(
    payload: Value,
    key: &str,
) -> Result<(Vec<T>, Option<String>)> {
    let records = match payload.get(key) {
        Some(value) => serde_json::from_value(value.clone())
            .with_context(|| format!("failed to decode `{key}` page payload"))?,
        None => Vec::new(),
    };
    let next_page = payload
        .get("next_page")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string);
    Ok((records, next_page))
}

fn unwrap_record<T: DeserializeOwned>(payload: Value, key: &str) -> Result<T> {
    let record = payload
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing `{key}` record in create response"))?;
    serde_json::from_value(record)
        .with_context(|| format!("failed to decode created `{key}` record"))
}

fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty response body>".to_string();
    }
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut output = trimmed
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect::<String>();
    output.push('…');
    output
}

fn connection_test_outcome(base_url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        bail!(
            "authentication rejected by {base_url} (HTTP {status}); check the subdomain, the account email, and the API token (token auth sends `email/token` as the username)"
        );
    }
    if !status.is_success() {
        bail!("connection test against {base_url} failed with HTTP {status}");
    }
    Ok(())
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn default_locale() -> String {
    "en-us".to_string()
}

fn env_value(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[derive(Serialize)]
struct CategoryPayload<'a> {
    category: &'a NewCategory,
}

#[derive(Serialize)]
struct SectionPayload<'a> {
    section: &'a NewSection,
}

#[derive(Serialize)]
struct ArticlePayload<'a> {
    article: &'a NewArticle,
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    use super::{
        Article, Category, HelpCenterClient, HelpCenterClientConfig, Listing, NewArticle,
        connection_test_outcome, parse_page, summarize_error_body,
    };
    use crate::credentials::Credentials;

    fn test_config() -> HelpCenterClientConfig {
        HelpCenterClientConfig {
            subdomain: "acme".to_string(),
            email: "agent@example.com".to_string(),
            api_token: "secret".to_string(),
            user_agent: "helpcopy-test".to_string(),
            timeout_ms: 1_000,
            rate_limit_read_ms: 0,
            rate_limit_write_ms: 0,
            max_retries: 0,
            retry_delay_ms: 0,
        }
    }

    #[test]
    fn base_url_and_auth_username_follow_the_token_convention() {
        let client = HelpCenterClient::new(test_config()).expect("client");
        assert_eq!(
            client.endpoint("/help_center/categories.json"),
            "https://acme.zendesk.com/api/v2/help_center/categories.json"
        );
        assert_eq!(client.auth_username(), "agent@example.com/token");
    }

    #[test]
    fn empty_subdomain_is_rejected() {
        let mut config = test_config();
        config.subdomain = "  ".to_string();
        let error = HelpCenterClient::new(config).expect_err("must fail");
        assert!(error.to_string().contains("subdomain"));
    }

    #[test]
    fn config_from_credentials_carries_the_identity() {
        let config = HelpCenterClientConfig::from_credentials(&Credentials {
            subdomain: "acme".to_string(),
            email: "agent@example.com".to_string(),
            api_token: "secret".to_string(),
        });
        assert_eq!(config.subdomain, "acme");
        assert_eq!(config.email, "agent@example.com");
        assert_eq!(config.api_token, "secret");
    }

    #[test]
    fn category_defaults_fill_missing_optional_fields() {
        let category: Category =
            serde_json::from_value(json!({ "id": 7, "name": "Billing" })).expect("decode");
        assert_eq!(category.description, "");
        assert_eq!(category.locale, "en-us");
        assert_eq!(category.position, 0);
    }

    #[test]
    fn article_decodes_body_verbatim() {
        let article: Article = serde_json::from_value(json!({
            "id": 100,
            "section_id": 10,
            "title": "Refunds",
            "body": "<p>keep &amp; raw</p>",
            "draft": true
        }))
        .expect("decode");
        assert_eq!(article.body, "<p>keep &amp; raw</p>");
        assert!(article.draft);
        assert!(!article.promoted);
    }

    #[test]
    fn new_article_serializes_explicit_null_user_segment() {
        let attrs = NewArticle {
            title: "Refunds".to_string(),
            body: "<p>body</p>".to_string(),
            locale: "en-us".to_string(),
            position: 0,
            draft: false,
            promoted: false,
            permission_group_id: 42,
            user_segment_id: None,
        };
        let value = serde_json::to_value(&attrs).expect("serialize");
        assert_eq!(value.get("user_segment_id"), Some(&Value::Null));
        assert_eq!(value.get("permission_group_id"), Some(&json!(42)));
    }

    #[test]
    fn parse_page_extracts_records_and_next_page() {
        let (records, next_page) = parse_page::<Category>(
            json!({
                "categories": [{ "id": 1, "name": "A" }, { "id": 2, "name": "B" }],
                "next_page": "https://acme.zendesk.com/api/v2/help_center/categories.json?page=2"
            }),
            "categories",
        )
        .expect("parse");
        assert_eq!(records.len(), 2);
        assert!(next_page.expect("next page").ends_with("page=2"));
    }

    #[test]
    fn parse_page_treats_null_next_page_as_end() {
        let (records, next_page) = parse_page::<Category>(
            json!({ "categories": [{ "id": 1, "name": "A" }], "next_page": null }),
            "categories",
        )
        .expect("parse");
        assert_eq!(records.len(), 1);
        assert!(next_page.is_none());
    }

    #[test]
    fn listing_walks_pages_lazily() {
        let mut fetched: Vec<String> = Vec::new();
        let listing: Listing<Category, _> = Listing::new(
            "categories",
            "page-1".to_string(),
            |url: &str| {
                fetched.push(url.to_string());
                match url {
                    "page-1" => Ok(json!({
                        "categories": [{ "id": 1, "name": "A" }],
                        "next_page": "page-2"
                    })),
                    "page-2" => Ok(json!({
                        "categories": [{ "id": 2, "name": "B" }],
                        "next_page": null
                    })),
                    other => anyhow::bail!("unexpected url {other}"),
                }
            },
        );
        let names = listing
            .map(|item| item.expect("record").name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(fetched, vec!["page-1".to_string(), "page-2".to_string()]);
    }

    #[test]
    fn listing_yields_buffered_records_before_a_page_failure() {
        let listing: Listing<Category, _> = Listing::new(
            "categories",
            "page-1".to_string(),
            |url: &str| match url {
                "page-1" => Ok(json!({
                    "categories": [{ "id": 1, "name": "A" }, { "id": 2, "name": "B" }],
                    "next_page": "page-2"
                })),
                _ => anyhow::bail!("HTTP 503 while fetching page 2"),
            },
        );
        let items = listing.collect::<Vec<_>>();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().expect("first").id, 1);
        assert_eq!(items[1].as_ref().expect("second").id, 2);
        assert!(items[2].is_err());
    }

    #[test]
    fn listing_skips_empty_pages() {
        let listing: Listing<Category, _> = Listing::new(
            "categories",
            "page-1".to_string(),
            |url: &str| match url {
                "page-1" => Ok(json!({ "categories": [], "next_page": "page-2" })),
                "page-2" => Ok(json!({
                    "categories": [{ "id": 9, "name": "Z" }],
                    "next_page": null
                })),
                other => anyhow::bail!("unexpected url {other}"),
            },
        );
        let ids = listing
            .map(|item| item.expect("record").id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![9]);
    }

    #[test]
    fn connection_test_maps_auth_rejections_to_credential_guidance() {
        let base_url = "https://acme.zendesk.com/api/v2";
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let error = connection_test_outcome(base_url, status).expect_err("must fail");
            let message = error.to_string();
            assert!(message.contains("authentication rejected"));
            assert!(message.contains(base_url));
            assert!(message.contains("email/token"));
        }
    }

    #[test]
    fn connection_test_reports_other_failures_without_auth_guidance() {
        let error =
            connection_test_outcome("https://acme.zendesk.com/api/v2", StatusCode::BAD_GATEWAY)
                .expect_err("must fail");
        let message = error.to_string();
        assert!(message.contains("HTTP 502"));
        assert!(!message.contains("authentication rejected"));
    }

    #[test]
    fn connection_test_accepts_success_statuses() {
        assert!(
            connection_test_outcome("https://acme.zendesk.com/api/v2", StatusCode::OK).is_ok()
        );
    }

    #[test]
    fn error_bodies_are_trimmed_and_truncated() {
        assert_eq!(summarize_error_body("  \n "), "<empty response body>");
        assert_eq!(summarize_error_body(" oops "), "oops");
        let long = "x".repeat(2_000);
        let summary = summarize_error_body(&long);
        assert!(summary.chars().count() <= 601);
        assert!(summary.ends_with('…'));
    }
}
