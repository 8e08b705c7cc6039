use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::WikiSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProtection {
    pub kind: String,
    pub level: String,
}

/// The wiki operations the archive job needs.
///
/// Implementations are shared by every day worker in a month, so all methods
/// take `&self`.
pub trait WikiSite: Sync {
    fn login(&self, username: &str, password: &str) -> Result<()>;
    /// `Ok(None)` when the page does not exist.
    fn fetch_page(&self, title: &str) -> Result<Option<RemotePage>>;
    fn page_exists(&self, title: &str) -> Result<bool> {
        Ok(self.fetch_page(title)?.is_some())
    }
    fn edit_page(&self, title: &str, content: &str, summary: &str) -> Result<()>;
    fn protection(&self, title: &str) -> Result<Vec<PageProtection>>;
    fn protect(&self, title: &str, protections: &[(&str, &str)], reason: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

/// Level currently applied for one protection type, if any.
pub fn protection_level<'a>(protections: &'a [PageProtection], kind: &str) -> Option<&'a str> {
    protections
        .iter()
        .find(|item| item.kind == kind)
        .map(|item| item.level.as_str())
}

pub struct MediaWikiClient {
    client: Client,
    settings: WikiSettings,
    /// Start time handed to the most recent request.
    last_slot: Mutex<Option<Instant>>,
    request_count: AtomicUsize,
    csrf_token: Mutex<Option<String>>,
}

impl MediaWikiClient {
    pub fn new(settings: WikiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            settings,
            last_slot: Mutex::new(None),
            request_count: AtomicUsize::new(0),
            csrf_token: Mutex::new(None),
        })
    }

    fn request_json_get(&self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.settings.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.settings.api_url))?;
        let pairs = api_pairs(params);

        self.apply_rate_limit(false);
        let response = self
            .client
            .get(base_url)
            .header("User-Agent", self.settings.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn request_json_post(&self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);

        self.apply_rate_limit(true);
        let response = self
            .client
            .post(&self.settings.api_url)
            .header("User-Agent", self.settings.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn apply_rate_limit(&self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.settings.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.settings.rate_limit_read_ms)
        };
        let now = Instant::now();
        let start = {
            let mut last_slot = self
                .last_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            reserve_slot(&mut last_slot, now, delay)
        };
        let wait = start.saturating_duration_since(now);
        if !wait.is_zero() {
            sleep(wait);
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn ensure_csrf_token(&self) -> Result<String> {
        if let Some(token) = self.cached_csrf_token() {
            return Ok(token);
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.set_csrf_token(Some(token.clone()));
        Ok(token)
    }

    fn cached_csrf_token(&self) -> Option<String> {
        self.csrf_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_csrf_token(&self, token: Option<String>) {
        *self
            .csrf_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }
}

impl WikiSite for MediaWikiClient {
    fn login(&self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.set_csrf_token(None);
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn fetch_page(&self, title: &str) -> Result<Option<RemotePage>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page content response")?;
        Ok(parsed.query.pages.into_iter().find_map(remote_page))
    }

    fn edit_page(&self, title: &str, content: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(&[
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", content.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("token", token),
        ])?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn protection(&self, title: &str) -> Result<Vec<PageProtection>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "info".to_string()),
            ("inprop", "protection".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode protection response")?;
        let page = parsed
            .query
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("page not returned by API: {title}"))?;
        Ok(page
            .protection
            .into_iter()
            .map(|item| PageProtection {
                kind: item.kind,
                level: item.level,
            })
            .collect())
    }

    fn protect(&self, title: &str, protections: &[(&str, &str)], reason: &str) -> Result<()> {
        if protections.is_empty() {
            bail!("protect requires at least one protection for {title}");
        }
        let token = self.ensure_csrf_token()?;
        let levels = protections
            .iter()
            .map(|(kind, level)| format!("{kind}={level}"))
            .collect::<Vec<_>>()
            .join("|");
        let expiry = vec!["infinite"; protections.len()].join("|");
        let response = self.request_json_post(&[
            ("action", "protect".to_string()),
            ("title", title.to_string()),
            ("protections", levels),
            ("expiry", expiry),
            ("reason", reason.to_string()),
            ("token", token),
        ])?;
        let payload: ProtectResponse =
            serde_json::from_value(response).context("failed to decode protect response")?;
        if payload.protect.is_none() {
            bail!("missing protect payload in API response for {title}");
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

/// Claim the next request start time, at least `delay` after the previous one.
///
/// Only the reservation happens under the lock; callers sleep until the
/// returned instant after releasing it.
fn reserve_slot(last_slot: &mut Option<Instant>, now: Instant, delay: Duration) -> Instant {
    let start = match *last_slot {
        Some(last) if last + delay > now => last + delay,
        _ => now,
    };
    *last_slot = Some(start);
    start
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn decode_api_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("MediaWiki API request failed with HTTP {status}");
    }
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    check_api_error(&payload)?;
    Ok(payload)
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

fn remote_page(page: PageQueryItem) -> Option<RemotePage> {
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return None;
    }
    let revision = page.revisions.into_iter().next()?;
    let content = revision.slots?.main?.content;
    Some(RemotePage { content })
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    protection: Vec<ProtectionItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ProtectionItem {
    #[serde(rename = "type")]
    kind: String,
    level: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ProtectResponse {
    protect: Option<Value>,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use anyhow::{Result, bail};
    use serde_json::json;

    use super::{
        PageProtection, QueryResponse, RemotePage, WikiSite, check_api_error, protection_level,
        remote_page, reserve_slot,
    };

    /// In-memory wiki used by the orchestration tests.
    #[derive(Default)]
    pub(crate) struct MockSite {
        pub pages: Mutex<BTreeMap<String, String>>,
        pub protections: Mutex<BTreeMap<String, Vec<PageProtection>>>,
        pub edits: Mutex<Vec<(String, String)>>,
        pub protect_calls: Mutex<Vec<String>>,
        pub fail_edits_for: Vec<String>,
        pub fail_protect_for: Vec<String>,
        pub fail_fetch_for: Vec<String>,
        pub request_count: AtomicUsize,
    }

    impl MockSite {
        pub(crate) fn with_page(self, title: &str, content: &str) -> Self {
            self.pages
                .lock()
                .expect("pages lock")
                .insert(title.to_string(), content.to_string());
            self
        }

        pub(crate) fn with_protection(self, title: &str, kind: &str, level: &str) -> Self {
            self.protections
                .lock()
                .expect("protections lock")
                .entry(title.to_string())
                .or_default()
                .push(PageProtection {
                    kind: kind.to_string(),
                    level: level.to_string(),
                });
            self
        }

        pub(crate) fn page(&self, title: &str) -> Option<String> {
            self.pages.lock().expect("pages lock").get(title).cloned()
        }

        pub(crate) fn edited_titles(&self) -> Vec<String> {
            let mut titles = self
                .edits
                .lock()
                .expect("edits lock")
                .iter()
                .map(|(title, _)| title.clone())
                .collect::<Vec<_>>();
            titles.sort();
            titles
        }

        pub(crate) fn protected_titles(&self) -> Vec<String> {
            let mut titles = self.protect_calls.lock().expect("protect lock").clone();
            titles.sort();
            titles
        }

        pub(crate) fn write_count(&self) -> usize {
            self.edits.lock().expect("edits lock").len()
                + self.protect_calls.lock().expect("protect lock").len()
        }
    }

    impl WikiSite for MockSite {
        fn login(&self, _username: &str, _password: &str) -> Result<()> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn fetch_page(&self, title: &str) -> Result<Option<RemotePage>> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            if self.fail_fetch_for.iter().any(|item| item == title) {
                bail!("MediaWiki API request failed with HTTP 503 Service Unavailable");
            }
            Ok(self.page(title).map(|content| RemotePage { content }))
        }

        fn edit_page(&self, title: &str, content: &str, _summary: &str) -> Result<()> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            if self.fail_edits_for.iter().any(|item| item == title) {
                bail!("MediaWiki API error [readonly]: The wiki is currently in read-only mode");
            }
            self.edits
                .lock()
                .expect("edits lock")
                .push((title.to_string(), content.to_string()));
            self.pages
                .lock()
                .expect("pages lock")
                .insert(title.to_string(), content.to_string());
            Ok(())
        }

        fn protection(&self, title: &str) -> Result<Vec<PageProtection>> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .protections
                .lock()
                .expect("protections lock")
                .get(title)
                .cloned()
                .unwrap_or_default())
        }

        fn protect(
            &self,
            title: &str,
            protections: &[(&str, &str)],
            _reason: &str,
        ) -> Result<()> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            if self.fail_protect_for.iter().any(|item| item == title) {
                bail!("MediaWiki API error [permissiondenied]: You do not have permission");
            }
            self.protect_calls
                .lock()
                .expect("protect lock")
                .push(title.to_string());
            let applied = protections
                .iter()
                .map(|(kind, level)| PageProtection {
                    kind: (*kind).to_string(),
                    level: (*level).to_string(),
                })
                .collect();
            self.protections
                .lock()
                .expect("protections lock")
                .insert(title.to_string(), applied);
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.request_count.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn remote_page_reads_main_slot_content() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "batchcomplete": true,
            "query": {
                "pages": [{
                    "pageid": 42,
                    "ns": 4,
                    "title": "Wiktionary:Word of the day/Archive/2006/January",
                    "revisions": [{
                        "revid": 7,
                        "parentid": 6,
                        "slots": {"main": {"contentmodel": "wikitext", "content": "== 1 ==\n{{wotd|a}}"}}
                    }]
                }]
            }
        }))
        .expect("decode");
        let page = parsed
            .query
            .pages
            .into_iter()
            .find_map(remote_page)
            .expect("page");
        assert_eq!(page.content, "== 1 ==\n{{wotd|a}}");
    }

    #[test]
    fn reserved_slots_are_spaced_without_waiting_on_the_lock() {
        let now = Instant::now();
        let delay = Duration::from_millis(1_000);
        let mut last_slot = None;

        let first = reserve_slot(&mut last_slot, now, delay);
        let second = reserve_slot(&mut last_slot, now, delay);
        let third = reserve_slot(&mut last_slot, now, delay);

        assert_eq!(first, now);
        assert_eq!(second, now + delay);
        assert_eq!(third, now + delay * 2);
        assert_eq!(last_slot, Some(third));
    }

    #[test]
    fn idle_client_gets_an_immediate_slot() {
        let earlier = Instant::now();
        let delay = Duration::from_millis(300);
        let mut last_slot = Some(earlier);

        let later = earlier + Duration::from_secs(5);
        assert_eq!(reserve_slot(&mut last_slot, later, delay), later);
    }

    #[test]
    fn missing_page_maps_to_none() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": {"pages": [{"ns": 4, "title": "Wiktionary:Nope", "missing": true}]}
        }))
        .expect("decode");
        assert!(parsed.query.pages.into_iter().find_map(remote_page).is_none());
    }

    #[test]
    fn protection_payload_decodes_type_and_level() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": {"pages": [{
                "pageid": 3,
                "ns": 4,
                "title": "Wiktionary:Word of the day/2006/January 1",
                "protection": [
                    {"type": "edit", "level": "sysop", "expiry": "infinity"},
                    {"type": "move", "level": "autoconfirmed", "expiry": "infinity"}
                ]
            }]}
        }))
        .expect("decode");
        let protections = parsed.query.pages[0]
            .protection
            .iter()
            .map(|item| PageProtection {
                kind: item.kind.clone(),
                level: item.level.clone(),
            })
            .collect::<Vec<_>>();
        assert_eq!(protection_level(&protections, "edit"), Some("sysop"));
        assert_eq!(protection_level(&protections, "move"), Some("autoconfirmed"));
        assert_eq!(protection_level(&protections, "upload"), None);
    }

    #[test]
    fn api_error_payload_becomes_error_with_code() {
        let error = check_api_error(&json!({
            "error": {"code": "protectedpage", "info": "This page has been protected"}
        }))
        .expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "MediaWiki API error [protectedpage]: This page has been protected"
        );
        assert!(check_api_error(&json!({"query": {}})).is_ok());
    }
}
