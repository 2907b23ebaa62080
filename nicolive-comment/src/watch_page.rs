//! Broadcast watch page scraping
//!
//! The watch page embeds its initial state as HTML-escaped JSON in the
//! `data-props` attribute of the `embedded-data` element. That blob carries the
//! control-channel URL and everything needed for [`BroadcastMetadata`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::config::WatchPageConfig;
use crate::error::{ClientError, Result};
use crate::events::BroadcastMetadata;
use crate::http::USER_AGENT;

static EMBEDDED_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"id="embedded-data"\s+data-props="([^"]+)""#).expect("invalid embedded-data regex")
});

/// What a successful page lookup yields.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchPage {
    pub web_socket_url: String,
    pub metadata: BroadcastMetadata,
}

#[async_trait]
pub trait WatchPageResolver: Send + Sync {
    async fn resolve(&self, live_id: &str) -> Result<WatchPage>;
}

/// [`WatchPageResolver`] that fetches `https://live.nicovideo.jp/watch/<id>`.
#[derive(Clone)]
pub struct WatchPageClient {
    client: Client,
    base_url: String,
    cookies: Option<String>,
}

impl WatchPageClient {
    pub fn new(config: &WatchPageConfig, cookies: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            cookies,
        })
    }
}

#[async_trait]
impl WatchPageResolver for WatchPageClient {
    async fn resolve(&self, live_id: &str) -> Result<WatchPage> {
        let url = format!("{}{live_id}", self.base_url);

        let mut req = self
            .client
            .get(&url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "ja,en-US;q=0.9,en;q=0.8");
        if let Some(cookies) = &self.cookies {
            req = req.header(reqwest::header::COOKIE, cookies);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::PageData(format!(
                "Failed to fetch broadcast page: {}",
                resp.status().as_u16()
            )));
        }

        let html = resp.text().await?;
        let page = parse_watch_page(&html)?;
        debug!(live_id = %live_id, ws_url = %page.web_socket_url, "Watch page resolved");
        Ok(page)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EmbeddedProps {
    site: Option<Site>,
    program: Option<Program>,
    social_group: Option<SocialGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Site {
    relive: Option<Relive>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Relive {
    web_socket_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Program {
    title: Option<String>,
    status: Option<String>,
    description: Option<String>,
    begin_time: Option<f64>,
    end_time: Option<f64>,
    screenshot: Option<Screenshot>,
    thumbnail: Option<Thumbnail>,
    tag: Option<TagList>,
    statistics: Option<Statistics>,
    supplier: Option<Supplier>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Screenshot {
    url_set: Option<UrlSet>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UrlSet {
    large: Option<String>,
    middle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    small: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TagList {
    list: Vec<Tag>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Tag {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Statistics {
    watch_count: Option<u64>,
    comment_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Supplier {
    name: Option<String>,
    program_provider_id: Option<Value>,
    supplier_type: Option<String>,
    icons: Option<Icons>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Icons {
    uri150x150: Option<String>,
    uri50x50: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SocialGroup {
    id: Option<Value>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Extract the control-channel URL and metadata from watch page HTML.
pub fn parse_watch_page(html: &str) -> Result<WatchPage> {
    let escaped = EMBEDDED_DATA
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ClientError::PageData("Could not find embedded data in the page".to_string()))?
        .as_str();

    let props: EmbeddedProps = serde_json::from_str(&unescape_html(escaped))?;

    let web_socket_url = props
        .site
        .as_ref()
        .and_then(|s| s.relive.as_ref())
        .and_then(|r| r.web_socket_url.clone())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ClientError::PageData("WebSocket URL not found in broadcast data".to_string()))?;

    Ok(WatchPage {
        web_socket_url,
        metadata: build_metadata(props),
    })
}

fn build_metadata(props: EmbeddedProps) -> BroadcastMetadata {
    let program = props.program.unwrap_or_default();
    let supplier = program.supplier.unwrap_or_default();
    let icons = supplier.icons.unwrap_or_default();
    let stats = program.statistics.unwrap_or_default();
    let social = props.social_group.unwrap_or_default();

    let thumbnail_url = program
        .screenshot
        .and_then(|s| s.url_set)
        .and_then(|u| u.large.or(u.middle))
        .or_else(|| program.thumbnail.and_then(|t| t.small));

    BroadcastMetadata {
        title: program.title,
        status: program.status,
        description: program.description,
        begin_time: program.begin_time.and_then(unix_seconds),
        end_time: program.end_time.and_then(unix_seconds),
        thumbnail_url,
        tags: program
            .tag
            .map(|t| t.list.into_iter().map(|tag| tag.text).collect())
            .unwrap_or_default(),
        watch_count: stats.watch_count,
        comment_count: stats.comment_count,
        broadcaster_name: supplier.name,
        broadcaster_user_id: supplier.program_provider_id.and_then(value_to_string),
        broadcaster_type: supplier.supplier_type,
        broadcaster_icon_url: icons.uri150x150.or(icons.uri50x50),
        social_group_id: social.id.and_then(value_to_string),
        social_group_name: social.name,
        social_group_type: social.kind,
    }
}

fn unescape_html(s: &str) -> String {
    // &amp; last so "&amp;quot;" stays "&quot;"
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs.trunc() as i64, 0)
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_with(props: &Value) -> String {
        let escaped = props
            .to_string()
            .replace('&', "&amp;")
            .replace('"', "&quot;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        format!(
            "<html><body><script id=\"embedded-data\" data-props=\"{escaped}\"></script></body></html>"
        )
    }

    fn full_props() -> Value {
        serde_json::json!({
            "site": { "relive": { "webSocketUrl": "wss://a.live2.nicovideo.jp/wsapi/v2/watch/lv1?audience_token=x&frontend_id=9" } },
            "program": {
                "title": "Evening <stream>",
                "status": "ON_AIR",
                "description": "desc",
                "beginTime": 1_700_000_000,
                "endTime": 1_700_003_600,
                "screenshot": { "urlSet": { "middle": "https://img.example/middle.jpg" } },
                "thumbnail": { "small": "https://img.example/small.jpg" },
                "tag": { "list": [ { "text": "game" }, { "text": "talk" } ] },
                "statistics": { "watchCount": 120, "commentCount": 45 },
                "supplier": {
                    "name": "host",
                    "programProviderId": 98765,
                    "supplierType": "user",
                    "icons": { "uri50x50": "https://img.example/icon50.jpg" }
                }
            },
            "socialGroup": { "id": "co123", "name": "community", "type": "community" }
        })
    }

    #[test]
    fn test_parse_full_page() {
        let page = parse_watch_page(&page_with(&full_props())).unwrap();
        assert_eq!(
            page.web_socket_url,
            "wss://a.live2.nicovideo.jp/wsapi/v2/watch/lv1?audience_token=x&frontend_id=9"
        );

        let meta = page.metadata;
        assert_eq!(meta.title.as_deref(), Some("Evening <stream>"));
        assert_eq!(meta.status.as_deref(), Some("ON_AIR"));
        assert_eq!(meta.begin_time.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(meta.end_time.map(|t| t.timestamp()), Some(1_700_003_600));
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://img.example/middle.jpg"));
        assert_eq!(meta.tags, vec!["game", "talk"]);
        assert_eq!(meta.watch_count, Some(120));
        assert_eq!(meta.comment_count, Some(45));
        assert_eq!(meta.broadcaster_user_id.as_deref(), Some("98765"));
        assert_eq!(meta.broadcaster_type.as_deref(), Some("user"));
        assert_eq!(meta.broadcaster_icon_url.as_deref(), Some("https://img.example/icon50.jpg"));
        assert_eq!(meta.social_group_id.as_deref(), Some("co123"));
        assert_eq!(meta.social_group_type.as_deref(), Some("community"));
    }

    #[test]
    fn test_parse_minimal_page() {
        let props = serde_json::json!({ "site": { "relive": { "webSocketUrl": "wss://example/ws" } } });
        let page = parse_watch_page(&page_with(&props)).unwrap();
        assert_eq!(page.web_socket_url, "wss://example/ws");
        assert_eq!(page.metadata, BroadcastMetadata::default());
    }

    #[test]
    fn test_missing_embedded_data() {
        let err = parse_watch_page("<html></html>").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Broadcast page error: Could not find embedded data in the page"
        );
    }

    #[test]
    fn test_missing_web_socket_url() {
        let props = serde_json::json!({ "site": {} });
        let err = parse_watch_page(&page_with(&props)).unwrap_err();
        assert!(matches!(err, ClientError::PageData(_)));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let html = r#"<div id="embedded-data" data-props="{not json"></div>"#;
        assert!(matches!(parse_watch_page(html).unwrap_err(), ClientError::Parse(_)));
    }

    #[tokio::test]
    async fn test_client_fetches_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watch/lv1"))
            .and(header("cookie", "user_session=s"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with(&full_props())))
            .mount(&server)
            .await;

        let config = WatchPageConfig {
            base_url: format!("{}/watch/", server.uri()),
            timeout_ms: 5_000,
        };
        let client = WatchPageClient::new(&config, Some("user_session=s".to_string())).unwrap();
        let page = client.resolve("lv1").await.unwrap();
        assert_eq!(page.metadata.broadcaster_name.as_deref(), Some("host"));
    }

    #[tokio::test]
    async fn test_client_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = WatchPageConfig {
            base_url: format!("{}/watch/", server.uri()),
            timeout_ms: 5_000,
        };
        let client = WatchPageClient::new(&config, None).unwrap();
        let err = client.resolve("lv404").await.unwrap_err();
        assert_eq!(err.to_string(), "Broadcast page error: Failed to fetch broadcast page: 404");
    }
}
