use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::config::WebSearchConfig;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: Option<String>,
    pub body: String,
}

impl WebResult {
    pub fn to_line(&self) -> String {
        format!("{}: {}", self.title, self.body)
    }
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>>;
}

/// Keyless search against DuckDuckGo's HTML frontend.
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
    region: String,
}

impl DuckDuckGoSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query), ("kl", self.region.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Web search failed: {}", response.status());
        }

        let html = response.text().await?;
        Ok(parse_results(&html, max_results))
    }
}

static RESULT: Lazy<Selector> = Lazy::new(|| Selector::parse("div.result").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("a.result__a").unwrap());
static SNIPPET: Lazy<Selector> = Lazy::new(|| Selector::parse(".result__snippet").unwrap());

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result links go through a `/l/?uddg=<target>` redirect.
fn resolve_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    let target = url
        .query_pairs()
        .find(|(key, _)| key == "uddg")
        .map(|(_, value)| value.into_owned());

    Some(target.unwrap_or_else(|| url.to_string()))
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<WebResult> {
    let document = Html::parse_document(html);

    document
        .select(&RESULT)
        .filter(|result| {
            !result
                .value()
                .classes()
                .any(|class| class == "result--ad")
        })
        .filter_map(|result| {
            let title_el = result.select(&TITLE).next()?;
            let title = element_text(title_el);
            let body = result
                .select(&SNIPPET)
                .next()
                .map(element_text)
                .unwrap_or_default();
            if title.is_empty() && body.is_empty() {
                return None;
            }
            let url = title_el.value().attr("href").and_then(resolve_link);
            Some(WebResult { title, url, body })
        })
        .take(max_results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_HTML: &str = r#"
<html><body>
<div class="result results_links result--ad">
  <h2 class="result__title"><a class="result__a" href="https://ads.example.com">Sponsored</a></h2>
  <a class="result__snippet">Buy now</a>
</div>
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.org%2Fesg&amp;rut=abc">ESG   <b>Reporting</b></a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Frameworks for <b>sustainability</b> disclosure.</a>
</div>
<div class="result results_links web-result">
  <h2 class="result__title"><a class="result__a" href="https://example.com/weather">Weather today</a></h2>
  <a class="result__snippet">Sunny with light wind.</a>
</div>
<div class="result results_links web-result">
  <h2 class="result__title"><a class="result__a" href="https://example.com/third">Third</a></h2>
  <a class="result__snippet">Third body.</a>
</div>
</body></html>
"#;

    #[test]
    fn test_parse_results_skips_ads_and_normalizes_text() {
        let results = parse_results(RESULTS_HTML, 5);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "ESG Reporting");
        assert_eq!(results[0].body, "Frameworks for sustainability disclosure.");
        assert_eq!(results[0].url.as_deref(), Some("https://example.org/esg"));
        assert_eq!(results[1].url.as_deref(), Some("https://example.com/weather"));
    }

    #[test]
    fn test_parse_results_respects_max() {
        assert_eq!(parse_results(RESULTS_HTML, 2).len(), 2);
        assert!(parse_results("<html></html>", 5).is_empty());
    }

    #[test]
    fn test_to_line() {
        let result = WebResult {
            title: "Weather today".to_string(),
            url: None,
            body: "Sunny".to_string(),
        };
        assert_eq!(result.to_line(), "Weather today: Sunny");
    }

    fn search_for(server: &MockServer) -> DuckDuckGoSearch {
        let config = WebSearchConfig {
            endpoint: format!("{}/html/", server.uri()),
            ..WebSearchConfig::default()
        };
        DuckDuckGoSearch::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_search_posts_query_form() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/html/"))
            .and(body_string_contains("q=weather+in+Taipei"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_HTML))
            .expect(1)
            .mount(&server)
            .await;

        let results = search_for(&server).search("weather in Taipei", 5).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_search_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        assert!(search_for(&server).search("anything", 5).await.is_err());
    }
}
