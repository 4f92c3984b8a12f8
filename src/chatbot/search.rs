//! Web search with LLM summarization.
//!
//! DuckDuckGo's HTML endpoint needs no key. The top results are fetched,
//! reduced to plain text and handed to the language model with instructions
//! to cite them by number.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::chatbot::green_api::check_status;
use crate::chatbot::services::{Content, LanguageModel, LlmMessage, Role, WebSearch};
use crate::error::{Error, Result};

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_RESULTS: usize = 5;
const MAX_CONCURRENT_FETCHES: usize = 3;
const MAX_PAGE_CHARS: usize = 1000;
const MIN_PAGE_CHARS: usize = 100;
const MAX_SNIPPET_CHARS: usize = 300;

const SEARCH_INSTRUCTIONS: &str = "Answer the user's question using ONLY the search results below.
Be concise but comprehensive. ALWAYS cite sources inline as [1], [2] and so on.
If the sources conflict, mention both views. If they do not contain enough information, say so.
Respond in the same language as the question. Do not make anything up. Keep it under 500 words.";

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a rel="nofollow" class="result__a" href="([^"]+)"[^>]*>(.+?)</a>"#)
        .expect("valid regex")
});
static SNIPPET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a class="result__snippet"[^>]*>(.+?)</a>"#).expect("valid regex")
});
static UDDG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"uddg=([^&]+)").expect("valid regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<nav[^>]*>.*?</nav>|<footer[^>]*>.*?</footer>|<header[^>]*>.*?</header>|<aside[^>]*>.*?</aside>|<!--.*?-->",
    )
    .expect("valid regex")
});
static BODY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:p|article|main|h[1-6])[^>]*>(.*?)</(?:p|article|main|h[1-6])>")
        .expect("valid regex")
});
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\w\s.,!?;:()\[\]{}"'-]"#).expect("valid regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    llm: Arc<dyn LanguageModel>,
}

impl DuckDuckGoSearch {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, llm })
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let url = format!("{SEARCH_URL}?q={}", urlencoding::encode(query));
        let response = self.client.get(url).send().await.map_err(Error::from_request)?;
        let html = check_status(response).await?.text().await?;
        let results = parse_results(&html, MAX_RESULTS);
        info!("🔍 Found {} results for: {query}", results.len());
        Ok(results)
    }

    /// Fetch result pages concurrently, keyed by URL. Failed or thin pages are omitted.
    async fn fetch_pages(&self, urls: Vec<String>) -> HashMap<String, String> {
        let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut tasks = JoinSet::new();
        for url in urls {
            let client = self.client.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                let text = fetch_page(&client, &url).await;
                text.map(|t| (url, t))
            });
        }

        let mut pages = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some((url, text))) = joined {
                pages.insert(url, text);
            }
        }
        pages
    }
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Option<String> {
    let response = client
        .get(url)
        .header("Accept", "text/html,application/xhtml+xml")
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            debug!("Fetch failed for {url}: {e}");
            return None;
        }
    };
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"));
    if !is_html {
        return None;
    }
    let html = response.text().await.ok()?;
    clean_page(&html, MAX_PAGE_CHARS)
}

/// Unwrap DuckDuckGo's `/l/?uddg=` redirect links.
pub fn extract_real_url(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    if let Some(encoded) = UDDG_RE.captures(raw).and_then(|c| c.get(1)) {
        if let Ok(decoded) = urlencoding::decode(encoded.as_str()) {
            if decoded.starts_with("http") {
                return Some(decoded.into_owned());
            }
        }
    }
    raw.strip_prefix("//").map(|rest| format!("https://{rest}"))
}

fn strip_tags(html: &str) -> String {
    let text = TAG_RE.replace_all(html, "");
    SPACE_RE.replace_all(text.trim(), " ").into_owned()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Result links and snippets from the search page, paired by position.
pub fn parse_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let snippets: Vec<String> = SNIPPET_RE
        .captures_iter(html)
        .map(|c| strip_tags(&c[1]))
        .collect();

    LINK_RE
        .captures_iter(html)
        .take(limit)
        .enumerate()
        .filter_map(|(i, c)| {
            let url = extract_real_url(&c[1])?;
            let snippet = snippets.get(i).map(|s| truncate_chars(s, MAX_SNIPPET_CHARS));
            Some(SearchResult {
                title: strip_tags(&c[2]),
                url,
                snippet: snippet.unwrap_or_default(),
            })
        })
        .collect()
}

/// Plain text of the page body, or `None` when too little text remains.
pub fn clean_page(html: &str, max_chars: usize) -> Option<String> {
    let html = NOISE_RE.replace_all(html, "");
    let blocks: Vec<&str> = BODY_RE
        .captures_iter(&html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let raw = if blocks.is_empty() { html.to_string() } else { blocks.join(" ") };

    let text = TAG_RE.replace_all(&raw, " ");
    let text = SPACE_RE.replace_all(&text, " ");
    let text = SYMBOL_RE.replace_all(text.trim(), "");
    let mut text = text.into_owned();

    if text.chars().count() > max_chars {
        text = format!("{}...", truncate_chars(&text, max_chars));
    }
    (text.chars().count() > MIN_PAGE_CHARS).then_some(text)
}

fn domain(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}

pub fn format_simple_results(query: &str, results: &[SearchResult]) -> String {
    let mut lines = vec![format!("🔍 *Results:* _{query}_\n")];
    for (i, r) in results.iter().enumerate() {
        lines.push(format!("{}. *{}*", i + 1, r.title));
        if !r.snippet.is_empty() {
            lines.push(format!("   {}...", truncate_chars(&r.snippet, 150)));
        }
        lines.push(format!("   🔗 {}\n", domain(&r.url)));
    }
    lines.join("\n")
}

fn nothing_found(query: &str) -> String {
    format!(
        "🔍 Nothing found for: _{query}_\n\n💡 Try:\n• different keywords\n• a simpler query\n• English"
    )
}

fn build_prompt(query: &str, results: &[SearchResult], pages: &HashMap<String, String>) -> String {
    let context: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let content = pages.get(&r.url).unwrap_or(&r.snippet);
            format!("[{}] {}\nURL: {}\nContent: {}\n", i + 1, r.title, r.url, content)
        })
        .collect();
    format!(
        "{SEARCH_INSTRUCTIONS}\n\nUser question: {query}\n\nSearch results:\n{}\n\n\
         Based on these search results, answer the user's question. Cite sources as [1], [2] etc.",
        context.join("\n---\n")
    )
}

fn source_list(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n🔗 {}", i + 1, r.title, r.url))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search_and_summarize(&self, query: &str, model: Option<&str>) -> Result<String> {
        let results = self.search(query).await?;
        if results.is_empty() {
            return Ok(nothing_found(query));
        }

        let pages = self.fetch_pages(results.iter().map(|r| r.url.clone()).collect()).await;
        debug!("Fetched {}/{} pages", pages.len(), results.len());

        let prompt = build_prompt(query, &results, &pages);
        let messages = [LlmMessage { role: Role::User, content: Content::Text(prompt) }];
        match self.llm.complete(&messages, model).await {
            Ok(summary) => Ok(format!(
                "🔍 *{query}*\n\n{summary}\n\n━━━━━━━━━━━━━━━\n📚 *Sources:*\n{}",
                source_list(&results)
            )),
            Err(e) => {
                warn!("Search summarization failed: {e}");
                Ok(format_simple_results(query, &results))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_HTML: &str = r#"
        <div class="result">
          <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn&amp;rut=abc">The <b>Rust</b> Book</a>
          <a class="result__snippet" href="x">Learn   <b>Rust</b> the
            official way.</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://docs.rs/tokio">tokio - docs.rs</a>
          <a class="result__snippet" href="y">An async runtime.</a>
        </div>
    "#;

    #[test]
    fn test_extract_real_url() {
        assert_eq!(
            extract_real_url("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=1").as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(extract_real_url("https://direct.io").as_deref(), Some("https://direct.io"));
        assert_eq!(extract_real_url("//cdn.example.com/x").as_deref(), Some("https://cdn.example.com/x"));
        assert_eq!(extract_real_url("/relative"), None);
        assert_eq!(extract_real_url(""), None);
    }

    #[test]
    fn test_parse_results() {
        let results = parse_results(RESULTS_HTML, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "The Rust Book");
        assert_eq!(results[0].url, "https://www.rust-lang.org/learn");
        assert_eq!(results[0].snippet, "Learn Rust the official way.");
        assert_eq!(results[1].url, "https://docs.rs/tokio");

        assert_eq!(parse_results(RESULTS_HTML, 1).len(), 1);
    }

    #[test]
    fn test_clean_page_strips_noise() {
        let body = "Rust is a systems programming language focused on safety, speed and concurrency. \
                    It has no garbage collector.";
        let html = format!(
            "<html><script>var x = 1;</script><nav>menu menu</nav><p>{body}</p><footer>(c)</footer></html>"
        );
        let text = clean_page(&html, 1000).unwrap();
        assert!(text.starts_with("Rust is a systems"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("menu"));
    }

    #[test]
    fn test_clean_page_thin_and_long() {
        assert_eq!(clean_page("<p>too short</p>", 1000), None);

        let long = format!("<p>{}</p>", "word ".repeat(500));
        let text = clean_page(&long, 200).unwrap();
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), 203);
    }

    #[test]
    fn test_format_simple_results() {
        let results = parse_results(RESULTS_HTML, 5);
        let text = format_simple_results("rust", &results);
        assert!(text.contains("1. *The Rust Book*"));
        assert!(text.contains("🔗 rust-lang.org"));
        assert!(text.contains("🔗 docs.rs"));
    }

    #[test]
    fn test_prompt_prefers_page_text_over_snippet() {
        let results = parse_results(RESULTS_HTML, 5);
        let mut pages = HashMap::new();
        pages.insert("https://docs.rs/tokio".to_string(), "full page text".to_string());
        let prompt = build_prompt("rust", &results, &pages);
        assert!(prompt.contains("Content: Learn Rust the official way."));
        assert!(prompt.contains("Content: full page text"));
        assert!(prompt.contains("User question: rust"));
    }
}
