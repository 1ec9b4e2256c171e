//! Demo-video transcripts.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{ReviewError, ReviewResult};
use crate::project::extract_video_id;

const TRANSCRIPT_BASE_URL: &str = "https://youtubetotranscript.com/transcript";

/// Source of a video's spoken transcript.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Transcript text for a canonical video URL.
    async fn transcript(&self, canonical_url: &str) -> ReviewResult<String>;
}

/// Scrapes transcripts from youtubetotranscript.com.
pub struct YoutubeTranscriptClient {
    base_url: String,
    http: Client,
}

impl YoutubeTranscriptClient {
    pub fn new() -> ReviewResult<Self> {
        Self::with_base_url(TRANSCRIPT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> ReviewResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ReviewError::Transcript(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }
}

#[async_trait]
impl TranscriptSource for YoutubeTranscriptClient {
    async fn transcript(&self, canonical_url: &str) -> ReviewResult<String> {
        let video_id = extract_video_id(canonical_url)?;
        let url = format!("{}?v={}", self.base_url, urlencoding::encode(&video_id));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ReviewError::Transcript(format!("{}: {}", video_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(video_id = %video_id, status = status.as_u16(), "Transcript fetch failed");
            return Err(ReviewError::Transcript(format!(
                "failed to fetch transcript for video {}: HTTP {}",
                video_id,
                status.as_u16()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ReviewError::Transcript(format!("{}: {}", video_id, e)))?;

        let text = article_text(&html).ok_or_else(|| {
            ReviewError::Transcript(format!("no article tag found for video {}", video_id))
        })?;
        tracing::debug!(video_id = %video_id, chars = text.len(), "Transcript fetched");
        Ok(text)
    }
}

/// Visible text of the first `<article>` element, `None` when absent.
pub fn article_text(html: &str) -> Option<String> {
    static ARTICLE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let article = ARTICLE
        .get_or_init(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").expect("Invalid regex for article"));
    let script = SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").expect("Invalid regex for script")
    });
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("Invalid regex for tags"));
    let space = SPACE.get_or_init(|| Regex::new(r"[ \t\r\n]+").expect("Invalid regex for spaces"));

    let inner = article.captures(html)?.get(1)?.as_str();
    let without_scripts = script.replace_all(inner, " ");
    let without_tags = tag.replace_all(&without_scripts, " ");
    let decoded = decode_entities(&without_tags);
    Some(space.replace_all(decoded.trim(), " ").into_owned())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_article_text_strips_markup() {
        let html = r#"<html><body><nav>menu</nav>
            <article class="transcript">
              <script>var x = 1;</script>
              <span data-start="0">Hello &amp; welcome</span>
              <span>to the   demo.</span>
            </article></body></html>"#;
        assert_eq!(
            article_text(html).as_deref(),
            Some("Hello & welcome to the demo.")
        );
    }

    #[test]
    fn test_article_text_missing() {
        assert_eq!(article_text("<html><body>none</body></html>"), None);
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/transcript", addr)
    }

    #[tokio::test]
    async fn test_fetch_transcript() {
        let base = serve_once("HTTP/1.1 200 OK", "<article><p>It books flights.</p></article>").await;
        let client = YoutubeTranscriptClient::with_base_url(base).unwrap();

        let text = client
            .transcript("https://www.youtube.com/watch?v=abc123")
            .await
            .unwrap();
        assert_eq!(text, "It books flights.");
    }

    #[tokio::test]
    async fn test_fetch_transcript_http_error() {
        let base = serve_once("HTTP/1.1 404 Not Found", "missing").await;
        let client = YoutubeTranscriptClient::with_base_url(base).unwrap();

        let err = client
            .transcript("https://www.youtube.com/watch?v=abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Transcript(ref msg) if msg.contains("404")));
    }
}
