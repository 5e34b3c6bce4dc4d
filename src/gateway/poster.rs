//! Poster fetching by link
//!
//! Downloads the title page, finds its poster image and downloads that.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ImageConfig;
use crate::error::ImageFetchError;
use crate::state::data::ImagePayload;

/// Content type assumed when the image response has none
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Where posters come from
#[async_trait]
pub trait PosterSource: Send + Sync {
    async fn fetch(&self, link: &str) -> Result<ImagePayload, ImageFetchError>;
}

/// Fetches posters over HTTP for links under the allowed prefixes
pub struct HttpPosterSource {
    client: reqwest::Client,
    allowed_prefixes: Vec<String>,
}

impl HttpPosterSource {
    pub fn new(config: &ImageConfig) -> Result<Self, ImageFetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ImageFetchError::Http(e.to_string()))?;

        Ok(Self {
            client,
            allowed_prefixes: config.allowed_prefixes.clone(),
        })
    }

    pub fn supports(&self, link: &str) -> bool {
        link_allowed(&self.allowed_prefixes, link)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ImageFetchError> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ImageFetchError::Http(e.to_string()))
    }
}

#[async_trait]
impl PosterSource for HttpPosterSource {
    async fn fetch(&self, link: &str) -> Result<ImagePayload, ImageFetchError> {
        if !self.supports(link) {
            return Err(ImageFetchError::UnsupportedLink(link.to_string()));
        }
        let page = Url::parse(link).map_err(|_| ImageFetchError::UnsupportedLink(link.to_string()))?;

        let html = self
            .get(page.clone())
            .await?
            .text()
            .await
            .map_err(|e| ImageFetchError::Http(e.to_string()))?;

        let poster = extract_poster_url(&html, &page)
            .ok_or_else(|| ImageFetchError::Http(format!("no poster found on {}", page)))?;
        debug!("Poster for {} is {}", link, poster);

        let response = self.get(poster).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageFetchError::Http(e.to_string()))?
            .to_vec();

        Ok(ImagePayload {
            bytes,
            content_type,
        })
    }
}

/// An empty prefix list, or an empty prefix, allows everything
pub fn link_allowed(prefixes: &[String], link: &str) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|prefix| link.starts_with(prefix.as_str()))
}

fn og_image_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| {
        Selector::parse(r#"meta[property="og:image"]"#).expect("og:image selector")
    })
}

fn poster_source_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| {
        Selector::parse(".c-poster picture source[srcset]").expect("poster selector")
    })
}

/// Poster URL of a title page, resolved against the page URL.
///
/// Prefers `og:image`, then the poster block's `<source srcset>` (its 2x
/// entry if any). Attribute values come back entity-decoded.
pub fn extract_poster_url(html: &str, page: &Url) -> Option<Url> {
    let document = Html::parse_document(html);

    let candidate = document
        .select(og_image_selector())
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .or_else(|| {
            document
                .select(poster_source_selector())
                .filter_map(|source| source.value().attr("srcset"))
                .find_map(pick_srcset)
        })?;

    // join handles "//host/x" and "/x" as well as absolute URLs
    page.join(candidate).ok()
}

/// The 2x candidate of a srcset, or its first one
pub fn pick_srcset(srcset: &str) -> Option<&str> {
    let candidates: Vec<&str> = srcset.split(',').map(str::trim).collect();
    candidates
        .iter()
        .copied()
        .find(|candidate| candidate.ends_with("2x"))
        .or_else(|| candidates.first().copied())
        .and_then(|candidate| candidate.split_whitespace().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://shikimori.one/animes/1-cowboy-bebop").unwrap()
    }

    #[test]
    fn test_og_image_wins() {
        let html = r#"<head><meta property="og:image" content="https://cdn.example/1.jpg"></head>
            <picture><source srcset="/a.webp, /a@2x.webp 2x"></picture>"#;
        assert_eq!(
            extract_poster_url(html, &page()).unwrap().as_str(),
            "https://cdn.example/1.jpg"
        );
    }

    #[test]
    fn test_og_image_attribute_order() {
        let html = r#"<meta content="/poster.jpg" property="og:image" />"#;
        assert_eq!(
            extract_poster_url(html, &page()).unwrap().as_str(),
            "https://shikimori.one/poster.jpg"
        );
    }

    #[test]
    fn test_srcset_prefers_2x_and_resolves_relative() {
        let html = r#"<div class="c-poster"><div><picture><source srcset="//cdn.shikimori.one/x.webp, //cdn.shikimori.one/x_2x.webp 2x" type="image/webp"></picture></div></div>"#;
        assert_eq!(
            extract_poster_url(html, &page()).unwrap().as_str(),
            "https://cdn.shikimori.one/x_2x.webp"
        );
    }

    #[test]
    fn test_attribute_entities_are_decoded() {
        let html = r#"<meta property="og:image" content="https://cdn.example/p.jpg?w=1&amp;h=2">"#;
        assert_eq!(
            extract_poster_url(html, &page()).unwrap().as_str(),
            "https://cdn.example/p.jpg?w=1&h=2"
        );
    }

    #[test]
    fn test_srcset_outside_poster_block_is_ignored() {
        let html = r#"<header><picture><source srcset="/avatar.webp, /avatar@2x.webp 2x"></picture></header>
            <div class="c-image"><div class="c-poster"><div><picture>
                <source srcset="/system/animes/original/1.webp, /system/animes/original/1@2x.webp 2x">
                <img src="/system/animes/original/1.jpg">
            </picture></div></div></div>"#;
        assert_eq!(
            extract_poster_url(html, &page()).unwrap().as_str(),
            "https://shikimori.one/system/animes/original/1@2x.webp"
        );
    }

    #[test]
    fn test_empty_og_image_falls_back_to_poster() {
        let html = r#"<meta property="og:image" content="  ">
            <div class="c-poster"><picture><source srcset="/p.webp"></picture></div>"#;
        assert_eq!(
            extract_poster_url(html, &page()).unwrap().as_str(),
            "https://shikimori.one/p.webp"
        );
    }

    #[test]
    fn test_pick_srcset_falls_back_to_first() {
        assert_eq!(pick_srcset("/a.jpg 1x, /b.jpg 1.5x"), Some("/a.jpg"));
        assert_eq!(pick_srcset("/only.jpg"), Some("/only.jpg"));
    }

    #[test]
    fn test_page_without_poster() {
        assert!(extract_poster_url("<html></html>", &page()).is_none());
    }

    #[test]
    fn test_link_allowed() {
        let prefixes = vec!["https://shikimori.one/animes/".to_string()];
        assert!(link_allowed(&prefixes, "https://shikimori.one/animes/1"));
        assert!(!link_allowed(&prefixes, "https://example.com/animes/1"));
        assert!(link_allowed(&[], "anything"));
    }

    #[tokio::test]
    async fn test_http_source_rejects_foreign_links() {
        let source = HttpPosterSource::new(&ImageConfig::default()).unwrap();
        let err = source.fetch("https://example.com/1").await.unwrap_err();
        assert_eq!(err, ImageFetchError::UnsupportedLink("https://example.com/1".into()));
    }
}
