//! URL fetching and readability-style article extraction.

use crate::error::PipelineError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Bodies shorter than this are treated as extraction failures; the page
/// most likely needs a script runtime to render.
const MIN_BODY_LEN: usize = 200;

/// Selector patterns for page furniture that pollutes extracted text.
const NOISE_SELECTORS: &[&str] = &[
    // Reading time
    "[class*='reading-time']",
    "[class*='read-time']",
    "[class*='readtime']",
    "[class*='min-read']",
    "[class*='time-to-read']",
    // Author and byline blocks
    "[class*='author-info']",
    "[class*='author-bio']",
    "[class*='author-box']",
    "[class*='byline']",
    // Post metadata containers
    "[class*='post-meta']",
    "[class*='entry-meta']",
    "[class*='article-meta']",
    "[class*='article-info']",
    "[class*='post-info']",
    "[class*='meta-info']",
    // Related and recommended widgets
    "[class*='related-posts']",
    "[class*='related-articles']",
    "[class*='recommended']",
    "[class*='more-stories']",
    "[class*='read-next']",
    // Sharing widgets
    "[class*='share-buttons']",
    "[class*='social-share']",
    "[class*='sharing']",
    // Newsletter prompts
    "[class*='newsletter']",
    "[class*='subscribe']",
    // Navigation
    "nav",
    "[role='navigation']",
    "[class*='breadcrumb']",
    // Tag and category lists
    "[class*='tag-list']",
    "[class*='category-list']",
    "[class*='post-tags']",
    "[class*='article-tags']",
    // Cookie banners
    "[class*='cookie-banner']",
    "[class*='cookie-consent']",
    // Comments
    "[class*='comments']",
    "[id*='comments']",
];

/// Substitutions applied to the extracted text for metadata lines the
/// DOM pass could not attribute to a container. Tunable.
static POST_CLEAN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Reading time variants
        r"(?i)\d+\s*min(ute)?s?\s+read",
        r"(?i)reading\s+time:\s*\d+\s*min(ute)?s?",
        // Standalone bylines
        r"(?m)^\s*By\s+\p{Lu}\p{L}+(?:\s+\p{Lu}\p{L}+){1,3}\s*$",
        // Standalone date lines
        r"(?m)^\s*Published\s+on\s+(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\s*$",
        // Share CTAs
        r"(?i)Share\s+this\b",
        r"(?i)Share\s+on\s+\w+",
        // Related-section headers
        r"(?mi)^\s*Related\s+posts?\s*$",
        r"(?mi)^\s*You\s+may\s+also\s+like\s*$",
        r"(?mi)^\s*Read\s+next\s*$",
        // Newsletter CTAs
        r"(?mi)^\s*Subscribe\b.*$",
        r"(?mi)^\s*Sign\s+up\b.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("post-clean pattern"))
    .collect()
});

static BLANK_LINE_COLLAPSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern"));

/// Article text pulled out of a fetched page.
#[derive(Debug, Clone)]
pub struct ScrapedArticle {
    /// Document title, possibly empty.
    pub title: String,
    /// Cleaned plain-text body.
    pub body: String,
}

/// Fetches URLs and reduces them to plain article text.
pub struct ArticleScraper {
    client: reqwest::Client,
    noise: Vec<Selector>,
    title_sel: Selector,
    article_sel: Selector,
    main_sel: Selector,
    container_sel: Selector,
    body_sel: Selector,
}

impl ArticleScraper {
    /// Builds the scraper with its HTTP client and parsed selectors.
    pub fn new() -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::UrlFetch(format!("http client: {e}")))?;

        let noise = NOISE_SELECTORS
            .iter()
            .filter_map(|p| Selector::parse(p).ok())
            .collect();

        Ok(Self {
            client,
            noise,
            title_sel: Selector::parse("title").expect("title selector"),
            article_sel: Selector::parse("article").expect("article selector"),
            main_sel: Selector::parse("main").expect("main selector"),
            container_sel: Selector::parse("div, section").expect("container selector"),
            body_sel: Selector::parse("body").expect("body selector"),
        })
    }

    /// Fetches `url` and extracts the main article text.
    pub async fn fetch(&self, url: &str) -> Result<ScrapedArticle, PipelineError> {
        let parsed = Url::parse(url)
            .map_err(|e| PipelineError::UrlFetch(format!("invalid url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::UrlFetch(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        tracing::info!(%url, "fetching article");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| PipelineError::UrlFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UrlFetch(format!("url returned http {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.contains("html") {
                return Err(PipelineError::UrlFetch(format!(
                    "unsupported content type: {content_type}"
                )));
            }
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::UrlFetch(format!("reading body: {e}")))?;

        let article = self.extract(&html)?;
        tracing::info!(title = %article.title, chars = article.body.len(), "extracted article");
        Ok(article)
    }

    /// Reduces raw HTML to cleaned article text: noise removal, root
    /// election, block walk, then residual-metadata substitutions.
    pub fn extract(&self, html: &str) -> Result<ScrapedArticle, PipelineError> {
        let mut doc = Html::parse_document(html);
        self.pre_clean(&mut doc);

        let title = doc
            .select(&self.title_sel)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default();

        let root = self.pick_root(&doc);
        let raw_body = collect_blocks(root);
        let body = post_clean(&raw_body);

        if body.len() < MIN_BODY_LEN {
            return Err(PipelineError::ContentExtraction(format!(
                "extracted only {} characters; the page may need a script runtime to render",
                body.len()
            )));
        }

        Ok(ScrapedArticle { title, body })
    }

    /// Detaches every node matching a noise selector from the parse tree.
    fn pre_clean(&self, doc: &mut Html) {
        for selector in &self.noise {
            let ids: Vec<_> = doc.select(selector).map(|el| el.id()).collect();
            for id in ids {
                if let Some(mut node) = doc.tree.get_mut(id) {
                    node.detach();
                }
            }
        }
    }

    /// Elects the content root: `<article>`, then `<main>`, then the
    /// container with the most paragraph text, then `<body>`.
    fn pick_root<'a>(&self, doc: &'a Html) -> ElementRef<'a> {
        if let Some(el) = doc.select(&self.article_sel).next() {
            return el;
        }
        if let Some(el) = doc.select(&self.main_sel).next() {
            return el;
        }

        let mut best: Option<(ElementRef<'a>, usize)> = None;
        for el in doc.select(&self.container_sel) {
            let score: usize = el
                .descendent_elements()
                .filter(|e| e.value().name() == "p")
                .map(|p| p.text().map(str::len).sum::<usize>())
                .sum();
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((el, score));
            }
        }
        if let Some((el, score)) = best {
            if score >= MIN_BODY_LEN {
                return el;
            }
        }

        doc.select(&self.body_sel)
            .next()
            .unwrap_or_else(|| doc.root_element())
    }
}

/// Walks the root's descendants and joins block-level text with blank
/// lines. Content inside list items and quotes is attributed to its
/// innermost block so nothing is emitted twice.
fn collect_blocks(root: ElementRef<'_>) -> String {
    let mut body = String::new();
    for element in root.descendent_elements() {
        let tag = element.value().name();
        if matches!(tag, "script" | "style" | "template" | "noscript" | "svg") {
            continue;
        }

        let is_block = matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "li" | "blockquote");
        if !is_block || has_block_ancestor(&element) {
            continue;
        }

        let text = collapse_whitespace(&element.text().collect::<String>());
        if text.is_empty() {
            continue;
        }

        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(&text);
    }
    body
}

/// Whether the element sits inside another recorded block element.
fn has_block_ancestor(element: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| matches!(a.value().name(), "p" | "li" | "blockquote"))
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

/// Strips residual metadata lines and collapses excess blank lines.
fn post_clean(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in POST_CLEAN_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").to_string();
    }
    result = BLANK_LINE_COLLAPSE.replace_all(&result, "\n\n").to_string();
    result.trim().to_string()
}

/// Derives an upload filename from the article title, falling back to
/// the last URL path segment.
pub fn derive_filename(title: &str, url: &str) -> String {
    let slug = if !title.is_empty() {
        slugify(title)
    } else {
        url.split('/')
            .filter(|s| !s.is_empty())
            .last()
            .map(slugify)
            .unwrap_or_else(|| "article".to_string())
    };

    let truncated: String = slug.chars().take(80).collect();
    format!("{truncated}.txt")
}

fn slugify(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<&str>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> ArticleScraper {
        ArticleScraper::new().expect("scraper")
    }

    fn long_paragraph(tag: &str) -> String {
        format!(
            "<p>The study of {tag} covers a broad range of questions about how \
             complex systems organize themselves over long stretches of time and \
             what that organization implies for the observers embedded in them.</p>"
        )
    }

    #[test]
    fn extracts_article_body_and_title() {
        let html = format!(
            "<html><head><title>A Study</title></head><body>\
             <nav><a href='/'>Home</a></nav>\
             <article><h1>A Study</h1>{}{}</article>\
             </body></html>",
            long_paragraph("memory"),
            long_paragraph("attention")
        );
        let article = scraper().extract(&html).expect("extract");
        assert_eq!(article.title, "A Study");
        assert!(article.body.contains("study of memory"));
        assert!(article.body.contains("study of attention"));
        assert!(!article.body.contains("Home"));
    }

    #[test]
    fn noise_containers_are_removed() {
        let html = format!(
            "<html><body><article>\
             <div class='reading-time'>5 min read</div>\
             <div class='author-bio'><p>About the author and their many accolades.</p></div>\
             {}{}\
             <div class='related-posts'><p>Another story you might enjoy reading today.</p></div>\
             </article></body></html>",
            long_paragraph("tides"),
            long_paragraph("moons")
        );
        let article = scraper().extract(&html).expect("extract");
        assert!(!article.body.contains("min read"));
        assert!(!article.body.contains("accolades"));
        assert!(!article.body.contains("Another story"));
        assert!(article.body.contains("study of tides"));
    }

    #[test]
    fn densest_container_wins_without_article_tag() {
        let html = format!(
            "<html><body>\
             <div class='sidebar'><p>short note</p></div>\
             <div class='content'>{}{}{}</div>\
             </body></html>",
            long_paragraph("glaciers"),
            long_paragraph("rivers"),
            long_paragraph("deltas")
        );
        let article = scraper().extract(&html).expect("extract");
        assert!(article.body.contains("study of glaciers"));
        assert!(article.body.contains("study of deltas"));
    }

    #[test]
    fn short_bodies_are_rejected() {
        let html = "<html><body><article><p>Too little text.</p></article></body></html>";
        let err = scraper().extract(html).expect_err("should reject");
        assert!(matches!(err, PipelineError::ContentExtraction(_)));
    }

    #[test]
    fn nested_blocks_are_not_duplicated() {
        let html = format!(
            "<html><body><article>\
             <blockquote><p>A quoted passage inside the article body text.</p></blockquote>\
             {}{}\
             </article></body></html>",
            long_paragraph("comets"),
            long_paragraph("orbits")
        );
        let article = scraper().extract(&html).expect("extract");
        let quoted = article.body.matches("quoted passage").count();
        assert_eq!(quoted, 1);
    }

    #[test]
    fn post_clean_strips_reading_time_and_bylines() {
        assert_eq!(
            post_clean("Some intro\n8 min read\nArticle body here"),
            "Some intro\n\nArticle body here"
        );
        assert_eq!(post_clean("Reading time: 12 min"), "");
        assert_eq!(
            post_clean("By John Smith\nThe article begins here."),
            "The article begins here."
        );
    }

    #[test]
    fn post_clean_preserves_prose_mentioning_names() {
        let text = "The theory proposed by McLuhan describes how media affects cognition.";
        assert_eq!(post_clean(text), text);
    }

    #[test]
    fn post_clean_collapses_blank_lines() {
        assert_eq!(
            post_clean("Paragraph one.\n\n\n\n\nParagraph two."),
            "Paragraph one.\n\nParagraph two."
        );
    }

    #[test]
    fn filename_derivation() {
        assert_eq!(
            derive_filename("My Great Article", "https://example.com/foo"),
            "my-great-article.txt"
        );
        assert_eq!(
            derive_filename("", "https://example.com/some-article-path"),
            "some-article-path.txt"
        );
        assert_eq!(derive_filename("", "https://example.com/"), "example-com.txt");

        let long_title = "a".repeat(200);
        assert!(derive_filename(&long_title, "https://example.com").len() <= 84);
    }

    #[test]
    fn slugify_flattens_punctuation_runs() {
        assert_eq!(slugify("Hello World!"), "hello-world");
        assert_eq!(slugify("test--multiple---dashes"), "test-multiple-dashes");
    }
}
