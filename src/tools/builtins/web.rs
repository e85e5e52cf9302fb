use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

static SCRIPT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<script[^>]*>.*?</script>").expect("valid regex"));

static STYLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<style[^>]*>.*?</style>").expect("valid regex"));

static HTML_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

static MULTIPLE_NEWLINES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

/// Longest page text handed back to the model.
const MAX_PAGE_CHARS: usize = 8_000;

pub async fn read_page(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .header("User-Agent", "Mozilla/5.0 (compatible; parlor/0.1)")
        .send()
        .await
        .with_context(|| format!("request failed: {}", url))?;

    let status = response.status();
    let text = response.text().await.context("failed to read response body")?;

    if !status.is_success() {
        return Err(anyhow::anyhow!("page request error: {} - {}", status, url));
    }

    let plain = html_to_text(&text);
    Ok(truncate_chars(&plain, MAX_PAGE_CHARS))
}

pub fn html_to_text(html: &str) -> String {
    let mut result = SCRIPT_REGEX.replace_all(html, "").to_string();
    result = STYLE_REGEX.replace_all(&result, "").to_string();
    result = HTML_TAG_REGEX.replace_all(&result, "").to_string();

    result = result
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    result = MULTIPLE_NEWLINES_REGEX
        .replace_all(&result, "\n\n")
        .to_string();

    result.trim().to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
