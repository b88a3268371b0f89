use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_USER_AGENT: &str = "footy-dataset/0.1";

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

/// GET a URL and return the body, failing on non-2xx with a truncated body
/// snippet so per-unit errors stay one line in the run summary.
pub fn fetch_text(client: &Client, url: &str, extra_headers: &[(&str, &str)]) -> Result<String> {
    let mut req = client.get(url).header(USER_AGENT, DEFAULT_USER_AGENT);
    for (name, value) in extra_headers {
        req = req.header(*name, *value);
    }
    let resp = req.send().with_context(|| format!("request failed: {url}"))?;
    let status = resp.status();
    let body = resp.text().context("failed reading response body")?;
    if !status.is_success() {
        let snippet = body
            .trim()
            .replace('\n', " ")
            .replace('\r', " ")
            .chars()
            .take(220)
            .collect::<String>();
        return Err(anyhow::anyhow!("http {}: {}", status, snippet));
    }
    Ok(body)
}
