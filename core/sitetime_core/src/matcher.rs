//! Tracked-site patterns and URL matching.
//!
//! A pattern is `host[/path]`. A URL matches when its host equals the pattern
//! host or is a subdomain of it, and (if the pattern has a path) its path
//! equals or is nested under the pattern path. The best match is the one with
//! the longest path, ties broken by the longest host.

use url::Url;

/// Nested placeholder pages are unwrapped at most this many times.
const MAX_REWRITE_DEPTH: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SitePattern {
    pub host: String,
    pub path: String,
    pub key: String,
}

/// Recovers the real target of a placeholder page (e.g. a suspended tab).
pub trait UrlRewrite: Send + Sync {
    fn rewrite(&self, url: &Url) -> Option<Url>;
}

/// Placeholder pages of tab-suspender extensions:
/// `chrome-extension://<id>/suspended.html#ttl=...&pos=0&uri=https://example.com/`.
/// The target is carried in the `uri` fragment parameter, always last and not
/// necessarily escaped.
#[derive(Clone, Copy, Debug, Default)]
pub struct SuspendedTabRewrite;

impl UrlRewrite for SuspendedTabRewrite {
    fn rewrite(&self, url: &Url) -> Option<Url> {
        if !matches!(url.scheme(), "chrome-extension" | "moz-extension" | "extension") {
            return None;
        }
        if !url.path().ends_with("suspended.html") {
            return None;
        }
        let fragment = url.fragment()?;
        let start = if fragment.starts_with("uri=") {
            0
        } else {
            fragment.find("&uri=")? + 1
        };
        let raw = &fragment[start + "uri=".len()..];
        if raw.is_empty() {
            return None;
        }
        if let Ok(target) = Url::parse(raw) {
            return Some(target);
        }
        // Escaped form: uri=https%3A%2F%2Fexample.com%2F
        let decoded = url::form_urlencoded::parse(format!("uri={raw}").as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())?;
        Url::parse(&decoded).ok()
    }
}

pub fn normalize_host(host: &str) -> String {
    let lower = host.to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

pub fn normalize_path(path: &str) -> String {
    path.trim_end_matches('/').to_string()
}

/// Parses a user-entered site (`example.com`, `example.com/docs`,
/// `https://www.example.com/docs/`). Returns `None` for empty or unparsable
/// input.
pub fn parse_entry(raw: &str) -> Option<SitePattern> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let url = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{raw}"))
    }
    .ok()?;
    let host = normalize_host(url.host_str()?);
    if host.is_empty() {
        return None;
    }
    let path = normalize_path(url.path());
    let key = format!("{host}{path}");
    Some(SitePattern { host, path, key })
}

pub struct SiteMatcher {
    patterns: Vec<SitePattern>,
    rewrite: Option<Box<dyn UrlRewrite>>,
}

impl SiteMatcher {
    pub fn new(entries: &[String]) -> Self {
        Self {
            patterns: entries.iter().filter_map(|e| parse_entry(e)).collect(),
            rewrite: Some(Box::new(SuspendedTabRewrite)),
        }
    }

    pub fn with_rewrite(mut self, rewrite: Option<Box<dyn UrlRewrite>>) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn patterns(&self) -> &[SitePattern] {
        &self.patterns
    }

    /// Canonical keys of every parsable entry, in entry order, deduplicated.
    pub fn keys(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.patterns {
            if !out.contains(&p.key) {
                out.push(p.key.clone());
            }
        }
        out
    }

    pub fn match_str(&self, raw_url: &str) -> Option<&SitePattern> {
        let url = Url::parse(raw_url).ok()?;
        self.match_url(&url)
    }

    pub fn match_url(&self, url: &Url) -> Option<&SitePattern> {
        self.match_url_depth(url, 0)
    }

    fn match_url_depth(&self, url: &Url, depth: usize) -> Option<&SitePattern> {
        if depth < MAX_REWRITE_DEPTH {
            if let Some(target) = self.rewrite.as_ref().and_then(|r| r.rewrite(url)) {
                if &target != url {
                    return self.match_url_depth(&target, depth + 1);
                }
            }
        }

        let host = normalize_host(url.host_str()?);
        let path = normalize_path(url.path());
        let mut best: Option<&SitePattern> = None;
        for p in &self.patterns {
            let host_matches = host == p.host || host.ends_with(&format!(".{}", p.host));
            if !host_matches {
                continue;
            }
            if !p.path.is_empty() && !(path == p.path || path.starts_with(&format!("{}/", p.path)))
            {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    p.path.len() > b.path.len()
                        || (p.path.len() == b.path.len() && p.host.len() > b.host.len())
                }
            };
            if better {
                best = Some(p);
            }
        }
        best
    }
}
