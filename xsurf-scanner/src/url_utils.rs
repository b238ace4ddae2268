//! URL helpers shared by the analyzers, the dedup managers and the orchestrator.

use url::Url;

const LOOPBACK_ALIASES: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// `scheme://host[:port]/path` with query and fragment dropped.
pub fn scheme_host_path(url: &Url) -> String {
    let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        out.push_str(&format!(":{}", port));
    }
    out.push_str(url.path());
    out
}

/// Same as [`scheme_host_path`] for raw strings, falling back to plain string
/// slicing when the input does not parse.
pub fn strip_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => scheme_host_path(&parsed),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Canonical form used for URL-level deduplication.
///
/// Scheme, host and path are lower-cased, the fragment is removed and query
/// pairs are sorted. Applying it twice yields the same string.
pub fn normalize_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return url.trim().to_lowercase();
    };

    let mut out = scheme_host_path(&parsed).to_lowercase();

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    out
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Last two labels of a host name; IP addresses are returned unchanged.
pub fn root_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    labels[labels.len() - 2..].join(".")
}

fn is_loopback(host: &str) -> bool {
    LOOPBACK_ALIASES.contains(&host)
}

/// True when `host` equals one of `domains` or is a subdomain of one.
/// `localhost` and the loopback addresses are treated as the same host.
pub fn host_in_scope(host: &str, domains: &[String]) -> bool {
    let host = host.to_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.to_lowercase();
        host == domain
            || host.ends_with(&format!(".{}", domain))
            || (is_loopback(&host) && is_loopback(&domain))
    })
}

pub fn url_in_scope(url: &str, domains: &[String]) -> bool {
    host_of(url)
        .map(|host| host_in_scope(&host, domains))
        .unwrap_or(false)
}

/// Resolve an `href` against the page it was found on. Non-navigational
/// schemes and pure fragments yield `None`; fragments are stripped.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
        || href.starts_with('#')
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut resolved = base_url.join(href).ok()?;
    resolved.set_fragment(None);

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// `(host, path, sorted query keys)`: two URLs differing only in query
/// values collapse to the same key.
pub fn query_shape_key(url: &str) -> Option<(String, String, Vec<String>)> {
    let parsed = Url::parse(url).ok()?;
    let mut keys: Vec<String> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
    keys.sort();
    keys.dedup();
    Some((
        parsed.host_str().unwrap_or_default().to_lowercase(),
        parsed.path().to_string(),
        keys,
    ))
}
