use url::Url;

/// Canonical form of a tracked URL so that hits on the same page collapse
/// onto one key.
///
/// - scheme and host are lower-cased, default ports dropped
/// - query string and fragment are removed
/// - a trailing slash is trimmed, except on the root path
///
/// Bare paths (`/blog/post/?ref=x`) get the same path treatment. Anything
/// that is neither an absolute URL nor a path returns `None`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('/') {
        return Some(normalize_path(trimmed));
    }

    let mut url = Url::parse(trimmed).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    let path = trim_trailing_slash(url.path()).to_string();
    url.set_path(&path);
    Some(url.to_string())
}

fn normalize_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    trim_trailing_slash(&path[..end]).to_string()
}

fn trim_trailing_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
