use once_cell::sync::Lazy;
use regex::Regex;

static DASHED_UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});

static BARE_UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{32}").expect("valid regex")
});

/// Normalizes a 32-hex or already-dashed page id into canonical dashed form.
/// Returns `None` if `raw` is not a recognizable UUID shape.
pub fn normalize_page_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(m) = DASHED_UUID_RE.find(raw) {
        if m.as_str().len() == raw.len() {
            return Some(raw.to_lowercase());
        }
    }
    let stripped: String = raw.chars().filter(|c| *c != '-').collect();
    if stripped.len() == 32 && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(to_dashed(&stripped.to_lowercase()));
    }
    None
}

fn to_dashed(hex32: &str) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        &hex32[0..8],
        &hex32[8..12],
        &hex32[12..16],
        &hex32[16..20],
        &hex32[20..32]
    )
}

/// Extracts the first recognizable page id (dashed or bare 32-hex) from a URL
/// or any string, canonicalized to dashed form. "First" means leftmost by
/// match start, not whichever pattern is tried first.
pub fn extract_id_from_url(s: &str) -> Option<String> {
    let dashed = DASHED_UUID_RE.find(s);
    let bare = BARE_UUID_RE.find(s);
    match (dashed, bare) {
        (Some(d), Some(b)) if b.start() < d.start() => Some(to_dashed(&b.as_str().to_lowercase())),
        (Some(d), _) => Some(d.as_str().to_lowercase()),
        (None, Some(b)) => Some(to_dashed(&b.as_str().to_lowercase())),
        (None, None) => None,
    }
}

pub fn is_valid_page_id(s: &str) -> bool {
    DASHED_UUID_RE.is_match(s) && DASHED_UUID_RE.find(s).map(|m| m.as_str().len()) == Some(s.len())
}

/// Computes `path` relative to `base`, using forward slashes regardless of
/// platform, for storage as an index key.
pub fn relative_path(base: &std::path::Path, path: &std::path::Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        parts.push(comp.as_os_str().to_string_lossy().to_string());
    }
    Some(parts.join("/"))
}

/// Strips characters unsafe for filesystem names and collapses whitespace,
/// matching the title-sanitization rule used when mapping remote titles to
/// local file/directory names.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        match c {
            '/' | '\\' | '\0'..='\u{1f}' => continue,
            _ => out.push(c),
        }
    }
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
