//! Input sanitization: HTML escaping, length caps, and scheme checks
//! applied to every caller-supplied string before it reaches the
//! pipeline or a response body.

use crate::error::AppError;

/// Characters never allowed in search fields.
const REJECTED_QUERY_CHARS: &[char] = &['<', '>', '{', '}', '|', '\\', '^', '~', '[', ']'];

const URL_MAX_LEN: usize = 2000;
const SKILL_MAX_LEN: usize = 50;
const MAX_SKILLS: usize = 50;
pub const DESCRIPTION_MAX_LEN: usize = 5000;
pub const SNIPPET_MAX_LEN: usize = 500;

/// Escape HTML-significant characters.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Truncate on a character boundary.
pub fn truncate(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

/// Validate a query-style field (keywords, location): trimmed, bounded,
/// and free of markup/metacharacters.
pub fn clean_query_field(field: &str, value: &str, max_chars: usize) -> Result<String, AppError> {
    let trimmed = value.trim();
    if let Some(bad) = trimmed.chars().find(|c| REJECTED_QUERY_CHARS.contains(c)) {
        return Err(AppError::InvalidInput(format!(
            "{field} contains forbidden character '{bad}'"
        )));
    }
    if !trimmed.chars().all(|c| !c.is_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} contains control characters"
        )));
    }
    Ok(truncate(trimmed, max_chars))
}

/// Normalize a user-skill list: escaped, bounded in length and count.
pub fn clean_skills(skills: Vec<String>) -> Vec<String> {
    skills
        .into_iter()
        .map(|s| truncate(&html_escape(s.trim()), SKILL_MAX_LEN))
        .filter(|s| !s.is_empty())
        .take(MAX_SKILLS)
        .collect()
}

/// Accept only plain http(s) URLs of sane length.
pub fn clean_url(url: &str) -> Result<String, AppError> {
    let trimmed = url.trim();
    if trimmed.chars().count() > URL_MAX_LEN {
        return Err(AppError::InvalidInput("url too long".into()));
    }
    let lower = trimmed.to_lowercase();
    for scheme in ["javascript:", "data:", "vbscript:", "file:"] {
        if lower.starts_with(scheme) {
            return Err(AppError::InvalidInput("url scheme not allowed".into()));
        }
    }
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(AppError::InvalidInput("url must be http(s)".into()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape("<b>\"x\" & 'y'</b>"),
            "&lt;b&gt;&quot;x&quot; &amp; &#x27;y&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn rejects_query_metacharacters() {
        for bad in ["a<b", "a>b", "a{b", "a}b", "a|b", "a\\b", "a^b", "a~b", "a[b", "a]b"] {
            assert!(clean_query_field("keywords", bad, 100).is_err(), "{bad}");
        }
        assert_eq!(
            clean_query_field("keywords", "  Rust Engineer  ", 100).unwrap(),
            "Rust Engineer"
        );
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
    }

    #[test]
    fn skill_list_is_bounded() {
        let skills: Vec<String> = (0..80).map(|i| format!("skill-{i}")).collect();
        assert_eq!(clean_skills(skills).len(), 50);
        assert!(clean_skills(vec!["  ".into()]).is_empty());
    }

    #[test]
    fn url_scheme_allow_list() {
        assert!(clean_url("https://www.linkedin.com/jobs/view/123").is_ok());
        assert!(clean_url("javascript:alert(1)").is_err());
        assert!(clean_url("data:text/html,x").is_err());
        assert!(clean_url("ftp://host/file").is_err());
    }
}
