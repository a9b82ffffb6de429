/// Lowercase, alphanumeric-only slug used for legacy graph node ids.
///
/// `"Jane Doe"` becomes `"jane_doe"`. Runs of non-alphanumeric characters
/// collapse into a single underscore; leading and trailing underscores are
/// stripped.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_sep = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    if out.ends_with('_') {
        out.pop();
    }
    out
}

#[inline]
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[inline]
pub fn safe_truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Short random id with a type prefix, e.g. `bak_1f3a9c2e7b01`.
pub fn prefixed_id(prefix: &str) -> String {
    let tail: String = uuid::Uuid::new_v4()
        .to_string()
        .replace('-', "")
        .chars()
        .take(12)
        .collect();
    format!("{}_{}", prefix, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_basic() {
        assert_eq!(slug("Jane Doe"), "jane_doe");
    }

    #[test]
    fn test_slug_collapses_separators() {
        assert_eq!(slug("Q3 -- Budget  Review!"), "q3_budget_review");
    }

    #[test]
    fn test_slug_unicode() {
        assert_eq!(slug("Привет Мир"), "привет_мир");
    }

    #[test]
    fn test_slug_empty() {
        assert_eq!(slug("!!!"), "");
    }

    #[test]
    fn test_safe_truncate() {
        assert_eq!(safe_truncate("hello world", 5), "hello");
        assert_eq!(safe_truncate_ellipsis("hello world", 5), "hello...");
        assert_eq!(safe_truncate_ellipsis("hi", 10), "hi");
    }

    #[test]
    fn test_prefixed_id_shape() {
        let id = prefixed_id("bak");
        assert!(id.starts_with("bak_"));
        assert_eq!(id.len(), 4 + 12);
    }
}
