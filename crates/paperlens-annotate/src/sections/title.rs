//! Section title normalization.

use std::sync::OnceLock;

use regex::Regex;

/// Leading ordinals: `1.`, `2.3`, `4)`, `IV.`, `b)`. A bare number only
/// counts when a separator follows it, so `3D` and `2019-nCoV` keep theirs.
fn prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\s*(?:\d+(?:\.\d+)*(?:[.)]|\s|$)|[ivxlcdm]+[.)]|[a-z][.)])\s*)+")
            .expect("prefix regex")
    })
}

fn noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("noise regex"))
}

/// Case-fold, drop ordinal prefixes and punctuation, collapse whitespace.
/// `None` when nothing is left.
pub fn normalize_title(title: &str) -> Option<String> {
    let lower = title.to_lowercase();
    let stripped = prefix_regex().replace(&lower, "");
    let cleaned = noise_regex().replace_all(&stripped, " ");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_ordinal_prefixes() {
        assert_eq!(normalize_title("1. Introduction").as_deref(), Some("introduction"));
        assert_eq!(normalize_title("3.2 Results").as_deref(), Some("results"));
        assert_eq!(
            normalize_title("II. Materials and Methods").as_deref(),
            Some("materials and methods")
        );
        assert_eq!(normalize_title("iv) Discussion").as_deref(), Some("discussion"));
        assert_eq!(
            normalize_title("B. Statistical analysis").as_deref(),
            Some("statistical analysis")
        );
    }

    #[test]
    fn test_keeps_words_that_start_like_numerals() {
        assert_eq!(normalize_title("Introduction").as_deref(), Some("introduction"));
        assert_eq!(normalize_title("Discussion").as_deref(), Some("discussion"));
        assert_eq!(normalize_title("Conclusions:").as_deref(), Some("conclusions"));
    }

    #[test]
    fn test_keeps_digits_inside_words() {
        assert_eq!(normalize_title("3D reconstruction").as_deref(), Some("3d reconstruction"));
        assert_eq!(normalize_title("2019-nCoV outbreak").as_deref(), Some("2019 ncov outbreak"));
        assert_eq!(normalize_title("4) 3D reconstruction").as_deref(), Some("3d reconstruction"));
        assert_eq!(normalize_title("1.Introduction").as_deref(), Some("introduction"));
    }

    #[test]
    fn test_empty_after_normalization() {
        assert_eq!(normalize_title(""), None);
        assert_eq!(normalize_title("  "), None);
        assert_eq!(normalize_title("1."), None);
        assert_eq!(normalize_title("--"), None);
    }
}
