use regex::Regex;
use std::sync::OnceLock;

pub const MAX_DIAGNOSTIC_CHARS: usize = 512;

fn path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(^|[\s'"(=:\[])(?:[A-Za-z]:)?(?:[/\\][\w.\-@+]+)+[/\\]?"#).ok())
        .as_ref()
}

/// Strip absolute host paths and cap the length of a caller-facing message.
pub fn sanitize(message: &str) -> String {
    let cleaned = match path_pattern() {
        Some(pattern) => pattern.replace_all(message, "${1}<path>").into_owned(),
        None => message.to_string(),
    };
    truncate_chars(cleaned.trim(), MAX_DIAGNOSTIC_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_replaced() {
        assert_eq!(
            sanitize("No such file: /home/alice/.cache/toolsmith/x.json"),
            "No such file: <path>"
        );
        assert_eq!(sanitize("failed at '/usr/lib/x'"), "failed at '<path>'");
        assert_eq!(sanitize("/root/secret broke"), "<path> broke");
    }

    #[test]
    fn test_arithmetic_is_left_alone() {
        assert_eq!(sanitize("ZeroDivisionError: 1/0"), "ZeroDivisionError: 1/0");
        assert_eq!(sanitize("ratio a / b"), "ratio a / b");
    }

    #[test]
    fn test_length_cap() {
        let long = "x".repeat(2000);
        let out = sanitize(&long);
        assert_eq!(out.chars().count(), MAX_DIAGNOSTIC_CHARS);
        assert!(out.ends_with("..."));
    }
}
