//! Raw-text scan against the policy's deny patterns.
//!
//! Runs before parsing, so it sees comments, string literals and source that
//! would not parse at all.

use regex::Regex;
use toolsmith_core::{Location, Violation};
use toolsmith_policy::{DenyPattern, PolicyError, ValidatorPolicy};

pub struct LexicalScanner {
    rules: Vec<(DenyPattern, Regex)>,
}

impl LexicalScanner {
    pub fn new(policy: &ValidatorPolicy) -> Result<Self, PolicyError> {
        let rules = policy
            .deny_patterns
            .iter()
            .map(|pattern| Ok((pattern.clone(), pattern.compile()?)))
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Self { rules })
    }

    /// Every match of every pattern, ordered by offset then rule id.
    pub fn scan(&self, source: &str) -> Vec<Violation> {
        let mut hits: Vec<(usize, &DenyPattern, &str)> = Vec::new();
        for (pattern, regex) in &self.rules {
            for found in regex.find_iter(source) {
                hits.push((found.start(), pattern, found.as_str()));
            }
        }
        hits.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.capability.rule_id().cmp(b.1.capability.rule_id()))
                .then_with(|| a.1.pattern.cmp(&b.1.pattern))
        });

        let mut locator = Locator::new(source);
        hits.into_iter()
            .map(|(start, pattern, text)| {
                Violation::new(
                    pattern.capability.rule_id(),
                    locator.locate(start),
                    format!("{}: `{}`", pattern.description, text.trim_end()),
                )
            })
            .collect()
    }
}

/// Resolves ascending byte indices to locations in one forward pass.
struct Locator<'a> {
    source: &'a str,
    byte: usize,
    at: Location,
}

impl<'a> Locator<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            byte: 0,
            at: Location::new(1, 1, 0),
        }
    }

    fn locate(&mut self, target: usize) -> Location {
        if target < self.byte {
            return Location::from_byte_index(self.source, target);
        }
        for ch in self.source[self.byte..].chars() {
            if self.byte >= target {
                break;
            }
            self.byte += ch.len_utf8();
            self.at.offset += 1;
            if ch == '\n' {
                self.at.line += 1;
                self.at.column = 1;
            } else {
                self.at.column += 1;
            }
        }
        self.at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> Vec<Violation> {
        LexicalScanner::new(&ValidatorPolicy::default())
            .unwrap()
            .scan(source)
    }

    #[test]
    fn test_matches_ordered_by_offset() {
        let found = scan("x = eval('1')\ny = open('f')\n");
        let ids: Vec<_> = found.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["dynamic_exec", "file_io"]);
        assert_eq!(found[1].location.line, 2);
        assert_eq!(found[1].location.column, 5);
    }

    #[test]
    fn test_same_offset_ordered_by_rule_id() {
        // `getattr(` matches reflection; `__class__` inside matches again later
        let found = scan("getattr(x, '__class__')");
        assert_eq!(found[0].rule_id, "reflection");
        assert_eq!(found[0].location.offset, 0);
        assert!(found.windows(2).all(|w| {
            (w[0].location.offset, &w[0].rule_id) <= (w[1].location.offset, &w[1].rule_id)
        }));
    }

    #[test]
    fn test_comments_and_strings_are_scanned() {
        assert!(!scan("# import subprocess\n").is_empty());
        assert!(!scan("s = 'os.system'\n").is_empty());
    }

    #[test]
    fn test_clean_source_has_no_matches() {
        assert!(scan("def f(x):\n    return json.loads(x)\n").is_empty());
    }

    #[test]
    fn test_locator_handles_multibyte() {
        let src = "é = 1\nopen(x)";
        let found = scan(src);
        assert_eq!(found[0].location.line, 2);
        assert_eq!(found[0].location.offset, 6);
    }
}
