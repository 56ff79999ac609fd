//! Include/exclude filtering of schemas and tables
//!
//! Patterns use shell glob syntax (`*`, `?`, `[seq]`, `[!seq]`) and are matched against
//! the full name `schema.table`, or `schema.*` when a whole schema is being considered.
//! Matching is case-sensitive and anchored at both ends; `*` also crosses `.`.
//!
//! An empty include list admits everything. An exclude match always wins.

use regex::Regex;

use crate::config::DatabaseConfig;

/// Compiled include/exclude rules for one command
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PatternFilter {
    #[must_use]
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include.iter().filter_map(|p| compile_glob(p)).collect(),
            exclude: exclude.iter().filter_map(|p| compile_glob(p)).collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(&config.include, &config.exclude)
    }

    /// True when no rule is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Decide whether `schema` (with `table = None`) or `schema.table` is admitted
    #[must_use]
    pub fn matches(&self, schema: &str, table: Option<&str>) -> bool {
        let full_name = format!("{schema}.{}", table.unwrap_or("*"));

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&full_name)) {
            return false;
        }

        !self.exclude.iter().any(|re| re.is_match(&full_name))
    }
}

/// One-shot form of [`PatternFilter::matches`] reading the rules from a config
#[must_use]
pub fn matches(config: &DatabaseConfig, schema: &str, table: Option<&str>) -> bool {
    PatternFilter::from_config(config).matches(schema, table)
}

/// Malformed class syntax falls back to a literal match of the whole pattern
fn compile_glob(pattern: &str) -> Option<Regex> {
    Regex::new(&glob_to_regex(pattern))
        .or_else(|_| Regex::new(&format!("^{}$", regex::escape(pattern))))
        .ok()
}

/// Translate a glob into an anchored regular expression
///
/// An unterminated `[` is taken literally.
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < n {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < n && chars[j] == '!' {
                    j += 1;
                }
                if j < n && chars[j] == ']' {
                    j += 1;
                }
                while j < n && chars[j] != ']' {
                    j += 1;
                }
                if j >= n {
                    out.push_str("\\[");
                    continue;
                }

                let body: String = chars[i..j].iter().collect();
                i = j + 1;

                let (negated, body) = match body.strip_prefix('!') {
                    Some(rest) => (true, rest.to_string()),
                    None => (false, body),
                };
                out.push('[');
                if negated {
                    out.push('^');
                }
                for (k, ch) in body.chars().enumerate() {
                    match ch {
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(ch);
                        }
                        '^' if k == 0 && !negated => out.push_str("\\^"),
                        _ => out.push(ch),
                    }
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> PatternFilter {
        let include: Vec<String> = include.iter().map(ToString::to_string).collect();
        let exclude: Vec<String> = exclude.iter().map(ToString::to_string).collect();
        PatternFilter::new(&include, &exclude)
    }

    #[test]
    fn test_empty_rules_admit_everything() {
        let f = filter(&[], &[]);
        assert!(f.is_empty());
        assert!(f.matches("public", None));
        assert!(f.matches("public", Some("users")));
        assert!(f.matches("anything", Some("at.all")));
    }

    #[test]
    fn test_include_and_exclude_together() {
        let f = filter(&["sales.*"], &["sales.tmp_*"]);
        assert!(f.matches("sales", Some("orders")));
        assert!(!f.matches("sales", Some("tmp_staging")));
        assert!(!f.matches("hr", Some("employees")));
    }

    #[test]
    fn test_schema_level_check_uses_wildcard_table() {
        let f = filter(&["sales.*"], &[]);
        assert!(f.matches("sales", None));
        assert!(!f.matches("hr", None));

        let f = filter(&[], &["scratch.*"]);
        assert!(!f.matches("scratch", None));
        assert!(f.matches("sales", None));
    }

    #[test]
    fn test_exclusion_wins_over_inclusion() {
        let f = filter(&["sales.orders"], &["sales.orders"]);
        assert!(!f.matches("sales", Some("orders")));
    }

    #[test]
    fn test_star_crosses_dots() {
        let f = filter(&["*_archive"], &[]);
        assert!(f.matches("sales", Some("orders_archive")));
        assert!(!f.matches("sales", Some("orders")));
    }

    #[test]
    fn test_question_mark_and_classes() {
        let f = filter(&["s?les.t[0-9]"], &[]);
        assert!(f.matches("sales", Some("t1")));
        assert!(!f.matches("sales", Some("tx")));

        let f = filter(&["sales.[!t]*"], &[]);
        assert!(f.matches("sales", Some("orders")));
        assert!(!f.matches("sales", Some("tmp")));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let f = filter(&["Sales.*"], &[]);
        assert!(f.matches("Sales", Some("orders")));
        assert!(!f.matches("sales", Some("orders")));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let f = filter(&["a+b.(x)"], &[]);
        assert!(f.matches("a+b", Some("(x)")));
        assert!(!f.matches("aab", Some("(x)")));
    }

    #[test]
    fn test_unterminated_bracket_is_literal() {
        let f = filter(&["sales.[abc"], &[]);
        assert!(f.matches("sales", Some("[abc")));
        assert!(!f.matches("sales", Some("a")));
    }

    #[test]
    fn test_glob_translation() {
        assert_eq!(glob_to_regex("sales.*"), "(?s)^sales\\..*$");
        assert_eq!(glob_to_regex("t[!x]"), "(?s)^t[^x]$");
    }
}
