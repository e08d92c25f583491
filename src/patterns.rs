use crate::error::{Result, WatchError};
use crate::types::{FieldValue, LogEntry};
use log::debug;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Written to the patterns file on the first run.
pub const DEFAULT_PATTERNS: &str = r"# journalwatch ignore patterns
#
# Blocks are separated by empty lines. The first line of a block selects
# journal entries by one field:
#
#     FIELD = value      the field must equal `value`
#     FIELD = /regex/    the field must match `regex`
#
# Every following line of the block is a regex. An entry is left out of the
# report when its MESSAGE matches one of them. Regexes match from the start
# of the value. Lines starting with '#' are comments.
#
# _SYSTEMD_UNIT = systemd-logind.service
# New session [a-z]?\d+ of user \w+\.
# Removed session [a-z]?\d+\.
#
# SYSLOG_IDENTIFIER = /(CROND|crond)/
# pam_unix\(crond:session\): session (opened|closed) for user \w+
# \(\w+\) CMD .*
";

/// A regex that only matches from the beginning of the value.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> std::result::Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// How a block header selects entries.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Exact(String),
    Regex(Pattern),
}

impl Selector {
    fn parse(value: &str) -> std::result::Result<Self, regex::Error> {
        if value.len() >= 2 && value.starts_with('/') && value.ends_with('/') {
            Ok(Selector::Regex(Pattern::new(&value[1..value.len() - 1])?))
        } else {
            Ok(Selector::Exact(value.to_string()))
        }
    }

    fn selects(&self, value: &str) -> bool {
        match self {
            Selector::Exact(expected) => value == expected,
            Selector::Regex(pattern) => pattern.matches(value),
        }
    }
}

/// Message filters that apply to entries selected by one field.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternBlock {
    pub field: String,
    pub selector: Selector,
    pub filters: Vec<Pattern>,
}

impl PatternBlock {
    fn applies_to(&self, entry: &LogEntry) -> bool {
        entry
            .text(&self.field)
            .map(|value| self.selector.selects(value))
            .unwrap_or(false)
    }
}

/// All ignore patterns, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternSet {
    blocks: Vec<PatternBlock>,
}

impl PatternSet {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            WatchError::ConfigError(format!("Failed to read patterns file {}: {}", path.display(), e))
        })?;
        let set = Self::parse(&content, path)?;
        debug!("Loaded {} pattern blocks from {}", set.len(), path.display());
        Ok(set)
    }

    /// Parse the patterns file format. `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut current: Option<PatternBlock> = None;

        let error = |line: usize, message: String| {
            WatchError::ConfigError(format!("{}:{}: {}", origin.display(), line, message))
        };

        for (index, line) in content.lines().enumerate() {
            let lineno = index + 1;

            if line.starts_with('#') {
                continue;
            }

            if line.trim().is_empty() {
                // End of block
                if let Some(block) = current.take() {
                    if !block.filters.is_empty() {
                        blocks.push(block);
                    }
                }
                continue;
            }

            match current.as_mut() {
                None => {
                    let (field, value) = line
                        .split_once('=')
                        .ok_or_else(|| error(lineno, format!("expected FIELD = VALUE, got {:?}", line)))?;
                    let field = field.trim();
                    if field.is_empty() {
                        return Err(error(lineno, "empty field name".to_string()));
                    }
                    let selector = Selector::parse(value.trim())
                        .map_err(|e| error(lineno, format!("invalid regex: {}", e)))?;

                    current = Some(PatternBlock {
                        field: field.to_string(),
                        selector,
                        filters: Vec::new(),
                    });
                }
                Some(block) => {
                    let pattern = Pattern::new(line)
                        .map_err(|e| error(lineno, format!("invalid regex: {}", e)))?;
                    block.filters.push(pattern);
                }
            }
        }

        if let Some(block) = current {
            if !block.filters.is_empty() {
                blocks.push(block);
            }
        }

        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether some block applies to the entry and one of its filters
    /// matches the message.
    pub fn is_ignored(&self, entry: &LogEntry) -> bool {
        let message = match entry.message() {
            Some(FieldValue::Text(message)) => message,
            // Binary or missing messages are always reported
            _ => return false,
        };

        self.blocks
            .iter()
            .filter(|block| block.applies_to(entry))
            .any(|block| block.filters.iter().any(|filter| filter.matches(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use std::collections::BTreeMap;

    fn parse(content: &str) -> Result<PatternSet> {
        PatternSet::parse(content, Path::new("patterns"))
    }

    fn set(field: &str, selector: Selector, filters: &[&str]) -> PatternSet {
        PatternSet {
            blocks: vec![PatternBlock {
                field: field.to_string(),
                selector,
                filters: filters.iter().map(|f| Pattern::new(f).unwrap()).collect(),
            }],
        }
    }

    fn exact(value: &str) -> Selector {
        Selector::Exact(value.to_string())
    }

    fn regex(value: &str) -> Selector {
        Selector::Regex(Pattern::new(value).unwrap())
    }

    #[test]
    fn test_read_patterns() {
        let content = "# This is a comment\n\
                       _SYSTEMD_UNIT = foo\n\
                       bar\n\
                       \n\
                       _SYSTEMD_UNIT = /baz/\n\
                       fish\n";
        let patterns = parse(content).unwrap();

        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns.blocks[0].field, "_SYSTEMD_UNIT");
        assert_eq!(patterns.blocks[0].selector, exact("foo"));
        assert_eq!(patterns.blocks[0].filters, vec![Pattern::new("bar").unwrap()]);
        assert_eq!(patterns.blocks[1].selector, regex("baz"));
        assert_eq!(patterns.blocks[1].filters, vec![Pattern::new("fish").unwrap()]);
    }

    #[test]
    fn test_default_patterns_are_empty() {
        assert!(parse(DEFAULT_PATTERNS).unwrap().is_empty());
    }

    #[test]
    fn test_block_without_filters_is_dropped() {
        let patterns = parse("PRIORITY = 3\n\nPRIORITY = 4\nfoo\n").unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns.blocks[0].selector, exact("4"));
    }

    #[test]
    fn test_header_value_may_contain_equals() {
        let patterns = parse("MESSAGE_ID = a=b\nfoo\n").unwrap();
        assert_eq!(patterns.blocks[0].selector, exact("a=b"));
    }

    #[test]
    fn test_malformed_header() {
        let err = parse("# comment\nno separator here\nfoo\n").unwrap_err();
        match err {
            WatchError::ConfigError(msg) => assert!(msg.starts_with("patterns:2:"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_regex_fails_at_load() {
        assert!(matches!(
            parse("_SYSTEMD_UNIT = foo\nbroken (\n"),
            Err(WatchError::ConfigError(_))
        ));
        assert!(matches!(
            parse("_SYSTEMD_UNIT = /broken (/\nfoo\n"),
            Err(WatchError::ConfigError(_))
        ));
    }

    #[test]
    fn test_no_patterns() {
        let entry = LogEntry::from_pairs([("MESSAGE", "foo")]);
        assert!(!PatternSet::default().is_ignored(&entry));
    }

    #[test]
    fn test_no_message() {
        let patterns = set("_SYSLOG_IDENTIFIER", exact("foo"), &["bar"]);
        let entry = LogEntry::from_pairs([("_SYSLOG_IDENTIFIER", "foo")]);
        assert!(!patterns.is_ignored(&entry));
    }

    #[test]
    fn test_no_matching_block() {
        let patterns = set("_SYSLOG_IDENTIFIER", exact("bar"), &["bar"]);
        let entry = LogEntry::from_pairs([("_SYSLOG_IDENTIFIER", "foo"), ("MESSAGE", "unmatched")]);
        assert!(!patterns.is_ignored(&entry));
    }

    #[test]
    fn test_matching_pattern() {
        let patterns = set("_SYSLOG_IDENTIFIER", exact("bar"), &["msg"]);
        let entry = LogEntry::from_pairs([("_SYSLOG_IDENTIFIER", "bar"), ("MESSAGE", "msg")]);
        assert!(patterns.is_ignored(&entry));
    }

    #[test]
    fn test_regex_selector() {
        let patterns = set("_SYSLOG_IDENTIFIER", regex("ba"), &["msg"]);
        let entry = LogEntry::from_pairs([("_SYSLOG_IDENTIFIER", "bar"), ("MESSAGE", "msg")]);
        assert!(patterns.is_ignored(&entry));
    }

    #[test]
    fn test_matching_priority() {
        let entry = LogEntry::from_pairs([("PRIORITY", "1"), ("MESSAGE", "msg")]);
        assert!(set("PRIORITY", exact("1"), &["msg"]).is_ignored(&entry));
        assert!(set("PRIORITY", regex("1"), &["msg"]).is_ignored(&entry));
    }

    #[test]
    fn test_binary_message() {
        let patterns = set("_SYSLOG_IDENTIFIER", exact("bar"), &["msg"]);
        let mut fields = BTreeMap::new();
        fields.insert("_SYSLOG_IDENTIFIER".to_string(), FieldValue::Text("bar".into()));
        fields.insert("MESSAGE".to_string(), FieldValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
        assert!(!patterns.is_ignored(&LogEntry::new(fields)));
    }

    #[test]
    fn test_filters_match_from_start_only() {
        let patterns = set("_SYSTEMD_UNIT", exact("foo.service"), &["Started"]);
        let started = LogEntry::from_pairs([("_SYSTEMD_UNIT", "foo.service"), ("MESSAGE", "Started foo")]);
        let not_started = LogEntry::from_pairs([("_SYSTEMD_UNIT", "foo.service"), ("MESSAGE", "Not Started")]);

        assert!(patterns.is_ignored(&started));
        assert!(!patterns.is_ignored(&not_started));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let patterns = set("_SYSTEMD_UNIT", exact("foo.service"), &["a|b"]);
        let entry = LogEntry::from_pairs([("_SYSTEMD_UNIT", "foo.service"), ("MESSAGE", "xb")]);
        assert!(!patterns.is_ignored(&entry));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns");
        fs::write(&path, "SYSLOG_IDENTIFIER = sshd\nConnection closed by .*\n").unwrap();

        let patterns = PatternSet::load(&path).unwrap();
        assert_eq!(patterns.len(), 1);

        let missing = PatternSet::load(&dir.path().join("missing"));
        assert!(matches!(missing, Err(WatchError::ConfigError(_))));
    }
}
