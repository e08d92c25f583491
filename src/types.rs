use crate::error::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const FIELD_MESSAGE: &str = "MESSAGE";
pub const FIELD_PRIORITY: &str = "PRIORITY";
pub const FIELD_UNIT: &str = "_SYSTEMD_UNIT";
pub const FIELD_IDENTIFIER: &str = "SYSLOG_IDENTIFIER";
pub const FIELD_PID: &str = "_PID";
pub const FIELD_CURSOR: &str = "__CURSOR";
pub const FIELD_REALTIME: &str = "__REALTIME_TIMESTAMP";

/// Position marker into the journal, as handed out by journald.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of a single journal field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Payload journald could not export as UTF-8
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Binary(_) => None,
        }
    }

    /// Convert one value of journalctl's JSON export.
    ///
    /// Strings stay text, arrays of numbers are binary blobs, and arrays of
    /// values (a field that occurs more than once) keep their first value.
    /// `null` marks a payload too large to export and yields `None`.
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Number(n) => Some(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            Value::Array(items) if items.iter().all(Value::is_number) => {
                let bytes = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()?;
                Some(FieldValue::Binary(bytes))
            }
            Value::Array(items) => items.first().and_then(FieldValue::from_json),
            Value::Null | Value::Object(_) => None,
        }
    }
}

/// A single journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    timestamp: Option<DateTime<Utc>>,
    fields: BTreeMap<String, FieldValue>,
}

impl LogEntry {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        let timestamp = fields
            .get(FIELD_REALTIME)
            .and_then(FieldValue::as_text)
            .and_then(|micros| micros.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_micros);

        Self { timestamp, fields }
    }

    /// Parse one line of `journalctl --output=json`.
    pub fn from_json(line: &str) -> Result<Self> {
        let object: serde_json::Map<String, Value> = serde_json::from_str(line)?;

        let fields = object
            .iter()
            .filter_map(|(key, value)| FieldValue::from_json(value).map(|v| (key.clone(), v)))
            .collect();

        Ok(Self::new(fields))
    }

    /// Build an entry from plain text fields.
    #[cfg(test)]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Text(v.to_string())))
            .collect();
        Self::new(fields)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.text(FIELD_CURSOR).map(Cursor::new)
    }

    pub fn message(&self) -> Option<&FieldValue> {
        self.field(FIELD_MESSAGE)
    }

    pub fn unit(&self) -> Option<&str> {
        self.text(FIELD_UNIT)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.text(FIELD_IDENTIFIER)
    }

    pub fn priority(&self) -> Option<&str> {
        self.text(FIELD_PRIORITY)
    }

    pub fn pid(&self) -> Option<&str> {
        self.text(FIELD_PID)
    }
}

/// Entries no ignore pattern matched, in journal order.
#[derive(Debug, Default)]
pub struct Report {
    entries: Vec<LogEntry>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamps of the oldest and newest reported entry.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut stamps = self.entries.iter().filter_map(LogEntry::timestamp);
        let first = stamps.next()?;
        let last = stamps.last().unwrap_or(first);
        Some((first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;

    #[test]
    fn test_parse_journalctl_json() {
        let line = r#"{"__CURSOR":"s=abc;i=1","__REALTIME_TIMESTAMP":"1000000","PRIORITY":"6","_SYSTEMD_UNIT":"foo.service","_PID":"42","MESSAGE":"hello"}"#;
        let entry = LogEntry::from_json(line).unwrap();

        assert_eq!(entry.cursor(), Some(Cursor::new("s=abc;i=1")));
        assert_eq!(entry.timestamp(), DateTime::<Utc>::from_timestamp(1, 0));
        assert_eq!(entry.priority(), Some("6"));
        assert_eq!(entry.unit(), Some("foo.service"));
        assert_eq!(entry.pid(), Some("42"));
        assert_eq!(entry.message(), Some(&FieldValue::Text("hello".into())));
    }

    #[test]
    fn test_binary_and_null_fields() {
        let line = r#"{"MESSAGE":[222,173,190,239],"COREDUMP":null}"#;
        let entry = LogEntry::from_json(line).unwrap();

        assert_eq!(
            entry.message(),
            Some(&FieldValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert!(entry.field("COREDUMP").is_none());
        assert!(entry.text(FIELD_MESSAGE).is_none());
    }

    #[test]
    fn test_repeated_field_keeps_first_value() {
        let line = r#"{"MESSAGE":"m","TAG":["first","second"]}"#;
        let entry = LogEntry::from_json(line).unwrap();
        assert_eq!(entry.text("TAG"), Some("first"));
    }

    #[test]
    fn test_malformed_line() {
        assert!(matches!(
            LogEntry::from_json("not json"),
            Err(WatchError::JsonError(_))
        ));
    }

    #[test]
    fn test_report_time_range() {
        let mut report = Report::new();
        assert!(report.time_range().is_none());

        report.push(LogEntry::from_pairs([(FIELD_REALTIME, "1000000")]));
        report.push(LogEntry::from_pairs([(FIELD_MESSAGE, "no timestamp")]));
        report.push(LogEntry::from_pairs([(FIELD_REALTIME, "3000000")]));

        let (first, last) = report.time_range().unwrap();
        assert_eq!(first.timestamp(), 1);
        assert_eq!(last.timestamp(), 3);
        assert_eq!(report.len(), 3);
    }
}
