/*
    codec.rs - Line-oriented text format for events, descriptors and watermarks

    One record per line, newline terminated:

        event:      targetID,logID,id,timestamp,type[,k1=v1;k2=v2;...]
        descriptor: targetID,logID,rangeText
        watermark:  targetID,logID,lowestID

    Free-text fields (target ids, property keys and values) are escaped so
    they never contain a raw separator:

        \  -> \\     ,  -> \.     ;  -> \s
        =  -> \e     LF -> \n     CR -> \r

    The same format is used on disk and on the wire.
*/

use crate::core_log::descriptor::{Descriptor, LowWatermark};
use crate::core_log::event::Event;
use crate::core_log::range_set::RangeParseError;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while decoding a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Unexpected trailing data: '{0}'")]
    TrailingData(String),

    #[error("Invalid value for '{field}': '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid escape sequence in '{0}'")]
    InvalidEscape(String),

    #[error("Malformed property '{0}'")]
    MalformedProperty(String),

    #[error("Invalid range: {0}")]
    Range(#[from] RangeParseError),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Escape a free-text field
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\."),
            ';' => out.push_str("\\s"),
            '=' => out.push_str("\\e"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape`]
pub fn unescape(value: &str) -> CodecResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('.') => out.push(','),
            Some('s') => out.push(';'),
            Some('e') => out.push('='),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(CodecError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

fn number<T: FromStr>(field: &'static str, value: Option<&str>) -> CodecResult<T> {
    let value = value.ok_or(CodecError::MissingField(field))?;
    value
        .parse()
        .map_err(|_| CodecError::InvalidNumber { field, value: value.to_string() })
}

fn text(field: &'static str, value: Option<&str>) -> CodecResult<String> {
    unescape(value.ok_or(CodecError::MissingField(field))?)
}

pub fn encode_event(event: &Event) -> String {
    let mut line = format!(
        "{},{},{},{},{}",
        escape(&event.target_id),
        event.log_id,
        event.id,
        event.timestamp,
        event.event_type
    );

    if !event.properties.is_empty() {
        let properties = event
            .properties
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join(";");
        line.push(',');
        line.push_str(&properties);
    }

    line
}

pub fn decode_event(line: &str) -> CodecResult<Event> {
    let mut fields = line.split(',');

    let target_id = text("targetID", fields.next())?;
    let log_id = number("logID", fields.next())?;
    let id = number("id", fields.next())?;
    let timestamp = number("timestamp", fields.next())?;
    let event_type = number("type", fields.next())?;

    let mut properties = BTreeMap::new();
    if let Some(encoded) = fields.next() {
        for pair in encoded.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| CodecError::MalformedProperty(pair.to_string()))?;
            properties.insert(unescape(key)?, unescape(value)?);
        }
    }

    if let Some(extra) = fields.next() {
        return Err(CodecError::TrailingData(extra.to_string()));
    }

    Ok(Event { target_id, log_id, id, timestamp, event_type, properties })
}

pub fn encode_descriptor(descriptor: &Descriptor) -> String {
    format!(
        "{},{},{}",
        escape(&descriptor.target_id),
        descriptor.log_id,
        descriptor.range_set
    )
}

pub fn decode_descriptor(line: &str) -> CodecResult<Descriptor> {
    // The range text itself is comma separated, so it takes the remainder.
    let mut fields = line.splitn(3, ',');

    let target_id = text("targetID", fields.next())?;
    let log_id = number("logID", fields.next())?;
    let range_set = fields.next().ok_or(CodecError::MissingField("range"))?.parse()?;

    Ok(Descriptor { target_id, log_id, range_set })
}

pub fn encode_watermark(watermark: &LowWatermark) -> String {
    format!(
        "{},{},{}",
        escape(&watermark.target_id),
        watermark.log_id,
        watermark.lowest_id
    )
}

pub fn decode_watermark(line: &str) -> CodecResult<LowWatermark> {
    let mut fields = line.split(',');

    let target_id = text("targetID", fields.next())?;
    let log_id = number("logID", fields.next())?;
    let lowest_id = number("lowestID", fields.next())?;

    if let Some(extra) = fields.next() {
        return Err(CodecError::TrailingData(extra.to_string()));
    }

    Ok(LowWatermark { target_id, log_id, lowest_id })
}

/// Join encoded records into a newline-terminated body
pub fn encode_lines<T>(records: &[T], encode: impl Fn(&T) -> String) -> String {
    let mut body = String::new();
    for record in records {
        body.push_str(&encode(record));
        body.push('\n');
    }
    body
}

/// Decode every non-blank line of a body
pub fn decode_lines<T>(body: &str, decode: impl Fn(&str) -> CodecResult<T>) -> CodecResult<Vec<T>> {
    body.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(decode)
        .collect()
}

pub fn encode_events(events: &[Event]) -> String {
    encode_lines(events, encode_event)
}

pub fn decode_events(body: &str) -> CodecResult<Vec<Event>> {
    decode_lines(body, decode_event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_all_separators() {
        let raw = "a\\b,c;d=e\nf\rg";
        let escaped = escape(raw);
        assert_eq!(escaped, "a\\\\b\\.c\\sd\\ee\\nf\\rg");
        assert!(!escaped.contains(','));
        assert!(!escaped.contains(';'));
        assert!(!escaped.contains('='));
        assert_eq!(unescape(&escaped).unwrap(), raw);
    }

    #[test]
    fn test_unescape_rejects_unknown_sequence() {
        assert!(matches!(unescape("abc\\x"), Err(CodecError::InvalidEscape(_))));
        assert!(matches!(unescape("dangling\\"), Err(CodecError::InvalidEscape(_))));
    }

    #[test]
    fn test_event_line_format() {
        let event = Event::new("gw,1", 2, 3, 1000, 7)
            .with_property("b", "x=y")
            .with_property("a", "1;2");

        assert_eq!(encode_event(&event), "gw\\.1,2,3,1000,7,a=1\\s2;b=x\\ey");
        assert_eq!(decode_event(&encode_event(&event)).unwrap(), event);
    }

    #[test]
    fn test_event_without_properties() {
        let event = Event::new("t", 1, 1, -5, 0);
        assert_eq!(encode_event(&event), "t,1,1,-5,0");
        assert_eq!(decode_event("t,1,1,-5,0").unwrap(), event);
    }

    #[test]
    fn test_decode_event_errors() {
        assert_eq!(decode_event("t,1"), Err(CodecError::MissingField("id")));
        assert!(matches!(
            decode_event("t,x,1,1,1"),
            Err(CodecError::InvalidNumber { field: "logID", .. })
        ));
        assert!(matches!(
            decode_event("t,1,1,1,1,novalue"),
            Err(CodecError::MalformedProperty(_))
        ));
        assert!(matches!(decode_event("t,1,1,1,1,a=b,c"), Err(CodecError::TrailingData(_))));
    }

    #[test]
    fn test_trailing_property_separator_is_accepted() {
        let event = decode_event("t,1,1,1,1,a=b;").unwrap();
        assert_eq!(event.properties["a"], "b");
    }

    #[test]
    fn test_descriptor_line() {
        let descriptor = Descriptor::new("t", 4, "1-3,7".parse().unwrap());
        assert_eq!(encode_descriptor(&descriptor), "t,4,1-3,7");
        assert_eq!(decode_descriptor("t,4,1-3,7").unwrap(), descriptor);
    }

    #[test]
    fn test_empty_descriptor_line() {
        let descriptor = Descriptor::new("t", 4, Default::default());
        assert_eq!(encode_descriptor(&descriptor), "t,4,");
        assert_eq!(decode_descriptor("t,4,").unwrap(), descriptor);
        assert_eq!(decode_descriptor("t,4"), Err(CodecError::MissingField("range")));
    }

    #[test]
    fn test_watermark_line() {
        let watermark = LowWatermark::new("t", 2, 17);
        assert_eq!(encode_watermark(&watermark), "t,2,17");
        assert_eq!(decode_watermark("t,2,17").unwrap(), watermark);
        assert!(decode_watermark("t,2,17,1").is_err());
    }

    #[test]
    fn test_body_framing() {
        let events = vec![Event::new("t", 1, 1, 10, 0), Event::new("t", 1, 2, 11, 0)];
        let body = encode_events(&events);
        assert_eq!(body, "t,1,1,10,0\nt,1,2,11,0\n");
        assert_eq!(decode_events(&body).unwrap(), events);
        assert_eq!(decode_events("t,1,1,10,0\r\n\n").unwrap(), events[..1].to_vec());
        assert!(decode_events("").unwrap().is_empty());
    }
}
