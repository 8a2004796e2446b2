//! Payload parsing for feed records.
//!
//! Decodes one JSON payload into a [`GroupEvent`], applying the severity
//! filter and title normalization on the way.

use serde::Deserialize;
use thiserror::Error;

use super::{window_index, GroupEvent, GroupKey, SUCCESS_SEVERITY};

/// Raw feed record. Only the fields used for grouping are decoded;
/// anything else in the object is ignored.
#[derive(Debug, Deserialize)]
pub struct RawEvent {
    pub device: String,
    #[serde(rename = "sev")]
    pub severity: String,
    pub title: String,
    pub country: String,
    #[serde(rename = "time")]
    pub epoch_ms: i64,
}

/// Reasons a payload does not produce a group event.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("severity {severity:?} is not countable")]
    Filtered { severity: String },
}

/// Parse a payload into a [`GroupEvent`] for the given window length.
pub fn parse_payload(payload: &str, interval_secs: u64) -> Result<GroupEvent, ParseError> {
    let raw: RawEvent = serde_json::from_str(payload.trim_end())?;

    if raw.severity != SUCCESS_SEVERITY {
        return Err(ParseError::Filtered {
            severity: raw.severity,
        });
    }

    Ok(GroupEvent {
        key: GroupKey::new(raw.device, &raw.title, raw.country),
        window: window_index(raw.epoch_ms, interval_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_payload() {
        let payload = r#"{"device":"xbox_one_s","sev":"success","title":"Orange Is the New Black","country":"BR","time":1512754811000}"#;

        let event = parse_payload(payload, 5).expect("valid payload");
        assert_eq!(event.key.device, "xbox_one_s");
        assert_eq!(event.key.title, "OrangeIstheNewBlack");
        assert_eq!(event.key.country, "BR");
        assert_eq!(event.window, 1_512_754_811_000 / 5000);
    }

    #[test]
    fn test_parse_ignores_unknown_fields_and_trailing_newline() {
        let payload =
            "{\"device\":\"A\",\"sev\":\"success\",\"title\":\"X\",\"country\":\"FR\",\"time\":6000,\"extra\":[1,2]}\n";

        let event = parse_payload(payload, 5).expect("valid payload");
        assert_eq!(event.window, 1);
    }

    #[test]
    fn test_parse_filters_non_success() {
        let payload = r#"{"device":"A","sev":"error","title":"X","country":"FR","time":6000}"#;

        match parse_payload(payload, 5) {
            Err(ParseError::Filtered { severity }) => assert_eq!(severity, "error"),
            other => panic!("expected filter drop, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_severity_match_is_exact() {
        let payload = r#"{"device":"A","sev":"Success","title":"X","country":"FR","time":6000}"#;
        assert!(matches!(
            parse_payload(payload, 5),
            Err(ParseError::Filtered { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(
            parse_payload("{\"device\":", 5),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_payload("not json", 5),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let payload = r#"{"device":"A","sev":"success","title":"X","time":6000}"#;
        assert!(matches!(
            parse_payload(payload, 5),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_integer_time() {
        let payload = r#"{"device":"A","sev":"success","title":"X","country":"FR","time":"6000"}"#;
        assert!(matches!(
            parse_payload(payload, 5),
            Err(ParseError::Malformed(_))
        ));
    }
}
