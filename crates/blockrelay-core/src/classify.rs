//! Decode loosely typed upstream records into [`Event`]s.
//!
//! Records arrive either in the chain-sync tool's nested shape
//! (`{type, timestamp, context: {..}, payload: {..}}`) or flattened, with the
//! same fields at the top level. Both are accepted. Classification is pure and
//! never blocks.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::errors::ClassifyError;
use crate::events::{Event, EventKind};

/// Display format for normalized timestamps.
pub const TIMESTAMP_FORMAT: &str = "%B %-d, %Y %H:%M:%S UTC";

/// Turn a raw record into a typed [`Event`].
pub fn classify(raw: &Value) -> Result<Event, ClassifyError> {
    let Some(record) = raw.as_object() else {
        return Err(ClassifyError::Unrecognized("record is not an object".into()));
    };
    let kind = discriminant(record)?;

    let mut shaped = Map::new();
    let _ = shaped.insert("type".into(), Value::String(kind.as_str().into()));
    if let Some(ts) = record.get("timestamp") {
        let _ = shaped.insert("timestamp".into(), ts.clone());
    }
    let _ = shaped.insert(
        "context".into(),
        Value::Object(lift(record, "context", kind.context_fields())),
    );
    let _ = shaped.insert(
        "payload".into(),
        Value::Object(lift(record, "payload", kind.payload_fields())),
    );

    let mut event: Event =
        serde_json::from_value(Value::Object(shaped)).map_err(|e| ClassifyError::Malformed {
            kind: kind.as_str(),
            reason: e.to_string(),
        })?;

    let ts = event.timestamp_mut();
    if let Some(normalized) = normalize_timestamp(ts) {
        *ts = normalized;
    }
    Ok(event)
}

/// The first of `type` or `kind` that names a known event. A field holding
/// null or some other value never hides a valid tag in the next one.
fn discriminant(record: &Map<String, Value>) -> Result<EventKind, ClassifyError> {
    let mut rejected = None;
    for key in ["type", "kind"] {
        let reason = match record.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(tag)) => match EventKind::from_tag(tag) {
                Some(kind) => return Ok(kind),
                None if tag.is_empty() => "empty event kind".to_owned(),
                None => format!("unknown event kind {tag:?}"),
            },
            Some(other) => format!("event kind is not a string: {other}"),
        };
        let _ = rejected.get_or_insert(reason);
    }
    Err(ClassifyError::Unrecognized(
        rejected.unwrap_or_else(|| "missing event kind".to_owned()),
    ))
}

/// Collect `fields` for one section, preferring the nested object over
/// top-level values.
fn lift(record: &Map<String, Value>, section: &str, fields: &[&str]) -> Map<String, Value> {
    let nested = record.get(section).and_then(Value::as_object);
    let mut out = Map::new();
    for &field in fields {
        let value = nested
            .and_then(|n| n.get(field))
            .or_else(|| record.get(field));
        if let Some(v) = value.filter(|v| !v.is_null()) {
            let _ = out.insert(field.to_owned(), v.clone());
        }
    }
    out
}

/// Render an RFC 3339 timestamp in UTC. Returns `None` when `raw` does not
/// parse, in which case callers keep the original text.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_block_record() {
        let raw = json!({
            "kind": "chainsync.block",
            "timestamp": "2024-01-02T15:04:05Z",
            "blockNumber": 42,
            "blockHash": "abc",
        });
        let event = classify(&raw).unwrap();
        assert_eq!(event.kind(), EventKind::Block);
        assert_eq!(event.timestamp(), "January 2, 2024 15:04:05 UTC");
        match event {
            Event::Block { context, payload, .. } => {
                assert_eq!(context.block_number, 42);
                assert_eq!(payload.block_hash, "abc");
                assert_eq!(payload.transaction_count, 0);
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn nested_snek_record() {
        let raw = json!({
            "type": "chainsync.block",
            "timestamp": "2024-03-10T08:00:00+02:00",
            "context": {"blockNumber": 10_000_000, "slotNumber": 118_000_000, "networkMagic": 764_824_073},
            "payload": {
                "blockBodySize": 20_000,
                "issuerVkey": "deadbeef",
                "blockHash": "ff00",
                "transactionCount": 12
            }
        });
        let event = classify(&raw).unwrap();
        assert_eq!(event.timestamp(), "March 10, 2024 06:00:00 UTC");
        let Event::Block { context, payload, .. } = event else {
            panic!("expected block");
        };
        assert_eq!(context.slot_number, 118_000_000);
        assert_eq!(context.network_magic, 764_824_073);
        assert_eq!(payload.issuer_vkey, "deadbeef");
        assert_eq!(payload.transaction_count, 12);
    }

    #[test]
    fn nested_value_wins_over_top_level() {
        let raw = json!({
            "type": "chainsync.block",
            "blockNumber": 1,
            "context": {"blockNumber": 2},
            "payload": {"blockHash": "x"}
        });
        let Event::Block { context, .. } = classify(&raw).unwrap() else {
            panic!("expected block");
        };
        assert_eq!(context.block_number, 2);
    }

    #[test]
    fn rollback_record() {
        let raw = json!({
            "type": "chainsync.rollback",
            "payload": {"blockHash": "cafe", "slotNumber": 99}
        });
        let event = classify(&raw).unwrap();
        assert_eq!(event.kind(), EventKind::Rollback);
        assert_eq!(event.timestamp(), "");
    }

    #[test]
    fn transaction_record() {
        let raw = json!({
            "type": "chainsync.transaction",
            "context": {"blockNumber": 5, "transactionHash": "tx1", "transactionIdx": 3},
            "payload": {"fee": 170_000, "inputs": ["a#0"], "outputs": [{"address": "addr1", "amount": 5}]}
        });
        let Event::Transaction { context, payload, .. } = classify(&raw).unwrap() else {
            panic!("expected transaction");
        };
        assert_eq!(context.transaction_hash, "tx1");
        assert_eq!(context.transaction_idx, 3);
        assert_eq!(payload.fee, 170_000);
        assert_eq!(payload.inputs, vec!["a#0".to_owned()]);
        assert_eq!(payload.outputs.len(), 1);
    }

    #[test]
    fn missing_kind_is_unrecognized() {
        let err = classify(&json!({"blockNumber": 1})).unwrap_err();
        assert!(matches!(err, ClassifyError::Unrecognized(_)));
    }

    #[test]
    fn non_string_kind_is_unrecognized() {
        let err = classify(&json!({"type": 7})).unwrap_err();
        assert!(matches!(err, ClassifyError::Unrecognized(_)));
    }

    #[test]
    fn empty_kind_is_unrecognized() {
        let err = classify(&json!({"type": ""})).unwrap_err();
        assert!(matches!(err, ClassifyError::Unrecognized(_)));
    }

    #[test]
    fn unknown_kind_is_unrecognized() {
        let err = classify(&json!({"type": "chainsync.epoch"})).unwrap_err();
        assert_eq!(err.reason(), "unrecognized");
    }

    #[test]
    fn null_type_falls_back_to_kind() {
        let raw = json!({"type": null, "kind": "chainsync.block", "blockNumber": 1, "blockHash": "a"});
        assert_eq!(classify(&raw).unwrap().kind(), EventKind::Block);
    }

    #[test]
    fn unrelated_type_does_not_shadow_kind() {
        let raw = json!({
            "type": "mainnet",
            "kind": "chainsync.rollback",
            "blockHash": "a",
            "slotNumber": 4
        });
        assert_eq!(classify(&raw).unwrap().kind(), EventKind::Rollback);
        let raw = json!({"type": {"era": "conway"}, "kind": "chainsync.block", "blockNumber": 1, "blockHash": "a"});
        assert_eq!(classify(&raw).unwrap().kind(), EventKind::Block);
    }

    #[test]
    fn first_rejected_tag_is_reported() {
        let err = classify(&json!({"type": "mainnet", "kind": 3})).unwrap_err();
        assert!(err.to_string().contains("mainnet"));
    }

    #[test]
    fn non_object_is_unrecognized() {
        let err = classify(&json!(["chainsync.block"])).unwrap_err();
        assert!(matches!(err, ClassifyError::Unrecognized(_)));
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let raw = json!({
            "kind": "chainsync.block",
            "blockNumber": "not-a-number",
            "blockHash": "abc",
        });
        let err = classify(&raw).unwrap_err();
        assert!(matches!(err, ClassifyError::Malformed { kind: "chainsync.block", .. }));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let raw = json!({"type": "chainsync.block", "blockNumber": 1});
        let err = classify(&raw).unwrap_err();
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn unparseable_timestamp_is_kept() {
        let raw = json!({
            "type": "chainsync.rollback",
            "timestamp": "yesterday",
            "blockHash": "a",
            "slotNumber": 1
        });
        assert_eq!(classify(&raw).unwrap().timestamp(), "yesterday");
    }

    #[test]
    fn normalize_handles_offsets() {
        assert_eq!(
            normalize_timestamp("2024-12-31T23:30:00-01:00").as_deref(),
            Some("January 1, 2025 00:30:00 UTC")
        );
        assert_eq!(normalize_timestamp("not a time"), None);
    }

    #[test]
    fn serialized_event_reclassifies() {
        let raw = json!({"kind": "chainsync.block", "blockNumber": 3, "blockHash": "h"});
        let event = classify(&raw).unwrap();
        let again = classify(&serde_json::to_value(&event).unwrap()).unwrap();
        assert_eq!(event, again);
    }
}
