//! Property tests for inbound message validation.
//!
//! Whatever text arrives at either side of the boundary, `validate` returns
//! either a message accepted by that side or a failure that becomes a
//! `schemaError`.

use corral::protocol::{validate, Direction, Message, ValidationFailure};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

const TAGS: &[&str] = &[
    "run",
    "console",
    "result",
    "error",
    "schemaError",
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "timerCallback",
    "dialogRequest",
    "dialogResponse",
];

const FIELDS: &[&str] = &[
    "id",
    "code",
    "value",
    "message",
    "stack",
    "issues",
    "delay",
    "args",
    "payload",
    "method",
    "groupDepth",
    "dialogType",
    "defaultValue",
];

fn arb_number() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_map(|n| json!(n)),
        Just(json!(1e300)),
        Just(json!(-0.0)),
        Just(json!(2147483648u64)),
    ]
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        arb_number(),
        ".{0,12}".prop_map(Value::String),
        prop::sample::select(vec!["log", "table", "count", "timeEnd", "confirm", "timeout-0"])
            .prop_map(|s| Value::String(s.to_string())),
    ];
    leaf.prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec((".{0,6}", inner), 0..6)
                .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
        ]
    })
}

fn arb_tag() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => prop::sample::select(TAGS).prop_map(|t| Value::String(t.to_string())),
        1 => ".{0,16}".prop_map(Value::String),
        1 => arb_json(),
    ]
}

/// Objects shaped like messages: a `type` plus a random selection of known
/// field names holding arbitrary values
fn arb_message_object() -> impl Strategy<Value = Value> {
    (
        prop::option::weighted(0.95, arb_tag()),
        prop::collection::vec((prop::sample::select(FIELDS), arb_json()), 0..8),
    )
        .prop_map(|(tag, fields)| {
            let mut object = Map::new();
            if let Some(tag) = tag {
                object.insert("type".to_string(), tag);
            }
            for (name, value) in fields {
                object.insert(name.to_string(), value);
            }
            Value::Object(object)
        })
}

fn check(raw: &str, direction: Direction) -> Result<(), TestCaseError> {
    match validate(raw, direction) {
        Ok(message) => {
            prop_assert!(direction.accepts(message.tag()));
        }
        Err(failure) => {
            prop_assert!(!failure.issues.is_empty());
            let issues = failure.to_string();
            let converted = Message::from(failure);
            prop_assert_eq!(converted, Message::SchemaError { issues });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn arbitrary_text_is_accepted_or_rejected(raw in ".*") {
        check(&raw, Direction::ToHost)?;
        check(&raw, Direction::ToIsolate)?;
    }

    #[test]
    fn arbitrary_objects_are_accepted_or_rejected(object in arb_message_object()) {
        let raw = object.to_string();
        check(&raw, Direction::ToHost)?;
        check(&raw, Direction::ToIsolate)?;
    }

    #[test]
    fn accepted_timer_delays_are_bounded(delay in any::<f64>()) {
        let raw = json!({
            "type": "setTimeout",
            "id": "timeout-0",
            "delay": delay,
            "args": [],
        })
        .to_string();
        if let Ok(Message::SetTimeout { delay, .. }) = validate(&raw, Direction::ToHost) {
            prop_assert!(delay.is_finite());
            prop_assert!((0.0..=corral::protocol::MAX_TIMER_DELAY_MS).contains(&delay));
        }
    }
}

#[test]
fn deeply_nested_json_is_rejected() {
    let raw = format!("{}{}", "[".repeat(100_000), "]".repeat(100_000));
    let failure: ValidationFailure = validate(&raw, Direction::ToHost).unwrap_err();
    assert!(failure.issues[0].contains("not valid JSON"));

    let raw = format!(
        r#"{{"type":"result","value":{}"x"{}}}"#,
        "[".repeat(10_000),
        "]".repeat(10_000)
    );
    assert!(validate(&raw, Direction::ToHost).is_err());
}
