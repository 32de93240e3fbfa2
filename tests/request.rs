use serde_json::Value;

use promptwire::error::PromptwireError;
use promptwire::models::{DEFAULT_MODEL, ModelCatalog};
use promptwire::request::{Action, RequestPayload, SamplingParams};
use promptwire::template::MAX_PROMPT_BYTES;

const REASONING_MODEL: &str = "anthropic.claude-3-7-sonnet-20250219-v1:0";

fn wire(payload: &RequestPayload) -> Value {
    serde_json::from_str(&payload.to_wire().unwrap()).unwrap()
}

fn invalid(payload: &RequestPayload) -> bool {
    matches!(payload.validate(), Err(PromptwireError::InvalidRequest(_)))
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

#[test]
fn sendmessage_wire_shape() {
    let payload = RequestPayload::new(Action::SendMessage, "hello", DEFAULT_MODEL)
        .with_system_prompt("be brief")
        .with_images(vec!["uploads/a.png".to_string()]);
    let value = wire(&payload);

    assert_eq!(value["action"], "sendmessage");
    assert_eq!(value["data"], "hello");
    assert_eq!(value["modelId"], DEFAULT_MODEL);
    assert_eq!(value["max_tokens_to_sample"], 4000);
    assert_eq!(value["temperature"], 0.0);
    assert_eq!(value["top_k"], 250);
    assert_eq!(value["top_p"], 0.999);
    assert_eq!(value["system"], "be brief");
    assert_eq!(value["imageS3Keys"][0], "uploads/a.png");
    assert!(value.get("system_prompt").is_none());
    assert!(value.get("session_id").is_none());
    assert!(value.get("reasoning").is_none());
}

#[test]
fn chat_wire_shape() {
    let payload = RequestPayload::new(Action::Chat, "next", DEFAULT_MODEL)
        .with_system_prompt("be brief")
        .with_session_id("abc-123");
    let value = wire(&payload);

    assert_eq!(value["action"], "chat");
    assert_eq!(value["session_id"], "abc-123");
    assert_eq!(value["system_prompt"], "be brief");
    assert!(value.get("system").is_none());
    assert!(value.get("imageS3Keys").is_none());
}

#[test]
fn reasoning_fields_appear_only_when_enabled() {
    let payload = RequestPayload::new(Action::SendMessage, "think", REASONING_MODEL).with_reasoning(2048);
    let value = wire(&payload);
    assert_eq!(value["reasoning"], true);
    assert_eq!(value["reasoning_budget_tokens"], 2048);
}

#[test]
fn blank_system_prompt_is_omitted() {
    let payload = RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL).with_system_prompt("  ");
    assert_eq!(payload.system_prompt, None);
    assert!(wire(&payload).get("system").is_none());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn defaults_are_valid() {
    RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL)
        .validate()
        .unwrap();
}

#[test]
fn sampling_ranges_are_enforced() {
    let base = SamplingParams::default();
    let cases = [
        ("temperature high", SamplingParams { temperature: 1.5, ..base }),
        ("temperature negative", SamplingParams { temperature: -0.1, ..base }),
        ("top_k zero", SamplingParams { top_k: 0, ..base }),
        ("top_k high", SamplingParams { top_k: 251, ..base }),
        ("top_p high", SamplingParams { top_p: 1.0, ..base }),
        ("max_tokens zero", SamplingParams { max_tokens: 0, ..base }),
    ];
    for (name, sampling) in cases {
        let payload = RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL).with_sampling(sampling);
        assert!(invalid(&payload), "{name} should be rejected");
    }

    let edges = SamplingParams {
        temperature: 1.0,
        top_k: 1,
        top_p: 0.0,
        max_tokens: 1,
    };
    RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL)
        .with_sampling(edges)
        .validate()
        .unwrap();
}

#[test]
fn prompt_bounds() {
    assert!(invalid(&RequestPayload::new(Action::SendMessage, " \n", DEFAULT_MODEL)));

    let big = "a".repeat(MAX_PROMPT_BYTES + 1);
    assert!(matches!(
        RequestPayload::new(Action::SendMessage, big, DEFAULT_MODEL).validate(),
        Err(PromptwireError::InputTooLarge { .. })
    ));

    let exact = "a".repeat(MAX_PROMPT_BYTES);
    RequestPayload::new(Action::SendMessage, exact, DEFAULT_MODEL)
        .validate()
        .unwrap();
}

#[test]
fn image_limit() {
    let keys = |n: usize| (0..n).map(|i| format!("img/{i}.png")).collect::<Vec<_>>();
    RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL)
        .with_images(keys(6))
        .validate()
        .unwrap();
    assert!(invalid(
        &RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL).with_images(keys(7))
    ));
}

#[test]
fn reasoning_budget_must_fit_under_max_tokens() {
    let p = |budget| RequestPayload::new(Action::SendMessage, "x", REASONING_MODEL).with_reasoning(budget);
    assert!(invalid(&p(0)));
    assert!(invalid(&p(4000)));
    p(3999).validate().unwrap();
}

#[test]
fn chat_requires_session_id() {
    assert!(invalid(&RequestPayload::new(Action::Chat, "x", DEFAULT_MODEL)));
    assert!(invalid(
        &RequestPayload::new(Action::Chat, "x", DEFAULT_MODEL).with_session_id(" ")
    ));
}

// ---------------------------------------------------------------------------
// Model capabilities
// ---------------------------------------------------------------------------

#[test]
fn catalog_rejects_unsupported_features() {
    let catalog = ModelCatalog::builtin();

    let reasoning_on_haiku =
        RequestPayload::new(Action::SendMessage, "x", DEFAULT_MODEL).with_reasoning(1024);
    assert!(catalog.check(&reasoning_on_haiku).is_err());

    let images_on_text_model = RequestPayload::new(Action::SendMessage, "x", "anthropic.claude-v2")
        .with_images(vec!["img/1.png".to_string()]);
    assert!(catalog.check(&images_on_text_model).is_err());

    let unknown = RequestPayload::new(Action::SendMessage, "x", "anthropic.claude-9");
    assert!(matches!(
        catalog.check(&unknown),
        Err(PromptwireError::ModelNotFound { .. })
    ));

    let fine = RequestPayload::new(Action::SendMessage, "x", REASONING_MODEL).with_reasoning(1024);
    catalog.check(&fine).unwrap();
}
