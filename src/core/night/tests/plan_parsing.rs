//! Plan parsing: caps, fallbacks, and JSON extraction.

use crate::core::night::plan::{build_planner_prompt, extract_json_block, parse_plan};

#[test]
fn valid_plan_parses_all_lists() {
    let text = r#"{
        "research": [{"subject": "wasm", "question": "Is wasi stable enough?"}],
        "ideas": [{"idea": "nightly changelog digest", "angle": "low effort"}],
        "proposals": [{"title": "bump toolchain", "rationale": "security fix", "target": "repo"}]
    }"#;
    let plan = parse_plan(text, 5, 3, 2);
    assert_eq!(plan.research.len(), 1);
    assert_eq!(plan.ideas.len(), 1);
    assert_eq!(plan.proposals.len(), 1);
    assert_eq!(plan.research[0].subject, "wasm");
    assert_eq!(plan.proposals[0].target.as_deref(), Some("repo"));
}

#[test]
fn fenced_output_is_unwrapped() {
    let text = "Sure, here's the plan:\n```json\n{\"research\": [{\"subject\": \"s\", \"question\": \"q\"}]}\n```\nLet me know!";
    let plan = parse_plan(text, 5, 3, 2);
    assert_eq!(plan.research.len(), 1);
}

#[test]
fn malformed_output_yields_empty_plan_never_panics() {
    for garbage in [
        "",
        "I could not produce a plan tonight.",
        "{\"research\": \"not a list\"}",
        "{invalid json",
        "[1, 2, 3]",
    ] {
        let plan = parse_plan(garbage, 5, 3, 2);
        assert!(plan.is_empty(), "expected empty plan for {garbage:?}");
    }
}

#[test]
fn lists_are_hard_capped() {
    let research: Vec<String> = (0..20)
        .map(|i| format!("{{\"subject\": \"s{i}\", \"question\": \"q{i}\"}}"))
        .collect();
    let text = format!("{{\"research\": [{}]}}", research.join(","));
    let plan = parse_plan(&text, 5, 3, 2);
    assert_eq!(plan.research.len(), 5);
}

#[test]
fn missing_lists_default_to_empty() {
    let plan = parse_plan("{\"research\": []}", 5, 3, 2);
    assert!(plan.is_empty());
}

#[test]
fn extract_prefers_fenced_block_over_raw() {
    let text = "```json\n{\"a\": 1}\n```";
    assert_eq!(extract_json_block(text), Some("{\"a\": 1}"));
    assert_eq!(extract_json_block("{\"b\": 2}"), Some("{\"b\": 2}"));
    assert_eq!(extract_json_block("plain prose"), None);
}

#[test]
fn planner_prompt_carries_caps_and_digest() {
    let prompt = build_planner_prompt("## notes\nremember the thing", 5, 3, 2);
    assert!(prompt.contains("At most 5 research items, 3 ideas, 2 proposals"));
    assert!(prompt.contains("remember the thing"));
}
