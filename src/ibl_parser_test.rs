//! Tests for `ibl_parser` and `render`.

use crate::ibl_parser::{parse, parse_group, parse_step};
use crate::render::{render_program, render_step};
use crate::types::{Binding, Group, Params, Pipeline, Program, Step};
use proptest::prelude::*;
use serde_json::{Value, json};

#[test]
fn parse_sequence_of_singles() {
  let p = parse(r#"[source:web_search]("AI") >> [system:file]("out.md")"#).unwrap();
  assert!(p.bindings.is_empty());
  assert_eq!(p.pipelines.len(), 1);
  let groups = &p.pipelines[0].groups;
  assert_eq!(groups.len(), 2);
  assert_eq!(
    groups[0],
    Group::Single(Step::new("source", "web_search").with_target("AI"))
  );
  assert_eq!(
    groups[1],
    Group::Single(Step::new("system", "file").with_target("out.md"))
  );
}

#[test]
fn parse_parallel_group_with_bare_targets() {
  let p = parse("[source:web_search](a) & [source:search_news](b)").unwrap();
  assert_eq!(p.pipelines.len(), 1);
  assert_eq!(
    p.pipelines[0].groups,
    vec![Group::parallel([
      Step::new("source", "web_search").with_target("a"),
      Step::new("source", "search_news").with_target("b"),
    ])]
  );
}

#[test]
fn parse_fallback_group() {
  let g = parse_group("[a:x] ?? [b:y]() ?? [c:z]('q')").unwrap();
  assert_eq!(
    g,
    Group::fallback([
      Step::new("a", "x"),
      Step::new("b", "y"),
      Step::new("c", "z").with_target("q"),
    ])
  );
}

#[test]
fn parse_rejects_mixed_operators() {
  let err = parse_group("[a:x] & [b:y] ?? [c:z]").unwrap_err();
  assert!(err.message.contains("cannot mix"));
}

#[test]
fn parse_step_params_keep_source_order() {
  let step = parse_step(r#"[messenger:send]("tg") { "z": 1, "a": [true, null], "m": {"k": "v"} }"#)
    .unwrap();
  let keys: Vec<_> = step.params.keys().cloned().collect();
  assert_eq!(keys, vec!["z", "a", "m"]);
  assert_eq!(step.params["a"], json!([true, null]));
}

#[test]
fn parse_step_params_without_target() {
  let step = parse_step(r#"[system:time] {"tz": "UTC"}"#).unwrap();
  assert_eq!(step.target, None);
  assert_eq!(step.params["tz"], json!("UTC"));
}

#[test]
fn parse_step_quoted_target_with_operators_and_escapes() {
  let step = parse_step(r#"[source:web_search]("a >> b & c ?? \"d\"")"#).unwrap();
  assert_eq!(step.target.as_deref(), Some(r#"a >> b & c ?? "d""#));
}

#[test]
fn parse_step_errors() {
  assert!(parse_step("source:web_search").is_err());
  assert!(parse_step("[source web_search]").is_err());
  assert!(parse_step("[a:b](x").is_err());
  assert!(parse_step(r#"[a:b] {"k": }"#).is_err());
  assert!(parse_step("[a:b] [1, 2]").is_err());
  assert!(parse_step(r#"[a:b] {"k": 1} extra"#).is_err());
  let err = parse_step(r#"[a:b] ["k"]"#).unwrap_err();
  assert!(err.message.contains("unexpected text"));
}

#[test]
fn parse_accepts_empty_params_object() {
  let step = parse_step("[a:b](x) {}").unwrap();
  assert!(step.params.is_empty());
  let err = parse_step("[a:b] {} {}").unwrap_err();
  assert!(err.message.contains("unexpected text"));
}

#[test]
fn parse_empty_program_is_error() {
  assert!(parse("").is_err());
  assert!(parse("  \n\n").is_err());
  let err = parse("# only a comment\n   # another").unwrap_err();
  assert_eq!(err.message, "program is empty");
}

#[test]
fn parse_multiline_with_comments_and_continuation() {
  let src = r#"
# fetch then save
[source:web_search]("AI") >>   # trailing comment
  [system:file]("out.md") {
    "mode": "append"
  }
[system:time]
  ?? [system:clock]
"#;
  let p = parse(src).unwrap();
  assert_eq!(p.pipelines.len(), 2);
  assert_eq!(p.pipelines[0].groups.len(), 2);
  assert_eq!(
    p.pipelines[0].groups[1],
    Group::Single(
      Step::new("system", "file")
        .with_target("out.md")
        .with_param("mode", "append")
    )
  );
  assert_eq!(p.pipelines[1].groups[0].kind(), "fallback");
}

#[test]
fn parse_bindings_and_references() {
  let src = r#"
$r = [source:web_search]("news")
[messenger:send]("tg") { "body": "$r" }
"#;
  let p = parse(src).unwrap();
  assert_eq!(p.bindings.len(), 1);
  assert_eq!(p.bindings[0].name, "r");
  assert_eq!(
    p.bindings[0].step,
    Step::new("source", "web_search").with_target("news")
  );
  let send = p.steps().next().unwrap();
  assert_eq!(send.params["body"], json!("$r"));
}

#[test]
fn parse_undefined_variable_reports_line() {
  let err = parse("[system:time]\n[messenger:send]($who)").unwrap_err();
  assert_eq!(err.line, Some(2));
  assert!(err.message.contains("$who"));
}

#[test]
fn parse_forward_reference_is_error() {
  let src = "[messenger:send]($r)\n$r = [source:web_search](x)";
  assert!(parse(src).is_err());
}

#[test]
fn parse_binding_chain_and_self_reference() {
  assert!(parse("$a = [x:y](1)\n$b = [x:z]($a)\n[m:s]($b)").is_ok());
  assert!(parse("$a = [x:y]($a)").is_err());
}

#[test]
fn parse_reassignment_is_error() {
  let err = parse("$a = [x:y]\n$a = [x:z]").unwrap_err();
  assert_eq!(err.line, Some(2));
  assert!(err.message.contains("already assigned"));
}

#[test]
fn parse_binding_rhs_must_be_single_step() {
  assert!(parse("$a = [x:y] >> [x:z]").is_err());
  assert!(parse("$a = [x:y] & [x:z]").is_err());
  assert!(parse("$a = ").is_err());
  assert!(parse("$1a = [x:y]").is_err());
}

#[test]
fn parse_empty_segments_and_branches() {
  assert!(parse("[a:b] >> >> [c:d]").is_err());
  assert!(parse("[a:b] & ").is_err());
  assert!(parse(">> [a:b]").is_err());
}

#[test]
fn render_step_quotes_target() {
  let step = Step::new("system", "file")
    .with_target("out \"1\".md")
    .with_param("n", 2);
  assert_eq!(render_step(&step), r#"[system:file]("out \"1\".md") {"n":2}"#);
  assert_eq!(step.to_string(), render_step(&step));
}

#[test]
fn render_program_puts_bindings_first() {
  let program = Program {
    bindings: vec![Binding {
      name: "r".to_string(),
      step: Step::new("source", "web_search").with_target("news"),
    }],
    pipelines: vec![Pipeline::new(vec![
      Group::parallel([Step::new("a", "x"), Step::new("b", "y")]),
      Group::fallback([Step::new("c", "z"), Step::new("d", "w")]),
      Group::Single(Step::new("messenger", "send").with_param("body", "$r")),
    ])],
  };
  let text = render_program(&program);
  assert_eq!(
    text,
    "$r = [source:web_search](\"news\")\n[a:x] & [b:y] >> [c:z] ?? [d:w] >> [messenger:send] {\"body\":\"$r\"}"
  );
  assert_eq!(parse(&text).unwrap(), program);
}

fn ident() -> impl Strategy<Value = String> {
  "[a-z_][a-z0-9_]{0,7}"
}

fn target() -> impl Strategy<Value = Option<String>> {
  proptest::option::of("[ a-zA-Z0-9.,:/#()&?>{}\\[\\]\"\\\\'-]{0,12}")
}

fn leaf() -> impl Strategy<Value = Value> {
  prop_oneof![
    any::<i64>().prop_map(Value::from),
    any::<bool>().prop_map(Value::from),
    "[ a-z0-9#&?>(){}\"]{0,8}".prop_map(Value::from),
    Just(Value::Null),
  ]
}

fn params() -> impl Strategy<Value = Params> {
  proptest::collection::vec((ident(), leaf()), 0..3)
    .prop_map(|pairs| pairs.into_iter().collect::<Params>())
}

fn step() -> impl Strategy<Value = Step> {
  (ident(), ident(), target(), params()).prop_map(|(domain, action, target, params)| Step {
    domain,
    action,
    target,
    params,
  })
}

fn group() -> impl Strategy<Value = Group> {
  prop_oneof![
    3 => step().prop_map(Group::Single),
    1 => proptest::collection::vec(step(), 2..4).prop_map(Group::parallel),
    1 => proptest::collection::vec(step(), 2..4).prop_map(Group::fallback),
  ]
}

fn program(groups: BoxedStrategy<Group>) -> impl Strategy<Value = Program> {
  proptest::collection::vec(proptest::collection::vec(groups, 1..4), 1..4).prop_map(|pipelines| {
    Program {
      bindings: vec![],
      pipelines: pipelines.into_iter().map(Pipeline::new).collect(),
    }
  })
}

proptest! {
  #[test]
  fn render_then_parse_round_trips(p in program(group().boxed())) {
    let text = render_program(&p);
    let reparsed = parse(&text);
    prop_assert_eq!(reparsed, Ok(p));
  }

  #[test]
  fn statements_without_operators_parse_to_singles(p in program(step().prop_map(Group::Single).boxed())) {
    let parsed = parse(&render_program(&p)).unwrap();
    prop_assert_eq!(parsed.pipelines.len(), p.pipelines.len());
    for pipeline in &parsed.pipelines {
      prop_assert!(pipeline.groups.iter().all(Group::is_single));
    }
  }
}

#[test]
fn syntax_error_display_names_line_when_known() {
  let err = parse("[source:web_search](\"a\")\n[system:file](\"out.md\"").unwrap_err();
  assert_eq!(err.line, Some(2));
  assert!(err.to_string().starts_with("syntax error at line 2: "));
  assert_eq!(
    crate::error::SyntaxError::new("program is empty").to_string(),
    "syntax error: program is empty"
  );
  let text = err.to_string();
  let boxed: Box<dyn std::error::Error> = Box::new(err);
  assert_eq!(boxed.to_string(), text);
}
