use std::sync::Arc;

use runbook_rs::prelude::*;
use serde_json::json;

fn tokens(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn append_with_nargs_groups_values() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(
            ArgumentSpec::new(["--item"])
                .action(ArgumentAction::Append)
                .nargs(Nargs::Exact(2)),
        )
        .unwrap();

    let parsed = parser
        .parse_args(&tokens(&["--item", "a", "b", "--item", "c", "d"]))
        .await
        .unwrap();
    assert_eq!(parsed["item"], json!([["a", "b"], ["c", "d"]]));
}

#[tokio::test]
async fn store_bool_optional_three_states() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(ArgumentSpec::new(["--debug"]).action(ArgumentAction::StoreBoolOptional))
        .unwrap();

    let parsed = parser.parse_args(&[]).await.unwrap();
    assert_eq!(parsed["debug"], json!(null));

    let parsed = parser.parse_args(&tokens(&["--debug"])).await.unwrap();
    assert_eq!(parsed["debug"], json!(true));

    let parsed = parser.parse_args(&tokens(&["--no-debug"])).await.unwrap();
    assert_eq!(parsed["debug"], json!(false));
}

#[tokio::test]
async fn positional_greediness_reserves_for_later_specs() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(ArgumentSpec::positional("files").nargs(Nargs::OneOrMore))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::positional("mode").choices(["edit", "view"]))
        .unwrap();

    let parsed = parser
        .parse_args(&tokens(&["a", "b", "c", "edit"]))
        .await
        .unwrap();
    assert_eq!(parsed["files"], json!(["a", "b", "c"]));
    assert_eq!(parsed["mode"], json!("edit"));

    let parsed = parser.parse_args(&tokens(&["a", "edit"])).await.unwrap();
    assert_eq!(parsed["files"], json!(["a"]));
    assert_eq!(parsed["mode"], json!("edit"));

    let err = parser.parse_args(&[]).await.unwrap_err();
    assert!(matches!(err, ParseError::MissingRequired { .. }));
}

#[tokio::test]
async fn defaulted_trailing_positional_gives_way() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(ArgumentSpec::positional("files").nargs(Nargs::OneOrMore))
        .unwrap();
    parser
        .add_argument(
            ArgumentSpec::positional("mode")
                .choices(["edit", "view"])
                .default("edit"),
        )
        .unwrap();

    let parsed = parser.parse_args(&tokens(&["a", "b", "c"])).await.unwrap();
    assert_eq!(parsed["files"], json!(["a", "b", "c"]));
    assert_eq!(parsed["mode"], json!("edit"));
}

#[tokio::test]
async fn nargs_store_variants() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(ArgumentSpec::new(["-a", "--alpha"]).nargs(Nargs::Exact(2)))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::new(["-b", "--beta"]).nargs(Nargs::OneOrMore))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::new(["-c", "--charlie"]).nargs(Nargs::ZeroOrMore))
        .unwrap();

    let parsed = parser
        .parse_args(&tokens(&["-a", "one", "two"]))
        .await
        .unwrap();
    assert_eq!(parsed["alpha"], json!(["one", "two"]));

    let parsed = parser
        .parse_args(&tokens(&["-b", "x", "y", "z"]))
        .await
        .unwrap();
    assert_eq!(parsed["beta"], json!(["x", "y", "z"]));

    let parsed = parser.parse_args(&tokens(&["-c"])).await.unwrap();
    assert_eq!(parsed["charlie"], json!([]));

    assert!(parser.parse_args(&tokens(&["-a", "one"])).await.is_err());
    assert!(parser.parse_args(&tokens(&["-a"])).await.is_err());
    assert!(
        parser
            .parse_args(&tokens(&["-a", "1", "2", "3"]))
            .await
            .is_err()
    );
    assert!(parser.parse_args(&tokens(&["-b"])).await.is_err());
}

#[tokio::test]
async fn posix_bundling_expands_short_toggles() {
    let mut parser = CommandArgumentParser::new();
    for flag in ["-a", "-b", "-c"] {
        parser
            .add_argument(ArgumentSpec::new([flag]).action(ArgumentAction::StoreTrue))
            .unwrap();
    }

    let parsed = parser.parse_args(&tokens(&["-abc"])).await.unwrap();
    assert_eq!(parsed["a"], json!(true));
    assert_eq!(parsed["b"], json!(true));
    assert_eq!(parsed["c"], json!(true));
}

#[tokio::test]
async fn posix_bundling_fails_whole_token_on_unknown_letter() {
    let mut parser = CommandArgumentParser::new();
    for flag in ["-a", "-b"] {
        parser
            .add_argument(ArgumentSpec::new([flag]).action(ArgumentAction::StoreTrue))
            .unwrap();
    }

    let err = parser.parse_args(&tokens(&["-abz"])).await.unwrap_err();
    assert!(err.to_string().contains("-z"));
}

#[tokio::test]
async fn resolver_value_stored_verbatim() {
    let resolver: ActionRef = Arc::new(Action::new("upper", |inv| async move {
        let raw = inv
            .args
            .first()
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_uppercase();
        Ok(json!({ "resolved": raw }))
    }));

    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(
            ArgumentSpec::new(["--lookup"])
                .action(ArgumentAction::Action)
                .resolver(resolver),
        )
        .unwrap();

    let parsed = parser
        .parse_args(&tokens(&["--lookup", "abc"]))
        .await
        .unwrap();
    assert_eq!(parsed["lookup"], json!({ "resolved": "ABC" }));
}

#[tokio::test]
async fn lazy_resolver_skipped_during_validation() {
    let resolver: ActionRef = Arc::new(Action::new("explodes", |_| async {
        Err(ActionError::failure("must not run"))
    }));

    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(
            ArgumentSpec::new(["--lookup"])
                .action(ArgumentAction::Action)
                .resolver(resolver)
                .lazy_resolver(true)
                .required(true),
        )
        .unwrap();

    // Validation-only parse neither runs nor requires the lazy resolver.
    parser
        .parse_args_for_validation(&tokens(&["--lookup", "x"]))
        .await
        .unwrap();
    parser.parse_args_for_validation(&[]).await.unwrap();

    // A real parse runs it and surfaces the failure.
    let err = parser
        .parse_args(&tokens(&["--lookup", "x"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ParseError::ResolverFailed { .. }));
}

#[tokio::test]
async fn extra_positionals_are_rejected() {
    let mut parser = CommandArgumentParser::new();
    parser.add_argument(ArgumentSpec::positional("only")).unwrap();

    let err = parser
        .parse_args(&tokens(&["one", "surplus"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ParseError::ExtraPositionals { .. }));
}

#[tokio::test]
async fn parsing_is_deterministic() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(ArgumentSpec::positional("files").nargs(Nargs::OneOrMore))
        .unwrap();
    parser
        .add_argument(
            ArgumentSpec::new(["--tag"])
                .action(ArgumentAction::Append)
                .nargs(Nargs::Exact(2)),
        )
        .unwrap();

    let input = tokens(&["a", "b", "--tag", "k", "v", "--tag", "k2", "v2"]);
    let first = parser.parse_args(&input).await.unwrap();
    let second = parser.parse_args(&input).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn split_round_trip_preserves_semantics() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(ArgumentSpec::positional("service"))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::new(["--env"]).choices(["dev", "prod"]))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::new(["--force"]).action(ArgumentAction::StoreTrue))
        .unwrap();

    let input = tokens(&["api", "--env", "prod", "--force"]);
    let (positional, keywords) = parser.parse_args_split(&input).await.unwrap();
    assert_eq!(positional, vec![json!("api")]);
    assert_eq!(keywords["env"], json!("prod"));
    assert_eq!(keywords["force"], json!(true));

    // Reconstruct an equivalent command line (flag order is free) and
    // reparse: the result map is identical.
    let rebuilt = tokens(&["--force", "--env", "prod", "api"]);
    let reparsed = parser.parse_args(&rebuilt).await.unwrap();
    let original = parser.parse_args(&input).await.unwrap();
    assert_eq!(reparsed, original);
}

#[tokio::test]
async fn extend_flattens_values() {
    let mut parser = CommandArgumentParser::new();
    parser
        .add_argument(
            ArgumentSpec::new(["--point"])
                .action(ArgumentAction::Extend)
                .nargs(Nargs::Exact(2))
                .value_type(ValueType::Int),
        )
        .unwrap();

    let parsed = parser
        .parse_args(&tokens(&["--point", "1", "2", "--point", "3", "4"]))
        .await
        .unwrap();
    assert_eq!(parsed["point"], json!([1, 2, 3, 4]));

    let err = parser
        .parse_args(&tokens(&["--point", "1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ParseError::CountMismatch { .. }));
}
