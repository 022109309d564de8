use super::*;
use crate::action::Action;
use serde_json::json;

fn parser() -> CommandArgumentParser {
    CommandArgumentParser::new()
}

fn tokens(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test]
fn help_argument_is_preregistered() {
    let parser = parser();
    assert!(parser.get_argument("help").is_some());
}

#[test]
fn dest_derived_from_long_flag() {
    let mut parser = parser();
    parser
        .add_argument(ArgumentSpec::new(["-d", "--dry-run"]).action(ArgumentAction::StoreTrue))
        .unwrap();
    assert!(parser.get_argument("dry_run").is_some());
}

#[test]
fn duplicate_dest_rejected() {
    let mut parser = parser();
    parser.add_argument(ArgumentSpec::positional("target")).unwrap();
    let err = parser
        .add_argument(ArgumentSpec::new(["--target"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateDest(_)));
}

#[test]
fn duplicate_flag_rejected() {
    let mut parser = parser();
    parser.add_argument(ArgumentSpec::new(["-v", "--verbose"])).unwrap();
    let err = parser
        .add_argument(ArgumentSpec::new(["-v"]).dest("volume"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateFlag { .. }));
}

#[test]
fn positional_cannot_have_multiple_flags() {
    let mut parser = parser();
    let err = parser
        .add_argument(ArgumentSpec::new(["files", "-f"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::PositionalFlagCount));
}

#[test]
fn flag_shapes_validated() {
    let mut parser = parser();
    assert!(matches!(
        parser.add_argument(ArgumentSpec::new(["-ab"])).unwrap_err(),
        ConfigError::BadShortFlag(_)
    ));
    assert!(matches!(
        parser.add_argument(ArgumentSpec::new(["--x"])).unwrap_err(),
        ConfigError::LongFlagTooShort(_)
    ));
}

#[test]
fn numeric_flag_rejected_via_dest_rules() {
    let mut parser = parser();
    let err = parser
        .add_argument(ArgumentSpec::new(["-1"]).value_type(ValueType::Int))
        .unwrap_err();
    assert!(matches!(err, ConfigError::DestStartsWithDigit(_)));
}

#[test]
fn toggle_actions_forbid_nargs_and_positional_use() {
    let mut parser = parser();
    assert!(matches!(
        parser
            .add_argument(
                ArgumentSpec::new(["--flag"])
                    .action(ArgumentAction::StoreTrue)
                    .nargs(Nargs::Exact(2))
            )
            .unwrap_err(),
        ConfigError::NargsNotAllowed(_)
    ));
    assert!(matches!(
        parser
            .add_argument(ArgumentSpec::positional("flag").action(ArgumentAction::Count))
            .unwrap_err(),
        ConfigError::ActionNotPositional(_)
    ));
}

#[test]
fn store_bool_optional_requires_single_long_flag() {
    let mut parser = parser();
    assert!(matches!(
        parser
            .add_argument(ArgumentSpec::new(["-d"]).action(ArgumentAction::StoreBoolOptional))
            .unwrap_err(),
        ConfigError::BoolOptionalFlags
    ));
    assert!(matches!(
        parser
            .add_argument(
                ArgumentSpec::new(["--debug", "-d"]).action(ArgumentAction::StoreBoolOptional)
            )
            .unwrap_err(),
        ConfigError::BoolOptionalFlags
    ));
}

#[test]
fn store_bool_optional_registers_negative_flag() {
    let mut parser = parser();
    parser
        .add_argument(ArgumentSpec::new(["--debug"]).action(ArgumentAction::StoreBoolOptional))
        .unwrap();
    let err = parser
        .add_argument(ArgumentSpec::new(["--debug"]).action(ArgumentAction::StoreTrue))
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateDest(_)));
}

#[test]
fn resolver_validation() {
    let mut parser = parser();
    assert!(matches!(
        parser
            .add_argument(ArgumentSpec::new(["--lookup"]).action(ArgumentAction::Action))
            .unwrap_err(),
        ConfigError::ResolverRequired
    ));
    let resolver = std::sync::Arc::new(Action::new("noop", |_| async { Ok(json!(null)) }));
    assert!(matches!(
        parser
            .add_argument(ArgumentSpec::new(["--value"]).resolver(resolver))
            .unwrap_err(),
        ConfigError::ResolverNotAllowed(_)
    ));
}

#[test]
fn defaults_validated_against_type_and_choices() {
    let mut parser = parser();
    assert!(matches!(
        parser
            .add_argument(
                ArgumentSpec::new(["--count"])
                    .value_type(ValueType::Int)
                    .default("not-a-number")
            )
            .unwrap_err(),
        ConfigError::BadDefault { .. }
    ));
    assert!(matches!(
        parser
            .add_argument(
                ArgumentSpec::new(["--env"])
                    .choices(["dev", "prod"])
                    .default("staging")
            )
            .unwrap_err(),
        ConfigError::DefaultNotInChoices { .. }
    ));
    assert!(matches!(
        parser
            .add_argument(
                ArgumentSpec::new(["--port"])
                    .value_type(ValueType::Int)
                    .choices(["eighty"])
            )
            .unwrap_err(),
        ConfigError::BadChoice { .. }
    ));
}

#[test]
fn required_inference_for_positionals() {
    let mut parser = parser();
    parser.add_argument(ArgumentSpec::positional("one")).unwrap();
    parser
        .add_argument(ArgumentSpec::positional("many").nargs(Nargs::ZeroOrMore))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::positional("maybe").nargs(Nargs::Optional))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::positional("plus").nargs(Nargs::OneOrMore))
        .unwrap();

    assert!(parser.get_argument("one").unwrap().required);
    assert!(!parser.get_argument("many").unwrap().required);
    assert!(!parser.get_argument("maybe").unwrap().required);
    assert!(parser.get_argument("plus").unwrap().required);
}

#[tokio::test]
async fn count_action_accumulates() {
    let mut parser = parser();
    parser
        .add_argument(ArgumentSpec::new(["-v", "--verbose"]).action(ArgumentAction::Count))
        .unwrap();
    let parsed = parser
        .parse_args(&tokens(&["-v", "-v", "-v"]))
        .await
        .unwrap();
    assert_eq!(parsed["verbose"], json!(3));
}

#[tokio::test]
async fn negative_numbers_parse_as_values() {
    let mut parser = parser();
    parser
        .add_argument(
            ArgumentSpec::new(["--number"])
                .value_type(ValueType::Int)
                .required(true),
        )
        .unwrap();
    let parsed = parser.parse_args(&tokens(&["--number", "-42"])).await.unwrap();
    assert_eq!(parsed["number"], json!(-42));
}

#[tokio::test]
async fn help_flag_raises_signal() {
    let parser = parser();
    let err = parser.parse_args(&tokens(&["--help"])).await.unwrap_err();
    assert!(err.is_help());
}

#[tokio::test]
async fn unknown_flag_suggests_prefix_matches() {
    let mut parser = parser();
    parser.add_argument(ArgumentSpec::new(["--tag"])).unwrap();
    let err = parser.parse_args(&tokens(&["--ta"])).await.unwrap_err();
    match err {
        ParseError::UnknownOptionSuggest { suggestions, .. } => {
            assert_eq!(suggestions, vec!["--tag".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn suggest_next_flags_and_choices() {
    let mut parser = parser();
    parser
        .add_argument(ArgumentSpec::new(["--tag"]).choices(["analytics", "build"]))
        .unwrap();

    let mut all = parser.suggest_next(&tokens(&[""]));
    all.sort();
    assert_eq!(all, vec!["--help", "--tag", "-h"]);

    assert_eq!(parser.suggest_next(&tokens(&["--ta"])), vec!["--tag"]);

    let mut choices = parser.suggest_next(&tokens(&["--tag"]));
    choices.sort();
    assert_eq!(choices, vec!["analytics", "build"]);
}

#[test]
fn usage_line_covers_flags_and_positionals() {
    let mut parser = CommandArgumentParser::for_command("D", "deploy something");
    parser
        .add_argument(ArgumentSpec::new(["--env"]).choices(["dev", "prod"]))
        .unwrap();
    parser
        .add_argument(ArgumentSpec::positional("service").nargs(Nargs::Exact(2)))
        .unwrap();
    let usage = parser.get_usage();
    assert!(usage.starts_with("D "));
    assert!(usage.contains("[--help]") || usage.contains("[-h]"));
    assert!(usage.contains("{dev,prod}"));
    assert!(usage.contains("service service"));
}

#[test]
fn help_lines_do_not_mutate_state() {
    let mut parser = parser();
    parser
        .add_argument(ArgumentSpec::new(["--env"]).choices(["dev", "prod"]).help("environment"))
        .unwrap();
    let before = parser.help_lines();
    let after = parser.help_lines();
    assert_eq!(before, after);
    assert!(before.iter().any(|line| line.contains("environment")));
}
