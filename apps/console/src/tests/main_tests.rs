use clap::CommandFactory;

use super::*;

#[test]
fn cli_definition_is_consistent() {
    Args::command().debug_assert();
}

#[test]
fn mappings_split_on_the_first_equals_sign() {
    assert_eq!(
        parse_mapping(" description = Body=Text ").expect("mapping"),
        ("description".to_string(), "Body=Text".to_string())
    );
    assert!(parse_mapping("description").is_err());
}

#[test]
fn schema_mapping_command_collects_repeated_maps() {
    let args = Args::try_parse_from([
        "triage-console",
        "create-schema-mapping",
        "--name",
        "Zendesk",
        "--source-type",
        "csv",
        "--map",
        "description=Body",
        "--map",
        "category=Group",
    ])
    .expect("parse");

    match args.command {
        Command::CreateSchemaMapping {
            name,
            source_type,
            mappings,
        } => {
            assert_eq!(name, "Zendesk");
            assert_eq!(source_type, SchemaSourceType::Csv);
            assert_eq!(
                mappings,
                vec![
                    ("description".to_string(), "Body".to_string()),
                    ("category".to_string(), "Group".to_string()),
                ]
            );
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn global_flags_are_accepted_after_the_subcommand() {
    let cluster = ClusterId::new();
    let cluster_arg = cluster.to_string();
    let args = Args::try_parse_from([
        "triage-console",
        "reject",
        cluster_arg.as_str(),
        "--reason",
        "duplicate",
        "--api-url",
        "http://localhost:9000",
        "--email",
        "po@example.com",
    ])
    .expect("parse");

    assert_eq!(args.api_url.as_deref(), Some("http://localhost:9000"));
    assert_eq!(args.email.as_deref(), Some("po@example.com"));
    assert!(matches!(
        args.command,
        Command::Reject { ref id, ref reason } if *id == cluster && reason == "duplicate"
    ));
}

#[test]
fn typed_arguments_are_validated_by_the_parser() {
    assert!(Args::try_parse_from(["triage-console", "cluster", " "]).is_err());
    let args = Args::try_parse_from(["triage-console", "cluster", "cl_42"]).expect("opaque id");
    assert!(matches!(args.command, Command::Cluster { ref id } if id.as_str() == "cl_42"));
    let assessment_arg = AssessmentId::new().to_string();
    assert!(Args::try_parse_from([
        "triage-console",
        "feedback",
        assessment_arg.as_str(),
        "--rating",
        "meh",
    ])
    .is_err());

    let args = Args::try_parse_from(["triage-console", "clusters", "--status", "pending"])
        .expect("parse");
    assert!(matches!(
        args.command,
        Command::Clusters {
            status: Some(ClusterStatus::Pending)
        }
    ));
}
