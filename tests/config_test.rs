//! Config parsing and catalog loading integration tests

use clap::Parser;
use std::io::Write;

use achievement_engine::{config::Args, counters, Catalog, ContextSnapshot, EngineError};

#[test]
fn test_cli_overrides() {
    let args = Args::try_parse_from([
        "achievement-engine",
        "--xp-flush-delay-ms",
        "500",
        "--team-debounce-ms",
        "250",
        "--dedup-window-secs",
        "30",
        "--log-json",
    ])
    .expect("valid args");

    assert!(args.validate().is_ok());
    assert!(args.log_json);

    let config = args.engine_config();
    assert_eq!(config.xp_flush_delay.as_millis(), 500);
    assert_eq!(config.team_debounce.as_millis(), 250);
    assert_eq!(config.dedup_window.as_secs(), 30);
}

#[test]
fn test_day_offset_out_of_range() {
    let args = Args::try_parse_from(["achievement-engine", "--day-offset-minutes", "1440"])
        .expect("valid args");
    assert!(args.validate().is_err());
}

#[test]
fn test_team_catalog_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"
[[achievements]]
id = "pipeline-builder"
name = "Pipeline Builder"
description = "Add 10 contacts and log 5 meetings"
xp_reward = 150

[achievements.criterion]
all = [
    {{ at_least = {{ counter = "contactsAdded", value = 10.0 }} }},
    {{ at_least = {{ counter = "meetingsLogged", value = 5.0 }} }},
]
"#
    )
    .expect("write catalog");

    let args = Args::try_parse_from([
        "achievement-engine",
        "--team-catalog",
        file.path().to_str().expect("utf-8 path"),
    ])
    .expect("valid args");

    let (user, team) = args.load_catalogs().expect("catalogs load");
    assert_eq!(user.len(), Catalog::user_defaults().len());
    assert_eq!(team.len(), 1);

    let def = team.get("pipeline-builder").expect("definition present");
    assert_eq!(def.xp_reward, 150);

    let partial = ContextSnapshot::new().with(counters::CONTACTS_ADDED, 12.0);
    assert!(!def.criterion.matches(&partial));
    assert!(def.criterion.matches(&partial.with(counters::MEETINGS_LOGGED, 5.0)));
}

#[test]
fn test_missing_catalog_file() {
    let args = Args::try_parse_from([
        "achievement-engine",
        "--user-catalog",
        "/nonexistent/catalog.toml",
    ])
    .expect("valid args");

    assert!(matches!(args.load_catalogs(), Err(EngineError::Catalog(_))));
}
