//! Behaviour-driven step definitions driving the registry CLI scenarios.

use super::helpers::{utf8_workspace, write_payload};
use super::*;
use crate::apply::TrialReport;
use crate::create::CreateReport;
use camino::Utf8PathBuf;
use onestop_core::{
    ChangesetId,
    test_support::{operator, route, stop},
};
use onestop_store::ApplyError;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::{Cell, RefCell};
use tempfile::TempDir;

#[derive(Debug)]
struct CommandWorld {
    _tmp: TempDir,
    database: Utf8PathBuf,
    payload: Utf8PathBuf,
    changeset_id: Cell<Option<ChangesetId>>,
    stdout: RefCell<Vec<u8>>,
    result: RefCell<Option<Result<(), CliError>>>,
}

impl CommandWorld {
    fn new() -> Self {
        let (tmp, root) = utf8_workspace();
        Self {
            _tmp: tmp,
            database: root.join("data/registry.db"),
            payload: root.join("payload.json"),
            changeset_id: Cell::new(None),
            stdout: RefCell::new(Vec::new()),
            result: RefCell::new(None),
        }
    }

    fn changeset_argv(&self, command: &str) -> Vec<String> {
        let id = self.changeset_id.get().expect("changeset created");
        vec![
            "onestop".to_owned(),
            command.to_owned(),
            id.to_string(),
            format!("--{ARG_DATABASE}"),
            self.database.as_str().to_owned(),
        ]
    }

    fn run(&self, argv: Vec<String>) {
        let mut buffer = self.stdout.borrow_mut();
        buffer.clear();
        let parsed = Cli::try_parse_from(argv).map_err(CliError::from);
        let outcome = parsed.and_then(|cli| match cli.command {
            Command::Create(args) => crate::create::run_create_with(args, &mut *buffer),
            Command::Apply(args) => crate::apply::run_apply_with(args, &mut *buffer),
            Command::Trial(args) => crate::apply::run_trial_with(args, &mut *buffer),
        });
        self.result.replace(Some(outcome));
    }

    fn stdout_json<T: serde::de::DeserializeOwned>(&self) -> T {
        let stdout = String::from_utf8(self.stdout.borrow().clone()).expect("stdout utf-8");
        serde_json::from_str(&stdout).expect("output should be JSON")
    }

    fn expect_success(&self) {
        let borrowed = self.result.borrow();
        let result = borrowed.as_ref().expect("result recorded");
        if let Err(err) = result {
            panic!("expected success, found {err:?}");
        }
    }
}

#[fixture]
fn world() -> CommandWorld {
    CommandWorld::new()
}

#[given("a change payload with a stop and an operator")]
fn payload_with_stop_and_operator(#[from(world)] world: &CommandWorld) {
    write_payload(
        &world.payload,
        vec![
            stop("s-9q9-richmond", -122.353, 37.936),
            operator("o-9q9-bart"),
        ],
    );
}

#[given("a change payload with a route whose operator is missing")]
fn payload_with_dangling_route(#[from(world)] world: &CommandWorld) {
    write_payload(&world.payload, vec![route("r-9q9-red", "o-9q9-missing")]);
}

#[when("I run the create command")]
fn run_create_command(#[from(world)] world: &CommandWorld) {
    world.run(vec![
        "onestop".to_owned(),
        "create".to_owned(),
        world.payload.as_str().to_owned(),
        format!("--{ARG_DATABASE}"),
        world.database.as_str().to_owned(),
        format!("--{ARG_NOTES}"),
        "imported from the command line".to_owned(),
    ]);
    let succeeded = matches!(world.result.borrow().as_ref(), Some(Ok(())));
    if succeeded {
        let report: CreateReport = world.stdout_json();
        assert_eq!(report.payload_count, 1);
        world.changeset_id.set(Some(report.changeset_id));
    }
}

#[when("I run the trial command")]
fn run_trial_command(#[from(world)] world: &CommandWorld) {
    world.run(world.changeset_argv("trial"));
}

#[when("I run the apply command")]
fn run_apply_command(#[from(world)] world: &CommandWorld) {
    world.run(world.changeset_argv("apply"));
}

#[then("the trial reports success without applying the changeset")]
fn trial_reports_success(#[from(world)] world: &CommandWorld) {
    world.expect_success();
    let report: TrialReport = world.stdout_json();
    assert!(report.would_succeed);
    assert!(report.failure.is_none());

    let id = world.changeset_id.get().expect("changeset created");
    let registry = open_registry(&world.database, onestop_core::ApplyConfig::default())
        .expect("reopen registry");
    let changeset = registry
        .changeset(id)
        .expect("load changeset")
        .expect("changeset exists");
    assert!(!changeset.applied);
}

#[then("the apply command prints the touched entities")]
fn apply_prints_touched_entities(#[from(world)] world: &CommandWorld) {
    world.expect_success();
    let outcome: serde_json::Value = world.stdout_json();
    assert_eq!(outcome["touchedEntities"], 2);
    assert_eq!(
        outcome["changesetId"],
        world.changeset_id.get().expect("changeset created")
    );
}

#[then("the trial reports the failure")]
fn trial_reports_failure(#[from(world)] world: &CommandWorld) {
    world.expect_success();
    let report: TrialReport = world.stdout_json();
    assert!(!report.would_succeed);
    let failure = report.failure.expect("failure recorded");
    assert!(
        failure.contains("o-9q9-missing"),
        "unexpected failure text {failure}"
    );
}

#[then("the command fails because the changeset was already applied")]
fn command_fails_already_applied(#[from(world)] world: &CommandWorld) {
    let borrowed = world.result.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::Apply(source) => assert!(
            matches!(**source, ApplyError::AlreadyApplied { .. }),
            "unexpected apply error {source:?}"
        ),
        other => panic!("expected Apply, found {other:?}"),
    }
}

#[then("the command fails because the payload file is missing")]
fn command_fails_missing_payload(#[from(world)] world: &CommandWorld) {
    let borrowed = world.result.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingSourceFile { field, .. } => assert_eq!(*field, ARG_CREATE_PAYLOAD),
        other => panic!("expected MissingSourceFile, found {other:?}"),
    }
}

macro_rules! register_command_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/commands.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: CommandWorld) {
            let _ = world;
        }
    };
}

register_command_scenario!(
    create_trial_apply,
    "creating, trying and applying a changeset"
);
register_command_scenario!(
    trial_dangling_reference,
    "trying a changeset with a dangling reference"
);
register_command_scenario!(apply_twice, "applying a changeset twice");
register_command_scenario!(missing_payload, "rejecting a missing payload file");
