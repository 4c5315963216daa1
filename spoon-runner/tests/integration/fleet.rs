// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use spoon_runner::{
    aggregator::compute_success,
    errors::FleetInitError,
    model::{DeviceExceptionKind, TestOutcomeStatus, TestSelector},
    runner::{FleetCoordinator, FleetState},
};

#[test]
fn one_failing_device_does_not_affect_the_others() {
    let workspace = Workspace::new();
    let tests = [test_id("LoginTest", "signIn"), test_id("LoginTest", "signOut")];
    let provider = FakeProvider::new([
        ("emulator-5554", DeviceScript::passing(&tests)),
        (
            "emulator-5556",
            DeviceScript {
                install: InstallBehavior::RejectApp,
                ..DeviceScript::passing(&tests)
            },
        ),
        ("emulator-5558", DeviceScript::passing(&tests)),
    ]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    let installed = fleet.init(Vec::new()).expect("fleet initialized");
    assert_eq!(installed, 2);
    fleet
        .run_tests(&TestSelector::All)
        .expect("initialized fleets can run");
    let outcome = fleet.finish().expect("fleet finished");

    let results = outcome.summary.results();
    assert_eq!(
        results.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["emulator-5554", "emulator-5556", "emulator-5558"]
    );

    let failed = &results["emulator-5556"];
    assert!(failed.install_failed());
    assert_eq!(
        failed.install_failure().map(|failure| failure.reason.as_str()),
        Some("Unable to install application APK.")
    );
    assert!(failed.test_results().is_empty());

    for key in ["emulator-5554", "emulator-5558"] {
        let result = &results[key];
        assert!(!result.install_failed(), "{key} installed");
        assert!(result.exceptions().is_empty(), "{key} has no exceptions");
        assert_eq!(result.test_results().len(), 2, "{key} ran both tests");
        assert!(
            result
                .test_results()
                .values()
                .all(|test| test.status() == TestOutcomeStatus::Pass)
        );
    }

    assert!(!outcome.success, "an install failure fails the run");
    assert_eq!(outcome.success, compute_success(&outcome.summary));
    for key in results.keys() {
        assert!(
            workspace
                .output_dir()
                .join("junit-reports")
                .join(format!("{key}.xml"))
                .is_file(),
            "JUnit report written for {key}"
        );
    }
}

#[test]
fn all_passing_devices_succeed() {
    let workspace = Workspace::new();
    let tests = [test_id("SearchTest", "query")];
    let provider = FakeProvider::new([
        ("192.168.1.5:5555", DeviceScript::passing(&tests)),
        ("emulator-5554", DeviceScript::passing(&tests)),
    ]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    fleet.init(Vec::new()).expect("fleet initialized");
    fleet.run_tests(&TestSelector::All).expect("tests run");
    let outcome = fleet.finish().expect("fleet finished");

    assert!(outcome.success);
    assert!(
        outcome.summary.results().contains_key("192_168_1_5_5555"),
        "results are keyed by sanitized serial"
    );
    assert_eq!(
        outcome.summary.results()["192_168_1_5_5555"].serial(),
        "192.168.1.5:5555"
    );
    assert!(
        !workspace.output_dir().join("work").exists(),
        "work directory is removed"
    );
}

#[test]
fn work_directory_kept_in_debug_mode() {
    let workspace = Workspace::new();
    let tests = [test_id("SearchTest", "query")];
    let provider = FakeProvider::new([(
        "emulator-5554",
        DeviceScript {
            capture_screenshots: true,
            ..DeviceScript::passing(&tests)
        },
    )]);
    let mut settings = workspace.settings();
    settings.debug = true;

    let mut fleet = FleetCoordinator::new(provider, settings).expect("coordinator created");
    fleet.init(Vec::new()).expect("fleet initialized");
    fleet.run_tests(&TestSelector::All).expect("tests run");
    fleet.finish().expect("fleet finished");

    assert!(workspace.output_dir().join("work/emulator-5554").is_dir());
}

#[test]
fn no_devices() {
    let workspace = Workspace::new();

    let mut settings = workspace.settings();
    settings.fail_if_no_device = true;
    let mut fleet =
        FleetCoordinator::new(FakeProvider::default(), settings).expect("coordinator created");
    let error = fleet.init(Vec::new()).expect_err("no devices is fatal");
    assert!(matches!(error, FleetInitError::NoDevices), "{error:?}");

    let mut fleet = FleetCoordinator::new(FakeProvider::default(), workspace.settings())
        .expect("coordinator created");
    assert_eq!(fleet.init(Vec::new()).expect("no devices is allowed"), 0);
    fleet.run_tests(&TestSelector::All).expect("nothing to run");
    let outcome = fleet.finish().expect("fleet finished");
    assert!(outcome.summary.results().is_empty());
    assert!(outcome.success);
}

#[test]
fn missing_artifact_is_fatal() {
    let workspace = Workspace::new();
    std::fs::remove_file(workspace.dir.path().join("app-test.apk")).expect("test apk removed");
    let provider = FakeProvider::new([("emulator-5554", DeviceScript::default())]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    let error = fleet.init(Vec::new()).expect_err("missing instrumentation APK");
    assert!(
        matches!(
            error,
            FleetInitError::MissingArtifact {
                kind: "instrumentation",
                ..
            }
        ),
        "{error:?}"
    );
}

#[test]
fn duplicate_serials_are_ignored() {
    let workspace = Workspace::new();
    let provider = FakeProvider::new([
        ("emulator-5554", DeviceScript::default()),
        ("emulator-5556", DeviceScript::default()),
    ]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    let installed = fleet
        .init(vec![
            "emulator-5556".to_owned(),
            "emulator-5554".to_owned(),
            "emulator-5556".to_owned(),
        ])
        .expect("fleet initialized");

    assert_eq!(installed, 2);
    assert_eq!(
        fleet.runners().map(|runner| runner.serial()).collect::<Vec<_>>(),
        vec!["emulator-5556", "emulator-5554"],
        "first-seen order"
    );
}

#[test]
fn output_directory_is_cleaned() {
    let workspace = Workspace::new();
    let stale = workspace.output_dir().join("image/old-device/stale.png");
    std::fs::create_dir_all(stale.parent().expect("has parent")).expect("stale dir created");
    std::fs::write(&stale, b"stale").expect("stale file written");

    let mut fleet = FleetCoordinator::new(FakeProvider::default(), workspace.settings())
        .expect("coordinator created");
    fleet.init(Vec::new()).expect("fleet initialized");

    assert!(!stale.exists());
    assert!(workspace.output_dir().is_dir());
}

#[test]
fn lifecycle_order_is_enforced() {
    let workspace = Workspace::new();
    let provider = FakeProvider::new([("emulator-5554", DeviceScript::default())]);
    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");

    let error = fleet
        .run_tests(&TestSelector::All)
        .expect_err("not initialized");
    assert_eq!(error.state(), FleetState::Created);

    fleet.init(Vec::new()).expect("fleet initialized");
    let error = fleet.init(Vec::new()).expect_err("already initialized");
    assert!(matches!(error, FleetInitError::State(_)), "{error:?}");

    let error = fleet.finish().err().expect("tests were never run");
    assert_eq!(error.state(), FleetState::Initialized);
}

#[test]
fn exceptions_without_results_fail_the_run() {
    let workspace = Workspace::new();
    let tests = [test_id("SearchTest", "query")];
    let provider = FakeProvider::new([
        (
            "emulator-5554",
            DeviceScript {
                instrumentation_error: Some("device disconnected"),
                ..Default::default()
            },
        ),
        ("emulator-5556", DeviceScript::passing(&tests)),
    ]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    fleet.init(Vec::new()).expect("fleet initialized");
    fleet.run_tests(&TestSelector::All).expect("tests run");
    let outcome = fleet.finish().expect("fleet finished");

    let broken = &outcome.summary.results()["emulator-5554"];
    assert_eq!(broken.exceptions()[0].kind, DeviceExceptionKind::Transport);
    assert!(broken.test_results().is_empty());
    assert!(!outcome.success);
}

#[test]
fn transport_fault_during_run_stays_on_its_device() {
    let workspace = Workspace::new();
    let tests = [test_id("LoginTest", "signIn"), test_id("LoginTest", "signOut")];
    let provider = FakeProvider::new([
        ("emulator-5554", DeviceScript::passing(&tests)),
        (
            "emulator-5556",
            DeviceScript {
                instrumentation_error: Some("device disconnected"),
                ..Default::default()
            },
        ),
        ("emulator-5558", DeviceScript::passing(&tests)),
    ]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    assert_eq!(fleet.init(Vec::new()).expect("fleet initialized"), 3);
    fleet.run_tests(&TestSelector::All).expect("tests run");
    let outcome = fleet.finish().expect("fleet finished");
    let results = outcome.summary.results();

    let broken = &results["emulator-5556"];
    assert!(!broken.install_failed());
    assert_eq!(broken.exceptions().len(), 1);
    assert_eq!(broken.exceptions()[0].kind, DeviceExceptionKind::Transport);
    assert!(
        broken.exceptions()[0].message.contains("device disconnected"),
        "{:?}",
        broken.exceptions()
    );
    assert!(broken.test_results().is_empty());

    for key in ["emulator-5554", "emulator-5558"] {
        let result = &results[key];
        assert!(result.exceptions().is_empty(), "{key} has no exceptions");
        assert_eq!(
            result
                .test_results()
                .iter()
                .map(|(test, result)| (test.clone(), result.status()))
                .collect::<Vec<_>>(),
            tests
                .iter()
                .map(|test| (test.clone(), TestOutcomeStatus::Pass))
                .collect::<Vec<_>>(),
            "{key} passed both tests"
        );
    }

    assert!(!outcome.success, "the faulted device fails the run");
}

#[test]
fn shell_commands_fan_out_to_installed_devices() {
    let workspace = Workspace::new();
    let provider = FakeProvider::new([
        (
            "emulator-5554",
            DeviceScript {
                shell_output: "Success",
                ..Default::default()
            },
        ),
        (
            "emulator-5556",
            DeviceScript {
                shell_output: "Failed",
                ..Default::default()
            },
        ),
        (
            "emulator-5558",
            DeviceScript {
                install: InstallBehavior::Offline,
                ..Default::default()
            },
        ),
    ]);

    let mut fleet =
        FleetCoordinator::new(provider, workspace.settings()).expect("coordinator created");
    assert_eq!(fleet.init(Vec::new()).expect("fleet initialized"), 2);

    assert_eq!(fleet.clear_data(APP_PACKAGE), 1, "one device reports failure");
    assert_eq!(fleet.force_stop(APP_PACKAGE), 2);

    let runner = fleet
        .runners()
        .find(|runner| runner.serial() == "emulator-5558")
        .expect("offline device has a runner");
    let calls = runner.transport().calls();
    assert!(
        calls.lock().expect("lock not poisoned").shell.is_empty(),
        "install-failed devices are skipped"
    );
}
