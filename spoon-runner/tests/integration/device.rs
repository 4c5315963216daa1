// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use pretty_assertions::assert_eq;
use spoon_runner::{
    events::LifecycleEvent,
    model::{
        DeviceExceptionKind, DeviceLogs, DeviceResult, LogMessage, LogPriority, TestOutcomeStatus,
        TestSelector,
    },
    runner::{DeviceRunner, DeviceRunnerState, RunStatus},
    transport::InstallOptions,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

const SERIAL: &str = "emulator-5554";

fn run_device(workspace: &Workspace, script: DeviceScript) -> DeviceResult {
    run_device_with(workspace, script, Duration::from_secs(30), &TestSelector::All).1
}

fn run_device_with(
    workspace: &Workspace,
    script: DeviceScript,
    max_silence: Duration,
    selector: &TestSelector,
) -> (RunStatus, DeviceResult) {
    let transport = FakeTransport::new(SERIAL, script);
    let settings = Arc::new(workspace.settings_with_silence(max_silence));
    let mut runner = DeviceRunner::new(SERIAL, SERIAL, transport, settings);

    current_thread_runtime().block_on(async {
        assert!(runner.install(InstallOptions::default()).await);
        let status = runner.run(selector).await.expect("installed devices can run");
        let result = runner.finish().await.expect("run devices can finish");
        assert_eq!(runner.state(), DeviceRunnerState::Finished);
        (status, result)
    })
}

fn gif_frame_count(path: &Utf8Path) -> usize {
    let file = std::fs::File::open(path).expect("GIF opened");
    let mut decoder = gif::DecodeOptions::new()
        .read_info(file)
        .expect("GIF header is valid");
    let mut frames = 0;
    while decoder.read_next_frame().expect("frame decodes").is_some() {
        frames += 1;
    }
    frames
}

#[test]
fn three_screenshots_make_a_gif() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let script = DeviceScript {
        device_screenshots: vec![
            (test.clone(), "3_submitted.png"),
            (test.clone(), "1_empty.png"),
            (test.clone(), "2_typed.png"),
        ],
        ..DeviceScript::passing(std::slice::from_ref(&test))
    };

    let result = run_device(&workspace, script);

    let class_dir = workspace
        .output_dir()
        .join("image")
        .join(SERIAL)
        .join("com.example.LoginTest");
    let test_result = &result.test_results()[&test];
    assert_eq!(test_result.status(), TestOutcomeStatus::Pass);
    assert_eq!(
        test_result.screenshots(),
        &[
            class_dir.join("signIn/1_empty.png"),
            class_dir.join("signIn/2_typed.png"),
            class_dir.join("signIn/3_submitted.png"),
        ][..]
    );
    for screenshot in test_result.screenshots() {
        assert!(screenshot.is_file(), "{screenshot} copied into place");
    }

    let gif = class_dir.join("signIn.gif");
    assert_eq!(test_result.animated_gif(), Some(gif.as_path()));
    assert_eq!(gif_frame_count(&gif), 3);
}

#[test]
fn one_screenshot_makes_no_gif() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let script = DeviceScript {
        device_screenshots: vec![(test.clone(), "1_only.png")],
        ..DeviceScript::passing(std::slice::from_ref(&test))
    };

    let result = run_device(&workspace, script);

    let test_result = &result.test_results()[&test];
    assert_eq!(test_result.screenshots().len(), 1);
    assert_eq!(test_result.animated_gif(), None);
    assert!(
        !workspace
            .output_dir()
            .join("image")
            .join(SERIAL)
            .join("com.example.LoginTest/signIn.gif")
            .exists()
    );
}

#[test]
fn orphaned_screenshots_are_dropped() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let orphan = test_id("LoginTest", "neverRan");
    let script = DeviceScript {
        device_screenshots: vec![(orphan.clone(), "1_orphan.png"), (orphan, "2_orphan.png")],
        ..DeviceScript::passing(std::slice::from_ref(&test))
    };

    let result = run_device(&workspace, script);

    assert_eq!(result.test_results().len(), 1);
    assert!(result.test_results()[&test].screenshots().is_empty());
    assert!(
        result.exceptions().is_empty(),
        "orphans are not device exceptions"
    );
}

#[test]
fn captured_screenshot_follows_pulled_ones() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let script = DeviceScript {
        capture_screenshots: true,
        device_screenshots: vec![(test.clone(), "1_empty.png")],
        ..DeviceScript::passing(std::slice::from_ref(&test))
    };

    let result = run_device(&workspace, script);

    let test_result = &result.test_results()[&test];
    assert_eq!(test_result.screenshots().len(), 2);
    assert_eq!(
        test_result.screenshots()[0].file_name(),
        Some("1_empty.png")
    );
    assert!(
        test_result.screenshots()[1]
            .as_str()
            .ends_with("_test-ended.png"),
        "captured on end: {}",
        test_result.screenshots()[1]
    );
    assert!(test_result.animated_gif().is_some());
}

#[test]
fn failure_reported_before_start() {
    let workspace = Workspace::new();
    let a = test_id("LoginTest", "signIn");
    let b = test_id("LoginTest", "signOut");
    let script = DeviceScript {
        events: vec![
            LifecycleEvent::Failed {
                test: a.clone(),
                trace: "java.lang.AssertionError".to_owned(),
            },
            LifecycleEvent::Ended {
                test: a.clone(),
                metrics: BTreeMap::new(),
            },
            LifecycleEvent::Started { test: b.clone() },
            LifecycleEvent::Failed {
                test: b.clone(),
                trace: "java.lang.IllegalStateException".to_owned(),
            },
            LifecycleEvent::Ended {
                test: b.clone(),
                metrics: BTreeMap::new(),
            },
        ],
        ..Default::default()
    };

    let result = run_device(&workspace, script);

    let a_result = &result.test_results()[&a];
    assert_eq!(a_result.status(), TestOutcomeStatus::Fail);
    assert_eq!(a_result.trace(), Some("java.lang.AssertionError"));
    assert_eq!(
        result.test_results()[&b].status(),
        TestOutcomeStatus::Fail
    );
}

#[test]
fn finish_twice_returns_the_same_result() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let transport = FakeTransport::new(SERIAL, DeviceScript::passing(std::slice::from_ref(&test)));
    let mut runner = DeviceRunner::new(SERIAL, SERIAL, transport, Arc::new(workspace.settings()));

    let (first, second) = current_thread_runtime().block_on(async {
        assert!(runner.install(InstallOptions::default()).await);
        runner
            .run(&TestSelector::All)
            .await
            .expect("installed devices can run");
        let first = runner.finish().await.expect("first finish");
        let second = runner.finish().await.expect("second finish");
        (first, second)
    });

    assert_eq!(first, second);
    assert_eq!(second.test_results().len(), 1);
}

#[test]
fn logs_are_attached_by_identity() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let message = LogMessage {
        timestamp: "03-01 12:00:01.000".to_owned(),
        pid: 4321,
        tid: 4321,
        priority: LogPriority::Info,
        tag: "LoginActivity".to_owned(),
        message: "signed in".to_owned(),
    };
    let mut logs = DeviceLogs::new();
    logs.insert(test.clone(), vec![message.clone()]);
    logs.insert(test_id("LoginTest", "neverRan"), vec![message.clone()]);
    let script = DeviceScript {
        logs,
        ..DeviceScript::passing(std::slice::from_ref(&test))
    };

    let result = run_device(&workspace, script);

    assert_eq!(result.test_results().len(), 1);
    assert_eq!(result.test_results()[&test].log(), &[message][..]);
}

#[test]
fn transport_fault_keeps_partial_results() {
    let workspace = Workspace::new();
    let test = test_id("LoginTest", "signIn");
    let script = DeviceScript {
        instrumentation_error: Some("connection reset"),
        ..DeviceScript::passing(std::slice::from_ref(&test))
    };

    let (status, result) =
        run_device_with(&workspace, script, Duration::from_secs(30), &TestSelector::All);

    assert_eq!(status, RunStatus::TransportFailed);
    assert_eq!(result.exceptions().len(), 1);
    assert_eq!(result.exceptions()[0].kind, DeviceExceptionKind::Transport);
    assert_eq!(
        result.test_results()[&test].status(),
        TestOutcomeStatus::Pass
    );
}

#[test]
fn silent_device_times_out() {
    let workspace = Workspace::new();
    let finished = test_id("LoginTest", "signIn");
    let stuck = test_id("LoginTest", "signOut");
    let mut events = started_and_ended(&finished).to_vec();
    events.push(LifecycleEvent::Started {
        test: stuck.clone(),
    });
    let script = DeviceScript {
        events,
        hang: true,
        ..Default::default()
    };

    let (status, result) = run_device_with(
        &workspace,
        script,
        Duration::from_millis(100),
        &TestSelector::All,
    );

    assert_eq!(status, RunStatus::TimedOut);
    assert_eq!(result.exceptions().len(), 1);
    assert_eq!(result.exceptions()[0].kind, DeviceExceptionKind::Timeout);
    assert_eq!(
        result.test_results()[&finished].status(),
        TestOutcomeStatus::Pass
    );
    let stuck_result = &result.test_results()[&stuck];
    assert_eq!(stuck_result.status(), TestOutcomeStatus::Error);
    assert!(stuck_result.trace().is_some_and(|trace| !trace.is_empty()));
}

#[test]
fn selector_is_forwarded() {
    let workspace = Workspace::new();
    let transport = FakeTransport::new(SERIAL, DeviceScript::default());
    let calls = transport.calls();
    let mut runner = DeviceRunner::new(SERIAL, SERIAL, transport, Arc::new(workspace.settings()));
    let selector = TestSelector::new(Some("com.example.LoginTest"), None).expect("valid selector");

    current_thread_runtime().block_on(async {
        assert!(runner.install(InstallOptions::default()).await);
        runner.run(&selector).await.expect("first run");
        runner.run(&selector).await.expect("runs are re-entrant");
    });

    let calls = calls.lock().expect("lock not poisoned");
    assert_eq!(calls.requests.len(), 2);
    assert_eq!(calls.requests[0].selector, selector);
    assert_eq!(calls.requests[0].instrumentation_package, "com.example.test");
    assert_eq!(
        calls.installs.iter().map(|(path, _)| path.file_name()).collect::<Vec<_>>(),
        vec![Some("app.apk"), Some("app-test.apk")],
    );
}
