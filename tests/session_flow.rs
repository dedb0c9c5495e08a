//! End-to-end session flow against a scripted adapter: persisted
//! breakpoints are pushed, the debuggee stops and resumes, and the
//! registry cleans up once the adapter terminates.

use std::sync::Arc;

use serde_json::json;

use dapctl_dap::testing::{fake_transport, wait_until, FakeAdapterConfiguration, RecordingProvider};
use dapctl_dap::{
    Breakpoints, Configuration, LaunchOptions, SessionEvent, SessionState, Sessions, SessionsEvent, StopReason, Task,
};

fn saved_breakpoints() -> serde_json::Value {
    let breakpoints = Breakpoints::new();
    breakpoints.source.add("/src/app.rs", 7, None);
    breakpoints.function.add("main");
    breakpoints.into_json()
}

#[tokio::test]
async fn persisted_breakpoints_survive_a_full_session() {
    let tmp = tempfile::TempDir::new().unwrap();
    let file = tmp.path().join("breakpoints.json");
    std::fs::write(&file, serde_json::to_string(&saved_breakpoints()).unwrap()).unwrap();

    let breakpoints = Arc::new(Breakpoints::new());
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    breakpoints.load_json(&saved).unwrap();
    assert_eq!(breakpoints.source.all().len(), 1);

    let provider = Arc::new(RecordingProvider::default());
    let sessions = Sessions::new(provider.clone());
    let mut events = sessions.subscribe();

    let mut configuration = Configuration::new("Run", "fake", "launch").with_argument("program", json!("/bin/app"));
    configuration.pre_debug_task = Some(Task::new("build", "make"));
    configuration.post_debug_task = Some(Task::new("cleanup", "make"));

    let (transport, mut adapter) = fake_transport();
    let session = sessions
        .launch(
            breakpoints.clone(),
            Arc::new(FakeAdapterConfiguration::new("fake", transport)),
            configuration,
            LaunchOptions::default(),
        )
        .await
        .unwrap();

    adapter.handle("initialize", json!({"supportsFunctionBreakpoints": true})).await;
    let launch = adapter.expect_request("launch").await;
    assert_eq!(launch.arguments.clone().unwrap()["program"], "/bin/app");
    adapter.event("initialized", json!(null));
    adapter.answer_breakpoint_requests().await;
    adapter.respond(&launch, json!({}));
    adapter.handle("threads", json!({"threads": []})).await;

    wait_until(|| session.state() == SessionState::Running).await;
    wait_until(|| breakpoints.source.all()[0].results.verified()).await;
    assert_eq!(*provider.tasks.lock(), vec!["build".to_string()]);

    adapter.event(
        "stopped",
        json!({"threadId": 1, "reason": "breakpoint", "allThreadsStopped": true}),
    );
    adapter
        .handle(
            "stackTrace",
            json!({"stackFrames": [{"id": 100, "name": "main", "line": 7, "column": 1,
                                    "source": {"path": "/src/app.rs"}}]}),
        )
        .await;
    adapter.handle("threads", json!({"threads": [{"id": 1, "name": "main"}]})).await;

    wait_until(|| session.state() == SessionState::Paused).await;
    wait_until(|| session.selected_frame().is_some()).await;
    assert_eq!(session.selected_frame().unwrap().name, "main");
    assert_eq!(sessions.active().unwrap().id(), session.id());

    let resumed = {
        let session = session.clone();
        tokio::spawn(async move { session.resume().await })
    };
    adapter.handle("continue", json!({"allThreadsContinued": true})).await;
    resumed.await.unwrap().unwrap();
    wait_until(|| session.state() == SessionState::Running).await;

    adapter.event("terminated", json!({}));
    adapter.handle("disconnect", json!({})).await;
    wait_until(|| sessions.is_empty()).await;

    assert_eq!(session.stop_reason(), Some(StopReason::Terminated));
    assert_eq!(*provider.tasks.lock(), vec!["build".to_string(), "cleanup".to_string()]);
    assert!(breakpoints.source.all()[0].results.is_empty());

    let mut states = Vec::new();
    let mut removed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionsEvent::Session(_, SessionEvent::StateChanged(state)) => states.push(state),
            SessionsEvent::Removed(_) => removed = true,
            _ => {}
        }
    }
    assert!(removed);
    assert_eq!(states.first(), Some(&SessionState::Starting));
    assert_eq!(states.last(), Some(&SessionState::Stopped));
    assert!(states.contains(&SessionState::Paused));

    // The set written back matches what was loaded.
    std::fs::write(&file, serde_json::to_string(&breakpoints.into_json()).unwrap()).unwrap();
    let restored = Breakpoints::new();
    restored
        .load_json(&serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap())
        .unwrap();
    assert_eq!(restored.source.all()[0].line(), 7);
    assert_eq!(restored.function.all()[0].dap.name, "main");
}

#[tokio::test]
async fn failing_build_task_never_starts_the_adapter() {
    let provider = Arc::new(RecordingProvider::default());
    provider.fail_task("build");
    let sessions = Sessions::new(provider.clone());

    let mut configuration = Configuration::new("Run", "fake", "launch");
    configuration.pre_debug_task = Some(Task::new("build", "make"));

    let (transport, mut adapter) = fake_transport();
    let session = sessions
        .launch(
            Arc::new(Breakpoints::new()),
            Arc::new(FakeAdapterConfiguration::new("fake", transport)),
            configuration,
            LaunchOptions::default(),
        )
        .await
        .unwrap();

    wait_until(|| sessions.is_empty()).await;
    assert_eq!(session.stop_reason(), Some(StopReason::BuildFailed));
    adapter.assert_no_request("initialize").await;
}
