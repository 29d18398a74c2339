use std::sync::Arc;
use std::time::Duration;

use ahrian_core::config::EngineConfig;
use ahrian_core::error::ErrorCode;
use ahrian_core::traits::ConversationStore;
use ahrian_core::types::*;
use ahrian_engine::{Engine, ExecutorRegistry, PacingPolicy};
use ahrian_memory::SqliteConversationStore;
use ahrian_test_utils::{
    fixtures, MemoryStore, ScriptedAgent, ScriptedPlanner, ScriptedSynthesizer,
};

fn engine_with(planner: ScriptedPlanner, agents: Vec<ScriptedAgent>) -> Engine {
    let mut registry = ExecutorRegistry::new();
    for agent in agents {
        registry.register(agent).unwrap();
    }
    Engine::builder(Arc::new(planner), Arc::new(ScriptedSynthesizer::new()))
        .with_registry(registry)
        .with_pacing(PacingPolicy::none())
        .build()
}

#[tokio::test]
async fn test_cafes_near_central_park() {
    let maps = Arc::new(
        ScriptedAgent::new(AgentKind::Maps)
            .with_chunks(["Found 3 cafes: ", "Bluestone Lane, ", "Le Pain Quotidien, Joe Coffee"])
            .with_sources(vec![fixtures::source(
                "https://maps.google.com/?cid=123",
                AgentKind::Maps,
            )]),
    );
    let mut registry = ExecutorRegistry::new();
    registry.register_arc(maps.clone()).unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::builder(
        Arc::new(ScriptedPlanner::new().then_plan(fixtures::cafes_plan())),
        Arc::new(ScriptedSynthesizer::new()),
    )
    .with_registry(registry)
    .with_store(store.clone())
    .with_pacing(PacingPolicy::none())
    .build();

    let location = Location {
        latitude: 40.7829,
        longitude: -73.9654,
    };
    let inputs = InvocationInputs::new().with_location(location);
    let convo = engine
        .submit("Find cafes near Central Park", &[], &inputs)
        .await
        .unwrap();

    assert_eq!(convo.status, ConversationStatus::Completed);

    let step1 = convo.result(1).unwrap();
    assert_eq!(step1.agent, AgentKind::Maps);
    assert_eq!(step1.status, StepStatus::Completed);
    assert!(!step1.result.is_empty());
    let sources = step1.sources.as_ref().unwrap();
    assert_eq!(sources[0].agent, AgentKind::Maps);
    assert!(sources[0].uri.starts_with("https://maps.google.com"));

    let calls = maps.calls();
    assert!(matches!(calls[0].aux, AuxInput::Location(Some(l)) if l == location));

    let step2 = convo.result(2).unwrap();
    assert_eq!(step2.status, StepStatus::Completed);
    let answer = convo.final_answer().unwrap();
    assert!(answer.contains("Bluestone Lane"));
    assert_eq!(convo.merged_sources().len(), 1);

    assert_eq!(store.get(&convo.id).unwrap().status, ConversationStatus::Completed);
}

#[tokio::test]
async fn test_twelve_row_sheet_exports_every_row() {
    let plan = fixtures::plan(&[
        (AgentKind::Search, "Find cafes near Central Park"),
        (AgentKind::Sheets, "Build a spreadsheet of the cafes with ratings"),
        (AgentKind::Orchestrator, "Summarize"),
    ]);
    let engine = engine_with(
        ScriptedPlanner::new().then_plan(plan),
        vec![
            ScriptedAgent::new(AgentKind::Search).with_chunks(["twelve cafes"]),
            ScriptedAgent::new(AgentKind::Sheets)
                .with_chunks(["Created a sheet with 12 rows."])
                .with_sheet(fixtures::sheet_with_rows(12)),
        ],
    );

    let convo = engine
        .submit("Make me a cafe spreadsheet", &[], &InvocationInputs::new())
        .await
        .unwrap();

    assert_eq!(convo.status, ConversationStatus::Completed);
    let artifact = convo.generated_artifact.as_ref().unwrap();
    assert_eq!(artifact.row_count(), 12);
    assert_eq!(artifact.name, "Build a spreadsheet of the caf...");
    assert_eq!(convo.result(2).unwrap().artifact.as_ref(), Some(artifact));

    let csv = artifact.to_csv();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines.len(), 13);
    assert_eq!(lines[0], "name,rating,address");
    assert!(lines[12].starts_with("Cafe 12,"));
    assert!(lines[5].contains("\"5 Park Ave, New York\""));
}

#[tokio::test]
async fn test_chunk_events_reconstruct_every_buffer() {
    let plan = fixtures::plan(&[
        (AgentKind::Search, "one"),
        (AgentKind::Drive, "two"),
        (AgentKind::Orchestrator, "answer"),
    ]);
    let engine = engine_with(
        ScriptedPlanner::new().then_plan(plan),
        vec![
            ScriptedAgent::new(AgentKind::Search).with_chunks(["al", "pha", " ", "beta"]),
            ScriptedAgent::new(AgentKind::Drive).with_chunks(["doc ", "saved"]),
        ],
    );
    let mut events = engine.subscribe();

    let convo = engine.submit("p", &[], &InvocationInputs::new()).await.unwrap();

    let mut buffers = vec![String::new(); 3];
    while let Ok(event) = events.try_recv() {
        if let ConversationEvent::StepChunk { step, chunk, .. } = event {
            buffers[step as usize - 1].push_str(&chunk);
        }
    }
    for (result, streamed) in convo.results.iter().zip(&buffers) {
        assert_eq!(&result.result, streamed);
    }
    assert_eq!(convo.results[0].result, "alpha beta");
}

#[tokio::test]
async fn test_failure_at_step_k_leaves_later_steps_pending() {
    for k in 1..=3usize {
        let plan = fixtures::plan(&[
            (AgentKind::Search, "a"),
            (AgentKind::Email, "b"),
            (AgentKind::Drive, "c"),
            (AgentKind::Orchestrator, "d"),
        ]);
        let agents = [AgentKind::Search, AgentKind::Email, AgentKind::Drive]
            .into_iter()
            .enumerate()
            .map(|(i, kind)| {
                let agent = ScriptedAgent::new(kind).with_chunks(["ok"]);
                if i + 1 == k {
                    agent.failing("upstream error")
                } else {
                    agent
                }
            })
            .collect();
        let engine = engine_with(ScriptedPlanner::new().then_plan(plan), agents);
        let mut events = engine.subscribe();

        let convo = engine.submit("p", &[], &InvocationInputs::new()).await.unwrap();

        assert_eq!(convo.status, ConversationStatus::Error);
        assert_eq!(convo.error_code, Some(ErrorCode::StepFailed));
        assert_eq!(convo.results.len(), 4);
        for (i, result) in convo.results.iter().enumerate() {
            let expected = match (i + 1).cmp(&k) {
                std::cmp::Ordering::Less => StepStatus::Completed,
                std::cmp::Ordering::Equal => StepStatus::Error,
                std::cmp::Ordering::Greater => StepStatus::Pending,
            };
            assert_eq!(result.status, expected, "k={} step={}", k, i + 1);
        }

        while let Ok(event) = events.try_recv() {
            if let ConversationEvent::StepStarted { step, .. } = event {
                assert!(step as usize <= k);
            }
        }
    }
}

#[tokio::test]
async fn test_video_step_receives_attachment() {
    let plan = fixtures::plan(&[
        (AgentKind::Video, "Summarize the clip"),
        (AgentKind::Orchestrator, "Answer"),
    ]);
    let video = Arc::new(ScriptedAgent::new(AgentKind::Video).with_chunks(["A dog runs."]));
    let mut registry = ExecutorRegistry::new();
    registry.register_arc(video.clone()).unwrap();
    let engine = Engine::builder(
        Arc::new(ScriptedPlanner::new().then_plan(plan)),
        Arc::new(ScriptedSynthesizer::new()),
    )
    .with_registry(registry)
    .with_pacing(PacingPolicy::none())
    .build();

    let clip = MediaAttachment::new("clip.mp4", "video/mp4", vec![0, 0, 0, 24]);
    let inputs = InvocationInputs::new().with_video(clip.clone());
    let convo = engine.submit("What happens?", &[], &inputs).await.unwrap();

    assert_eq!(convo.status, ConversationStatus::Completed);
    assert!(matches!(video.calls()[0].aux, AuxInput::Media(ref m) if *m == clip));

    let json = serde_json::to_string(&convo).unwrap();
    assert!(!json.contains("clip.mp4"));
}

#[tokio::test(start_paused = true)]
async fn test_planning_timeout_is_planning_failure() {
    let planner = ScriptedPlanner::new()
        .then_plan(fixtures::cafes_plan())
        .with_delay(Duration::from_secs(600));
    let config = EngineConfig {
        planning_timeout_secs: 10,
        ..EngineConfig::default()
    };
    let engine = Engine::builder(Arc::new(planner), Arc::new(ScriptedSynthesizer::new()))
        .with_config(config)
        .build();

    let convo = engine.submit("slow", &[], &InvocationInputs::new()).await.unwrap();
    assert_eq!(convo.status, ConversationStatus::Error);
    assert_eq!(convo.error_code, Some(ErrorCode::PlanningFailed));
    assert_eq!(convo.error_message.as_deref(), Some("Planning timed out after 10s"));
}

#[tokio::test]
async fn test_store_failures_do_not_change_outcome() {
    let engine = Engine::builder(
        Arc::new(ScriptedPlanner::new().then_plan(fixtures::plan(&[(AgentKind::Orchestrator, "hi")]))),
        Arc::new(ScriptedSynthesizer::new()),
    )
    .with_store(Arc::new(MemoryStore::failing()))
    .with_pacing(PacingPolicy::none())
    .build();

    let convo = engine.submit("hello", &[], &InvocationInputs::new()).await.unwrap();
    assert_eq!(convo.status, ConversationStatus::Completed);
    assert!(convo.final_answer().is_some());
}

#[tokio::test]
async fn test_concurrent_conversations_are_independent() {
    let engine = engine_with(
        ScriptedPlanner::new()
            .then_plan(fixtures::plan(&[(AgentKind::Search, "x"), (AgentKind::Orchestrator, "y")]))
            .then_plan(fixtures::plan(&[(AgentKind::Email, "z")])),
        vec![
            ScriptedAgent::new(AgentKind::Search).with_chunks(["s1", "s2"]),
            ScriptedAgent::new(AgentKind::Email).with_chunks(["e1"]),
        ],
    );
    let inputs = InvocationInputs::new();

    let (a, b) = tokio::join!(
        engine.submit("first", &[], &inputs),
        engine.submit("second", &[], &inputs),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.id, b.id);
    assert_eq!(a.status, ConversationStatus::Completed);
    assert_eq!(b.status, ConversationStatus::Completed);
    for convo in [&a, &b] {
        for result in &convo.results {
            assert!(!result.result.contains("e1") || result.agent == AgentKind::Email);
            assert!(!result.result.contains("s1") || result.agent != AgentKind::Email);
        }
    }
}

#[tokio::test]
async fn test_sqlite_store_survives_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations.db");
    let store = Arc::new(SqliteConversationStore::open(&path, "ahrian_conversations").unwrap());

    let clarification = fixtures::clarification(&[("k1", "Brooklyn"), ("k2", "Manhattan")]);
    let engine = Engine::builder(
        Arc::new(
            ScriptedPlanner::new()
                .then_clarify(clarification)
                .then_plan(fixtures::cafes_plan()),
        ),
        Arc::new(ScriptedSynthesizer::new()),
    )
    .with_registry({
        let mut registry = ExecutorRegistry::new();
        registry
            .register(ScriptedAgent::new(AgentKind::Maps).with_chunks(["cafes"]))
            .unwrap();
        registry
    })
    .with_store(store.clone())
    .with_pacing(PacingPolicy::none())
    .build();

    let mut convo = engine
        .submit("Cafes in New York", &[], &InvocationInputs::new())
        .await
        .unwrap();
    let parked = store.load(&convo.id).await.unwrap().unwrap();
    assert_eq!(parked.status, ConversationStatus::ClarificationNeeded);
    assert_eq!(parked.clarification, convo.clarification);

    engine
        .resolve_clarification(&mut convo, "k2", &[], &InvocationInputs::new())
        .await
        .unwrap();

    let reopened = SqliteConversationStore::open(&path, "ahrian_conversations").unwrap();
    let loaded = reopened.load_all().await.unwrap();
    assert_eq!(loaded, vec![convo.clone()]);
    assert!(loaded[0].clarification.is_none());
    assert_eq!(engine.load_conversations().await.unwrap().len(), 1);

    // Prior history flows back into the next plan request.
    let follow_up = Engine::builder(
        Arc::new(ScriptedPlanner::new().then_plan(Plan::default())),
        Arc::new(ScriptedSynthesizer::new()),
    )
    .build();
    let next = follow_up
        .submit("And the closest one?", &loaded, &InvocationInputs::new())
        .await
        .unwrap();
    assert_eq!(next.status, ConversationStatus::Completed);
}
