use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use ahrian_core::error::{AhrianError, Result};
use ahrian_core::event::ChunkSink;
use ahrian_core::traits::{AgentExecutor, IntermediateOrchestrator, Planner, Synthesizer};
use ahrian_core::types::*;

enum Scripted {
    Outcome(PlanOutcome),
    Fail(String),
}

/// Planner that replays a queue of outcomes, one per call.
///
/// Runs out with a planning error once the queue is empty.
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<PlanRequest>>,
    delay: Option<Duration>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn then_plan(self, plan: Plan) -> Self {
        self.push(Scripted::Outcome(PlanOutcome::Plan(plan)))
    }

    pub fn then_clarify(self, clarification: Clarification) -> Self {
        self.push(Scripted::Outcome(PlanOutcome::Clarification(clarification)))
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()))
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(self, entry: Scripted) -> Self {
        self.script.lock().unwrap().push_back(entry);
        self
    }
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner for ScriptedPlanner {
    fn request_plan(&self, request: PlanRequest) -> BoxFuture<'_, Result<PlanOutcome>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Outcome(outcome)) => Ok(outcome),
                Some(Scripted::Fail(message)) => Err(AhrianError::Planning(message)),
                None => Err(AhrianError::Planning("no scripted outcome left".into())),
            }
        })
    }
}

/// Agent executor that streams fixed chunks and returns a fixed output.
pub struct ScriptedAgent {
    kind: AgentKind,
    chunks: Vec<String>,
    sources: Vec<GroundingSource>,
    sheet: Option<SheetData>,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<AgentTask>>,
}

impl ScriptedAgent {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            chunks: Vec::new(),
            sources: Vec::new(),
            sheet: None,
            failure: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources(mut self, sources: Vec<GroundingSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_sheet(mut self, sheet: SheetData) -> Self {
        self.sheet = Some(sheet);
        self
    }

    /// Fail with `AhrianError::Agent` after streaming the chunks.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Sleep after streaming the chunks, before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tasks received so far, in call order.
    pub fn calls(&self) -> Vec<AgentTask> {
        self.calls.lock().unwrap().clone()
    }
}

impl AgentExecutor for ScriptedAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn run(&self, task: AgentTask, sink: ChunkSink) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(task);
            stream(&sink, &self.chunks).await;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(ref message) = self.failure {
                return Err(AhrianError::Agent(message.clone()));
            }
            let mut output = AgentOutput::new().with_sources(self.sources.clone());
            output.sheet = self.sheet.clone();
            Ok(output)
        })
    }
}

/// Intermediate orchestrator that streams fixed chunks.
pub struct ScriptedOrchestrator {
    chunks: Vec<String>,
    failure: Option<String>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedOrchestrator {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Fail with `AhrianError::Agent` after streaming the chunks.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for ScriptedOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl IntermediateOrchestrator for ScriptedOrchestrator {
    fn run(&self, request: ReasoningRequest, sink: ChunkSink) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            stream(&sink, &self.chunks).await;
            if let Some(ref message) = self.failure {
                return Err(AhrianError::Agent(message.clone()));
            }
            Ok(AgentOutput::new())
        })
    }
}

/// Synthesizer that answers by quoting every context result.
///
/// The answer starts with `Answer to "<prompt>":` followed by one line per
/// context step. Set explicit chunks to stream those instead.
pub struct ScriptedSynthesizer {
    chunks: Option<Vec<String>>,
    failure: Option<String>,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self {
            chunks: None,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = Some(chunks.into_iter().map(Into::into).collect());
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for ScriptedSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer for ScriptedSynthesizer {
    fn synthesize(&self, request: SynthesisRequest, sink: ChunkSink) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            let chunks = match &self.chunks {
                Some(chunks) => chunks.clone(),
                None => {
                    let mut chunks = vec![format!("Answer to \"{}\":", request.original_prompt)];
                    chunks.extend(
                        request
                            .context
                            .iter()
                            .map(|r| format!("\n- step {} ({}): {}", r.step, r.agent, r.result)),
                    );
                    chunks
                }
            };
            self.requests.lock().unwrap().push(request);
            stream(&sink, &chunks).await;
            if let Some(ref message) = self.failure {
                return Err(AhrianError::Agent(message.clone()));
            }
            Ok(AgentOutput::new())
        })
    }
}

/// Send each chunk, yielding in between so the receiver observes them one at a time.
async fn stream(sink: &ChunkSink, chunks: &[String]) {
    for chunk in chunks {
        if !sink.send(chunk.as_str()) {
            break;
        }
        tokio::task::yield_now().await;
    }
}
