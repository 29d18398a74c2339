use futures::future::BoxFuture;

use crate::error::{AhrianError, Result};
use crate::event::ChunkSink;
use crate::types::*;

/// Planning collaborator. Turns a prompt into a plan or a clarification.
pub trait Planner: Send + Sync + 'static {
    fn request_plan(&self, request: PlanRequest) -> BoxFuture<'_, Result<PlanOutcome>>;
}

/// Agent executor. Performs one step's task for a single agent kind.
pub trait AgentExecutor: Send + Sync + 'static {
    /// The agent kind this executor serves.
    fn kind(&self) -> AgentKind;

    /// Run the task, streaming text through `sink`.
    fn run(&self, task: AgentTask, sink: ChunkSink) -> BoxFuture<'_, Result<AgentOutput>>;
}

/// Executor for orchestrator steps that are not the final synthesis step.
pub trait IntermediateOrchestrator: Send + Sync + 'static {
    fn run(&self, request: ReasoningRequest, sink: ChunkSink)
        -> BoxFuture<'_, Result<AgentOutput>>;
}

/// Synthesis collaborator. Produces the user-facing answer from context.
pub trait Synthesizer: Send + Sync + 'static {
    fn synthesize(
        &self,
        request: SynthesisRequest,
        sink: ChunkSink,
    ) -> BoxFuture<'_, Result<AgentOutput>>;
}

/// Conversation store: durable keyed persistence backend.
pub trait ConversationStore: Send + Sync + 'static {
    /// Insert or replace a conversation by id.
    fn save(&self, conversation: &Conversation) -> BoxFuture<'_, Result<()>>;

    /// Load every stored conversation, oldest first.
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<Conversation>>>;

    /// Load one conversation by id.
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<Conversation>>>;

    /// Remove a conversation. Returns whether it existed.
    fn delete(&self, id: &ConversationId) -> BoxFuture<'_, Result<bool>>;

    /// Load one conversation, failing with `NotFound` when it is absent.
    fn require<'a>(&'a self, id: &'a ConversationId) -> BoxFuture<'a, Result<Conversation>> {
        Box::pin(async move {
            self.load(id)
                .await?
                .ok_or_else(|| AhrianError::NotFound(id.to_string()))
        })
    }
}
