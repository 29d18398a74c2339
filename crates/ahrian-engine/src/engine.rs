use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ahrian_core::config::EngineConfig;
use ahrian_core::error::{AhrianError, ErrorCode, Result};
use ahrian_core::event::{ChunkSink, EventBus};
use ahrian_core::traits::{ConversationStore, IntermediateOrchestrator, Planner, Synthesizer};
use ahrian_core::types::*;

use crate::pacing::PacingPolicy;
use crate::prompt::clarified_prompt;
use crate::registry::ExecutorRegistry;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    planner: Arc<dyn Planner>,
    synthesizer: Arc<dyn Synthesizer>,
    orchestrator: Option<Arc<dyn IntermediateOrchestrator>>,
    registry: ExecutorRegistry,
    store: Option<Arc<dyn ConversationStore>>,
    event_bus: Option<Arc<EventBus>>,
    pacing: Option<PacingPolicy>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(planner: Arc<dyn Planner>, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            planner,
            synthesizer,
            orchestrator: None,
            registry: ExecutorRegistry::new(),
            store: None,
            event_bus: None,
            pacing: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Executor for orchestrator steps that are not last in the plan.
    pub fn with_intermediate(mut self, orchestrator: Arc<dyn IntermediateOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Override the pacing policy derived from `config.pacing_ms`.
    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine {
        let pacing = self
            .pacing
            .unwrap_or_else(|| PacingPolicy::constant(self.config.pacing()));
        Engine {
            planner: self.planner,
            synthesizer: self.synthesizer,
            orchestrator: self.orchestrator,
            registry: self.registry,
            store: self.store,
            event_bus: self.event_bus.unwrap_or_default(),
            pacing,
            config: self.config,
        }
    }
}

/// The orchestration engine.
///
/// Owns every lifecycle mutation of a [`Conversation`]: planning,
/// clarification, sequential step dispatch with streaming, context chaining,
/// and terminal resolution. Each call takes the conversation by `&mut`, so a
/// conversation has exactly one writer at a time; independent conversations
/// may run concurrently on a shared engine.
pub struct Engine {
    planner: Arc<dyn Planner>,
    synthesizer: Arc<dyn Synthesizer>,
    orchestrator: Option<Arc<dyn IntermediateOrchestrator>>,
    registry: ExecutorRegistry,
    store: Option<Arc<dyn ConversationStore>>,
    event_bus: Arc<EventBus>,
    pacing: PacingPolicy,
    config: EngineConfig,
}

impl Engine {
    pub fn builder(planner: Arc<dyn Planner>, synthesizer: Arc<dyn Synthesizer>) -> EngineBuilder {
        EngineBuilder::new(planner, synthesizer)
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.event_bus.subscribe()
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Load stored conversations. Empty when no store is configured.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        match &self.store {
            Some(store) => store.load_all().await,
            None => Ok(Vec::new()),
        }
    }

    /// Accept a new prompt: plan it and, if a plan comes back, execute it.
    ///
    /// `prior` is earlier conversation history forwarded to the planner.
    pub async fn submit(
        &self,
        prompt: impl Into<String>,
        prior: &[Conversation],
        inputs: &InvocationInputs,
    ) -> Result<Conversation> {
        let mut conversation = Conversation::new(prompt);
        info!(conversation_id = %conversation.id, "Accepted prompt");
        self.persist(&conversation).await;

        let prompt = conversation.prompt.clone();
        self.plan_and_run(&mut conversation, &prompt, prior, inputs, ErrorCode::PlanningFailed)
            .await?;
        Ok(conversation)
    }

    /// Resume a conversation parked on a clarification with the user's choice.
    ///
    /// Rejects the call, leaving the conversation untouched, if it is not
    /// awaiting clarification or `key` names no option.
    pub async fn resolve_clarification(
        &self,
        conversation: &mut Conversation,
        key: &str,
        prior: &[Conversation],
        inputs: &InvocationInputs,
    ) -> Result<ConversationStatus> {
        let chosen = match conversation.clarification.as_ref() {
            Some(clarification) if conversation.status == ConversationStatus::ClarificationNeeded => {
                clarification
                    .option(key)
                    .cloned()
                    .ok_or_else(|| AhrianError::UnknownOption(key.to_string()))?
            }
            _ => {
                return Err(AhrianError::InvalidState {
                    id: conversation.id.to_string(),
                    status: conversation.status,
                    action: "resolve a clarification",
                })
            }
        };

        info!(conversation_id = %conversation.id, key, "Clarification resolved");
        conversation.clarification = None;
        self.transition(conversation, ConversationStatus::Planning).await?;

        let prompt = clarified_prompt(&conversation.prompt, &chosen.value);
        self.plan_and_run(conversation, &prompt, prior, inputs, ErrorCode::ClarificationFailed)
            .await?;
        Ok(conversation.status)
    }

    /// Run every plan step in order and resolve the conversation to
    /// `completed` or `error`.
    ///
    /// Requires a conversation in `planning` with a plan attached.
    pub async fn execute(
        &self,
        conversation: &mut Conversation,
        inputs: &InvocationInputs,
    ) -> Result<ConversationStatus> {
        if conversation.status != ConversationStatus::Planning {
            return Err(AhrianError::InvalidState {
                id: conversation.id.to_string(),
                status: conversation.status,
                action: "execute",
            });
        }
        let plan = conversation
            .plan
            .clone()
            .ok_or_else(|| AhrianError::InvalidState {
                id: conversation.id.to_string(),
                status: conversation.status,
                action: "execute without a plan",
            })?;

        conversation.results = plan.steps().iter().map(StepResult::pending).collect();
        conversation.generated_artifact = None;
        self.transition(conversation, ConversationStatus::Executing).await?;

        let total = plan.len();
        info!(conversation_id = %conversation.id, steps = total, "Executing plan");

        let mut context: Vec<StepResult> = Vec::with_capacity(total);
        for (index, step) in plan.steps().iter().enumerate() {
            conversation.results[index].start();
            self.event_bus.publish(ConversationEvent::StepStarted {
                conversation_id: conversation.id.clone(),
                step: step.step,
                agent: step.agent,
            });
            self.persist(conversation).await;
            info!(
                conversation_id = %conversation.id,
                step = step.step,
                agent = %step.agent,
                synthesis = plan.is_synthesis(step),
                "Dispatching step"
            );

            match self.run_step(conversation, index, &plan, step, &context, inputs).await {
                Ok(output) => self.complete_step(conversation, index, step, output, &mut context).await,
                Err(e) => {
                    let message = e.to_string();
                    conversation.results[index].fail(message.clone());
                    self.event_bus.publish(ConversationEvent::StepFailed {
                        conversation_id: conversation.id.clone(),
                        step: step.step,
                        agent: step.agent,
                        error: message.clone(),
                    });
                    warn!(
                        conversation_id = %conversation.id,
                        step = step.step,
                        agent = %step.agent,
                        error = %e,
                        "Step failed, aborting plan"
                    );
                    self.fail(conversation, ErrorCode::for_step(&e), message).await?;
                    return Ok(conversation.status);
                }
            }

            if index + 1 < total {
                self.pace(conversation, index, step.step, total).await;
            }
        }

        self.transition(conversation, ConversationStatus::Completed).await?;
        info!(conversation_id = %conversation.id, "Conversation completed");
        Ok(conversation.status)
    }

    async fn plan_and_run(
        &self,
        conversation: &mut Conversation,
        prompt: &str,
        prior: &[Conversation],
        inputs: &InvocationInputs,
        failure: ErrorCode,
    ) -> Result<()> {
        match self.request_plan(prompt, prior).await {
            Ok(PlanOutcome::Plan(plan)) => {
                debug!(conversation_id = %conversation.id, steps = plan.len(), "Plan accepted");
                conversation.plan = Some(plan);
                self.execute(conversation, inputs).await?;
            }
            Ok(PlanOutcome::Clarification(clarification)) => {
                info!(
                    conversation_id = %conversation.id,
                    options = clarification.options.len(),
                    "Planner requested clarification"
                );
                conversation.clarification = Some(clarification.clone());
                self.transition(conversation, ConversationStatus::ClarificationNeeded)
                    .await?;
                self.event_bus.publish(ConversationEvent::ClarificationRequested {
                    conversation_id: conversation.id.clone(),
                    clarification,
                });
            }
            Err(e) => {
                self.fail(conversation, failure, e.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn request_plan(&self, prompt: &str, prior: &[Conversation]) -> Result<PlanOutcome> {
        let request = PlanRequest {
            prompt: prompt.to_string(),
            prior: prior.to_vec(),
            cycle_budget: self.config.cycle_budget,
        };
        let pending = self.planner.request_plan(request);
        let outcome = match self.config.planning_timeout() {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| AhrianError::PlanningTimeout(limit.as_secs()))??,
            None => pending.await?,
        };

        match &outcome {
            PlanOutcome::Plan(plan) => plan.validate()?,
            PlanOutcome::Clarification(clarification) => clarification.validate()?,
        }
        Ok(outcome)
    }

    /// Dispatch one step and stream its chunks into the step's buffer until
    /// the dispatch resolves.
    async fn run_step(
        &self,
        conversation: &mut Conversation,
        index: usize,
        plan: &Plan,
        step: &PlanStep,
        context: &[StepResult],
        inputs: &InvocationInputs,
    ) -> Result<AgentOutput> {
        let (sink, mut chunks) = ChunkSink::channel();
        let dispatch = self.dispatch(&conversation.prompt, plan, step, context, inputs, sink)?;
        let mut dispatch = self.with_step_timeout(step, dispatch);

        let conversation_id = conversation.id.clone();
        let result = &mut conversation.results[index];
        let mut open = true;
        let outcome = loop {
            tokio::select! {
                biased;
                chunk = chunks.recv(), if open => match chunk {
                    Some(chunk) => self.append_chunk(&conversation_id, result, chunk),
                    None => open = false,
                },
                outcome = &mut dispatch => break outcome,
            }
        };

        // Chunks sent before the dispatch resolved still belong to this step.
        while let Ok(chunk) = chunks.try_recv() {
            self.append_chunk(&conversation_id, result, chunk);
        }
        outcome
    }

    fn dispatch(
        &self,
        prompt: &str,
        plan: &Plan,
        step: &PlanStep,
        context: &[StepResult],
        inputs: &InvocationInputs,
        sink: ChunkSink,
    ) -> Result<BoxFuture<'_, Result<AgentOutput>>> {
        if plan.is_synthesis(step) {
            let request = SynthesisRequest {
                original_prompt: prompt.to_string(),
                context: context.to_vec(),
            };
            return Ok(self.synthesizer.synthesize(request, sink));
        }

        if step.agent.is_orchestrator() {
            let orchestrator = self
                .orchestrator
                .as_ref()
                .ok_or(AhrianError::ExecutorNotRegistered(AgentKind::Orchestrator))?;
            let request = ReasoningRequest {
                task: step.task.clone(),
                original_prompt: prompt.to_string(),
                context: context.to_vec(),
            };
            return Ok(orchestrator.run(request, sink));
        }

        let executor = self
            .registry
            .get(step.agent)
            .ok_or(AhrianError::ExecutorNotRegistered(step.agent))?;
        let task = AgentTask {
            task: step.task.clone(),
            aux: aux_input(step.agent, context, inputs)?,
        };
        Ok(executor.run(task, sink))
    }

    fn with_step_timeout<'a>(
        &self,
        step: &PlanStep,
        dispatch: BoxFuture<'a, Result<AgentOutput>>,
    ) -> BoxFuture<'a, Result<AgentOutput>> {
        let Some(limit) = self.config.step_timeout() else {
            return dispatch;
        };
        let (number, agent) = (step.step, step.agent);
        Box::pin(async move {
            tokio::time::timeout(limit, dispatch)
                .await
                .unwrap_or_else(|_| {
                    Err(AhrianError::StepTimeout {
                        step: number,
                        agent,
                        timeout_secs: limit.as_secs(),
                    })
                })
        })
    }

    fn append_chunk(&self, conversation_id: &ConversationId, result: &mut StepResult, chunk: String) {
        if result.append(&chunk) {
            self.event_bus.publish(ConversationEvent::StepChunk {
                conversation_id: conversation_id.clone(),
                step: result.step,
                chunk,
            });
        }
    }

    async fn complete_step(
        &self,
        conversation: &mut Conversation,
        index: usize,
        step: &PlanStep,
        output: AgentOutput,
        context: &mut Vec<StepResult>,
    ) {
        let artifact = output
            .sheet
            .map(|sheet| GeneratedArtifact::from_task(&step.task, sheet));

        if let Some(ref artifact) = artifact {
            if conversation.generated_artifact.is_some() {
                debug!(
                    conversation_id = %conversation.id,
                    step = step.step,
                    "Replacing earlier artifact; the latest one is kept"
                );
            }
            conversation.generated_artifact = Some(artifact.clone());
            self.event_bus.publish(ConversationEvent::ArtifactGenerated {
                conversation_id: conversation.id.clone(),
                step: step.step,
                name: artifact.name.clone(),
                rows: artifact.row_count(),
            });
        }

        let sources = output.sources.len();
        let result = &mut conversation.results[index];
        result.complete(output.sources, artifact);
        context.push(result.clone());

        self.event_bus.publish(ConversationEvent::StepCompleted {
            conversation_id: conversation.id.clone(),
            step: step.step,
            agent: step.agent,
            sources,
        });
        debug!(
            conversation_id = %conversation.id,
            step = step.step,
            chars = conversation.results[index].result.len(),
            sources,
            "Step completed"
        );
        self.persist(conversation).await;
    }

    async fn pace(&self, conversation: &Conversation, index: usize, after_step: u32, total: usize) {
        let delay = self.pacing.delay(index, total);
        if delay.is_zero() {
            return;
        }
        let delay_ms = delay.as_millis() as u64;
        self.event_bus.publish(ConversationEvent::Paced {
            conversation_id: conversation.id.clone(),
            after_step,
            delay_ms,
        });
        debug!(conversation_id = %conversation.id, after_step, delay_ms, "Pacing");
        tokio::time::sleep(delay).await;
    }

    async fn fail(&self, conversation: &mut Conversation, code: ErrorCode, message: String) -> Result<()> {
        error!(conversation_id = %conversation.id, code = %code, error = %message, "Conversation failed");
        conversation.error_message = Some(message);
        conversation.error_code = Some(code);
        self.transition(conversation, ConversationStatus::Error).await
    }

    /// Apply a lifecycle transition, broadcast it, and persist the result.
    async fn transition(&self, conversation: &mut Conversation, next: ConversationStatus) -> Result<()> {
        let from = conversation.status;
        if !from.can_transition_to(next) {
            return Err(AhrianError::InvalidState {
                id: conversation.id.to_string(),
                status: from,
                action: next.as_str(),
            });
        }
        conversation.status = next;
        conversation.updated_at = chrono::Utc::now();
        self.event_bus.publish(ConversationEvent::StatusChanged {
            conversation_id: conversation.id.clone(),
            from,
            to: next,
        });
        debug!(conversation_id = %conversation.id, %from, to = %next, "Status changed");
        self.persist(conversation).await;
        Ok(())
    }

    async fn persist(&self, conversation: &Conversation) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(conversation).await {
            warn!(conversation_id = %conversation.id, error = %e, "Failed to persist conversation");
        }
    }
}

/// Auxiliary input for a non-orchestrator step.
fn aux_input(agent: AgentKind, context: &[StepResult], inputs: &InvocationInputs) -> Result<AuxInput> {
    if let Some(media) = agent.required_media() {
        let attachment = inputs
            .media(media)
            .cloned()
            .ok_or(AhrianError::MissingAttachment { agent, media })?;
        return Ok(AuxInput::Media(attachment));
    }
    Ok(match agent {
        AgentKind::Maps => AuxInput::Location(inputs.location),
        // Only the immediately preceding step feeds a sheet, not the whole context.
        AgentKind::Sheets => AuxInput::PreviousOutput(
            context.last().map(|r| r.result.clone()).unwrap_or_default(),
        ),
        _ => AuxInput::None,
    })
}
