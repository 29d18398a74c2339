use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AhrianError, ErrorCode, Result};

/// Unique conversation identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of agent kinds a plan step can delegate to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Search,
    Maps,
    Vision,
    Video,
    Email,
    Sheets,
    Drive,
    Orchestrator,
}

impl AgentKind {
    pub const ALL: [AgentKind; 8] = [
        AgentKind::Search,
        AgentKind::Maps,
        AgentKind::Vision,
        AgentKind::Video,
        AgentKind::Email,
        AgentKind::Sheets,
        AgentKind::Drive,
        AgentKind::Orchestrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Maps => "maps",
            Self::Vision => "vision",
            Self::Video => "video",
            Self::Email => "email",
            Self::Sheets => "sheets",
            Self::Drive => "drive",
            Self::Orchestrator => "orchestrator",
        }
    }

    pub fn is_orchestrator(&self) -> bool {
        matches!(self, Self::Orchestrator)
    }

    /// Attachment this kind needs supplied with the invocation, if any.
    pub fn required_media(&self) -> Option<MediaKind> {
        match self {
            Self::Vision => Some(MediaKind::Image),
            Self::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step of a plan. Immutable once produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub agent: AgentKind,
    pub task: String,
}

impl PlanStep {
    pub fn new(step: u32, agent: AgentKind, task: impl Into<String>) -> Self {
        Self {
            step,
            agent,
            task: task.into(),
        }
    }
}

/// Ordered sequence of plan steps.
///
/// A trailing orchestrator step is the synthesis step. Orchestrator steps in
/// any other position are intermediate reasoning steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_step(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    /// Whether `step` is the final-position orchestrator step.
    pub fn is_synthesis(&self, step: &PlanStep) -> bool {
        step.agent.is_orchestrator()
            && self.last_step().map(|last| last.step) == Some(step.step)
    }

    /// Check step numbering: starts at 1 and strictly increases.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.steps.first() else {
            return Ok(());
        };
        if first.step != 1 {
            return Err(AhrianError::InvalidPlan(format!(
                "plan must start at step 1, got step {}",
                first.step
            )));
        }
        for pair in self.steps.windows(2) {
            if pair[1].step <= pair[0].step {
                return Err(AhrianError::InvalidPlan(format!(
                    "step {} follows step {}; step numbers must strictly increase",
                    pair[1].step, pair[0].step
                )));
            }
        }
        Ok(())
    }
}

/// Status of one step's execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A reference backing part of an agent's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
    pub agent: AgentKind,
}

impl GroundingSource {
    pub fn new(uri: impl Into<String>, title: impl Into<String>, agent: AgentKind) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
            agent,
        }
    }
}

/// Tabular payload produced by a sheets-kind agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetData {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Number of data rows, excluding the header.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Render the header and every row as CSV.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        if !self.headers.is_empty() {
            push_csv_record(&mut out, &self.headers);
        }
        for row in &self.rows {
            push_csv_record(&mut out, row);
        }
        out
    }
}

fn push_csv_record(out: &mut String, fields: &[String]) {
    let record = fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&record);
    out.push('\n');
}

/// A tabular file generated during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub id: String,
    pub name: String,
    pub data: SheetData,
    pub created_at: DateTime<Utc>,
}

impl GeneratedArtifact {
    /// Wrap sheet data produced by the step running `task`.
    pub fn from_task(task: &str, data: SheetData) -> Self {
        let prefix: String = task.chars().take(30).collect();
        Self {
            id: format!("file-{}", Uuid::new_v4()),
            name: format!("{}...", prefix),
            data,
            created_at: Utc::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.row_count()
    }

    pub fn to_csv(&self) -> String {
        self.data.to_csv()
    }
}

/// Execution record for one plan step.
///
/// `result` only grows while the step is running and is frozen once the step
/// completes or fails. Mutate through the methods, which enforce that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: u32,
    pub agent: AgentKind,
    pub task: String,
    pub result: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<GroundingSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<GeneratedArtifact>,
}

impl StepResult {
    pub fn pending(step: &PlanStep) -> Self {
        Self {
            step: step.step,
            agent: step.agent,
            task: step.task.clone(),
            result: String::new(),
            status: StepStatus::Pending,
            sources: None,
            artifact: None,
        }
    }

    /// Move a pending step to running.
    pub fn start(&mut self) -> bool {
        if self.status != StepStatus::Pending {
            return false;
        }
        self.status = StepStatus::Running;
        true
    }

    /// Append a streamed chunk. Ignored unless the step is running.
    pub fn append(&mut self, chunk: &str) -> bool {
        if self.status != StepStatus::Running {
            return false;
        }
        self.result.push_str(chunk);
        true
    }

    pub fn complete(
        &mut self,
        sources: Vec<GroundingSource>,
        artifact: Option<GeneratedArtifact>,
    ) -> bool {
        if self.status != StepStatus::Running {
            return false;
        }
        self.status = StepStatus::Completed;
        self.sources = if sources.is_empty() { None } else { Some(sources) };
        self.artifact = artifact;
        true
    }

    /// Mark the step failed, replacing the buffer with the error description.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status != StepStatus::Running {
            return false;
        }
        self.status = StepStatus::Error;
        self.result = message.into();
        true
    }
}

/// One selectable answer to a clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub key: String,
    pub value: String,
}

impl ClarificationOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A planner's request for disambiguating input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub options: Vec<ClarificationOption>,
}

impl Clarification {
    pub fn new(question: impl Into<String>, options: Vec<ClarificationOption>) -> Self {
        Self {
            question: question.into(),
            options,
        }
    }

    pub fn option(&self, key: &str) -> Option<&ClarificationOption> {
        self.options.iter().find(|o| o.key == key)
    }

    /// Options must be non-empty with unique keys.
    pub fn validate(&self) -> Result<()> {
        if self.options.is_empty() {
            return Err(AhrianError::InvalidClarification(
                "clarification has no options".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for option in &self.options {
            if !seen.insert(option.key.as_str()) {
                return Err(AhrianError::InvalidClarification(format!(
                    "duplicate option key '{}'",
                    option.key
                )));
            }
        }
        Ok(())
    }
}

/// What the planner produced: exactly one of a plan or a clarification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    Plan(Plan),
    Clarification(Clarification),
}

/// Lifecycle state of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Planning,
    ClarificationNeeded,
    Executing,
    Completed,
    Error,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::ClarificationNeeded => "clarification_needed",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        use ConversationStatus::*;
        matches!(
            (self, next),
            (Planning, ClarificationNeeded)
                | (Planning, Executing)
                | (Planning, Error)
                | (ClarificationNeeded, Planning)
                | (Executing, Completed)
                | (Executing, Error)
        )
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root for one user request.
///
/// Transient invocation inputs (attachments, location) are never stored here,
/// so a persisted conversation cannot carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub prompt: String,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub results: Vec<StepResult>,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_artifact: Option<GeneratedArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A freshly accepted prompt, in `planning`.
    pub fn new(prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            prompt: prompt.into(),
            plan: None,
            results: Vec::new(),
            status: ConversationStatus::Planning,
            clarification: None,
            generated_artifact: None,
            error_message: None,
            error_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self, step: u32) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step == step)
    }

    /// The synthesized answer, once the conversation has completed.
    pub fn final_answer(&self) -> Option<&str> {
        if self.status != ConversationStatus::Completed {
            return None;
        }
        let plan = self.plan.as_ref()?;
        let last = plan.last_step()?;
        if !plan.is_synthesis(last) {
            return None;
        }
        self.result(last.step).map(|r| r.result.as_str())
    }

    pub fn merged_sources(&self) -> Vec<GroundingSource> {
        crate::sources::merge_sources(&self.results)
    }
}

/// Geographic position handed to maps-kind agents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which attachment slot a media agent reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Binary media attached to a single invocation.
#[derive(Clone, PartialEq)]
pub struct MediaAttachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl MediaAttachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

impl std::fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Inputs supplied fresh on every engine call and never persisted.
#[derive(Debug, Clone, Default)]
pub struct InvocationInputs {
    pub location: Option<Location>,
    pub image: Option<MediaAttachment>,
    pub video: Option<MediaAttachment>,
}

impl InvocationInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_image(mut self, image: MediaAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_video(mut self, video: MediaAttachment) -> Self {
        self.video = Some(video);
        self
    }

    pub fn media(&self, kind: MediaKind) -> Option<&MediaAttachment> {
        match kind {
            MediaKind::Image => self.image.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }
}

/// Agent-specific auxiliary input accompanying a task.
#[derive(Debug, Clone)]
pub enum AuxInput {
    None,
    /// Maps agents: the caller's position, when known.
    Location(Option<Location>),
    /// Sheets agents: result text of the immediately preceding completed step.
    PreviousOutput(String),
    /// Vision and video agents.
    Media(MediaAttachment),
}

/// A unit of work handed to an agent executor.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub task: String,
    pub aux: AuxInput,
}

/// Non-text output of a dispatch. Text arrives through the chunk sink.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub sources: Vec<GroundingSource>,
    pub sheet: Option<SheetData>,
}

impl AgentOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(mut self, sources: Vec<GroundingSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_sheet(mut self, sheet: SheetData) -> Self {
        self.sheet = Some(sheet);
        self
    }
}

/// Input for the planner.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub prompt: String,
    pub prior: Vec<Conversation>,
    pub cycle_budget: u32,
}

/// Input for a non-final orchestrator step.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub task: String,
    pub original_prompt: String,
    pub context: Vec<StepResult>,
}

/// Input for the final synthesis step.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub original_prompt: String,
    pub context: Vec<StepResult>,
}

/// Progress event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Conversation moved between lifecycle states.
    StatusChanged {
        conversation_id: ConversationId,
        from: ConversationStatus,
        to: ConversationStatus,
    },
    /// Planner asked for disambiguation.
    ClarificationRequested {
        conversation_id: ConversationId,
        clarification: Clarification,
    },
    StepStarted {
        conversation_id: ConversationId,
        step: u32,
        agent: AgentKind,
    },
    /// A streamed chunk was appended to a running step.
    StepChunk {
        conversation_id: ConversationId,
        step: u32,
        chunk: String,
    },
    StepCompleted {
        conversation_id: ConversationId,
        step: u32,
        agent: AgentKind,
        sources: usize,
    },
    StepFailed {
        conversation_id: ConversationId,
        step: u32,
        agent: AgentKind,
        error: String,
    },
    ArtifactGenerated {
        conversation_id: ConversationId,
        step: u32,
        name: String,
        rows: usize,
    },
    /// Pacing delay inserted after a successful step.
    Paced {
        conversation_id: ConversationId,
        after_step: u32,
        delay_ms: u64,
    },
}

impl ConversationEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::StatusChanged { conversation_id, .. }
            | Self::ClarificationRequested { conversation_id, .. }
            | Self::StepStarted { conversation_id, .. }
            | Self::StepChunk { conversation_id, .. }
            | Self::StepCompleted { conversation_id, .. }
            | Self::StepFailed { conversation_id, .. }
            | Self::ArtifactGenerated { conversation_id, .. }
            | Self::Paced { conversation_id, .. } => conversation_id,
        }
    }
}
