use std::fmt;

/// Progress and lifecycle event types the title harmonizer knows about.
///
/// Anything outside this set is still routed and titled, it simply falls back to
/// the raw event type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ExecutionStart,
    ExecutionComplete,
    ExecutionError,
    ExecutionCancelled,
    PlanGenerated,
    PlanOptimized,
    PhaseStart,
    PhaseEnd,
    ToolIntent,
    ToolResult,
    ToolError,
    SelfCorrection,
    FinalSynthesis,
    RagRetrieval,
    LlmExecutionStart,
    LlmExecutionComplete,
    ConversationAgentStart,
    ConversationLlmStep,
    ConversationToolInvoked,
    ConversationToolCompleted,
    ConversationAgentComplete,
    KnowledgeRetrievalStart,
    KnowledgeRetrievalComplete,
    KnowledgeRerankingStart,
    KnowledgeRerankingComplete,
    GenieCoordinationStart,
    GenieRoutingDecision,
    GenieSlaveInvoked,
    GenieSlaveProgress,
    GenieSlaveCompleted,
    GenieSynthesisStart,
    GenieSynthesisComplete,
    GenieCoordinationComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Lifecycle,
    Planner,
    Llm,
    Conversation,
    Knowledge,
    Coordination,
}

impl EventType {
    pub const ALL: [EventType; 33] = [
        EventType::ExecutionStart,
        EventType::ExecutionComplete,
        EventType::ExecutionError,
        EventType::ExecutionCancelled,
        EventType::PlanGenerated,
        EventType::PlanOptimized,
        EventType::PhaseStart,
        EventType::PhaseEnd,
        EventType::ToolIntent,
        EventType::ToolResult,
        EventType::ToolError,
        EventType::SelfCorrection,
        EventType::FinalSynthesis,
        EventType::RagRetrieval,
        EventType::LlmExecutionStart,
        EventType::LlmExecutionComplete,
        EventType::ConversationAgentStart,
        EventType::ConversationLlmStep,
        EventType::ConversationToolInvoked,
        EventType::ConversationToolCompleted,
        EventType::ConversationAgentComplete,
        EventType::KnowledgeRetrievalStart,
        EventType::KnowledgeRetrievalComplete,
        EventType::KnowledgeRerankingStart,
        EventType::KnowledgeRerankingComplete,
        EventType::GenieCoordinationStart,
        EventType::GenieRoutingDecision,
        EventType::GenieSlaveInvoked,
        EventType::GenieSlaveProgress,
        EventType::GenieSlaveCompleted,
        EventType::GenieSynthesisStart,
        EventType::GenieSynthesisComplete,
        EventType::GenieCoordinationComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStart => "execution_start",
            EventType::ExecutionComplete => "execution_complete",
            EventType::ExecutionError => "execution_error",
            EventType::ExecutionCancelled => "execution_cancelled",
            EventType::PlanGenerated => "plan_generated",
            EventType::PlanOptimized => "plan_optimized",
            EventType::PhaseStart => "phase_start",
            EventType::PhaseEnd => "phase_end",
            EventType::ToolIntent => "tool_intent",
            EventType::ToolResult => "tool_result",
            EventType::ToolError => "tool_error",
            EventType::SelfCorrection => "self_correction",
            EventType::FinalSynthesis => "final_synthesis",
            EventType::RagRetrieval => "rag_retrieval",
            EventType::LlmExecutionStart => "llm_execution_start",
            EventType::LlmExecutionComplete => "llm_execution_complete",
            EventType::ConversationAgentStart => "conversation_agent_start",
            EventType::ConversationLlmStep => "conversation_llm_step",
            EventType::ConversationToolInvoked => "conversation_tool_invoked",
            EventType::ConversationToolCompleted => "conversation_tool_completed",
            EventType::ConversationAgentComplete => "conversation_agent_complete",
            EventType::KnowledgeRetrievalStart => "knowledge_retrieval_start",
            EventType::KnowledgeRetrievalComplete => "knowledge_retrieval_complete",
            EventType::KnowledgeRerankingStart => "knowledge_reranking_start",
            EventType::KnowledgeRerankingComplete => "knowledge_reranking_complete",
            EventType::GenieCoordinationStart => "genie_coordination_start",
            EventType::GenieRoutingDecision => "genie_routing_decision",
            EventType::GenieSlaveInvoked => "genie_slave_invoked",
            EventType::GenieSlaveProgress => "genie_slave_progress",
            EventType::GenieSlaveCompleted => "genie_slave_completed",
            EventType::GenieSynthesisStart => "genie_synthesis_start",
            EventType::GenieSynthesisComplete => "genie_synthesis_complete",
            EventType::GenieCoordinationComplete => "genie_coordination_complete",
        }
    }

    pub fn parse(value: &str) -> Option<EventType> {
        let value = value.trim();
        EventType::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == value)
    }

    pub fn family(&self) -> EventFamily {
        match self {
            EventType::ExecutionStart
            | EventType::ExecutionComplete
            | EventType::ExecutionError
            | EventType::ExecutionCancelled => EventFamily::Lifecycle,
            EventType::PlanGenerated
            | EventType::PlanOptimized
            | EventType::PhaseStart
            | EventType::PhaseEnd
            | EventType::ToolIntent
            | EventType::ToolResult
            | EventType::ToolError
            | EventType::SelfCorrection
            | EventType::FinalSynthesis
            | EventType::RagRetrieval => EventFamily::Planner,
            EventType::LlmExecutionStart | EventType::LlmExecutionComplete => EventFamily::Llm,
            EventType::ConversationAgentStart
            | EventType::ConversationLlmStep
            | EventType::ConversationToolInvoked
            | EventType::ConversationToolCompleted
            | EventType::ConversationAgentComplete => EventFamily::Conversation,
            EventType::KnowledgeRetrievalStart
            | EventType::KnowledgeRetrievalComplete
            | EventType::KnowledgeRerankingStart
            | EventType::KnowledgeRerankingComplete => EventFamily::Knowledge,
            EventType::GenieCoordinationStart
            | EventType::GenieRoutingDecision
            | EventType::GenieSlaveInvoked
            | EventType::GenieSlaveProgress
            | EventType::GenieSlaveCompleted
            | EventType::GenieSynthesisStart
            | EventType::GenieSynthesisComplete
            | EventType::GenieCoordinationComplete => EventFamily::Coordination,
        }
    }

    /// Event types that may arrive wrapped in a `notification` envelope.
    pub fn is_nested_progress(&self) -> bool {
        matches!(
            self.family(),
            EventFamily::Llm | EventFamily::Conversation | EventFamily::Knowledge
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    FinalAnswer,
    Error,
    Cancelled,
}

impl TerminalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalKind::FinalAnswer => "final_answer",
            TerminalKind::Error => "error",
            TerminalKind::Cancelled => "cancelled",
        }
    }
}

/// Routing category of a wire event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Indicator,
    TokenUsage,
    Notification,
    SessionName,
    TaskStart,
    Terminal(TerminalKind),
    Coordination(EventType),
    Progress(EventType),
    Message,
    Unknown,
}

pub fn classify(event_name: &str) -> FrameKind {
    match event_name.trim() {
        "status_indicator_update" => FrameKind::Indicator,
        "token_update" => FrameKind::TokenUsage,
        "notification" => FrameKind::Notification,
        "session_name_update" => FrameKind::SessionName,
        "task_start" => FrameKind::TaskStart,
        "final_answer" => FrameKind::Terminal(TerminalKind::FinalAnswer),
        "error" => FrameKind::Terminal(TerminalKind::Error),
        "cancelled" => FrameKind::Terminal(TerminalKind::Cancelled),
        "message" => FrameKind::Message,
        other => match EventType::parse(other) {
            Some(event_type) if event_type.family() == EventFamily::Coordination => {
                FrameKind::Coordination(event_type)
            }
            Some(event_type) => FrameKind::Progress(event_type),
            None => FrameKind::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_round_trips_through_its_wire_name() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
        assert_eq!(EventType::parse("quantum_leap"), None);
    }

    #[test]
    fn classify_separates_routing_categories() {
        assert_eq!(classify("token_update"), FrameKind::TokenUsage);
        assert_eq!(
            classify("cancelled"),
            FrameKind::Terminal(TerminalKind::Cancelled)
        );
        assert_eq!(
            classify("genie_slave_invoked"),
            FrameKind::Coordination(EventType::GenieSlaveInvoked)
        );
        assert_eq!(
            classify("phase_start"),
            FrameKind::Progress(EventType::PhaseStart)
        );
        assert_eq!(classify("message"), FrameKind::Message);
        assert_eq!(classify("brand_new_event"), FrameKind::Unknown);
    }

    #[test]
    fn only_llm_conversation_and_knowledge_events_nest_in_notifications() {
        assert!(EventType::ConversationToolInvoked.is_nested_progress());
        assert!(EventType::KnowledgeRetrievalComplete.is_nested_progress());
        assert!(EventType::LlmExecutionStart.is_nested_progress());
        assert!(!EventType::PhaseStart.is_nested_progress());
        assert!(!EventType::GenieSlaveInvoked.is_nested_progress());
    }
}
