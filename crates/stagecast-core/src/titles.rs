//! Harmonized, human-readable titles for progress events.
//!
//! `title` is a pure function of `(profile, event type, payload)`: the live router
//! and the replay reconstructor both call it, which is what lets a stored log render
//! exactly like the live run did. Lifecycle events are resolved before profile
//! dispatch; unknown event types come back verbatim.

use crate::events::EventType;
use crate::payload::{number, profile_tag, succeeded, text};
use crate::profile::ProfileType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

type TitleFn = fn(&Value) -> String;

struct TitleTable {
    entries: HashMap<(ProfileType, EventType), TitleFn>,
}

impl TitleTable {
    fn build() -> Self {
        let mut entries: HashMap<(ProfileType, EventType), TitleFn> = HashMap::new();
        for (event_type, handler) in planner_titles() {
            entries.insert((ProfileType::ToolEnabled, event_type), handler);
        }
        for profile in [ProfileType::LlmOnly, ProfileType::ConversationWithTools] {
            for (event_type, handler) in conversational_titles() {
                entries.insert((profile, event_type), handler);
            }
        }
        for (event_type, handler) in rag_titles() {
            entries.insert((ProfileType::RagFocused, event_type), handler);
        }
        for (event_type, handler) in genie_titles() {
            entries.insert((ProfileType::Genie, event_type), handler);
        }
        Self { entries }
    }
}

fn table() -> &'static TitleTable {
    static TABLE: OnceLock<TitleTable> = OnceLock::new();
    TABLE.get_or_init(TitleTable::build)
}

pub fn title(profile: ProfileType, event_type: &str, payload: &Value) -> String {
    match EventType::parse(event_type) {
        Some(known) => title_for(profile, known, payload),
        None => event_type.to_string(),
    }
}

pub fn title_for(profile: ProfileType, event_type: EventType, payload: &Value) -> String {
    if let Some(title) = lifecycle_title(event_type, payload) {
        return title;
    }
    match table().entries.get(&(profile, event_type)) {
        Some(handler) => handler(payload),
        None => event_type.as_str().to_string(),
    }
}

fn lifecycle_title(event_type: EventType, payload: &Value) -> Option<String> {
    let title = match event_type {
        EventType::ExecutionStart => match text(payload, &["profile_tag"]) {
            Some(tag) => format!("Execution started ({})", at_tag(tag)),
            None => "Execution started".to_string(),
        },
        EventType::ExecutionComplete => format!(
            "Execution complete{}",
            suffix([duration(payload), token_pair(payload)])
        ),
        EventType::ExecutionError => {
            match text(payload, &["error_message", "error", "message"]) {
                Some(error) => format!("Execution failed: {error}"),
                None => "Execution failed".to_string(),
            }
        }
        EventType::ExecutionCancelled => match text(payload, &["reason", "message"]) {
            Some(reason) => format!("Execution cancelled: {reason}"),
            None => "Execution cancelled".to_string(),
        },
        _ => return None,
    };
    Some(title)
}

fn planner_titles() -> [(EventType, TitleFn); 10] {
    [
        (EventType::PlanGenerated, plan_generated),
        (EventType::PlanOptimized, plan_optimized),
        (EventType::PhaseStart, phase_start),
        (EventType::PhaseEnd, phase_end),
        (EventType::ToolIntent, tool_intent),
        (EventType::ToolResult, tool_result),
        (EventType::ToolError, tool_error),
        (EventType::SelfCorrection, self_correction),
        (EventType::FinalSynthesis, final_synthesis),
        (EventType::RagRetrieval, rag_retrieval),
    ]
}

fn conversational_titles() -> [(EventType, TitleFn); 9] {
    [
        (EventType::LlmExecutionStart, llm_execution_start),
        (EventType::LlmExecutionComplete, llm_execution_complete),
        (EventType::ConversationAgentStart, conversation_agent_start),
        (EventType::ConversationLlmStep, conversation_llm_step),
        (EventType::ConversationToolInvoked, conversation_tool_invoked),
        (EventType::ConversationToolCompleted, conversation_tool_completed),
        (EventType::ConversationAgentComplete, conversation_agent_complete),
        (EventType::KnowledgeRetrievalStart, knowledge_context_loading),
        (EventType::KnowledgeRetrievalComplete, knowledge_context_loaded),
    ]
}

fn rag_titles() -> [(EventType, TitleFn); 6] {
    [
        (EventType::KnowledgeRetrievalStart, knowledge_search_start),
        (EventType::KnowledgeRetrievalComplete, knowledge_search_complete),
        (EventType::KnowledgeRerankingStart, reranking_start),
        (EventType::KnowledgeRerankingComplete, reranking_complete),
        (EventType::LlmExecutionStart, llm_execution_start),
        (EventType::LlmExecutionComplete, llm_execution_complete),
    ]
}

fn genie_titles() -> [(EventType, TitleFn); 8] {
    [
        (EventType::GenieCoordinationStart, coordination_start),
        (EventType::GenieRoutingDecision, routing_decision),
        (EventType::GenieSlaveInvoked, slave_invoked),
        (EventType::GenieSlaveProgress, slave_progress),
        (EventType::GenieSlaveCompleted, slave_completed),
        (EventType::GenieSynthesisStart, synthesis_start),
        (EventType::GenieSynthesisComplete, synthesis_complete),
        (EventType::GenieCoordinationComplete, coordination_complete),
    ]
}

fn plan_generated(payload: &Value) -> String {
    match count(payload, &["phase_count", "total_phases"], &["phases", "plan"]) {
        Some(phases) => format!("Plan generated ({})", plural(phases, "phase")),
        None => "Plan generated".to_string(),
    }
}

fn plan_optimized(payload: &Value) -> String {
    match text(payload, &["reason", "summary"]) {
        Some(reason) => format!("Plan optimized: {reason}"),
        None => "Plan optimized".to_string(),
    }
}

fn phase_start(payload: &Value) -> String {
    let phase = number(payload, &["phase_num", "phase_number", "phase"]);
    let total = number(payload, &["total_phases"]);
    let goal = text(payload, &["goal", "phase_goal", "description"]);
    let label = match (phase, total) {
        (Some(phase), Some(total)) => format!("Phase {phase}/{total}"),
        (Some(phase), None) => format!("Phase {phase}"),
        (None, _) => "Phase".to_string(),
    };
    match (goal, phase) {
        (Some(goal), _) => format!("{label}: {goal}"),
        (None, Some(_)) => format!("{label} started"),
        (None, None) => "Phase started".to_string(),
    }
}

fn phase_end(payload: &Value) -> String {
    let label = match number(payload, &["phase_num", "phase_number", "phase"]) {
        Some(phase) => format!("Phase {phase} complete"),
        None => "Phase complete".to_string(),
    };
    format!("{label}{}", suffix([duration(payload)]))
}

fn tool_intent(payload: &Value) -> String {
    format!("Calling {}", tool_name(payload).unwrap_or("tool"))
}

fn tool_result(payload: &Value) -> String {
    let tool = tool_name(payload).unwrap_or("Tool");
    match count(payload, &["row_count", "rows"], &["results"]) {
        Some(rows) => format!("{tool} returned {}", plural(rows, "row")),
        None => format!("{tool} completed"),
    }
}

fn tool_error(payload: &Value) -> String {
    failed(tool_name(payload).unwrap_or("Tool"), payload)
}

fn self_correction(payload: &Value) -> String {
    if let Some(reason) = text(payload, &["reason", "correction_type"]) {
        return format!("Self-correction: {reason}");
    }
    match number(payload, &["attempt"]) {
        Some(attempt) => format!("Self-correction attempt {attempt}"),
        None => "Self-correction".to_string(),
    }
}

fn final_synthesis(_payload: &Value) -> String {
    "Synthesizing final answer".to_string()
}

fn rag_retrieval(payload: &Value) -> String {
    match count(
        payload,
        &["case_count", "cases_found"],
        &["cases", "champion_cases"],
    ) {
        Some(cases) => format!("Retrieved {}", plural(cases, "champion case")),
        None => "Retrieved champion cases".to_string(),
    }
}

fn llm_execution_start(payload: &Value) -> String {
    match text(payload, &["model"]) {
        Some(model) => format!("Calling {model}"),
        None => "Calling LLM".to_string(),
    }
}

fn llm_execution_complete(payload: &Value) -> String {
    format!(
        "LLM response received{}",
        suffix([token_pair(payload), duration(payload)])
    )
}

fn conversation_agent_start(payload: &Value) -> String {
    match count(payload, &["tool_count"], &["available_tools", "tools"]) {
        Some(tools) => format!("Agent started with {}", plural(tools, "tool")),
        None => "Agent started".to_string(),
    }
}

fn conversation_llm_step(payload: &Value) -> String {
    let step = number(payload, &["step_number", "step"]);
    let name = text(payload, &["step_name", "description"]);
    match (step, name) {
        (Some(step), Some(name)) => format!("LLM step {step}: {name}"),
        (Some(step), None) => format!("LLM step {step}"),
        (None, Some(name)) => format!("LLM step: {name}"),
        (None, None) => "LLM step".to_string(),
    }
}

fn conversation_tool_invoked(payload: &Value) -> String {
    format!("Invoking {}", tool_name(payload).unwrap_or("tool"))
}

fn conversation_tool_completed(payload: &Value) -> String {
    let tool = tool_name(payload).unwrap_or("Tool");
    if !succeeded(payload) {
        return failed(tool, payload);
    }
    format!("{tool} completed{}", suffix([duration(payload)]))
}

fn conversation_agent_complete(payload: &Value) -> String {
    if !succeeded(payload) {
        return failed("Agent", payload);
    }
    let calls = count(payload, &["tool_call_count", "tools_called"], &["tools_used"])
        .map(|calls| plural(calls, "tool call"));
    format!("Agent complete{}", suffix([calls, duration(payload)]))
}

fn knowledge_context_loading(_payload: &Value) -> String {
    "Loading knowledge context".to_string()
}

fn knowledge_context_loaded(payload: &Value) -> String {
    let documents = document_count(payload).map(|documents| plural(documents, "document"));
    format!("Knowledge context loaded{}", suffix([documents]))
}

fn knowledge_search_start(payload: &Value) -> String {
    match count(payload, &["collection_count"], &["collections"]) {
        Some(collections) => format!("Searching {}", plural(collections, "knowledge collection")),
        None => "Searching knowledge".to_string(),
    }
}

fn knowledge_search_complete(payload: &Value) -> String {
    let label = match document_count(payload) {
        Some(documents) => format!("Retrieved {}", plural(documents, "document")),
        None => "Retrieval complete".to_string(),
    };
    format!("{label}{}", suffix([duration(payload)]))
}

fn reranking_start(payload: &Value) -> String {
    match document_count(payload) {
        Some(documents) => format!("Reranking {}", plural(documents, "document")),
        None => "Reranking documents".to_string(),
    }
}

fn reranking_complete(payload: &Value) -> String {
    match number(payload, &["top_k", "kept", "document_count"]) {
        Some(kept) => format!("Reranked to top {kept}"),
        None => "Reranking complete".to_string(),
    }
}

fn coordination_start(payload: &Value) -> String {
    match count(
        payload,
        &["expert_count", "profile_count"],
        &["available_profiles", "slave_profiles"],
    ) {
        Some(experts) => format!("Coordinating {}", plural(experts, "expert")),
        None => "Coordination started".to_string(),
    }
}

fn routing_decision(payload: &Value) -> String {
    let selected = string_list(payload, &["selected_profiles", "profiles"]);
    if selected.is_empty() {
        return "No expert selected".to_string();
    }
    let tags: Vec<String> = selected.iter().map(|tag| at_tag(tag)).collect();
    format!("Routing to {}", tags.join(", "))
}

fn slave_invoked(payload: &Value) -> String {
    match profile_tag(payload) {
        Some(tag) => format!("Invoking {}", at_tag(tag)),
        None => "Invoking expert".to_string(),
    }
}

fn slave_progress(payload: &Value) -> String {
    let message = text(payload, &["message", "step", "status"]);
    match (profile_tag(payload), message) {
        (Some(tag), Some(message)) => format!("{}: {message}", at_tag(tag)),
        (Some(tag), None) => format!("{} working", at_tag(tag)),
        (None, Some(message)) => message.to_string(),
        (None, None) => "Expert progress".to_string(),
    }
}

fn slave_completed(payload: &Value) -> String {
    let label = profile_tag(payload)
        .map(at_tag)
        .unwrap_or_else(|| "Expert".to_string());
    if !succeeded(payload) {
        return failed(&label, payload);
    }
    format!("{label} completed{}", suffix([duration(payload)]))
}

fn synthesis_start(payload: &Value) -> String {
    match count(
        payload,
        &["profile_count", "expert_count"],
        &["profiles_used", "responses"],
    ) {
        Some(experts) => format!("Synthesizing results from {}", plural(experts, "expert")),
        None => "Synthesizing results".to_string(),
    }
}

fn synthesis_complete(payload: &Value) -> String {
    format!("Synthesis complete{}", suffix([duration(payload)]))
}

fn coordination_complete(payload: &Value) -> String {
    if !succeeded(payload) {
        return failed("Coordination", payload);
    }
    let experts = count(payload, &["profile_count", "expert_count"], &["profiles_used"])
        .map(|experts| plural(experts, "expert"));
    format!("Coordination complete{}", suffix([experts, duration(payload)]))
}

fn failed(subject: &str, payload: &Value) -> String {
    match text(payload, &["error", "error_message", "message"]) {
        Some(error) => format!("{subject} failed: {error}"),
        None => format!("{subject} failed"),
    }
}

fn tool_name(payload: &Value) -> Option<&str> {
    text(payload, &["tool_name", "tool", "name"])
}

fn document_count(payload: &Value) -> Option<u64> {
    count(
        payload,
        &["document_count", "documents_retrieved"],
        &["documents"],
    )
}

/// Seconds with one decimal place.
pub fn format_duration_ms(duration_ms: u64) -> String {
    format!("{:.1}s", duration_ms as f64 / 1000.0)
}

pub fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn duration(payload: &Value) -> Option<String> {
    number(payload, &["duration_ms", "total_duration_ms", "elapsed_ms"]).map(format_duration_ms)
}

fn token_pair(payload: &Value) -> Option<String> {
    let input = number(payload, &["input_tokens", "turn_input"])?;
    let output = number(payload, &["output_tokens", "turn_output"])?;
    Some(format!("{input} in / {output} out"))
}

fn at_tag(tag: &str) -> String {
    format!("@{}", tag.trim().trim_start_matches('@'))
}

fn suffix<const N: usize>(parts: [Option<String>; N]) -> String {
    let parts: Vec<String> = parts.into_iter().flatten().collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn count(payload: &Value, count_keys: &[&str], list_keys: &[&str]) -> Option<u64> {
    number(payload, count_keys).or_else(|| {
        list_keys.iter().find_map(|key| {
            payload
                .get(*key)
                .and_then(Value::as_array)
                .map(|items| items.len() as u64)
        })
    })
}

fn string_list<'a>(payload: &'a Value, keys: &[&str]) -> Vec<&'a str> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
