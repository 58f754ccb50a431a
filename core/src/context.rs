//! Context budgeter: a pure transform from the freshly assembled system
//! prompt plus the conversational suffix to a bounded message list, with a
//! diagnostic event describing what was dropped.

use aidesk_protocol::ChatMessage;
use aidesk_protocol::ContextTrimEvent;
use aidesk_protocol::MessageRole;

pub const TRUNCATION_MARKER: &str = "…(truncated)";

#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub max_messages: usize,
    pub max_chars: usize,
}

#[derive(Debug)]
pub struct BudgetOutcome {
    /// System prompt first, then the surviving suffix, oldest first.
    pub messages: Vec<ChatMessage>,
    pub trim: Option<ContextTrimEvent>,
}

/// Deterministic trim:
/// 1. The system prompt is always kept. If it alone exceeds the budget it is
///    truncated at the end with an explicit marker.
/// 2. At most `max_messages` most-recent suffix messages are kept.
/// 3. Oldest groups are dropped until the character estimate fits. An
///    assistant message carrying tool calls and its paired tool results are
///    dropped as a single group.
pub fn budget(
    mut system: ChatMessage,
    history: Vec<ChatMessage>,
    limits: ContextLimits,
) -> BudgetOutcome {
    let original = history.len();

    if system.content.len() > limits.max_chars {
        let keep = limits
            .max_chars
            .saturating_sub(TRUNCATION_MARKER.len())
            .min(system.content.len());
        let mut end = keep;
        while end > 0 && !system.content.is_char_boundary(end) {
            end -= 1;
        }
        system.content.truncate(end);
        system.content.push_str(TRUNCATION_MARKER);
    }

    // Step 2: message-count cap on the suffix.
    let start = original.saturating_sub(limits.max_messages);
    let mut kept: Vec<ChatMessage> = history.into_iter().skip(start).collect();

    // The cut must not strand tool results whose assistant parent was
    // dropped; orphaned leading tool messages go with their group.
    while kept
        .first()
        .is_some_and(|m| m.role == MessageRole::Tool)
    {
        kept.remove(0);
    }

    // Step 3: character budget over groups.
    let mut groups = group(kept);
    let system_chars = system.char_estimate();
    let mut total: usize = system_chars + groups.iter().map(|g| group_chars(g)).sum::<usize>();
    while total > limits.max_chars && !groups.is_empty() {
        let dropped = groups.remove(0);
        total -= group_chars(&dropped);
    }

    let mut messages = Vec::with_capacity(1 + groups.iter().map(Vec::len).sum::<usize>());
    messages.push(system);
    for g in groups {
        messages.extend(g);
    }

    let survivors = messages.len() - 1;
    let trim = if survivors < original {
        Some(ContextTrimEvent {
            dropped: original - survivors,
            kept: survivors,
        })
    } else {
        None
    };

    BudgetOutcome { messages, trim }
}

/// Splits a message list into droppable units: `[assistant(tool_calls),
/// tool...]` stay together, everything else stands alone.
fn group(messages: Vec<ChatMessage>) -> Vec<Vec<ChatMessage>> {
    let mut groups: Vec<Vec<ChatMessage>> = Vec::new();
    for message in messages {
        let joins_previous = message.role == MessageRole::Tool
            && groups.last().is_some_and(|g| {
                g.first()
                    .is_some_and(|head| head.tool_calls.is_some())
            });
        if joins_previous {
            if let Some(last) = groups.last_mut() {
                last.push(message);
            }
        } else {
            groups.push(vec![message]);
        }
    }
    groups
}

fn group_chars(group: &[ChatMessage]) -> usize {
    group.iter().map(ChatMessage::char_estimate).sum()
}
