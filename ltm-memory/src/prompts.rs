//! Prompt templates for memory reconciliation and the chat agent

use chrono::{DateTime, Utc};

/// Placeholder used in prompts when there is no stored memory yet
pub const EMPTY_MEMORY_PLACEHOLDER: &str = "(empty)";

/// Name of the memory tool exposed to the agent
pub const UPDATE_MEMORY_TOOL: &str = "update_memory";

pub const META_CONTEXT: &str = "You are a helpful assistant who lives in a chatbot user interface whose singular purpose is to improve the life of the user.";

pub const DOWNSTREAM_USE_CASES: &str =
    "personal knowledge management, context for life coach, therapist, travel planner, etc.";

pub const TOOL_INSTRUCTIONS: &str = r#"You have access to an 'update_memory' tool. Use it when the user shares information they will likely benefit from you remembering. The memory system uses temporal markers like [recorded:], [since:], [until:], [on:], [scheduled:], [as_of:] and [expires:] to track when information was mentioned and when it is relevant.

Anything you submit is merged into the user's existing memory. You may also describe how the existing memory should change, including deletions.

Save information that will help you serve the user better in future conversations:
- Personal facts, preferences, and goals
- Ongoing projects or interests
- Important dates or plans
- How they prefer you to interact with them

Don't save:
- One-time requests or temporary information
- What we just discussed in this conversation
- Public information that can easily be found on the internet"#;

/// Standing rules for merging new information into a memory file
pub const RECONCILE_INSTRUCTIONS: &str = r#"Incorporate the new information, and any instructions it contains, to add, update, or delete information in the user's existing memory. The updated memory can be as long as it needs to be to capture everything likely to be valuable in future interactions.

Rules:
1. Write the whole memory from a first-person user perspective, using "I", "my", "me". For example: "I have a dog named Max", not "The user has a dog named Max".
2. Never drop a fact from the existing memory unless the new information explicitly contradicts it or asks for it to be removed.
3. When new information conflicts with old information, the new information is correct. Keep the old fact as dated history using temporal markers instead of deleting it, unless it is obsolete noise.
4. Annotate facts with temporal markers. Every newly recorded fact gets [recorded:TODAY].
5. Collapse duplicates and superseded phrasing. Do not repeat the same fact in different words.

Temporal markers (combine as needed):
- [recorded:YYYY-MM-DD] when the information was mentioned to you
- [since:YYYY-MM-DD] when something started
- [until:YYYY-MM-DD] when something ended or will end
- [on:YYYY-MM-DD] a specific date
- [scheduled:YYYY-MM-DD] or [scheduled:YYYY-MM-DD to YYYY-MM-DD] a future event
- [as_of:YYYY-MM-DD] information true at a specific time
- [expires:YYYY-MM-DD] when the information becomes outdated
Use YYYY-MM when the day is unknown and YYYY when the month is unknown.

Examples:
- I work at Google [recorded:2025-01-30][since:2023-06-01]
- I have a trip to Japan [recorded:2025-01-30][scheduled:2025-03-15 to 2025-03-25]
- My dog Max is 5 years old [recorded:2025-01-30][as_of:2025-01-30]
- I'm taking Spanish lessons [since:2024-09-01][until:2025-06-30]
- My gym membership [expires:2025-12-31]
- I graduated from MIT [on:2020-05-15]

Reply with the complete updated memory text only, with no preamble or commentary."#;

/// Human-readable UTC time used inside prompts
pub fn format_prompt_datetime(now: DateTime<Utc>) -> String {
    now.format("%B %d, %Y %H:%M:%S").to_string()
}

fn memory_or_placeholder(memory: &str) -> &str {
    if memory.trim().is_empty() {
        EMPTY_MEMORY_PLACEHOLDER
    } else {
        memory
    }
}

/// Build the full reconciliation prompt sent to the completion service
pub fn format_update_prompt(existing_memory: &str, new_info: &str, now: DateTime<Utc>) -> String {
    let today = now.format("%Y-%m-%d");

    format!(
        r#"<meta_context>
{META_CONTEXT}
</meta_context>

<downstream_use_cases>
{DOWNSTREAM_USE_CASES}
</downstream_use_cases>

<instructions>
{RECONCILE_INSTRUCTIONS}
</instructions>

<existing_memory>
{existing}
</existing_memory>

<new_information>
{new_info}
</new_information>

<current_datetime_utc>
{datetime}
</current_datetime_utc>

<reminders>
- Ensure NO valuable details are lost from the existing memory unless explicitly contradicted
- Today's date is {today}; add [recorded:{today}] to new information
- Update temporal markers when information changes (e.g. job change: add [until:] to the old job, [since:] to the new one)
- Keep historical information with proper markers rather than deleting it
- Write everything from first-person perspective (I, my, me)
- Be precise with dates when known, use month/year when the day is unknown, year when the month is unknown
</reminders>"#,
        existing = memory_or_placeholder(existing_memory),
        new_info = new_info.trim(),
        datetime = format_prompt_datetime(now),
    )
}

/// System prompt the agent sees throughout a conversation
pub fn format_agent_system_prompt(user_memory: &str) -> String {
    format!(
        r#"<meta_context>
{META_CONTEXT}
</meta_context>

<downstream_use_cases>
{DOWNSTREAM_USE_CASES}
</downstream_use_cases>

<tool_instructions>
{TOOL_INSTRUCTIONS}
</tool_instructions>

<existing_user_memory>
{memory}
</existing_user_memory>"#,
        memory = memory_or_placeholder(user_memory),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 30, 14, 5, 9).unwrap()
    }

    #[test]
    fn empty_memory_uses_placeholder() {
        let prompt = format_update_prompt("", "I like tea", now());
        assert!(prompt.contains("<existing_memory>\n(empty)\n</existing_memory>"));

        let prompt = format_update_prompt("   \n", "I like tea", now());
        assert!(prompt.contains("<existing_memory>\n(empty)\n</existing_memory>"));
    }

    #[test]
    fn prompt_carries_inputs_and_time() {
        let prompt = format_update_prompt(
            "I have a dog named Max [recorded:2024-01-01]",
            "  I also have a cat named Luna \n",
            now(),
        );

        assert!(prompt.contains("I have a dog named Max [recorded:2024-01-01]"));
        assert!(prompt.contains("<new_information>\nI also have a cat named Luna\n</new_information>"));
        assert!(prompt.contains("January 30, 2025 14:05:09"));
        assert!(prompt.contains("[recorded:2025-01-30]"));
    }

    #[test]
    fn instructions_name_every_marker() {
        for keyword in crate::temporal::MARKER_KEYWORDS {
            assert!(
                RECONCILE_INSTRUCTIONS.contains(&format!("[{}:", keyword)),
                "missing {keyword}"
            );
        }
        assert!(RECONCILE_INSTRUCTIONS.contains("first-person"));
    }

    #[test]
    fn agent_prompt_embeds_memory() {
        let prompt = format_agent_system_prompt("I like tea");
        assert!(prompt.contains("<existing_user_memory>\nI like tea\n</existing_user_memory>"));
        assert!(prompt.contains(UPDATE_MEMORY_TOOL));

        let prompt = format_agent_system_prompt("");
        assert!(prompt.contains("(empty)"));
    }
}
