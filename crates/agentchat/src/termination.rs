//! Termination predicates
//!
//! A predicate looks at the message an agent just received and decides whether
//! the conversation is over. Messages may lack content entirely; that is never
//! an error and never terminates.

use llm_core::ChatMessage;
use std::sync::Arc;

use crate::code_exec::extract_code;

/// Sentinel that marks a finished task
pub const TERMINATE: &str = "TERMINATE";

/// Reply that asks the retrieval proxy for more context
pub const UPDATE_CONTEXT: &str = "UPDATE CONTEXT";

/// Shared predicate handed to an agent
pub type TerminationPredicate = Arc<dyn Fn(&ChatMessage) -> bool + Send + Sync>;

/// True when the trimmed content ends with `TERMINATE` (case-sensitive)
pub fn ends_with_terminate(message: &ChatMessage) -> bool {
    message.text().trim_end().ends_with(TERMINATE)
}

/// True when the content is exactly `TERMINATE`
pub fn exact_terminate(message: &ChatMessage) -> bool {
    message.text() == TERMINATE
}

/// Whether `UPDATE CONTEXT` appears in the first or last 20 characters
pub fn asks_for_context_update(content: &str) -> bool {
    let chars: Vec<char> = content.chars().collect();
    let head: String = chars.iter().take(20).collect();
    let tail: String = chars[chars.len().saturating_sub(20)..].iter().collect();

    head.to_uppercase().contains(UPDATE_CONTEXT) || tail.to_uppercase().contains(UPDATE_CONTEXT)
}

/// Predicate for the retrieval proxy: anything that is neither python code to
/// run nor a request for more context ends the chat.
pub fn retrieve_chat_terminate(message: &ChatMessage) -> bool {
    let Some(content) = message.content.as_deref() else {
        return false;
    };
    if extract_code(content).iter().any(|block| block.lang == "python") {
        return false;
    }
    !asks_for_context_update(content)
}

pub fn predicate<F>(f: F) -> TerminationPredicate
where
    F: Fn(&ChatMessage) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::Role;

    fn msg(content: &str) -> ChatMessage {
        ChatMessage::assistant(content)
    }

    #[test]
    fn test_done_then_terminate() {
        assert!(ends_with_terminate(&msg("Done. TERMINATE")));
    }

    #[test]
    fn test_continue_does_not_terminate() {
        assert!(!ends_with_terminate(&msg("CONTINUE, more work needed")));
    }

    #[test]
    fn test_empty_content() {
        assert!(!ends_with_terminate(&msg("")));
    }

    #[test]
    fn test_missing_content() {
        assert!(!ends_with_terminate(&ChatMessage::empty(Role::Assistant)));
        assert!(!exact_terminate(&ChatMessage::empty(Role::Assistant)));
        assert!(!retrieve_chat_terminate(&ChatMessage::empty(Role::Assistant)));
    }

    #[test]
    fn test_exactly_terminate_and_trailing_whitespace() {
        assert!(ends_with_terminate(&msg("TERMINATE")));
        assert!(ends_with_terminate(&msg("All good.\nTERMINATE\n\n  ")));
    }

    #[test]
    fn test_strict_suffix() {
        assert!(!ends_with_terminate(&msg("TERMINATE.")));
        assert!(!ends_with_terminate(&msg("terminate")));
        assert!(!ends_with_terminate(&msg("TERMINATE now")));
        assert!(!ends_with_terminate(&msg("  TERMINATE!")));
    }

    #[test]
    fn test_exact_terminate() {
        assert!(exact_terminate(&msg("TERMINATE")));
        assert!(!exact_terminate(&msg("Done. TERMINATE")));
    }

    #[test]
    fn test_context_update_detection() {
        assert!(asks_for_context_update("update context"));
        assert!(asks_for_context_update(
            "I could not find the answer in the given context, please UPDATE CONTEXT"
        ));
        assert!(!asks_for_context_update(
            "The answer is long enough that UPDATE CONTEXT sits in the middle of it and nowhere else."
        ));
    }

    #[test]
    fn test_retrieve_chat_terminate() {
        assert!(retrieve_chat_terminate(&msg("The answer is 42.")));
        assert!(!retrieve_chat_terminate(&msg("UPDATE CONTEXT")));
        assert!(!retrieve_chat_terminate(&msg(
            "Run this:\n```python\nprint(1)\n```"
        )));
    }

    #[test]
    fn test_retrieve_chat_only_python_keeps_going() {
        assert!(retrieve_chat_terminate(&msg("Run:\n```sh\necho hi\n```")));
        assert!(retrieve_chat_terminate(&msg("```\nprint(1)\n```")));
        assert!(!retrieve_chat_terminate(&msg("```sh\necho hi\n```\n```python\nprint(2)\n```")));
    }

    #[test]
    fn test_predicate_wrapper() {
        let p = predicate(ends_with_terminate);
        assert!(p(&msg("ok TERMINATE")));
    }
}
