//! Prompt templates for grounded answers.

use crate::store::Fragment;

/// Join fragment texts in retrieval order.
pub fn build_context(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(|fragment| fragment.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt used when retrieval found nothing usable for the question.
pub fn build_no_context_prompt(question: &str) -> String {
    format!(
        r#"Question: {question}

I don't have any relevant documents uploaded to answer this question. Tell the user to upload some documents first and then ask their question again."#
    )
}

/// Prompt asking for an answer drawn only from `context`.
pub fn build_grounded_prompt(question: &str, context: &str, sources: &[String]) -> String {
    format!(
        r#"Context:
{context}

Sources: {sources}

Question: {question}

Provide a concise and accurate answer using only the context above. Include source information if relevant. If the context does not contain the answer, say so."#,
        sources = sources.join(", "),
    )
}

/// Pick the prompt for `question` given the retrieved fragments.
pub fn build_prompt(question: &str, fragments: &[Fragment], sources: &[String]) -> String {
    let context = build_context(fragments);
    if context.trim().is_empty() {
        build_no_context_prompt(question)
    } else {
        build_grounded_prompt(question, &context, sources)
    }
}
