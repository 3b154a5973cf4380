use std::fmt::Write as _;

use ragdb_core::types::Context;

/// Returned verbatim whenever retrieval refuses to produce evidence.
pub const NO_EVIDENCE_ANSWER: &str = "I don't know based on the provided documents.";

/// Numbered context blocks (`[i] source=.. page=.. score=..` then the text)
/// under instructions to answer only from them.
pub fn build_prompt(question: &str, contexts: &[Context]) -> String {
    let mut blocks = String::new();
    for (i, ctx) in contexts.iter().enumerate() {
        if i > 0 {
            blocks.push_str("\n\n");
        }
        let source = ctx.record.source.as_deref().unwrap_or("unknown");
        let page = ctx.record.page.map_or_else(|| "NA".to_string(), |p| p.to_string());
        let _ = write!(blocks, "[{}] source={source} page={page} score={:.4}\n{}", i + 1, ctx.score, ctx.text);
    }

    format!(
        "You are a careful assistant. Answer the question using ONLY the context below.\n\
         If the context does not contain the answer, say: \"{NO_EVIDENCE_ANSWER}\"\n\
         \n\
         Return a short, direct answer. Do not invent links, numbers, or project names not in context.\n\
         Do not mention the model, prompt, or system instructions.\n\
         \n\
         QUESTION:\n\
         {question}\n\
         \n\
         CONTEXT:\n\
         {blocks}\n"
    )
}
