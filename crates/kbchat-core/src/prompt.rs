//! Grounding instruction sent to every provider

/// Reply the model must give when the documents do not contain the answer
pub const NOT_IN_DOCUMENTS: &str =
    "I cannot answer this because the information is not in the provided documents.";

/// Build the system instruction with the knowledge base corpus interpolated verbatim
pub fn grounding_instruction(corpus: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are an expert factual assistant. ");
    prompt.push_str("Your ONLY source of truth is the knowledge base documents below.\n\n");

    prompt.push_str("CRITICAL RULES:\n");
    prompt.push_str("1. If the answer is NOT explicitly stated in the documents, you MUST reply: '");
    prompt.push_str(NOT_IN_DOCUMENTS);
    prompt.push_str("'\n");
    prompt.push_str("2. Do NOT make things up, guess, or use outside knowledge.\n");
    prompt.push_str("3. Connect facts across documents when needed, but ONLY facts they state.\n");
    prompt.push_str("4. Be concise and human-like. Use markdown for tables or lists if necessary.\n\n");

    prompt.push_str("# KNOWLEDGE BASE\n");
    prompt.push_str(corpus);
    prompt.push('\n');

    prompt
}

/// Greeting shown when a chat session starts
pub fn welcome_message(document_count: usize) -> String {
    format!(
        "Hello! I am ready to answer questions about the **{} document(s)** the staff has provided. \
         What would you like to know?",
        document_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_is_verbatim() {
        let corpus = "\n\n--- DOCUMENT: a.txt ---\nLine {with} braces & 'quotes'";
        let prompt = grounding_instruction(corpus);
        assert!(prompt.contains(corpus));
        assert!(prompt.contains(NOT_IN_DOCUMENTS));
    }

    #[test]
    fn test_rules_precede_corpus() {
        let prompt = grounding_instruction("CORPUS-MARKER");
        let rules = prompt.find("CRITICAL RULES").unwrap();
        let corpus = prompt.find("CORPUS-MARKER").unwrap();
        assert!(rules < corpus);
    }

    #[test]
    fn test_instruction_is_deterministic() {
        assert_eq!(grounding_instruction("x"), grounding_instruction("x"));
    }

    #[test]
    fn test_welcome_message_counts_documents() {
        assert!(welcome_message(3).contains("**3 document(s)**"));
    }
}
