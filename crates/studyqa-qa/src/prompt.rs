use studyqa_core::config::QaSettings;

/// Deterministic instruction template for the chat model.
///
/// The rendered prompt always contains the literal question and the context
/// string. Conversation history is included only when it is non-blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub persona_name: String,
    pub persona_description: String,
}

impl Default for PromptTemplate {
    fn default() -> Self { Self::from_settings(&QaSettings::default()) }
}

impl PromptTemplate {
    pub fn new(persona_name: impl Into<String>, persona_description: impl Into<String>) -> Self {
        Self { persona_name: persona_name.into(), persona_description: persona_description.into() }
    }

    pub fn from_settings(qa: &QaSettings) -> Self { Self::new(qa.persona_name.clone(), qa.persona_description.clone()) }

    pub fn render(&self, question: &str, context: &str, history: Option<&str>) -> String {
        let name = &self.persona_name;
        let mut out = String::with_capacity(2048 + question.len() * 2 + context.len());

        out.push_str(&format!(
            "You are {name}, {desc}. Take part in an educational conversation and give accurate, \
             detailed and helpful answers.\n\n",
            desc = self.persona_description
        ));
        out.push_str(&format!("Question to answer: {question}\n\n"));

        out.push_str("Using the context:\n");
        out.push_str("- The context below holds passages from the course material. Consult it for anything it covers.\n");
        out.push_str("- Chapters give an overview; the specific details inside them matter most.\n");
        out.push_str("- If the context is directly related to the question, build the answer on it.\n");
        out.push_str("- If it is somewhat related, use what fits and fill the gaps from general knowledge.\n");
        out.push_str("- If the context does not cover the question, answer from general knowledge anyway. Never refuse because the context is unrelated.\n\n");

        out.push_str("Handling ambiguity:\n");
        out.push_str("- When the question or the context can be read more than one way, lean towards the most probable reading given the course material.\n\n");

        out.push_str("Citing sources:\n");
        out.push_str("- When the answer draws on the context, state the page number and chapter it came from so the student can find it.\n\n");

        out.push_str("Across turns:\n");
        out.push_str("- If asked the same thing again, give a fuller answer rather than repeating the previous one word for word.\n");
        out.push_str("- When the topic changes, drop context that no longer applies.\n\n");

        out.push_str(&format!(
            "Tone:\n- Stay positive and engaged, and always speak as {name}.\n\n"
        ));

        if let Some(history) = history.map(str::trim).filter(|h| !h.is_empty()) {
            out.push_str("Conversation so far:\n");
            out.push_str(history);
            out.push_str("\n\n");
        }

        out.push_str("Context: ");
        out.push_str(context);
        out.push_str("\nQuestion: ");
        out.push_str(question);
        out.push_str("\nResponse:\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::PromptTemplate;

    #[test]
    fn render_embeds_question_context_and_persona() {
        let t = PromptTemplate::new("TutorBot", "a study helper");
        let p = t.render("What is a heap?", "A heap is a tree with the heap property.", None);
        assert!(p.contains("What is a heap?"));
        assert!(p.contains("A heap is a tree with the heap property."));
        assert!(p.contains("You are TutorBot, a study helper."));
        assert!(p.contains("page number and chapter"));
        assert!(p.contains("Never refuse because the context is unrelated"));
        assert!(p.contains("directly related") && p.contains("somewhat related"));
        assert!(p.contains("Handling ambiguity:\n- When the question or the context can be read more than one way, lean towards the most probable reading"));
        assert!(!p.contains("Conversation so far"));
        assert_eq!(p, t.render("What is a heap?", "A heap is a tree with the heap property.", None));
    }

    #[test]
    fn history_is_included_only_when_non_blank() {
        let t = PromptTemplate::default();
        assert!(!t.render("q", "c", Some("   ")).contains("Conversation so far"));
        let p = t.render("q", "c", Some("student: hi\nassistant: hello"));
        assert!(p.contains("Conversation so far:\nstudent: hi\nassistant: hello"));
    }

    #[test]
    fn empty_context_still_renders() {
        let p = PromptTemplate::default().render("Explain recursion", "", None);
        assert!(p.contains("Context: \nQuestion: Explain recursion\nResponse:"));
    }
}
