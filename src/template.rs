use std::collections::HashMap;

pub const TERM_HEADER: &str = "## Term";
pub const ONE_SENTENCE_HEADER: &str = "## One-Sentence Definition";
pub const FULL_DEFINITION_HEADER: &str = "## Full Definition";
pub const APPLICATIONS_HEADER: &str = "## Applications";
pub const RELATED_CONCEPTS_HEADER: &str = "## Related Concepts";
pub const ILLUSTRATION_HEADER: &str = "## Illustration";
pub const BOUNDARIES_HEADER: &str = "## Boundaries";
pub const SOURCE_CONTEXT_HEADER: &str = "## Source Context";

/// Required sections of a generated note, in order.
pub const REQUIRED_SECTIONS: [&str; 8] = [
    TERM_HEADER,
    ONE_SENTENCE_HEADER,
    FULL_DEFINITION_HEADER,
    APPLICATIONS_HEADER,
    RELATED_CONCEPTS_HEADER,
    ILLUSTRATION_HEADER,
    BOUNDARIES_HEADER,
    SOURCE_CONTEXT_HEADER,
];

/// A note containing this has already been populated.
pub const COMPLETION_MARKER: &str = TERM_HEADER;

pub const PENDING_PLACEHOLDER: &str = "_Pending_";

const DEFAULT_INSTRUCTIONS: &str = "You are writing a glossary note for a personal knowledge base. \
Define the term \"{{term}}\" as it is used in the source note \"{{origin}}\" quoted below. \
Answer in markdown using exactly these section headers, in this order, and nothing before the first header:";

const OUTPUT_RULES: &str = "Keep the one-sentence definition to a single sentence. \
Do not include code blocks or HTML. \
Under the Source Context header, the first line must be the origin link given below.";

pub fn backlink_line(origin_name: &str) -> String {
    format!("Origin: [[{}]]", origin_name)
}

/// Replaces `{{key}}` placeholders with values from `context`. Unknown keys
/// render empty; an unterminated `{{` is kept literally.
pub fn render_template(template: &str, context: &HashMap<&str, &str>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("{{") {
        result.push_str(&remaining[..start]);
        let after_open = &remaining[start + 2..];

        if let Some(end) = after_open.find("}}") {
            let key = after_open[..end].trim();
            result.push_str(context.get(key).copied().unwrap_or(""));
            remaining = &after_open[end + 2..];
        } else {
            result.push_str("{{");
            remaining = after_open;
        }
    }
    result.push_str(remaining);
    result
}

/// First `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct PromptInput<'a> {
    pub term: &'a str,
    pub origin_name: &'a str,
    pub origin_text: &'a str,
    pub char_limit: usize,
    pub custom_instructions: Option<&'a str>,
}

pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let context: HashMap<&str, &str> =
        HashMap::from([("term", input.term), ("origin", input.origin_name)]);
    let instructions = render_template(
        input.custom_instructions.unwrap_or(DEFAULT_INSTRUCTIONS),
        &context,
    );

    let mut prompt = String::with_capacity(instructions.len() + input.char_limit + 512);
    prompt.push_str(&instructions);
    prompt.push_str("\n\n");
    for header in REQUIRED_SECTIONS {
        prompt.push_str(header);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(OUTPUT_RULES);
    prompt.push_str("\n\nTerm: ");
    prompt.push_str(input.term);
    prompt.push_str("\nOrigin link: ");
    prompt.push_str(&backlink_line(input.origin_name));
    prompt.push_str("\n\nSource note:\n\"\"\"\n");
    prompt.push_str(truncate_chars(input.origin_text, input.char_limit));
    prompt.push_str("\n\"\"\"\n");
    prompt
}

/// Local stand-in written when the remote model gave nothing usable.
pub fn fallback_document(term: &str, origin_name: &str) -> String {
    let mut out = String::new();
    for (i, header) in REQUIRED_SECTIONS.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(header);
        out.push('\n');
        match *header {
            TERM_HEADER => out.push_str(term),
            SOURCE_CONTEXT_HEADER => out.push_str(&backlink_line(origin_name)),
            _ => out.push_str(PENDING_PLACEHOLDER),
        }
        out.push('\n');
    }
    out
}
