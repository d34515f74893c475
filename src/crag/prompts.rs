use crate::config::DomainConfig;

/// Returned verbatim by the generator when the context lacks the answer.
pub const NO_RELEVANT_INFO: &str = "The documents contain no relevant information.";

/// External query, web search found nothing.
pub const EXTERNAL_NOT_FOUND: &str = "No answer could be found in external sources.";

/// Internal query judged incorrect, web search found nothing.
pub const NOTHING_FOUND: &str =
    "Sorry, no relevant information could be found internally or externally.";

pub fn domain_prompt(domain: &DomainConfig, query: &str) -> String {
    format!(
        r#"You are a classifier that decides whether a question belongs to the internal document collection: {description}.
If the question is related to any of these topics: {topics}, answer "internal"; otherwise answer "external".

Question: {query}"#,
        description = domain.description,
        topics = domain.topics.join(", "),
        query = query,
    )
}

pub fn evaluation_prompt(query: &str, documents: &str) -> String {
    format!(
        r#"You are a data quality inspector. Judge whether the documents below can answer the user's question.
Question: {query}
Documents: {documents}

Choose exactly one:
- "Correct": the documents fully and clearly answer the question
- "Ambiguous": the documents are partially relevant or the information is insufficient
- "Incorrect": the documents are unrelated to the question or misleading

Output only that one word."#
    )
}

pub fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        r#"Answer the user's question based on the content below.
If the content does not provide the answer, reply honestly with "{NO_RELEVANT_INFO}"

Context:
{context}

Question:
{query}"#
    )
}
