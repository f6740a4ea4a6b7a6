//! RAG Orchestrator (C11): retrieve, optionally rerank, assemble a grounded
//! prompt, and drive the configured `Llm` to completion or a token stream.

use common::{
    domain::{Fact, GraphStore, Llm, LlmMessage},
    error::AppError,
};
use futures::stream::BoxStream;

use crate::{
    reranking::RerankerLease,
    retrieve::{retrieve, RetrievalOutcome},
};

const SYSTEM_PROMPT: &str = "You are a diving-instruction assistant. Answer strictly from the \
facts provided below; never draw on outside knowledge. Cite every claim you make with the \
bracketed source it came from, e.g. [Fact 2]. If the facts do not contain enough information to \
answer the question, say plainly that the knowledge base does not have an answer rather than \
guessing.";

#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub context: Vec<Fact>,
    pub num_sources: usize,
    pub reranked: bool,
}

fn build_user_prompt(question: &str, facts: &[Fact]) -> String {
    if facts.is_empty() {
        return format!(
            "Question: {question}\n\nNo facts were retrieved. There is nothing to cite; refuse \
to answer and state that the knowledge base has no relevant information."
        );
    }

    let enumerated = facts
        .iter()
        .enumerate()
        .map(|(i, fact)| {
            format!(
                "[Fact {}] {} ({} {} {})",
                i + 1,
                fact.fact,
                fact.source_entity,
                fact.relation_type,
                fact.target_entity
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("Facts:\n{enumerated}\n\nQuestion: {question}")
}

pub struct RagOrchestrator<'a> {
    pub graph: &'a dyn GraphStore,
    pub llm: &'a dyn Llm,
    pub reranker: Option<&'a RerankerLease>,
    pub retrieval_multiplier: u32,
}

impl<'a> RagOrchestrator<'a> {
    pub async fn query(
        &self,
        question: &str,
        temperature: f32,
        max_tokens: u32,
        top_k: usize,
        group_ids: Option<&[String]>,
        use_reranking: bool,
    ) -> Result<RagAnswer, AppError> {
        let outcome = self
            .retrieve(question, top_k, group_ids, use_reranking)
            .await?;

        let messages = vec![
            LlmMessage::system(SYSTEM_PROMPT),
            LlmMessage::user(build_user_prompt(question, &outcome.facts)),
        ];
        let answer = self.llm.complete(messages, temperature, max_tokens).await?;

        Ok(RagAnswer {
            answer,
            num_sources: outcome.facts.len(),
            reranked: outcome.reranked,
            context: outcome.facts,
        })
    }

    pub async fn stream(
        &self,
        question: &str,
        temperature: f32,
        max_tokens: u32,
        top_k: usize,
        group_ids: Option<&[String]>,
        use_reranking: bool,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        let outcome = self
            .retrieve(question, top_k, group_ids, use_reranking)
            .await?;

        let messages = vec![
            LlmMessage::system(SYSTEM_PROMPT),
            LlmMessage::user(build_user_prompt(question, &outcome.facts)),
        ];
        self.llm.stream(messages, temperature, max_tokens).await
    }

    async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        group_ids: Option<&[String]>,
        use_reranking: bool,
    ) -> Result<RetrievalOutcome, AppError> {
        retrieve(
            self.graph,
            self.reranker,
            question,
            top_k,
            group_ids,
            use_reranking,
            self.retrieval_multiplier,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_prompt_instructs_refusal() {
        let prompt = build_user_prompt("what is nitrox?", &[]);
        assert!(prompt.contains("refuse"));
        assert!(!prompt.contains("[Fact"));
    }

    #[test]
    fn populated_context_prompt_enumerates_facts_with_citation_markers() {
        let facts = vec![Fact {
            fact: "nitrox reduces nitrogen loading".into(),
            source_entity: "Nitrox".into(),
            target_entity: "Nitrogen loading".into(),
            relation_type: "REDUCES".into(),
            valid_at: chrono::Utc::now(),
            invalid_at: None,
            episodes: vec![],
        }];
        let prompt = build_user_prompt("what is nitrox?", &facts);
        assert!(prompt.contains("[Fact 1]"));
        assert!(prompt.contains("nitrox reduces nitrogen loading"));
    }
}
