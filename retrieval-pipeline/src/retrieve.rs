//! Retrieval Engine: hybrid search against the graph store with an optional
//! over-fetch for reranking.

use common::{
    domain::{Fact, GraphStore},
    error::AppError,
};

use crate::reranking::RerankerLease;

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub facts: Vec<Fact>,
    pub total: usize,
    pub reranked: bool,
}

/// `retrieve(question, top_k, group_ids?, use_reranking?)`. Over-fetches
/// `top_k * retrieval_multiplier` candidates when reranking is requested;
/// skips the rerank pass (and reports `reranked=false`) when fewer than
/// `top_k + 1` candidates come back, since there is nothing to reorder.
pub async fn retrieve(
    graph: &dyn GraphStore,
    reranker: Option<&RerankerLease>,
    question: &str,
    top_k: usize,
    group_ids: Option<&[String]>,
    use_reranking: bool,
    retrieval_multiplier: u32,
) -> Result<RetrievalOutcome, AppError> {
    let fetch_limit = if use_reranking {
        top_k.saturating_mul(retrieval_multiplier.max(1) as usize)
    } else {
        top_k
    };

    let hits = graph.search(question, fetch_limit, group_ids).await?;
    let total = hits.len();
    let facts: Vec<Fact> = hits.into_iter().map(|hit| hit.fact).collect();

    let worth_reranking = use_reranking && facts.len() > top_k;
    let (facts, reranked) = match (worth_reranking, reranker) {
        (true, Some(reranker)) => (reranker.rerank(question, facts, top_k).await, true),
        _ => (facts.into_iter().take(top_k).collect(), false),
    };

    Ok(RetrievalOutcome {
        facts,
        total,
        reranked,
    })
}
