use std::sync::OnceLock;

use common::{
    domain::{Chunk, ChunkMetadata, ChunkingStrategy, Document},
    error::AppError,
};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

/// Turns a converted [`Document`] into an ordered sequence of [`Chunk`]s.
///
/// Two strategies, selected by configuration: a size-bounded recursive
/// splitter over the markdown export (the baseline), and a heading-aware
/// structural splitter that attaches ancestor-heading context to each chunk
/// (preferred, when the markdown carries ATX headings worth anchoring to).
pub struct SemanticChunker {
    strategy: ChunkingStrategy,
    target_tokens: usize,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl SemanticChunker {
    pub fn new(
        strategy: ChunkingStrategy,
        target_tokens: usize,
        overlap_tokens: usize,
    ) -> Result<Self, AppError> {
        if overlap_tokens >= target_tokens {
            return Err(AppError::Validation(format!(
                "chunk overlap {overlap_tokens} must be less than the target size {target_tokens}"
            )));
        }
        Ok(Self {
            strategy,
            target_tokens,
            max_tokens: target_tokens + target_tokens / 10,
            overlap_tokens,
        })
    }

    pub fn chunk(
        &self,
        document: &Document,
        filename: &str,
        upload_id: &str,
    ) -> Result<Vec<Chunk>, AppError> {
        match self.strategy {
            ChunkingStrategy::Recursive => self.chunk_recursive(document, filename, upload_id),
            ChunkingStrategy::Hybrid => self.chunk_hybrid(document, filename, upload_id),
        }
    }

    fn chunk_recursive(
        &self,
        document: &Document,
        filename: &str,
        upload_id: &str,
    ) -> Result<Vec<Chunk>, AppError> {
        let pieces = split_by_tokens(
            &document.markdown,
            self.target_tokens,
            self.max_tokens,
            self.overlap_tokens,
        )?;
        let total = pieces.len() as u32;

        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let num_tokens = estimate_tokens(&text);
                Chunk {
                    contextualized_text: text.clone(),
                    text,
                    metadata: ChunkMetadata {
                        filename: filename.to_string(),
                        upload_id: upload_id.to_string(),
                        chunk_index: i as u32 + 1,
                        total_chunks: total,
                        num_tokens,
                        chunking_strategy: ChunkingStrategy::Recursive,
                        has_context: false,
                    },
                }
            })
            .collect())
    }

    fn chunk_hybrid(
        &self,
        document: &Document,
        filename: &str,
        upload_id: &str,
    ) -> Result<Vec<Chunk>, AppError> {
        let sections = split_by_headings(&document.markdown);
        let mut raw: Vec<(Vec<String>, String)> = Vec::new();

        for section in sections {
            let pieces = split_by_tokens(
                &section.body,
                self.target_tokens,
                self.max_tokens,
                self.overlap_tokens,
            )?;
            for piece in pieces {
                raw.push((section.ancestors.clone(), piece));
            }
        }

        merge_small_peers(&mut raw, self.target_tokens / 4);

        let total = raw.len() as u32;
        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(i, (ancestors, text))| {
                let heading_prefix = ancestors.join("\n");
                let contextualized_text = if heading_prefix.is_empty() {
                    text.clone()
                } else {
                    format!("{heading_prefix}\n{text}")
                };
                let num_tokens = estimate_tokens(&contextualized_text);
                Chunk {
                    text,
                    contextualized_text,
                    metadata: ChunkMetadata {
                        filename: filename.to_string(),
                        upload_id: upload_id.to_string(),
                        chunk_index: i as u32 + 1,
                        total_chunks: total,
                        num_tokens,
                        chunking_strategy: ChunkingStrategy::Hybrid,
                        has_context: true,
                    },
                }
            })
            .collect())
    }
}

struct Section {
    ancestors: Vec<String>,
    body: String,
}

/// Splits markdown into sections at ATX headings (`#`..`######`), tracking
/// the stack of ancestor headings active at each point. A document with no
/// headings yields a single section with no ancestors.
fn split_by_heading_lines(markdown: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current_body = String::new();

    let flush = |stack: &[(usize, String)], body: &mut String, out: &mut Vec<Section>| {
        if !body.trim().is_empty() {
            out.push(Section {
                ancestors: stack.iter().map(|(_, h)| h.clone()).collect(),
                body: std::mem::take(body),
            });
        } else {
            body.clear();
        }
    };

    for line in markdown.lines() {
        if let Some(level) = heading_level(line) {
            flush(&stack, &mut current_body, &mut sections);
            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, line.trim_start_matches('#').trim().to_string()));
            continue;
        }
        current_body.push_str(line);
        current_body.push('\n');
    }
    flush(&stack, &mut current_body, &mut sections);

    if sections.is_empty() {
        sections.push(Section {
            ancestors: Vec::new(),
            body: markdown.to_string(),
        });
    }
    sections
}

fn split_by_headings(markdown: &str) -> Vec<Section> {
    split_by_heading_lines(markdown)
}

fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if rest.is_empty() || rest.starts_with(' ') {
        Some(level)
    } else {
        None
    }
}

/// Merges adjacent chunks within the same heading group whose combined token
/// estimate stays under `min_tokens`, so short trailing sections don't
/// become their own sub-target chunk.
fn merge_small_peers(chunks: &mut Vec<(Vec<String>, String)>, min_tokens: usize) {
    if min_tokens == 0 {
        return;
    }
    let mut merged: Vec<(Vec<String>, String)> = Vec::with_capacity(chunks.len());
    for (ancestors, text) in chunks.drain(..) {
        if let Some((last_ancestors, last_text)) = merged.last_mut() {
            if *last_ancestors == ancestors && estimate_tokens(last_text) < min_tokens as u32 {
                last_text.push('\n');
                last_text.push_str(&text);
                continue;
            }
        }
        merged.push((ancestors, text));
    }
    *chunks = merged;
}

fn split_by_tokens(
    text: &str,
    target_tokens: usize,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<String>, AppError> {
    if text.trim().is_empty() {
        return Ok(vec![String::new()]);
    }

    let tokenizer = get_tokenizer()?;
    let capacity = ChunkCapacity::new(target_tokens)
        .with_max(max_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk token bounds: {e}")))?;
    let config = ChunkConfig::new(capacity)
        .with_overlap(overlap_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?
        .with_sizer(tokenizer);
    let splitter = TextSplitter::new(config);

    let mut pieces: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();
    if pieces.is_empty() {
        pieces.push(text.to_string());
    }
    Ok(pieces)
}

fn get_tokenizer() -> Result<&'static tokenizers::Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<tokenizers::Tokenizer, String>> = OnceLock::new();
    match TOKENIZER.get_or_init(|| {
        tokenizers::Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|e| format!("failed to initialize tokenizer: {e}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}

pub(crate) fn estimate_tokens(text: &str) -> u32 {
    match get_tokenizer() {
        Ok(tokenizer) => tokenizer
            .encode(text, false)
            .map(|enc| enc.get_ids().len() as u32)
            .unwrap_or_else(|_| (text.split_whitespace().count() as u32).max(1)),
        Err(_) => (text.split_whitespace().count() as u32).max(1),
    }
}
