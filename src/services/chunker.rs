//! Chunking strategies: fixed-size windows with overlap, and sentence-aware
//! packing backed by a process-wide cached sentence model.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use crate::error::{ChunkError, ConfigError};
use crate::models::{CharSpan, Chunk, ChunkingConfig, Document};

/// Closed set of chunking strategies, resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    FixedSize,
    Sentence,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_size" => Ok(StrategyKind::FixedSize),
            "sentence" => Ok(StrategyKind::Sentence),
            other => Err(format!("unknown chunking strategy: {other}")),
        }
    }
}

/// Splits document text into an ordered sequence of chunks.
///
/// Both variants guarantee: spans are ordered by start, and the
/// non-overlapping parts of consecutive spans tile the source text exactly.
#[derive(Debug, Clone)]
pub enum Chunker {
    FixedSize(FixedSizeChunker),
    Sentence(SentenceChunker),
}

impl Chunker {
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        match config.strategy_kind()? {
            StrategyKind::FixedSize => Ok(Chunker::FixedSize(FixedSizeChunker::new(
                config.window,
                config.overlap,
            ))),
            StrategyKind::Sentence => {
                let model = SentenceModel::cached(&config.sentence_model)
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                Ok(Chunker::Sentence(SentenceChunker::new(config.window, model)))
            }
        }
    }

    /// Chunk a document's text. Empty text yields no chunks.
    pub fn chunk(&self, document: &Document, text: &str) -> Vec<Chunk> {
        let pieces = match self {
            Chunker::FixedSize(c) => c.split(text),
            Chunker::Sentence(c) => c.split(text),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, (piece, span))| Chunk::new(document, i as u32, piece, span))
            .collect()
    }
}

/// Deterministic fixed-size windows of `window` characters with `overlap`
/// characters shared between consecutive windows.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    window: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// `overlap < window` is enforced at configuration load.
    pub fn new(window: usize, overlap: usize) -> Self {
        Self { window, overlap }
    }

    fn split(&self, text: &str) -> Vec<(String, CharSpan)> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let step = self.window - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.window).min(total);
            let piece: String = chars[start..end].iter().collect();
            out.push((piece, CharSpan { start, end }));
            if end >= total {
                break;
            }
            start += step;
        }

        out
    }
}

/// Packs whole sentences into chunks up to a soft character budget, never
/// splitting a sentence. Sentence spans tile the text, so chunk spans do too.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    budget: usize,
    segmenter: Arc<dyn SentenceSegmenter>,
}

impl SentenceChunker {
    pub fn new(budget: usize, segmenter: Arc<dyn SentenceSegmenter>) -> Self {
        Self { budget, segmenter }
    }

    fn split(&self, text: &str) -> Vec<(String, CharSpan)> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let sentences = self.segmenter.segment(text);
        let mut out = Vec::new();
        let mut chunk_start = 0usize;
        let mut chunk_end = 0usize;

        for span in sentences {
            // A single sentence over budget still becomes its own chunk.
            if chunk_end > chunk_start && span.end - chunk_start > self.budget {
                let piece: String = chars[chunk_start..chunk_end].iter().collect();
                out.push((piece, CharSpan { start: chunk_start, end: chunk_end }));
                chunk_start = chunk_end;
            }
            chunk_end = span.end;
        }

        if chunk_end > chunk_start {
            let piece: String = chars[chunk_start..chunk_end].iter().collect();
            out.push((piece, CharSpan { start: chunk_start, end: chunk_end }));
        }

        out
    }
}

/// Segments text into sentence spans (char offsets) tiling the input.
pub trait SentenceSegmenter: Send + Sync + std::fmt::Debug {
    fn segment(&self, text: &str) -> Vec<CharSpan>;
}

/// Sentence boundary model: a compiled boundary pattern plus a per-language
/// abbreviation list. Expensive to build, so instances are cached
/// process-wide by model id with lazy first-use initialization.
#[derive(Debug)]
pub struct SentenceModel {
    id: String,
    boundary: Regex,
    abbreviations: HashSet<&'static str>,
}

static MODEL_CACHE: OnceLock<Mutex<HashMap<String, Arc<SentenceModel>>>> = OnceLock::new();

const EN_ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "fig", "no",
    "inc", "ltd", "dept", "approx",
];

impl SentenceModel {
    /// Fetch or build the model for `model_id`. Unknown ids are rejected so
    /// configuration mistakes surface at load time.
    pub fn cached(model_id: &str) -> Result<Arc<Self>, ChunkError> {
        let cache = MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(model) = guard.get(model_id) {
            return Ok(model.clone());
        }

        let model = Arc::new(Self::build(model_id)?);
        guard.insert(model_id.to_string(), model.clone());
        Ok(model)
    }

    fn build(model_id: &str) -> Result<Self, ChunkError> {
        let abbreviations: HashSet<&'static str> = match model_id {
            "en" => EN_ABBREVIATIONS.iter().copied().collect(),
            "basic" => HashSet::new(),
            other => return Err(ChunkError::UnknownModel(other.to_string())),
        };

        let boundary = Regex::new(r#"[.!?]+["')\]]*\s+"#)
            .map_err(|e| ChunkError::ModelError(e.to_string()))?;

        Ok(Self {
            id: model_id.to_string(),
            boundary,
            abbreviations,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The token immediately before a candidate boundary, used to suppress
    /// splits after abbreviations and single-letter initials.
    fn is_abbreviation_before(&self, text: &str, match_start: usize) -> bool {
        let before = &text[..match_start];
        let Some(word) = before.split_whitespace().next_back() else {
            return false;
        };
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '.');
        let bare = word.trim_end_matches('.').to_lowercase();

        if bare.is_empty() {
            return false;
        }
        if bare.chars().count() == 1 && word.chars().next().is_some_and(char::is_uppercase) {
            return true;
        }
        self.abbreviations.contains(bare.as_str())
    }
}

impl SentenceSegmenter for SentenceModel {
    fn segment(&self, text: &str) -> Vec<CharSpan> {
        let char_len = text.chars().count();
        if char_len == 0 {
            return Vec::new();
        }

        // Byte offsets of each char, for mapping regex matches to char space.
        let char_starts: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        let byte_to_char = |byte: usize| char_starts.partition_point(|&b| b < byte);

        let mut cuts = vec![0usize];
        for m in self.boundary.find_iter(text) {
            if self.is_abbreviation_before(text, m.start()) {
                continue;
            }
            cuts.push(byte_to_char(m.end()));
        }
        cuts.push(char_len);
        cuts.dedup();

        cuts.windows(2)
            .filter(|w| w[1] > w[0])
            .map(|w| CharSpan { start: w[0], end: w[1] })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::DocumentStatus;

    fn document() -> Document {
        Document {
            id: "doc-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            storage_ref: "a.txt".to_string(),
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        }
    }

    fn assert_lossless(text: &str, chunks: &[Chunk]) {
        // Non-overlapping parts of the spans must reconstruct the source.
        let chars: Vec<char> = text.chars().collect();
        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for chunk in chunks {
            assert!(chunk.span.start <= covered, "gap before chunk {}", chunk.sequence_index);
            let fresh_start = covered.max(chunk.span.start);
            rebuilt.extend(&chars[fresh_start..chunk.span.end]);
            covered = chunk.span.end;
        }
        assert_eq!(rebuilt, text);
        assert_eq!(covered, chars.len());
    }

    #[test]
    fn test_fixed_size_window_and_overlap() {
        let chunker = FixedSizeChunker::new(500, 50);
        let text: String = "x".repeat(1200);
        let pieces = chunker.split(&text);

        // ceil(1200 / 450) = 3 windows
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].1, CharSpan { start: 0, end: 500 });
        assert_eq!(pieces[1].1, CharSpan { start: 450, end: 950 });
        assert_eq!(pieces[2].1, CharSpan { start: 900, end: 1200 });

        // Exactly 50 chars shared at each interior boundary.
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].1.end - pair[1].1.start, 50);
        }
    }

    #[test]
    fn test_fixed_size_is_deterministic() {
        let chunker = FixedSizeChunker::new(100, 10);
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        assert_eq!(chunker.split(&text), chunker.split(&text));
    }

    #[test]
    fn test_fixed_size_lossless_coverage() {
        let doc = document();
        let chunker = Chunker::FixedSize(FixedSizeChunker::new(64, 16));
        let text = "abcdefghij".repeat(41);
        let chunks = chunker.chunk(&doc, &text);
        assert!(chunks.len() > 1);
        assert_lossless(&text, &chunks);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let doc = document();
        let chunker = Chunker::FixedSize(FixedSizeChunker::new(100, 10));
        assert!(chunker.chunk(&doc, "").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let doc = document();
        let chunker = Chunker::FixedSize(FixedSizeChunker::new(100, 10));
        let chunks = chunker.chunk(&doc, "hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].span, CharSpan { start: 0, end: 11 });
    }

    #[test]
    fn test_sentence_segmentation() {
        let model = SentenceModel::cached("en").unwrap();
        let text = "First sentence. Second one! Is this third? Yes.";
        let spans = model.segment(text);
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, text.chars().count());
        // Spans tile the text with no gaps.
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        let model = SentenceModel::cached("en").unwrap();
        let text = "Dr. Smith arrived early. He left late.";
        let spans = model.segment(text);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_sentence_chunker_never_splits_sentences() {
        let doc = document();
        let model = SentenceModel::cached("en").unwrap();
        let chunker = SentenceChunker::new(60, model.clone());
        let text = "One short sentence here. Another short sentence here. \
                    A third sentence follows now. And a fourth one closes it.";
        let pieces = chunker.split(text);
        assert!(pieces.len() > 1);

        // Every chunk boundary coincides with a sentence boundary.
        let sentence_ends: Vec<usize> = model.segment(text).iter().map(|s| s.end).collect();
        for (_, span) in &pieces {
            assert!(sentence_ends.contains(&span.end));
        }

        let chunks = Chunker::Sentence(chunker).chunk(&doc, text);
        assert_lossless(text, &chunks);
    }

    #[test]
    fn test_oversized_sentence_is_own_chunk() {
        let model = SentenceModel::cached("en").unwrap();
        let chunker = SentenceChunker::new(20, model);
        let text = "This single sentence is far longer than the budget allows. Tiny one.";
        let pieces = chunker.split(text);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].0.len() > 20);
    }

    #[test]
    fn test_sentence_chunker_accepts_custom_segmenter() {
        // Cuts at fixed positions regardless of punctuation.
        #[derive(Debug)]
        struct EveryTenChars;

        impl SentenceSegmenter for EveryTenChars {
            fn segment(&self, text: &str) -> Vec<CharSpan> {
                let len = text.chars().count();
                (0..len)
                    .step_by(10)
                    .map(|start| CharSpan { start, end: (start + 10).min(len) })
                    .collect()
            }
        }

        let doc = document();
        let chunker = SentenceChunker::new(20, Arc::new(EveryTenChars));
        let text = "abcdefghij".repeat(5);
        let pieces = chunker.split(&text);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].1, CharSpan { start: 0, end: 20 });

        let chunks = Chunker::Sentence(chunker).chunk(&doc, &text);
        assert_lossless(&text, &chunks);
    }

    #[test]
    fn test_model_cache_returns_same_instance() {
        let a = SentenceModel::cached("en").unwrap();
        let b = SentenceModel::cached("en").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), "en");
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert!(matches!(
            SentenceModel::cached("xx"),
            Err(ChunkError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("fixed_size".parse::<StrategyKind>().unwrap(), StrategyKind::FixedSize);
        assert_eq!("sentence".parse::<StrategyKind>().unwrap(), StrategyKind::Sentence);
        assert!("semantic2".parse::<StrategyKind>().is_err());
    }
}
