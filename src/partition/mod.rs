//! Partitioning of source files into located, typed blocks.
//!
//! Five interchangeable strategies implement [`Partitioner`]; the
//! [`LanguageRegistry`](crate::lang::registry::LanguageRegistry) chains them
//! into a fallback cascade that always ends at the
//! [`EmergencyPartitioner`](emergency::EmergencyPartitioner).
//!
//! Strategies only decide *where* blocks start and end ([`BlockSpan`]); the
//! shared [`BlockAssembler`] turns spans into blocks that cover every line of
//! the file exactly once, stamps locations, token estimates and context
//! windows.

pub mod emergency;
pub mod native;
pub mod pattern;
pub mod text;
pub mod tree;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::location::{LocationTracker, PartitionLocation};
use crate::lang::Language;

pub use emergency::EmergencyPartitioner;
pub use native::NativePythonPartitioner;
pub use pattern::PatternPartitioner;
pub use text::TextPartitioner;
pub use tree::TreeSitterPartitioner;

/// What a block contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Function,
    Class,
    Section,
    Chunk,
    Mixed,
    Unknown,
}

impl BlockKind {
    /// Lower-case name used in logs and metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Function => "function",
            BlockKind::Class => "class",
            BlockKind::Section => "section",
            BlockKind::Chunk => "chunk",
            BlockKind::Mixed => "mixed",
            BlockKind::Unknown => "unknown",
        }
    }
}

/// Cascade tiers, ordered from most to least capable.
///
/// The derived ordering is the cascade order: a later variant is a lower tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Deep analyzer for the primary language
    Native,
    /// Generic tree-sitter parser
    Tree,
    /// Regex definition patterns
    Pattern,
    /// Paragraph and heading heuristics
    Text,
    /// Density-adaptive chunking that cannot fail
    Emergency,
}

impl StrategyKind {
    /// All tiers in cascade order.
    pub const CASCADE: [StrategyKind; 5] = [
        StrategyKind::Native,
        StrategyKind::Tree,
        StrategyKind::Pattern,
        StrategyKind::Text,
        StrategyKind::Emergency,
    ];

    /// Stable name of the tier.
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Native => "native",
            StrategyKind::Tree => "tree",
            StrategyKind::Pattern => "pattern",
            StrategyKind::Text => "text",
            StrategyKind::Emergency => "emergency",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tier did not produce a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// The tier has no support for this language; skipped without a warning
    #[error("strategy not available for language '{language}'")]
    Unavailable { language: String },

    /// The tier ran but could not make sense of the input
    #[error("parse failed: {message}")]
    Parse { message: String },

    /// The tier ran but found nothing to partition on
    #[error("strategy produced no blocks")]
    Empty,

    /// The tier panicked; the payload message is preserved
    #[error("strategy panicked: {message}")]
    Panicked { message: String },
}

impl StrategyError {
    /// Build an [`StrategyError::Unavailable`] for `language`.
    pub fn unavailable(language: Language) -> Self {
        Self::Unavailable {
            language: language.name().to_string(),
        }
    }

    /// Build a [`StrategyError::Parse`].
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Whether the cascade should log this as a downgrade.
    pub fn is_downgrade(&self) -> bool {
        !matches!(self, StrategyError::Unavailable { .. })
    }
}

/// Result alias for a single tier.
pub type StrategyResult<T> = std::result::Result<T, StrategyError>;

/// A located, typed slice of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionBlock {
    /// Raw text of the block
    pub content: String,
    /// What the block contains
    pub kind: BlockKind,
    /// Where the block sits in its file
    pub location: PartitionLocation,
    /// Tier that produced the block
    pub strategy: StrategyKind,
    /// Symbol or section name
    pub name: Option<String>,
    /// Rough token count (four characters per token)
    pub estimated_tokens: usize,
    /// Branching complexity, when the producing tier can measure it
    pub complexity: Option<f64>,
    /// Up to `overlap_lines` lines preceding the block
    pub previous_context: Option<String>,
    /// Up to `overlap_lines` lines following the block
    pub next_context: Option<String>,
    /// Free-form tier-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PartitionBlock {
    /// Slice this block's text back out of the full file content.
    pub fn extract_content<'a>(&self, file_content: &'a str) -> &'a str {
        self.location.extract_content(file_content)
    }
}

/// Output of partitioning one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionResult {
    /// Blocks in file order
    pub blocks: Vec<PartitionBlock>,
    /// File the blocks came from
    pub file_path: String,
    /// Detected (or hinted) language tag
    pub language: String,
    /// Tier that actually produced the blocks
    pub strategy_used: StrategyKind,
    /// False when every structured tier failed and emergency took over, or
    /// the file could not be read. Blank input goes straight to emergency
    /// and counts as a success.
    pub success: bool,
    /// Downgrades and other non-fatal findings
    pub warnings: Vec<String>,
    /// Errors converted into degraded output
    pub errors: Vec<String>,
    /// Wall-clock time spent, filled in by the cascade driver
    pub processing_time_ms: u64,
}

impl PartitionResult {
    /// A successful result from `strategy`.
    pub fn new(
        file_path: impl Into<String>,
        language: Language,
        strategy: StrategyKind,
        blocks: Vec<PartitionBlock>,
    ) -> Self {
        Self {
            blocks,
            file_path: file_path.into(),
            language: language.name().to_string(),
            strategy_used: strategy,
            success: true,
            warnings: Vec::new(),
            errors: Vec::new(),
            processing_time_ms: 0,
        }
    }

    /// Total estimated tokens across all blocks.
    pub fn total_tokens(&self) -> usize {
        self.blocks.iter().map(|b| b.estimated_tokens).sum()
    }

    /// Concatenate block contents in location order.
    pub fn reconstruct(&self) -> String {
        let mut blocks: Vec<&PartitionBlock> = self.blocks.iter().collect();
        blocks.sort_by_key(|b| b.location.start_byte);
        blocks.iter().map(|b| b.content.as_str()).collect()
    }
}

/// One partitioning strategy.
pub trait Partitioner: Send + Sync {
    /// Tier this strategy occupies in the cascade.
    fn kind(&self) -> StrategyKind;

    /// Whether the strategy can handle `language` at all.
    fn supports(&self, language: Language) -> bool;

    /// Partition `content`. Implementations report failure through the
    /// returned error; the cascade driver also guards against panics.
    fn partition(
        &self,
        file_path: &str,
        content: &str,
        language: Language,
    ) -> StrategyResult<PartitionResult>;
}

/// Boundaries of a block before assembly (1-based inclusive lines).
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSpan {
    pub start_line: usize,
    pub end_line: usize,
    pub kind: BlockKind,
    pub name: Option<String>,
    pub complexity: Option<f64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BlockSpan {
    pub fn new(start_line: usize, end_line: usize, kind: BlockKind) -> Self {
        Self {
            start_line,
            end_line,
            kind,
            name: None,
            complexity: None,
            metadata: HashMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Turns strategy spans into blocks that tile the whole file.
pub struct BlockAssembler<'a> {
    tracker: LocationTracker<'a>,
    strategy: StrategyKind,
    overlap_lines: usize,
}

impl<'a> BlockAssembler<'a> {
    pub fn new(content: &'a str, strategy: StrategyKind, overlap_lines: usize) -> Self {
        Self {
            tracker: LocationTracker::new(content),
            strategy,
            overlap_lines,
        }
    }

    /// The tracker over the assembled content.
    pub fn tracker(&self) -> &LocationTracker<'a> {
        &self.tracker
    }

    /// Assemble `spans` into blocks.
    ///
    /// Spans are sorted and clipped so they never overlap. Uncovered lines
    /// become `mixed` blocks unless they are blank, in which case they are
    /// folded into the preceding block (or the following one at file start).
    pub fn assemble(&self, mut spans: Vec<BlockSpan>) -> Vec<PartitionBlock> {
        let total = self.tracker.total_lines();
        if total == 0 {
            return Vec::new();
        }

        spans.retain(|s| s.start_line >= 1 && s.start_line <= total);
        spans.sort_by_key(|s| (s.start_line, std::cmp::Reverse(s.end_line)));

        let mut tiled: Vec<BlockSpan> = Vec::with_capacity(spans.len() * 2);
        let mut next_free = 1usize;
        for mut span in spans {
            span.end_line = span.end_line.min(total);
            if span.start_line < next_free {
                span.start_line = next_free;
            }
            if span.start_line > span.end_line {
                continue;
            }
            if span.start_line > next_free {
                self.push_gap(&mut tiled, next_free, span.start_line - 1);
            }
            next_free = span.end_line + 1;
            tiled.push(span);
        }
        if next_free <= total {
            self.push_gap(&mut tiled, next_free, total);
        }

        // A leading blank gap has nothing before it; fold it forward.
        if tiled.len() > 1 && tiled[0].metadata.contains_key("blank_gap") {
            let first = tiled.remove(0);
            tiled[0].start_line = first.start_line;
        }

        tiled.into_iter().map(|span| self.build_block(span)).collect()
    }

    fn push_gap(&self, tiled: &mut Vec<BlockSpan>, start: usize, end: usize) {
        let blank = (start..=end).all(|line| self.tracker.line_text(line).trim().is_empty());
        if blank {
            if let Some(previous) = tiled.last_mut() {
                previous.end_line = end;
                return;
            }
            tiled.push(
                BlockSpan::new(start, end, BlockKind::Mixed)
                    .with_metadata("blank_gap", serde_json::Value::Bool(true)),
            );
            return;
        }
        tiled.push(BlockSpan::new(start, end, BlockKind::Mixed));
    }

    /// Build a single block for an already-tiled span.
    pub fn build_block(&self, mut span: BlockSpan) -> PartitionBlock {
        let location = self.tracker.location(span.start_line, span.end_line);
        let content = location.extract_content(self.tracker.content()).to_string();
        span.metadata.remove("blank_gap");

        let (previous_context, next_context) = self.context_windows(&location);

        PartitionBlock {
            estimated_tokens: estimate_tokens(&content),
            content,
            kind: span.kind,
            location,
            strategy: self.strategy,
            name: span.name,
            complexity: span.complexity,
            previous_context,
            next_context,
            metadata: span.metadata,
        }
    }

    fn context_windows(&self, location: &PartitionLocation) -> (Option<String>, Option<String>) {
        if self.overlap_lines == 0 || location.total_lines == 0 {
            return (None, None);
        }

        let previous = if location.start_line > 1 {
            let from = location.start_line.saturating_sub(self.overlap_lines).max(1);
            Some(
                self.tracker
                    .slice_lines(from, location.start_line - 1)
                    .to_string(),
            )
        } else {
            None
        };

        let next = if location.end_line < location.total_lines {
            let to = (location.end_line + self.overlap_lines).min(location.total_lines);
            Some(self.tracker.slice_lines(location.end_line + 1, to).to_string())
        } else {
            None
        };

        (previous, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "import os\n\ndef a():\n    pass\n\n\nx = 1\ny = 2\n";

    #[test]
    fn test_assembler_tiles_file() {
        let assembler = BlockAssembler::new(SOURCE, StrategyKind::Pattern, 1);
        let blocks = assembler.assemble(vec![
            BlockSpan::new(3, 4, BlockKind::Function).named("a"),
        ]);

        let rebuilt: String = blocks.iter().map(|b| b.content.as_str()).collect();
        assert_eq!(rebuilt, SOURCE);

        assert_eq!(blocks[0].kind, BlockKind::Mixed);
        assert_eq!(blocks[0].location.start_line, 1);
        assert_eq!(blocks[1].name.as_deref(), Some("a"));
        // blank lines 5-6 fold into the function block
        assert_eq!(blocks[1].location.end_line, 6);
        assert_eq!(blocks[2].location.start_line, 7);
    }

    #[test]
    fn test_assembler_clips_overlapping_spans() {
        let assembler = BlockAssembler::new(SOURCE, StrategyKind::Tree, 0);
        let blocks = assembler.assemble(vec![
            BlockSpan::new(1, 4, BlockKind::Section),
            BlockSpan::new(3, 8, BlockKind::Chunk),
        ]);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].location.start_line, 5);
        assert_eq!(blocks.iter().map(|b| b.content.as_str()).collect::<String>(), SOURCE);
    }

    #[test]
    fn test_leading_blank_gap_folds_forward() {
        let content = "\n\nclass A:\n    pass\n";
        let assembler = BlockAssembler::new(content, StrategyKind::Native, 0);
        let blocks = assembler.assemble(vec![BlockSpan::new(3, 4, BlockKind::Class)]);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].location.start_line, 1);
        assert_eq!(blocks[0].kind, BlockKind::Class);
        assert!(!blocks[0].metadata.contains_key("blank_gap"));
    }

    #[test]
    fn test_context_windows_bounded_by_overlap() {
        let assembler = BlockAssembler::new(SOURCE, StrategyKind::Pattern, 2);
        let blocks = assembler.assemble(vec![BlockSpan::new(3, 4, BlockKind::Function)]);
        let function = &blocks[1];

        assert_eq!(function.previous_context.as_deref(), Some("import os\n\n"));
        assert!(function.next_context.as_deref().unwrap().starts_with("x = 1"));
        assert!(blocks[0].previous_context.is_none());
        assert!(blocks.last().unwrap().next_context.is_none());
    }

    #[test]
    fn test_strategy_kind_order_is_cascade_order() {
        let mut kinds = StrategyKind::CASCADE.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, StrategyKind::CASCADE.to_vec());
        assert!(StrategyKind::Native < StrategyKind::Emergency);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
