//! Textual partitioner: Markdown headings, otherwise merged paragraphs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lang::Language;
use crate::partition::{
    BlockAssembler, BlockKind, BlockSpan, PartitionResult, Partitioner, StrategyError,
    StrategyKind, StrategyResult,
};

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("valid heading pattern"));

pub struct TextPartitioner {
    overlap_lines: usize,
    target_lines: usize,
}

impl TextPartitioner {
    pub fn new(overlap_lines: usize, target_lines: usize) -> Self {
        Self {
            overlap_lines,
            target_lines: target_lines.max(1),
        }
    }

    /// One section per heading; fenced code blocks never start a section.
    fn heading_spans(lines: &[&str]) -> Vec<BlockSpan> {
        let mut starts: Vec<(usize, usize, String)> = Vec::new();
        let mut in_fence = false;
        for (idx, line) in lines.iter().enumerate() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(caps) = HEADING.captures(line) {
                let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
                let title = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
                starts.push((idx, level, title));
            }
        }

        starts
            .iter()
            .enumerate()
            .map(|(i, (start, level, title))| {
                let end = starts
                    .get(i + 1)
                    .map(|(next, _, _)| next - 1)
                    .unwrap_or(lines.len() - 1);
                BlockSpan::new(start + 1, end + 1, BlockKind::Section)
                    .named(title.clone())
                    .with_metadata("heading_level", serde_json::json!(level))
            })
            .collect()
    }

    /// Blank-line separated paragraphs merged into chunks of about
    /// `target_lines`; oversized paragraphs are cut at the target.
    fn paragraph_spans(&self, lines: &[&str]) -> Vec<BlockSpan> {
        let mut paragraphs: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<usize> = None;
        for (idx, line) in lines.iter().enumerate() {
            match (line.trim().is_empty(), current) {
                (false, None) => current = Some(idx),
                (true, Some(start)) => {
                    paragraphs.push((start, idx - 1));
                    current = None;
                }
                _ => {}
            }
        }
        if let Some(start) = current {
            paragraphs.push((start, lines.len() - 1));
        }

        let mut pieces: Vec<(usize, usize)> = Vec::new();
        for (start, end) in paragraphs {
            let mut from = start;
            while end - from + 1 > self.target_lines {
                pieces.push((from, from + self.target_lines - 1));
                from += self.target_lines;
            }
            pieces.push((from, end));
        }

        let mut spans = Vec::new();
        let mut chunk: Option<(usize, usize, usize)> = None;
        for (start, end) in pieces {
            chunk = match chunk {
                Some((c_start, _, count)) if end - c_start < self.target_lines => {
                    Some((c_start, end, count + 1))
                }
                Some((c_start, c_end, count)) => {
                    spans.push(Self::chunk_span(c_start, c_end, count));
                    Some((start, end, 1))
                }
                None => Some((start, end, 1)),
            };
        }
        if let Some((c_start, c_end, count)) = chunk {
            spans.push(Self::chunk_span(c_start, c_end, count));
        }
        spans
    }

    fn chunk_span(start: usize, end: usize, paragraphs: usize) -> BlockSpan {
        BlockSpan::new(start + 1, end + 1, BlockKind::Chunk)
            .with_metadata("paragraphs", serde_json::json!(paragraphs))
    }
}

impl Partitioner for TextPartitioner {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Text
    }

    fn supports(&self, _language: Language) -> bool {
        true
    }

    fn partition(
        &self,
        file_path: &str,
        content: &str,
        language: Language,
    ) -> StrategyResult<PartitionResult> {
        if content.trim().is_empty() {
            return Err(StrategyError::Empty);
        }

        let lines: Vec<&str> = content.lines().collect();
        let mut spans = Vec::new();
        if language == Language::Markdown {
            spans = Self::heading_spans(&lines);
        }
        if spans.is_empty() {
            spans = self.paragraph_spans(&lines);
        }
        if spans.is_empty() {
            return Err(StrategyError::Empty);
        }

        let assembler = BlockAssembler::new(content, StrategyKind::Text, self.overlap_lines);
        let blocks = assembler.assemble(spans);
        Ok(PartitionResult::new(
            file_path,
            language,
            StrategyKind::Text,
            blocks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_sections() {
        let content = "intro\n\n# Title\ntext\n```\n# not a heading\n```\n## Sub ##\nmore\n";
        let result = TextPartitioner::new(0, 40)
            .partition("README.md", content, Language::Markdown)
            .unwrap();

        let sections: Vec<_> = result
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Section)
            .map(|b| b.name.clone().unwrap())
            .collect();
        assert_eq!(sections, vec!["Title", "Sub"]);
        assert_eq!(result.blocks[0].kind, BlockKind::Mixed);
        assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn test_paragraphs_merge_up_to_target() {
        let content = "a\nb\n\nc\n\nd\ne\nf\n";
        let result = TextPartitioner::new(0, 4)
            .partition("notes.txt", content, Language::Text)
            .unwrap();

        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].metadata.get("paragraphs"), Some(&serde_json::json!(2)));
        assert_eq!(result.blocks[1].location.start_line, 6);
        assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn test_oversized_paragraph_is_cut() {
        let content = (1..=10).map(|i| format!("line {i}\n")).collect::<String>();
        let result = TextPartitioner::new(0, 3)
            .partition("big.txt", &content, Language::Unknown)
            .unwrap();

        assert_eq!(result.blocks.len(), 4);
        assert!(result.blocks.iter().all(|b| b.location.line_count() <= 3));
        assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        assert_eq!(
            TextPartitioner::new(0, 40)
                .partition("x.txt", " \n\t\n", Language::Text)
                .unwrap_err(),
            StrategyError::Empty
        );
    }
}
