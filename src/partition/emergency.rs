//! Last-resort partitioner. It accepts every language and every input, and
//! always returns at least one block.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::core::config::EmergencyConfig;
use crate::core::location::{LocationTracker, PartitionLocation};
use crate::lang::Language;
use crate::partition::{
    estimate_tokens, BlockAssembler, BlockKind, BlockSpan, PartitionBlock, PartitionResult,
    Partitioner, StrategyKind, StrategyResult,
};

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct EmergencyPartitioner {
    overlap_lines: usize,
    config: EmergencyConfig,
}

impl EmergencyPartitioner {
    pub fn new(overlap_lines: usize, config: EmergencyConfig) -> Self {
        Self {
            overlap_lines,
            config,
        }
    }

    /// Lines per chunk for `content`: denser text gets fewer lines.
    pub fn chunk_lines(&self, content: &str, total_lines: usize) -> usize {
        let chars = content.chars().filter(|c| !c.is_whitespace()).count();
        let density = (chars as f64 / total_lines.max(1) as f64).max(1.0);
        let lines = (self.config.target_chunk_chars as f64 / density).round() as usize;
        lines.clamp(self.config.min_chunk_lines, self.config.max_chunk_lines)
    }

    fn chunked(&self, file_path: &str, content: &str, language: Language) -> PartitionResult {
        let assembler = BlockAssembler::new(content, StrategyKind::Emergency, self.overlap_lines);
        let total = assembler.tracker().total_lines();

        if total <= self.config.tiny_input_lines || content.len() <= self.config.tiny_input_bytes {
            let block = assembler.build_block(
                BlockSpan::new(1, total, BlockKind::Chunk)
                    .with_metadata("verbatim", serde_json::json!(true)),
            );
            return PartitionResult::new(file_path, language, StrategyKind::Emergency, vec![block]);
        }

        let step = self.chunk_lines(content, total);
        let spans: Vec<BlockSpan> = (1..=total)
            .step_by(step)
            .map(|start| {
                BlockSpan::new(start, (start + step - 1).min(total), BlockKind::Chunk)
                    .with_metadata("chunk_lines", serde_json::json!(step))
            })
            .collect();

        let blocks = spans
            .into_iter()
            .map(|span| assembler.build_block(span))
            .collect();
        PartitionResult::new(file_path, language, StrategyKind::Emergency, blocks)
    }

    /// Single block covering the whole input, built without any chunking logic.
    pub fn whole_file(
        file_path: &str,
        content: &str,
        language: Language,
        reason: Option<&str>,
    ) -> PartitionResult {
        let tracker = LocationTracker::new(content);
        let location = if tracker.total_lines() == 0 {
            PartitionLocation::empty()
        } else {
            tracker.location(1, tracker.total_lines())
        };

        let mut metadata = HashMap::new();
        if let Some(reason) = reason {
            metadata.insert("error".to_string(), serde_json::json!(reason));
        }

        let block = PartitionBlock {
            content: content.to_string(),
            kind: if content.is_empty() {
                BlockKind::Unknown
            } else {
                BlockKind::Chunk
            },
            location,
            strategy: StrategyKind::Emergency,
            name: None,
            estimated_tokens: estimate_tokens(content),
            complexity: None,
            previous_context: None,
            next_context: None,
            metadata,
        };

        let mut result =
            PartitionResult::new(file_path, language, StrategyKind::Emergency, vec![block]);
        if let Some(reason) = reason {
            result.errors.push(reason.to_string());
        }
        result
    }

    /// Partition without any failure path.
    pub fn partition_total(
        &self,
        file_path: &str,
        content: &str,
        language: Language,
    ) -> PartitionResult {
        if content.is_empty() {
            return Self::whole_file(file_path, content, language, None);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| {
            self.chunked(file_path, content, language)
        })) {
            Ok(result) if !result.blocks.is_empty() => result,
            Ok(_) => Self::whole_file(
                file_path,
                content,
                language,
                Some("emergency chunking produced no blocks"),
            ),
            Err(payload) => {
                let message = format!("emergency chunking panicked: {}", panic_message(&*payload));
                error!(file = %file_path, reason = %message, "Emergency partitioner fell back to a single block");
                Self::whole_file(file_path, content, language, Some(&message))
            }
        }
    }
}

impl Partitioner for EmergencyPartitioner {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Emergency
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
        Ok(self.partition_total(file_path, content, language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitioner() -> EmergencyPartitioner {
        EmergencyPartitioner::new(0, EmergencyConfig::default())
    }

    #[test]
    fn test_empty_input_yields_one_empty_block() {
        let result = partitioner().partition_total("e", "", Language::Unknown);
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].content, "");
        assert_eq!(result.blocks[0].location, PartitionLocation::empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_tiny_input_is_verbatim() {
        let result = partitioner().partition_total("t", "a\nb\n", Language::Text);
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].content, "a\nb\n");
        assert_eq!(
            result.blocks[0].metadata.get("verbatim"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn test_denser_text_gets_smaller_chunks() {
        let p = partitioner();
        let sparse = "x\n".repeat(400);
        let dense = format!("{}\n", "y".repeat(100)).repeat(400);
        assert!(p.chunk_lines(&dense, 400) < p.chunk_lines(&sparse, 400));
        assert_eq!(p.chunk_lines(&sparse, 400), EmergencyConfig::default().max_chunk_lines);
    }

    #[test]
    fn test_chunks_tile_input() {
        let content = format!("{}\n", "z".repeat(100)).repeat(120);
        let result = partitioner().partition_total("big", &content, Language::Unknown);

        assert!(result.blocks.len() > 1);
        assert_eq!(result.reconstruct(), content);
        assert!(result.blocks.iter().all(|b| b.strategy == StrategyKind::Emergency));
    }

    #[test]
    fn test_whole_file_records_reason() {
        let result = EmergencyPartitioner::whole_file("w", "abc", Language::Text, Some("boom"));
        assert_eq!(result.errors, vec!["boom".to_string()]);
        assert_eq!(result.blocks[0].metadata.get("error"), Some(&serde_json::json!("boom")));
    }
}
