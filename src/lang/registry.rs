//! Partitioner registration table and the fallback cascade driver.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::config::PartitionConfig;
use crate::core::errors::{Result, StrataError};
use crate::core::file_utils::FileReader;
use crate::lang::detection::detect_language;
use crate::lang::Language;
use crate::partition::emergency::panic_message;
use crate::partition::{
    EmergencyPartitioner, NativePythonPartitioner, PartitionResult, Partitioner,
    PatternPartitioner, StrategyError, StrategyKind, TextPartitioner, TreeSitterPartitioner,
};

/// Tree-sitter grammar for a language; TSX is chosen by the file extension.
pub fn tree_sitter_grammar(language: Language, file_path: &str) -> Option<tree_sitter::Language> {
    let grammar = match language {
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::TypeScript => {
            if file_path.to_ascii_lowercase().ends_with(".tsx") {
                tree_sitter_typescript::LANGUAGE_TSX.into()
            } else {
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
            }
        }
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        _ => return None,
    };
    Some(grammar)
}

/// Create a new parser for the given language
pub fn create_parser(language: Language, file_path: &str) -> Result<tree_sitter::Parser> {
    let grammar = tree_sitter_grammar(language, file_path).ok_or_else(|| {
        StrataError::unsupported(format!("No tree-sitter grammar for: {language}"))
    })?;
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&grammar).map_err(|e| {
        StrataError::parse(
            language.name(),
            file_path,
            format!("Failed to set parser language: {e}"),
        )
    })?;
    Ok(parser)
}

/// Ordered partitioner table plus the cascade that walks it.
pub struct LanguageRegistry {
    partitioners: Vec<Box<dyn Partitioner>>,
    emergency: EmergencyPartitioner,
    min_keyword_score: usize,
}

impl LanguageRegistry {
    /// Register the five built-in tiers in cascade order.
    pub fn new(config: &PartitionConfig) -> Self {
        let overlap = config.overlap_lines;
        let partitioners: Vec<Box<dyn Partitioner>> = vec![
            Box::new(NativePythonPartitioner::new(overlap, config.max_block_lines)),
            Box::new(TreeSitterPartitioner::new(overlap)),
            Box::new(PatternPartitioner::new(overlap)),
            Box::new(TextPartitioner::new(overlap, config.text_target_lines)),
            Box::new(EmergencyPartitioner::new(overlap, config.emergency.clone())),
        ];
        Self::with_partitioners(partitioners, config)
    }

    /// Build a registry from an explicit table. Entries are sorted into cascade
    /// order; the emergency backstop is always appended after them.
    pub fn with_partitioners(
        mut partitioners: Vec<Box<dyn Partitioner>>,
        config: &PartitionConfig,
    ) -> Self {
        partitioners.sort_by_key(|p| p.kind());
        Self {
            partitioners,
            emergency: EmergencyPartitioner::new(config.overlap_lines, config.emergency.clone()),
            min_keyword_score: config.min_keyword_score,
        }
    }

    /// Registered tiers in cascade order.
    pub fn strategies(&self) -> Vec<StrategyKind> {
        self.partitioners.iter().map(|p| p.kind()).collect()
    }

    /// Detect the language of a file from its path, then its content.
    pub fn detect_language(&self, path: &Path, content: Option<&str>) -> Language {
        detect_language(path, content, self.min_keyword_score)
    }

    /// Best available partitioner for `language`.
    pub fn get_partitioner(&self, language: Language) -> &dyn Partitioner {
        self.partitioners
            .iter()
            .find(|p| p.supports(language))
            .map(|p| p.as_ref())
            .unwrap_or(&self.emergency)
    }

    /// Partition a file through the cascade.
    ///
    /// Never fails: when `content` is not supplied and the file cannot be read,
    /// the error is recorded and the empty buffer is partitioned instead.
    pub fn partition_file(
        &self,
        path: &Path,
        content: Option<&str>,
        language: Option<Language>,
    ) -> PartitionResult {
        let started = Instant::now();
        let file_path = path.display().to_string();

        let mut read_error = None;
        let owned;
        let content = match content {
            Some(content) => content,
            None => {
                owned = match FileReader::read_lossy(path) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(file = %file_path, reason = %err, "Could not read file for partitioning");
                        read_error = Some(err.to_string());
                        String::new()
                    }
                };
                owned.as_str()
            }
        };

        let language = language.unwrap_or_else(|| self.detect_language(path, Some(content)));
        let mut result = self.run_cascade(&file_path, content, language);

        if let Some(err) = read_error {
            result.errors.insert(0, err);
            result.success = false;
        }
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn run_cascade(&self, file_path: &str, content: &str, language: Language) -> PartitionResult {
        if content.trim().is_empty() {
            debug!(file = %file_path, "Blank input, using emergency partitioner");
            let mut result = self.emergency.partition_total(file_path, content, language);
            result.success = true;
            return result;
        }

        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for partitioner in &self.partitioners {
            let tier = partitioner.kind();
            if tier == StrategyKind::Emergency {
                break;
            }
            if !partitioner.supports(language) {
                debug!(file = %file_path, tier = ?tier, %language, "Tier unavailable, skipping");
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                partitioner.partition(file_path, content, language)
            }))
            .unwrap_or_else(|payload| {
                Err(StrategyError::Panicked {
                    message: panic_message(&*payload),
                })
            })
            .and_then(|result| {
                if result.blocks.is_empty() {
                    Err(StrategyError::Empty)
                } else {
                    Ok(result)
                }
            });

            match outcome {
                Ok(mut result) => {
                    result.strategy_used = tier;
                    result.language = language.name().to_string();
                    warnings.append(&mut result.warnings);
                    result.warnings = warnings;
                    errors.append(&mut result.errors);
                    result.errors = errors;
                    result.success = result.errors.is_empty();
                    return result;
                }
                Err(err) if !err.is_downgrade() => {
                    debug!(file = %file_path, tier = ?tier, reason = %err, "Tier unavailable, skipping");
                }
                Err(err) => {
                    warn!(file = %file_path, tier = ?tier, reason = %err, "Partition tier failed, downgrading");
                    warnings.push(format!("{tier} partitioner failed for {file_path}: {err}"));
                    if matches!(err, StrategyError::Panicked { .. }) {
                        errors.push(err.to_string());
                    }
                }
            }
        }

        let mut result = self.emergency.partition_total(file_path, content, language);
        result.success = false;
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        errors.append(&mut result.errors);
        result.errors = errors;
        result
    }
}
