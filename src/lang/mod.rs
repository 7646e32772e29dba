//! Language detection and the partitioner registry.

pub mod detection;
pub mod registry;

pub use detection::{
    detect_language, language_for_extension, language_for_path, registered_languages, Language,
    LanguageInfo,
};
pub use registry::{create_parser, tree_sitter_grammar, LanguageRegistry};
