//! Static source checks
//!
//! A cheap textual gate run before anything is compiled. It does not parse the
//! source and must not be relied on as a security boundary; it only keeps
//! obviously disallowed programs away from the toolchain.

use std::time::Instant;

use tracing::debug;

use crate::config::Config;
use crate::types::ValidationResult;

/// Complexity score above which a warning is added
pub const COMPLEXITY_WARNING_THRESHOLD: usize = 100;

/// Scans source text for denied imports and scores its size
#[derive(Debug, Clone)]
pub struct Validator {
    denied_imports: Vec<String>,
    allow_unsafe_imports: bool,
}

impl Validator {
    pub fn new(denied_imports: Vec<String>, allow_unsafe_imports: bool) -> Self {
        Self {
            denied_imports,
            allow_unsafe_imports,
        }
    }

    /// Build a validator from the deny-list and policy in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.toolchain.denied_imports.clone(),
            config.allow_unsafe_imports,
        )
    }

    /// Check `source`
    ///
    /// A denied import appears in the source as its quoted path (`"unsafe"`).
    /// Every match is recorded as an unsafe import; unless unsafe imports are
    /// allowed, each match is also an error. The complexity score is the line
    /// count divided by ten and only ever produces a warning.
    pub fn validate(&self, source: &str) -> ValidationResult {
        let started = Instant::now();
        let mut result = ValidationResult::new();

        for import in &self.denied_imports {
            if source.contains(&format!("\"{import}\"")) {
                result.add_unsafe_import(import.as_str());
                if self.allow_unsafe_imports {
                    result.add_warning(format!("unsafe import '{import}' allowed by configuration"));
                } else {
                    result.add_error(format!("unsafe import '{import}' not allowed"));
                }
            }
        }

        result.complexity_score = source.split('\n').count() / 10;
        if result.complexity_score > COMPLEXITY_WARNING_THRESHOLD {
            result.add_warning("code complexity is high");
        }

        result.validation_time = started.elapsed();
        debug!(
            valid = result.valid,
            unsafe_imports = ?result.unsafe_imports,
            complexity = result.complexity_score,
            "validated source"
        );
        result
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn validity_matches_errors(source in ".*") {
            let result = Validator::default().validate(&source);
            prop_assert_eq!(result.valid, result.errors.is_empty());
        }

        #[test]
        fn complexity_is_line_count_over_ten(lines in 0usize..3000) {
            let source = "a\n".repeat(lines);
            let result = Validator::default().validate(&source);
            prop_assert_eq!(result.complexity_score, (lines + 1) / 10);
        }

        #[test]
        fn allowing_unsafe_never_invalidates(source in ".*") {
            let validator = Validator::new(
                vec!["unsafe".to_string(), "syscall".to_string(), "reflect".to_string()],
                true,
            );
            prop_assert!(validator.validate(&source).valid);
        }
    }
}
