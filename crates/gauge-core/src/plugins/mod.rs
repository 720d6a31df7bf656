//! Built-in evaluator plugins.
//!
//! Each plugin is a [`ScorerFactory`] with a stable key and declared
//! metadata. They are deliberately small and deterministic; heavier
//! evaluators (LLM judges, human review) are registered by the application.
//!
//! | Key | Scores |
//! |-----|--------|
//! | `length` | Character count against hard and ideal bounds |
//! | `keyword` | Required (70%) and forbidden (30%) keyword presence |
//! | `pii` | Absence of emails, phone numbers, SSNs, card numbers |
//! | `regex` | Whether the content matches a configured pattern |

mod keyword;
mod length;
mod pattern;
mod pii;

pub use keyword::KeywordPlugin;
pub use length::LengthPlugin;
pub use pattern::RegexPlugin;
pub use pii::PiiPlugin;

use crate::registry::{PluginMetadata, PluginRegistry, ScorerFactory};
use crate::ConfigurationError;

/// A plugin shipped with the engine.
pub trait BuiltinPlugin: ScorerFactory + Default + 'static {
    /// Registry key.
    const KEY: &'static str;

    fn metadata() -> PluginMetadata;
}

/// Register every built-in plugin.
pub fn register_builtins(registry: &mut PluginRegistry) -> Result<(), ConfigurationError> {
    register::<LengthPlugin>(registry)?;
    register::<KeywordPlugin>(registry)?;
    register::<PiiPlugin>(registry)?;
    register::<RegexPlugin>(registry)?;
    Ok(())
}

fn register<P: BuiltinPlugin>(registry: &mut PluginRegistry) -> Result<(), ConfigurationError> {
    registry.register(P::KEY, P::default(), P::metadata())
}

fn invalid_params(key: &str, error: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidParams {
        key: key.to_string(),
        errors: vec![error.into()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvaluatorCategory;

    #[test]
    fn test_builtins_registered() {
        let registry = PluginRegistry::with_builtins().unwrap();
        assert_eq!(registry.keys(), vec!["keyword", "length", "pii", "regex"]);
        assert_eq!(
            registry.by_category(EvaluatorCategory::Automated).len(),
            4
        );
    }
}
