//! Two-phase execution plan for one evaluation pass.
//!
//! Independent evaluators run first so that, by the time a dependent
//! evaluator's gate is checked, every sync prerequisite has already
//! recorded its evaluation. Within a phase, entries run by ascending
//! priority with creation order breaking ties.

use serde::{Deserialize, Serialize};

use crate::config::{EvaluatorConfig, EvaluatorConfigSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Independent,
    Dependent,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Dependent => "dependent",
        }
    }
}

/// Enabled configurations of a subject, split by phase and ordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub independent: Vec<EvaluatorConfig>,
    pub dependent: Vec<EvaluatorConfig>,
}

impl ExecutionPlan {
    pub fn build(configs: &EvaluatorConfigSet) -> Self {
        let (mut dependent, mut independent): (Vec<_>, Vec<_>) = configs
            .enabled()
            .cloned()
            .partition(EvaluatorConfig::has_dependency);

        independent.sort_by_key(|c| (c.priority, c.id));
        dependent.sort_by_key(|c| (c.priority, c.id));

        Self {
            independent,
            dependent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.independent.is_empty() && self.dependent.is_empty()
    }

    pub fn len(&self) -> usize {
        self.independent.len() + self.dependent.len()
    }

    /// Every entry in run order, tagged with its phase.
    pub fn steps(&self) -> impl Iterator<Item = (Phase, &EvaluatorConfig)> {
        self.independent
            .iter()
            .map(|c| (Phase::Independent, c))
            .chain(self.dependent.iter().map(|c| (Phase::Dependent, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NewEvaluatorConfig;
    use crate::registry::PluginRegistry;

    fn keys(configs: &[EvaluatorConfig]) -> Vec<&str> {
        configs.iter().map(|c| c.evaluator_key.as_str()).collect()
    }

    #[test]
    fn test_phases_and_ordering() {
        let registry = PluginRegistry::with_builtins().unwrap();
        let mut set = EvaluatorConfigSet::new("prompt-1");

        set.create(NewEvaluatorConfig::new("length").priority(5), &registry).unwrap();
        set.create(NewEvaluatorConfig::new("pii").priority(1), &registry).unwrap();
        set.create(
            NewEvaluatorConfig::new("regex").priority(1).param("pattern", "."),
            &registry,
        )
        .unwrap();
        set.create(
            NewEvaluatorConfig::new("keyword").depends_on("length"),
            &registry,
        )
        .unwrap();

        let plan = ExecutionPlan::build(&set);

        // Equal priority falls back to creation order
        assert_eq!(keys(&plan.independent), vec!["pii", "regex", "length"]);
        assert_eq!(keys(&plan.dependent), vec!["keyword"]);
        assert_eq!(plan.len(), 4);

        let phases: Vec<Phase> = plan.steps().map(|(phase, _)| phase).collect();
        assert_eq!(phases.last(), Some(&Phase::Dependent));
    }

    #[test]
    fn test_disabled_excluded() {
        let registry = PluginRegistry::with_builtins().unwrap();
        let mut set = EvaluatorConfigSet::new("prompt-1");
        set.create(NewEvaluatorConfig::new("length"), &registry).unwrap();
        set.create(NewEvaluatorConfig::new("pii").disabled(), &registry).unwrap();

        let plan = ExecutionPlan::build(&set);
        assert_eq!(keys(&plan.independent), vec!["length"]);
        assert!(plan.dependent.is_empty());
    }

    #[test]
    fn test_empty_set() {
        let plan = ExecutionPlan::build(&EvaluatorConfigSet::new("prompt-1"));
        assert!(plan.is_empty());
    }
}
