//! Dependency edges between configurations of one subject.
//!
//! Each configuration has at most one outgoing edge (`depends_on`), so the
//! graph is a set of chains. Cycle detection walks the chain starting at a
//! candidate's dependency and fails if it leads back to the candidate.

use std::collections::HashSet;

use crate::types::Evaluation;
use crate::ConfigurationError;

use super::EvaluatorConfig;

/// Validate the dependency of `candidate` against the other configurations.
///
/// `configs` may still contain the candidate's previous version (same id);
/// it is ignored in favor of the candidate.
pub(super) fn check_dependency(
    configs: &[EvaluatorConfig],
    candidate: &EvaluatorConfig,
) -> Result<(), ConfigurationError> {
    let Some(depends_on) = candidate.depends_on.as_deref() else {
        return Ok(());
    };
    let key = candidate.evaluator_key.as_str();

    if depends_on == key {
        return Err(ConfigurationError::SelfDependency(key.to_string()));
    }

    let id = candidate.id;
    let others = move || configs.iter().filter(move |c| c.id != id);

    let target = others()
        .find(|c| c.evaluator_key == depends_on)
        .ok_or_else(|| ConfigurationError::MissingDependency {
            key: key.to_string(),
            depends_on: depends_on.to_string(),
        })?;

    if !target.enabled {
        return Err(ConfigurationError::DisabledDependency {
            key: key.to_string(),
            depends_on: depends_on.to_string(),
        });
    }

    let mut path = vec![key.to_string()];
    let mut visited: HashSet<&str> = HashSet::from([key]);
    let mut current = Some(depends_on);

    while let Some(step) = current {
        path.push(step.to_string());

        if step == key {
            return Err(ConfigurationError::CyclicDependency { path });
        }

        // An older loop not passing through the candidate
        if !visited.insert(step) {
            break;
        }

        current = others()
            .find(|c| c.evaluator_key == step)
            .and_then(|c| c.depends_on.as_deref());
    }

    Ok(())
}

/// Most recent evaluation by `evaluator_id`; later entries win timestamp ties.
pub(super) fn latest_evaluation<'a>(
    evaluations: &'a [Evaluation],
    evaluator_id: &str,
) -> Option<&'a Evaluation> {
    evaluations
        .iter()
        .filter(|e| e.evaluator_id == evaluator_id)
        .fold(None::<&Evaluation>, |latest, e| match latest {
            Some(l) if l.created_at > e.created_at => Some(l),
            _ => Some(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamMap;
    use crate::types::RunMode;

    fn config(id: u64, key: &str, depends_on: Option<&str>) -> EvaluatorConfig {
        EvaluatorConfig {
            id,
            subject_id: "prompt-1".into(),
            evaluator_key: key.into(),
            enabled: true,
            run_mode: RunMode::Sync,
            priority: 0,
            weight: 1.0,
            depends_on: depends_on.map(String::from),
            min_dependency_score: None,
            params: ParamMap::new(),
        }
    }

    #[test]
    fn test_no_dependency_ok() {
        assert!(check_dependency(&[], &config(1, "a", None)).is_ok());
    }

    #[test]
    fn test_self_dependency() {
        let err = check_dependency(&[], &config(1, "a", Some("a"))).unwrap_err();
        assert_eq!(err, ConfigurationError::SelfDependency("a".into()));
    }

    #[test]
    fn test_missing_dependency() {
        let err = check_dependency(&[config(1, "a", None)], &config(2, "b", Some("c")))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingDependency { .. }));
    }

    #[test]
    fn test_disabled_dependency() {
        let mut a = config(1, "a", None);
        a.enabled = false;
        let err = check_dependency(&[a], &config(2, "b", Some("a"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::DisabledDependency { .. }));
    }

    #[test]
    fn test_two_node_cycle_on_update() {
        // b -> a exists; updating a to depend on b closes the loop
        let configs = vec![config(1, "a", None), config(2, "b", Some("a"))];
        let err = check_dependency(&configs, &config(1, "a", Some("b"))).unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::CyclicDependency {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_three_node_cycle() {
        let configs = vec![
            config(1, "a", None),
            config(2, "b", Some("a")),
            config(3, "c", Some("b")),
        ];
        let err = check_dependency(&configs, &config(1, "a", Some("c"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::CyclicDependency { path } if path.len() == 4));
    }

    #[test]
    fn test_chain_without_cycle_ok() {
        let configs = vec![config(1, "a", None), config(2, "b", Some("a"))];
        assert!(check_dependency(&configs, &config(3, "c", Some("b"))).is_ok());
    }
}
