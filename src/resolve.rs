//! Dependency resolution into an ordered install plan.
//!
//! Resolution is a pure planning step. It walks the dependency graph depth
//! first in declaration order, so the resulting plan is topologically sorted
//! (every dependency before its dependents) and deterministic. Formulas that
//! are already installed are not traversed further.

use crate::error::{KegError, Result};
use crate::formula::Formula;
use crate::tap::FormulaIndex;
use std::collections::{BTreeSet, HashSet};

/// Capability: "is the named formula installed?"
pub trait InstalledLookup {
    fn is_installed(&self, name: &str) -> bool;
}

impl InstalledLookup for HashSet<String> {
    fn is_installed(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl InstalledLookup for BTreeSet<String> {
    fn is_installed(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// One entry of an install plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Fetch, verify and install this formula
    Install { formula: Formula, requested: bool },
    /// Already installed; nothing to do
    Satisfied { name: String },
}

impl PlanStep {
    pub fn name(&self) -> &str {
        match self {
            PlanStep::Install { formula, .. } => formula.name(),
            PlanStep::Satisfied { name } => name,
        }
    }
}

/// Ordered install plan; the requested formula is always last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    target: String,
    steps: Vec<PlanStep>,
}

impl InstallPlan {
    /// Name of the formula that was asked for
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Formulas that need installing, in order
    pub fn to_install(&self) -> impl Iterator<Item = &Formula> {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Install { formula, .. } => Some(formula),
            PlanStep::Satisfied { .. } => None,
        })
    }

    /// Nothing to install at all
    pub fn is_noop(&self) -> bool {
        self.to_install().next().is_none()
    }

    /// Plan entries by name, in order
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(PlanStep::name).collect()
    }
}

/// Resolve `name` against the formula index and the installed set
///
/// # Errors
///
/// - [`KegError::UnknownFormula`] if `name` is neither defined nor installed
/// - [`KegError::MissingDependency`] if a dependency is neither defined nor installed
/// - [`KegError::CyclicDependency`] if a formula is reached again from itself
pub fn resolve(
    name: &str,
    index: &FormulaIndex,
    installed: &impl InstalledLookup,
) -> Result<InstallPlan> {
    let mut resolver = Resolver {
        index,
        installed,
        path: Vec::new(),
        done: HashSet::new(),
        steps: Vec::new(),
    };
    resolver.visit(name, None)?;

    tracing::debug!(
        formula = name,
        plan = ?resolver.steps.iter().map(PlanStep::name).collect::<Vec<_>>(),
        "resolved install plan"
    );

    Ok(InstallPlan {
        target: name.to_string(),
        steps: resolver.steps,
    })
}

struct Resolver<'a, I> {
    index: &'a FormulaIndex,
    installed: &'a I,
    /// Formulas on the current resolution path, outermost first
    path: Vec<String>,
    done: HashSet<String>,
    steps: Vec<PlanStep>,
}

impl<I: InstalledLookup> Resolver<'_, I> {
    fn visit(&mut self, name: &str, dependent: Option<&str>) -> Result<()> {
        if let Some(pos) = self.path.iter().position(|n| n == name) {
            let mut cycle = self.path[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(KegError::CyclicDependency { path: cycle });
        }
        if self.done.contains(name) {
            return Ok(());
        }

        if self.installed.is_installed(name) {
            self.done.insert(name.to_string());
            self.steps.push(PlanStep::Satisfied {
                name: name.to_string(),
            });
            return Ok(());
        }

        let index = self.index;
        let formula = match index.get(name) {
            Some(formula) => formula,
            None => {
                return Err(match dependent {
                    Some(dependent) => KegError::MissingDependency {
                        formula: dependent.to_string(),
                        name: name.to_string(),
                    },
                    None => KegError::UnknownFormula {
                        name: name.to_string(),
                        suggestion: index.suggest(name),
                    },
                });
            }
        };

        self.path.push(name.to_string());
        for dep in formula.dependencies() {
            self.visit(dep, Some(name))?;
        }
        self.path.pop();

        self.done.insert(name.to_string());
        self.steps.push(PlanStep::Install {
            formula: formula.clone(),
            requested: dependent.is_none(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaDef;

    fn formula(name: &str, deps: &[&str]) -> Formula {
        Formula::from_def(FormulaDef {
            name: name.into(),
            source_url: format!("https://example.com/{name}/v1.0.0/{name}"),
            checksum: "ab".repeat(32),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    fn index(formulae: Vec<Formula>) -> FormulaIndex {
        FormulaIndex::from_formulae(formulae).unwrap()
    }

    fn nothing_installed() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_single_formula_without_dependencies() {
        let idx = index(vec![formula("tool", &[])]);
        let plan = resolve("tool", &idx, &nothing_installed()).unwrap();
        assert_eq!(plan.names(), vec!["tool"]);
        assert_eq!(plan.target(), "tool");
        assert!(matches!(
            &plan.steps()[0],
            PlanStep::Install { requested: true, .. }
        ));
    }

    #[test]
    fn test_dependencies_come_first_in_declaration_order() {
        let idx = index(vec![
            formula("app", &["zlib", "openssl", "ca-certs"]),
            formula("openssl", &["ca-certs"]),
            formula("zlib", &[]),
            formula("ca-certs", &[]),
        ]);
        let plan = resolve("app", &idx, &nothing_installed()).unwrap();
        assert_eq!(plan.names(), vec!["zlib", "ca-certs", "openssl", "app"]);

        let requested: Vec<bool> = plan
            .steps()
            .iter()
            .map(|s| matches!(s, PlanStep::Install { requested: true, .. }))
            .collect();
        assert_eq!(requested, vec![false, false, false, true]);
    }

    #[test]
    fn test_shared_dependency_appears_once() {
        let idx = index(vec![
            formula("app", &["left", "right"]),
            formula("left", &["base"]),
            formula("right", &["base"]),
            formula("base", &[]),
        ]);
        let plan = resolve("app", &idx, &nothing_installed()).unwrap();
        assert_eq!(plan.names(), vec!["base", "left", "right", "app"]);
    }

    #[test]
    fn test_installed_dependency_is_satisfied_not_traversed() {
        // "watchman" is installed but not defined; its own deps are irrelevant
        let idx = index(vec![formula("rs-git-fsmonitor", &["watchman"])]);
        let installed: HashSet<String> = ["watchman".to_string()].into();

        let plan = resolve("rs-git-fsmonitor", &idx, &installed).unwrap();
        assert_eq!(
            plan.steps()[0],
            PlanStep::Satisfied {
                name: "watchman".into()
            }
        );
        assert_eq!(plan.to_install().count(), 1);
    }

    #[test]
    fn test_missing_dependency() {
        let idx = index(vec![formula("rs-git-fsmonitor", &["watchman"])]);
        let err = resolve("rs-git-fsmonitor", &idx, &nothing_installed()).unwrap_err();
        assert!(matches!(
            err,
            KegError::MissingDependency { ref formula, ref name }
                if formula == "rs-git-fsmonitor" && name == "watchman"
        ));
    }

    #[test]
    fn test_two_node_cycle() {
        let idx = index(vec![formula("a", &["b"]), formula("b", &["a"])]);
        let err = resolve("a", &idx, &nothing_installed()).unwrap_err();
        match err {
            KegError::CyclicDependency { path } => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let idx = index(vec![formula("loop", &["loop"])]);
        assert!(matches!(
            resolve("loop", &idx, &nothing_installed()),
            Err(KegError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_below_the_target_reports_only_the_cycle() {
        let idx = index(vec![
            formula("app", &["a"]),
            formula("a", &["b"]),
            formula("b", &["c"]),
            formula("c", &["a"]),
        ]);
        match resolve("app", &idx, &nothing_installed()).unwrap_err() {
            KegError::CyclicDependency { path } => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_target_with_suggestion() {
        let idx = index(vec![formula("watchman", &[])]);
        match resolve("watchmen", &idx, &nothing_installed()).unwrap_err() {
            KegError::UnknownFormula { name, suggestion } => {
                assert_eq!(name, "watchmen");
                assert_eq!(suggestion.as_deref(), Some("watchman"));
            }
            other => panic!("expected UnknownFormula, got {other:?}"),
        }
    }

    #[test]
    fn test_installed_target_is_noop() {
        let idx = index(vec![formula("tool", &[])]);
        let installed: HashSet<String> = ["tool".to_string()].into();
        let plan = resolve("tool", &idx, &installed).unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.names(), vec!["tool"]);
    }

    #[test]
    fn test_long_chain_resolves_without_blowing_up() {
        let formulae: Vec<Formula> = (0..500)
            .map(|i| {
                let name = format!("f{i}");
                let dep = format!("f{}", i + 1);
                if i == 499 {
                    formula(&name, &[])
                } else {
                    formula(&name, &[dep.as_str()])
                }
            })
            .collect();
        let idx = index(formulae);
        let plan = resolve("f0", &idx, &nothing_installed()).unwrap();
        assert_eq!(plan.steps().len(), 500);
        assert_eq!(plan.names().first(), Some(&"f499"));
        assert_eq!(plan.names().last(), Some(&"f0"));
    }
}
