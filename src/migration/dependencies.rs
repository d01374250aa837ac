// ABOUTME: Approximate function-to-function dependency detection
// ABOUTME: Text containment heuristic behind a trait, plus dependency-first install ordering

use super::catalog::FunctionDescriptor;
use std::collections::{BTreeSet, HashMap};

/// Decides which of `candidates` a function definition depends on.
///
/// The stock implementation is a text search. A parser-backed implementation
/// can replace it without touching the catalog reader or the reconciler.
pub trait DependencyHeuristic: Send + Sync {
    fn dependencies(&self, name: &str, definition: &str, candidates: &[String]) -> Vec<String>;
}

/// A candidate counts as a dependency when its name occurs anywhere in the
/// definition text.
///
/// False positives: names inside comments or string literals, and short names
/// that are substrings of longer identifiers (`sum` inside `checksum`).
/// False negatives: calls built with dynamic SQL (`EXECUTE format(...)`).
/// The function's own name is never reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextContainment;

impl DependencyHeuristic for TextContainment {
    fn dependencies(&self, name: &str, definition: &str, candidates: &[String]) -> Vec<String> {
        candidates
            .iter()
            .filter(|candidate| candidate.as_str() != name && !candidate.is_empty())
            .filter(|candidate| definition.contains(candidate.as_str()))
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Order functions so that dependencies come before their dependents.
///
/// Depth-first over `dependency_names`, visiting functions in their original
/// order, so the result is stable. Cycles are cut where they are found; stubs
/// already cover forward references so a cycle is not an error. Overloads
/// share a name and are treated as one node.
pub fn install_order(functions: &[FunctionDescriptor]) -> Vec<usize> {
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, function) in functions.iter().enumerate() {
        by_name.entry(function.name.as_str()).or_default().push(idx);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }

    fn visit(
        idx: usize,
        functions: &[FunctionDescriptor],
        by_name: &HashMap<&str, Vec<usize>>,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) {
        if marks[idx] != Mark::New {
            return;
        }
        marks[idx] = Mark::Visiting;
        for dependency in &functions[idx].dependency_names {
            if let Some(targets) = by_name.get(dependency.as_str()) {
                for &target in targets {
                    visit(target, functions, by_name, marks, order);
                }
            }
        }
        marks[idx] = Mark::Done;
        order.push(idx);
    }

    let mut marks = vec![Mark::New; functions.len()];
    let mut order = Vec::with_capacity(functions.len());
    for idx in 0..functions.len() {
        visit(idx, functions, &by_name, &mut marks, &mut order);
    }
    order
}
