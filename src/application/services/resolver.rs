//! Dependency resolver - computes a deterministic load order

use crate::application::errors::HostError;
use crate::domain::entities::ExtensionDescriptor;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Load order plus the reason every excluded extension was rejected
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub order: Vec<String>,
    pub errors: BTreeMap<String, HostError>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Resolves descriptor sets into a load order.
///
/// Ties are broken by ascending load priority, then by id.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    preferred: BTreeSet<String>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids that win conflicts against non-preferred opponents
    pub fn with_preferred<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn resolve(&self, descriptors: &[ExtensionDescriptor]) -> Resolution {
        let mut errors: BTreeMap<String, HostError> = BTreeMap::new();
        let mut candidates: BTreeMap<&str, &ExtensionDescriptor> = BTreeMap::new();
        let mut duplicates: BTreeSet<&str> = BTreeSet::new();

        for descriptor in descriptors {
            if candidates.insert(descriptor.id.as_str(), descriptor).is_some() {
                duplicates.insert(descriptor.id.as_str());
            }
        }
        for id in duplicates {
            candidates.remove(id);
            reject(
                &mut errors,
                id,
                HostError::malformed(id, "extension id declared by more than one source"),
            );
        }

        // Conflicts only count between extensions that could otherwise load
        drop_missing(&mut candidates, &mut errors);
        drop_cycles(&mut candidates, &mut errors);
        self.drop_conflicts(&mut candidates, &mut errors);
        drop_missing(&mut candidates, &mut errors);
        let order = drop_cycles(&mut candidates, &mut errors);

        for (id, error) in &errors {
            tracing::warn!("Resolver rejected {}: {}", id, error);
        }
        Resolution { order, errors }
    }

    /// The declarer of a conflict is rejected unless it is preferred and its opponent is not
    fn drop_conflicts<'a>(
        &self,
        candidates: &mut BTreeMap<&'a str, &'a ExtensionDescriptor>,
        errors: &mut BTreeMap<String, HostError>,
    ) {
        // (declarer, target) pairs among the current candidates
        let mut pairs: BTreeSet<(&str, &str)> = BTreeSet::new();
        for (id, descriptor) in candidates.iter() {
            for other in &descriptor.dependencies.conflicts {
                if other != id && candidates.contains_key(other.as_str()) {
                    pairs.insert((*id, other.as_str()));
                }
            }
        }

        // Sharing a provided capability counts as a mutual conflict
        let mut providers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, descriptor) in candidates.iter() {
            for capability in &descriptor.provides {
                providers.entry(capability.as_str()).or_default().push(*id);
            }
        }
        for ids in providers.values().filter(|ids| ids.len() > 1) {
            for a in ids {
                for b in ids.iter().filter(|b| *b != a) {
                    pairs.insert((*a, *b));
                }
            }
        }

        let mut rejected: BTreeMap<&str, &str> = BTreeMap::new();
        for (declarer, target) in pairs {
            let declarer_preferred = self.preferred.contains(declarer);
            let target_preferred = self.preferred.contains(target);
            let (loser, winner) = if target_preferred || !declarer_preferred {
                (declarer, target)
            } else {
                (target, declarer)
            };
            rejected.entry(loser).or_insert(winner);
        }

        for (loser, winner) in rejected {
            candidates.remove(loser);
            reject(
                errors,
                loser,
                HostError::ConflictingExtension {
                    id: loser.to_string(),
                    other: winner.to_string(),
                },
            );
        }
    }
}

/// Resolve with no preferred ids
pub fn resolve(descriptors: &[ExtensionDescriptor]) -> Resolution {
    DependencyResolver::new().resolve(descriptors)
}

fn reject(errors: &mut BTreeMap<String, HostError>, id: &str, error: HostError) {
    errors.entry(id.to_string()).or_insert(error);
}

/// Remove candidates whose required dependencies are absent, until stable
fn drop_missing(
    candidates: &mut BTreeMap<&str, &ExtensionDescriptor>,
    errors: &mut BTreeMap<String, HostError>,
) {
    loop {
        let missing: Vec<(String, String)> = candidates
            .iter()
            .filter_map(|(id, descriptor)| {
                descriptor
                    .dependencies
                    .required
                    .iter()
                    .find(|dep| !candidates.contains_key(dep.as_str()))
                    .map(|dep| (id.to_string(), dep.clone()))
            })
            .collect();

        if missing.is_empty() {
            return;
        }

        for (id, dependency) in missing {
            candidates.remove(id.as_str());
            reject(errors, &id, HostError::MissingDependency { id: id.clone(), dependency });
        }
    }
}

/// Reject cycle members (and what requires them) until the rest orders cleanly
fn drop_cycles(
    candidates: &mut BTreeMap<&str, &ExtensionDescriptor>,
    errors: &mut BTreeMap<String, HostError>,
) -> Vec<String> {
    loop {
        let (order, blocked) = topological_order(candidates);
        if blocked.is_empty() {
            return order;
        }

        for (id, cycle) in find_cycles(candidates, &blocked) {
            candidates.remove(id.as_str());
            reject(errors, &id, HostError::CyclicDependency { id: id.clone(), cycle });
        }
        drop_missing(candidates, errors);
    }
}

/// Ids `descriptor` must follow among the candidates
fn predecessors<'a>(
    descriptor: &'a ExtensionDescriptor,
    candidates: &BTreeMap<&str, &ExtensionDescriptor>,
) -> BTreeSet<&'a str> {
    descriptor
        .ordering_dependencies()
        .map(String::as_str)
        .filter(|dep| candidates.contains_key(dep))
        .collect()
}

/// Kahn's algorithm; returns the order and the ids that could not be placed
fn topological_order(
    candidates: &BTreeMap<&str, &ExtensionDescriptor>,
) -> (Vec<String>, BTreeSet<String>) {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (id, descriptor) in candidates {
        let preds = predecessors(descriptor, candidates);
        indegree.insert(*id, preds.len());
        for pred in preds {
            dependents.entry(pred).or_default().push(*id);
        }
    }

    let mut ready: BTreeSet<(i32, &str)> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| (candidates[id].priority, *id))
        .collect();

    let mut order = Vec::with_capacity(candidates.len());
    while let Some(next) = ready.pop_first() {
        let (_, id) = next;
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((candidates[dependent].priority, *dependent));
                }
            }
        }
    }

    let blocked = indegree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(id, _)| id.to_string())
        .collect();
    (order, blocked)
}

/// Blocked ids that sit on a cycle, each with one cycle path through it
fn find_cycles(
    candidates: &BTreeMap<&str, &ExtensionDescriptor>,
    blocked: &BTreeSet<String>,
) -> Vec<(String, Vec<String>)> {
    // id -> ids it must follow, restricted to the blocked set
    let edges: BTreeMap<&str, Vec<&str>> = blocked
        .iter()
        .filter_map(|id| candidates.get(id.as_str()).map(|d| (id.as_str(), *d)))
        .map(|(id, descriptor)| {
            let preds = predecessors(descriptor, candidates)
                .into_iter()
                .filter(|p| blocked.contains(*p))
                .collect();
            (id, preds)
        })
        .collect();

    edges
        .keys()
        .filter_map(|start| path_back_to(start, &edges).map(|cycle| (start.to_string(), cycle)))
        .collect()
}

/// Shortest path start -> ... -> start, if one exists
fn path_back_to(start: &str, edges: &BTreeMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
    let mut queue: VecDeque<&str> = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for next in edges.get(node).into_iter().flatten().copied() {
            if next == start {
                let mut path = vec![start.to_string()];
                let mut cursor = node;
                let mut back = Vec::new();
                while cursor != start {
                    back.push(cursor.to_string());
                    cursor = parent.get(cursor).copied().unwrap_or(start);
                }
                back.reverse();
                path.extend(back);
                path.push(start.to_string());
                return Some(path);
            }
            if next != start && !parent.contains_key(next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::SourceKind;

    fn ext(id: &str, priority: i32) -> ExtensionDescriptor {
        ExtensionDescriptor::new(id, SourceKind::Module).with_priority(priority)
    }

    #[test]
    fn test_conflict_scenario() {
        let descriptors = vec![
            ext("A", 0),
            ext("B", 50).requires("A"),
            ext("C", 50).requires("B").conflicts_with("A"),
        ];
        let resolution = resolve(&descriptors);
        assert_eq!(resolution.order, vec!["A", "B"]);
        assert_eq!(
            resolution.errors["C"],
            HostError::ConflictingExtension {
                id: "C".into(),
                other: "A".into()
            }
        );
    }

    #[test]
    fn test_ties_break_on_priority_then_id() {
        let descriptors = vec![ext("zeta", 10), ext("alpha", 10), ext("mid", 5), ext("last", 90)];
        assert_eq!(
            resolve(&descriptors).order,
            vec!["mid", "alpha", "zeta", "last"]
        );
    }

    #[test]
    fn test_dependencies_override_priority() {
        let descriptors = vec![ext("base", 200), ext("addon", 0).requires("base")];
        assert_eq!(resolve(&descriptors).order, vec!["base", "addon"]);
    }

    #[test]
    fn test_soft_dependencies() {
        let descriptors = vec![
            ext("ui", 0).soft_requires("theme").soft_requires("absent"),
            ext("theme", 100),
        ];
        let resolution = resolve(&descriptors);
        assert_eq!(resolution.order, vec!["theme", "ui"]);
        assert!(resolution.is_clean());
    }

    #[test]
    fn test_missing_dependency_propagates() {
        let descriptors = vec![ext("b", 0).requires("ghost"), ext("c", 0).requires("b"), ext("d", 0)];
        let resolution = resolve(&descriptors);
        assert_eq!(resolution.order, vec!["d"]);
        assert_eq!(resolution.errors["b"].kind(), "MissingDependency");
        assert_eq!(
            resolution.errors["c"],
            HostError::MissingDependency {
                id: "c".into(),
                dependency: "b".into()
            }
        );
    }

    #[test]
    fn test_cycle_members_are_rejected() {
        let descriptors = vec![
            ext("x", 0).requires("z"),
            ext("y", 0).requires("x"),
            ext("z", 0).requires("y"),
            ext("after", 0).requires("x"),
            ext("loose", 0).soft_requires("y"),
            ext("free", 0),
        ];
        let resolution = resolve(&descriptors);
        assert_eq!(resolution.order, vec!["free", "loose"]);
        for id in ["x", "y", "z"] {
            assert_eq!(resolution.errors[id].kind(), "CyclicDependency");
        }
        assert_eq!(resolution.errors["after"].kind(), "MissingDependency");
        match &resolution.errors["x"] {
            HostError::CyclicDependency { cycle, .. } => {
                assert_eq!(cycle, &vec!["x", "z", "y", "x"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_conflict_with_unloadable_extension_is_ignored() {
        let descriptors = vec![
            ext("x", 0).requires("y"),
            ext("y", 0).requires("x"),
            ext("a", 0).conflicts_with("x"),
            ext("b", 0).conflicts_with("ghost_dependent"),
            ext("ghost_dependent", 0).requires("ghost"),
        ];
        let resolution = resolve(&descriptors);
        assert_eq!(resolution.order, vec!["a", "b"]);
        assert_eq!(resolution.errors["x"].kind(), "CyclicDependency");
        assert_eq!(resolution.errors["ghost_dependent"].kind(), "MissingDependency");
        assert!(!resolution.errors.contains_key("a"));
        assert!(!resolution.errors.contains_key("b"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let resolution = resolve(&[ext("ouro", 0).requires("ouro")]);
        assert!(resolution.order.is_empty());
        assert_eq!(resolution.errors["ouro"].kind(), "CyclicDependency");
    }

    #[test]
    fn test_mutual_conflict_and_preference() {
        let descriptors = vec![
            ext("left", 0).conflicts_with("right"),
            ext("right", 0).conflicts_with("left"),
        ];
        let resolution = resolve(&descriptors);
        assert!(resolution.order.is_empty());
        assert_eq!(resolution.errors.len(), 2);

        let resolution = DependencyResolver::new()
            .with_preferred(["right"])
            .resolve(&descriptors);
        assert_eq!(resolution.order, vec!["right"]);
        assert_eq!(resolution.errors["left"].kind(), "ConflictingExtension");
    }

    #[test]
    fn test_shared_provides_conflict() {
        let mut a = ext("sqlite-store", 0);
        a.provides.insert("storage".into());
        let mut b = ext("memory-store", 0);
        b.provides.insert("storage".into());

        let resolution = DependencyResolver::new()
            .with_preferred(["memory-store"])
            .resolve(&[a, b]);
        assert_eq!(resolution.order, vec!["memory-store"]);
    }

    #[test]
    fn test_duplicate_ids_are_malformed() {
        let resolution = resolve(&[ext("twin", 0), ext("twin", 5), ext("solo", 0)]);
        assert_eq!(resolution.order, vec!["solo"]);
        assert_eq!(resolution.errors["twin"].kind(), "MalformedSource");
    }
}
