use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use thiserror::Error;

/// Error that can occur when resolving dependencies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// Dependency cycle detected; the path starts and ends with the same plugin
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

/// Result of scheduling a batch of plugins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    /// Waves in load order; plugins inside a wave do not depend on each other
    pub waves: Vec<Vec<String>>,
    /// Plugins that could not be placed: cycle members and plugins that depend on them
    pub blocked: Vec<String>,
}

/// `requires` edges between registered plugins
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    requires: BTreeMap<String, Vec<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, requires: &[String]) {
        for dependency in requires {
            self.dependents.entry(dependency.clone()).or_default().insert(name.to_string());
        }
        self.requires.insert(name.to_string(), requires.to_vec());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.requires.contains_key(name)
    }

    pub fn requires_of(&self, name: &str) -> &[String] {
        self.requires.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Plugins that directly require `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents
            .get(name)
            .map(|dependents| dependents.iter().filter(|d| self.contains(d)).cloned().collect())
            .unwrap_or_default()
    }

    /// Every plugin that requires `name` directly or indirectly, ordered so that
    /// each plugin comes before anything it requires.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(&current) {
                if dependent != name && found.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        self.unload_order(&found)
    }

    /// Order `subset` for loading with Kahn's algorithm, one wave per layer.
    ///
    /// Only edges inside `subset` are considered; dependencies outside of it are
    /// checked by the caller at load time.
    pub fn load_waves(&self, subset: &BTreeSet<String>) -> LoadPlan {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for name in subset {
            let within: BTreeSet<&String> = self.requires_of(name).iter().filter(|dep| subset.contains(*dep)).collect();
            in_degree.insert(name.as_str(), within.len());
        }

        let mut waves = Vec::new();
        let mut current: Vec<String> =
            in_degree.iter().filter(|(_, degree)| **degree == 0).map(|(name, _)| name.to_string()).collect();
        let mut placed = BTreeSet::new();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for name in &current {
                placed.insert(name.clone());
                for dependent in self.dependents_of(name) {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            waves.push(current);
            current = next.into_iter().collect();
        }

        let blocked = subset.iter().filter(|name| !placed.contains(*name)).cloned().collect();
        LoadPlan { waves, blocked }
    }

    /// Order `subset` so that dependents come before their dependencies.
    ///
    /// Members of a cycle are appended at the end in name order.
    pub fn unload_order(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut remaining = subset.clone();
        let mut order = Vec::with_capacity(subset.len());
        loop {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|name| self.dependents_of(name).iter().all(|d| !remaining.contains(d)))
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                remaining.remove(&name);
                order.push(name);
            }
        }
        order.extend(remaining);
        order
    }

    /// The dependency path from `start` back to itself, if `start` is on a cycle
    pub fn cycle_path(&self, start: &str) -> Option<Vec<String>> {
        let mut path = vec![start.to_string()];
        let mut visited = HashSet::new();
        self.find_back(start, start, &mut path, &mut visited).then_some(path)
    }

    fn find_back(&self, start: &str, current: &str, path: &mut Vec<String>, visited: &mut HashSet<String>) -> bool {
        for dependency in self.requires_of(current) {
            if dependency == start {
                path.push(dependency.clone());
                return true;
            }
            if self.contains(dependency) && visited.insert(dependency.clone()) {
                path.push(dependency.clone());
                if self.find_back(start, dependency, path, visited) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}
