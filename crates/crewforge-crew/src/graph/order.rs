use std::collections::{HashMap, VecDeque};

/// Kahn's algorithm over task dependencies.
///
/// `tasks` is the node-list order, which seeds the FIFO queue and breaks
/// ties. `deps[t]` lists the tasks `t` depends on. Returns the tasks left
/// unordered (in node-list order) when the dependencies contain a cycle.
pub fn topological_order(
    tasks: &[String],
    deps: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        for dep in deps.get(task).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(task.as_str()) {
                *degree += 1;
            }
            dependents.entry(dep.as_str()).or_default().push(task.as_str());
        }
    }

    let mut queue: VecDeque<&str> = tasks
        .iter()
        .map(String::as_str)
        .filter(|t| in_degree.get(t) == Some(&0))
        .collect();
    let mut ordered = Vec::with_capacity(tasks.len());

    while let Some(task) = queue.pop_front() {
        ordered.push(task.to_string());
        for &next in dependents.get(task).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if ordered.len() == tasks.len() {
        Ok(ordered)
    } else {
        Err(tasks
            .iter()
            .filter(|t| !ordered.contains(t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn deps(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs.iter().map(|(t, d)| (t.to_string(), ids(d))).collect()
    }

    #[test]
    fn independent_tasks_keep_node_order() {
        let order = topological_order(&ids(&["c", "a", "b"]), &HashMap::new()).unwrap();
        assert_eq!(order, ids(&["c", "a", "b"]));
    }

    #[test]
    fn dependencies_come_first() {
        let order = topological_order(
            &ids(&["t3", "t2", "t1"]),
            &deps(&[("t3", &["t2"]), ("t2", &["t1"])]),
        )
        .unwrap();
        assert_eq!(order, ids(&["t1", "t2", "t3"]));
    }

    #[test]
    fn diamond_is_fifo() {
        let order = topological_order(
            &ids(&["root", "left", "right", "join"]),
            &deps(&[("left", &["root"]), ("right", &["root"]), ("join", &["left", "right"])]),
        )
        .unwrap();
        assert_eq!(order, ids(&["root", "left", "right", "join"]));
    }

    #[test]
    fn cycle_reports_unordered_tasks() {
        let err = topological_order(
            &ids(&["free", "a", "b"]),
            &deps(&[("a", &["b"]), ("b", &["a"])]),
        )
        .unwrap_err();
        assert_eq!(err, ids(&["a", "b"]));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = topological_order(&ids(&["a"]), &deps(&[("a", &["a"])])).unwrap_err();
        assert_eq!(err, ids(&["a"]));
    }
}
