use std::collections::{BTreeSet, HashSet};

use crate::Adjacency;

/// Directed `(from, to)` pairs to highlight.
pub type EdgeSet = BTreeSet<(String, String)>;

/// Depth-first search for a path from `start` to `end`.
///
/// Successors are tried in adjacency order and the first complete path wins,
/// so the result is not necessarily the shortest. Nodes already on the current
/// path are never revisited.
pub fn find_path(adjacency: &Adjacency, start: &str, end: &str) -> Option<Vec<String>> {
    let mut path: Vec<&str> = vec![start];
    let mut on_path: HashSet<&str> = HashSet::from([start]);
    // Index of the next successor to try, per node on `path`.
    let mut cursors: Vec<usize> = vec![0];

    loop {
        let (Some(&node), Some(cursor)) = (path.last(), cursors.last_mut()) else {
            return None;
        };
        if node == end {
            return Some(path.into_iter().map(str::to_string).collect());
        }

        let successors = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
        match successors.get(*cursor) {
            Some(next) => {
                *cursor += 1;
                if on_path.insert(next) {
                    path.push(next);
                    cursors.push(0);
                }
            }
            None => {
                if let Some(done) = path.pop() {
                    on_path.remove(done);
                }
                cursors.pop();
            }
        }
    }
}

/// Edges to highlight for the selected nodes, walking from `root`.
///
/// One selection highlights its root path. For several, every pair is joined
/// through the first node of the first path that also lies on the second;
/// pairs without a path or a shared node contribute nothing.
pub fn highlight_for_selection(adjacency: &Adjacency, root: &str, selected: &[String]) -> EdgeSet {
    let mut edges = EdgeSet::new();

    match selected {
        [] => {}
        [only] => {
            if let Some(path) = find_path(adjacency, root, only) {
                add_edges(&mut edges, &path);
            }
        }
        _ => {
            for (i, a) in selected.iter().enumerate() {
                for b in &selected[i + 1..] {
                    let (Some(path_a), Some(path_b)) =
                        (find_path(adjacency, root, a), find_path(adjacency, root, b))
                    else {
                        continue;
                    };
                    let Some(ancestor) = path_a.iter().find(|n| path_b.contains(*n)) else {
                        continue;
                    };
                    for path in [&path_a, &path_b] {
                        if let Some(at) = path.iter().position(|n| n == ancestor) {
                            add_edges(&mut edges, &path[at..]);
                        }
                    }
                }
            }
        }
    }

    edges
}

fn add_edges(edges: &mut EdgeSet, path: &[String]) {
    for pair in path.windows(2) {
        edges.insert((pair[0].clone(), pair[1].clone()));
    }
}
