pub mod model;
pub mod outline;
pub mod path;
pub mod snapshot;

pub use model::{Adjacency, GraphModel, MergeReport};
pub use outline::{CourseOutline, build_course_graph, knowledge_point_content, type_color};
pub use path::{EdgeSet, find_path, highlight_for_selection};

use serde::Serialize;
use tracing::warn;

/// Highlighted edges plus the root they were walked from.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Highlight {
    pub root: Option<String>,
    pub edges: Vec<(String, String)>,
    pub notices: Vec<String>,
}

/// Resolve the root and highlight the selection against the model.
///
/// An unknown or missing root falls back to [`GraphModel::default_root`].
/// Problems become notices, never errors.
pub fn highlight(model: &GraphModel, root: Option<&str>, selected: &[String]) -> Highlight {
    let mut notices = Vec::new();

    let requested = root.filter(|id| {
        let known = model.contains(id);
        if !known {
            notices.push(format!("Root node '{}' is not in the graph", id));
        }
        known
    });
    let Some(root) = requested
        .map(str::to_string)
        .or_else(|| model.default_root().map(|e| e.id.clone()))
    else {
        if !selected.is_empty() {
            warn!("Highlight requested on a graph without a root");
            notices.push("No root node available for highlighting".to_string());
        }
        return Highlight {
            root: None,
            edges: Vec::new(),
            notices,
        };
    };

    for id in selected.iter().filter(|id| !model.contains(id)) {
        notices.push(format!("Selected node '{}' is not in the graph", id));
    }

    let edges = highlight_for_selection(&model.to_adjacency(), &root, selected);
    if edges.is_empty() && selected.iter().any(|id| *id != root) {
        notices.push(format!("No path from '{}' to the selected nodes", root));
    }

    Highlight {
        root: Some(root),
        edges: edges.into_iter().collect(),
        notices,
    }
}
