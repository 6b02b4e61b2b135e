use extract::{Entity, ExtractionResult, Relation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::outline::COURSE_TYPE;

/// Entity id -> successor ids, in relation order.
pub type Adjacency = HashMap<String, Vec<String>>;

/// Session-long entity/relation store.
///
/// Serializes to the snapshot shape `{"entities": [...], "relations": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphModel {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relations: Vec<Relation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub entities_added: usize,
    pub relations_added: usize,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union an extraction result into the graph by value.
    ///
    /// An incoming entity whose id already belongs to a different entity is
    /// folded onto an existing entity with the same label and type, or else
    /// given the next free `entity_<n>` id. Relations follow the same mapping.
    pub fn merge(&mut self, result: ExtractionResult) -> MergeReport {
        let mut report = MergeReport::default();
        let mut mapping: HashMap<String, String> = HashMap::new();

        for entity in result.entities {
            let target = match self.entity(&entity.id) {
                Some(existing) if *existing == entity => entity.id.clone(),
                None => {
                    self.entities.push(entity.clone());
                    report.entities_added += 1;
                    entity.id.clone()
                }
                Some(_) => match self.find_same(&entity.label, &entity.entity_type) {
                    Some(same) => same.id.clone(),
                    None => {
                        let id = self.next_free_id();
                        debug!(from = %entity.id, to = %id, "Re-keyed colliding entity");
                        self.entities
                            .push(Entity::new(id.clone(), entity.label.clone(), entity.entity_type.clone()));
                        report.entities_added += 1;
                        id
                    }
                },
            };
            mapping.entry(entity.id).or_insert(target);
        }

        for relation in result.relations {
            let from = mapping.get(&relation.from).cloned().unwrap_or(relation.from);
            let to = mapping.get(&relation.to).cloned().unwrap_or(relation.to);
            if from.is_empty() || to.is_empty() {
                continue;
            }
            let relation = Relation::new(from, to, relation.label);
            if !self.relations.contains(&relation) {
                self.relations.push(relation);
                report.relations_added += 1;
            }
        }

        report
    }

    /// Successor lists for relations whose endpoints both exist.
    pub fn to_adjacency(&self) -> Adjacency {
        let known: HashSet<&str> = self.entities.iter().map(|e| e.id.as_str()).collect();
        let mut adjacency = Adjacency::new();
        for relation in &self.relations {
            if known.contains(relation.from.as_str()) && known.contains(relation.to.as_str()) {
                adjacency
                    .entry(relation.from.clone())
                    .or_default()
                    .push(relation.to.clone());
            }
        }
        adjacency
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entity(id).is_some()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.relations.clear();
    }

    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entity in &self.entities {
            *counts.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// First course entity, else the first entity nothing points at.
    pub fn default_root(&self) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.entity_type == COURSE_TYPE)
            .or_else(|| {
                let targets: HashSet<&str> = self.relations.iter().map(|r| r.to.as_str()).collect();
                self.entities.iter().find(|e| !targets.contains(e.id.as_str()))
            })
    }

    /// Case-insensitive label search, optionally restricted to one type.
    pub fn search(&self, entity_type: Option<&str>, query: &str) -> Vec<&Entity> {
        let query = query.to_lowercase();
        self.entities
            .iter()
            .filter(|e| entity_type.is_none_or(|t| e.entity_type == t))
            .filter(|e| e.label.to_lowercase().contains(&query))
            .collect()
    }

    fn find_same(&self, label: &str, entity_type: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.label == label && e.entity_type == entity_type)
    }

    fn next_free_id(&self) -> String {
        let taken: HashSet<&str> = self.entities.iter().map(|e| e.id.as_str()).collect();
        (self.entities.len() + 1..)
            .map(|n| format!("entity_{}", n))
            .find(|id| !taken.contains(id.as_str()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(entities: Vec<Entity>, relations: Vec<Relation>) -> ExtractionResult {
        ExtractionResult { entities, relations }
    }

    fn animation() -> ExtractionResult {
        result(
            vec![
                Entity::new("entity_1", "关键帧", "概念"),
                Entity::new("entity_2", "中间帧", "概念"),
            ],
            vec![Relation::new("entity_1", "entity_2", "生成")],
        )
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut graph = GraphModel::new();
        let first = graph.merge(animation());
        let second = graph.merge(animation());

        assert_eq!(first, MergeReport { entities_added: 2, relations_added: 1 });
        assert_eq!(second, MergeReport::default());
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.relations().len(), 1);
    }

    #[test]
    fn test_colliding_ids_are_rekeyed() {
        let mut graph = GraphModel::new();
        graph.merge(animation());

        let rigging = result(
            vec![
                Entity::new("entity_1", "骨骼", "技术"),
                Entity::new("entity_2", "蒙皮", "技术"),
            ],
            vec![Relation::new("entity_2", "entity_1", "依赖")],
        );
        let report = graph.merge(rigging.clone());

        assert_eq!(report.entities_added, 2);
        assert_eq!(graph.entity("entity_3").unwrap().label, "骨骼");
        assert_eq!(graph.entity("entity_4").unwrap().label, "蒙皮");
        assert!(graph.relations().contains(&Relation::new("entity_4", "entity_3", "依赖")));

        let ids: HashSet<&str> = graph.entities().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), graph.len());

        // The second time round the collisions fold onto the re-keyed entities.
        assert_eq!(graph.merge(rigging), MergeReport::default());
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_collision_folds_onto_same_label() {
        let mut graph = GraphModel::new();
        graph.merge(animation());

        let report = graph.merge(result(
            vec![
                Entity::new("entity_1", "中间帧", "概念"),
                Entity::new("entity_3", "插值", "方法"),
            ],
            vec![Relation::new("entity_3", "entity_1", "计算")],
        ));

        assert_eq!(report.entities_added, 1);
        assert!(graph.relations().contains(&Relation::new("entity_3", "entity_2", "计算")));
    }

    #[test]
    fn test_adjacency_keeps_order_and_duplicates() {
        let mut graph = GraphModel::new();
        graph.merge(result(
            vec![
                Entity::new("a", "A", "t"),
                Entity::new("b", "B", "t"),
                Entity::new("c", "C", "t"),
            ],
            vec![
                Relation::new("a", "c", "x"),
                Relation::new("a", "b", "x"),
                Relation::new("a", "c", "y"),
                Relation::new("a", "ghost", "x"),
            ],
        ));

        let adjacency = graph.to_adjacency();
        assert_eq!(adjacency["a"], vec!["c", "b", "c"]);
        assert!(!adjacency.contains_key("ghost"));
        assert_eq!(graph.relations().len(), 4);
    }

    #[test]
    fn test_default_root() {
        let mut graph = GraphModel::new();
        assert!(graph.default_root().is_none());

        graph.merge(animation());
        assert_eq!(graph.default_root().unwrap().id, "entity_1");

        graph.merge(result(vec![Entity::new("course_x", "课程X", COURSE_TYPE)], vec![]));
        assert_eq!(graph.default_root().unwrap().id, "course_x");
    }

    #[test]
    fn test_search_and_type_counts() {
        let mut graph = GraphModel::new();
        graph.merge(result(
            vec![
                Entity::new("topic_a", "Keyframe 关键帧", "知识点"),
                Entity::new("topic_b", "Rigging", "知识点"),
                Entity::new("section_a", "keyframe basics", "小节"),
            ],
            vec![],
        ));

        let hits = graph.search(Some("知识点"), "KEYFRAME");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "topic_a");
        assert_eq!(graph.search(None, "keyframe").len(), 2);

        let counts = graph.type_counts();
        assert_eq!(counts["知识点"], 2);
        assert_eq!(counts["小节"], 1);
    }

    #[test]
    fn test_snapshot_shape_and_clear() {
        let mut graph = GraphModel::new();
        graph.merge(animation());

        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["entities"][0]["type"], "概念");
        assert_eq!(json["relations"][0]["from"], "entity_1");

        let restored: GraphModel = serde_json::from_value(json).unwrap();
        assert_eq!(restored, graph);

        graph.clear();
        assert!(graph.is_empty());
        assert!(graph.to_adjacency().is_empty());
    }
}
