use extract::{Entity, ExtractionResult, Relation};
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

use crate::GraphModel;

pub const COURSE_TYPE: &str = "课程";
pub const PART_TYPE: &str = "部分";
pub const CHAPTER_TYPE: &str = "章节";
pub const SECTION_TYPE: &str = "小节";
pub const TOPIC_TYPE: &str = "知识点";
pub const CONTAINS: &str = "包含";

/// Default course title for the bundled textbook.
pub const DEFAULT_COURSE_TITLE: &str = "三维动画设计原理";

/// Display color for each structural entity type.
pub fn type_color(entity_type: &str) -> &'static str {
    match entity_type {
        COURSE_TYPE => "#9467bd",
        PART_TYPE => "#ff7f0e",
        CHAPTER_TYPE => "#1f77b4",
        SECTION_TYPE => "#2ca02c",
        TOPIC_TYPE => "#d62728",
        _ => "#7f7f7f",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseOutline {
    pub title: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub title: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chapter {
    pub title: String,
    pub sections: Vec<String>,
}

impl CourseOutline {
    /// Read `#` parts, `##` chapters and `###` sections from a table of contents.
    pub fn parse(index: &str, title: &str) -> Self {
        let mut parts: Vec<Part> = Vec::new();

        for (line_no, line) in index.split('\n').enumerate() {
            if let Some(heading) = line.strip_prefix("# ") {
                parts.push(Part {
                    title: heading.trim().to_string(),
                    chapters: Vec::new(),
                });
            } else if let Some(heading) = line.strip_prefix("## ") {
                match parts.last_mut() {
                    Some(part) => part.chapters.push(Chapter {
                        title: heading.trim().to_string(),
                        sections: Vec::new(),
                    }),
                    None => warn!(line = line_no + 1, heading, "Chapter outside any part, skipped"),
                }
            } else if let Some(heading) = line.strip_prefix("### ") {
                match parts.last_mut().and_then(|p| p.chapters.last_mut()) {
                    Some(chapter) => chapter.sections.push(heading.trim().to_string()),
                    None => warn!(line = line_no + 1, heading, "Section outside any chapter, skipped"),
                }
            }
        }

        Self {
            title: title.to_string(),
            parts,
        }
    }
}

/// Derive the course structure graph from the outline and the textbook body.
///
/// `####` headings in `content` become topics under the most recent `###`
/// section heading.
pub fn build_course_graph(outline: &CourseOutline, content: &str) -> GraphModel {
    let mut builder = Builder::default();

    let course_id = format!("course_{}", outline.title);
    builder.entity(&course_id, &outline.title, COURSE_TYPE);

    for part in &outline.parts {
        let part_id = format!("part_{}", part.title);
        builder.entity(&part_id, &part.title, PART_TYPE);
        builder.contains(&course_id, &part_id);

        for chapter in &part.chapters {
            let chapter_id = format!("chapter_{}", chapter.title);
            builder.entity(&chapter_id, &chapter.title, CHAPTER_TYPE);
            builder.contains(&part_id, &chapter_id);

            for section in &chapter.sections {
                let section_id = format!("section_{}", section);
                builder.entity(&section_id, section, SECTION_TYPE);
                builder.contains(&chapter_id, &section_id);
            }
        }
    }

    let mut current_section: Option<String> = None;
    for line in content.split('\n') {
        if let Some(topic) = line.strip_prefix("#### ") {
            let topic = topic.trim();
            let topic_id = format!("topic_{}", topic);
            builder.entity(&topic_id, topic, TOPIC_TYPE);
            if let Some(section_id) = &current_section {
                builder.contains(section_id, &topic_id);
            }
        } else if let Some(section) = line.strip_prefix("### ") {
            current_section = Some(format!("section_{}", section.trim()));
        }
    }

    let mut graph = GraphModel::new();
    graph.merge(builder.result);
    graph
}

#[derive(Default)]
struct Builder {
    seen: HashSet<String>,
    result: ExtractionResult,
}

impl Builder {
    fn entity(&mut self, id: &str, label: &str, entity_type: &str) {
        if self.seen.insert(id.to_string()) {
            self.result.entities.push(Entity::new(id, label, entity_type));
        }
    }

    fn contains(&mut self, from: &str, to: &str) {
        self.result.relations.push(Relation::new(from, to, CONTAINS));
    }
}

/// Body of the topic titled `label`: the text after its `####` heading up to
/// the next `####` heading, trimmed.
pub fn knowledge_point_content<'a>(content: &'a str, label: &str) -> Option<&'a str> {
    let mut offset = 0;
    let mut start = None;
    for line in content.split_inclusive('\n') {
        let heading = line.strip_prefix("#### ").map(str::trim);
        match (start, heading) {
            (None, Some(title)) if title == label => start = Some(offset + line.len()),
            (Some(body), Some(_)) => return Some(content[body..offset].trim()),
            _ => {}
        }
        offset += line.len();
    }
    start.map(|body| content[body..].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = "# 第一部分 基础\n## 第1章 动画概述\n### 1.1 动画的起源\n### 1.2 动画的原理\n## 第2章 关键帧\n### 2.1 关键帧动画\n# 第二部分 进阶\n## 第3章 骨骼\n";

    const CONTENT: &str = "### 1.1 动画的起源\n#### 视觉暂留\n人眼的视觉暂留现象。\n\n#### 走马灯\n早期的动画装置。\n![走马灯](images/zoumadeng.png)\n### 2.1 关键帧动画\n#### 关键帧\n动画中的关键姿态。";

    #[test]
    fn test_parse_outline() {
        let outline = CourseOutline::parse(INDEX, DEFAULT_COURSE_TITLE);

        assert_eq!(outline.title, DEFAULT_COURSE_TITLE);
        assert_eq!(outline.parts.len(), 2);
        assert_eq!(outline.parts[0].chapters.len(), 2);
        assert_eq!(
            outline.parts[0].chapters[0].sections,
            vec!["1.1 动画的起源", "1.2 动画的原理"]
        );
        assert!(outline.parts[1].chapters[0].sections.is_empty());
    }

    #[test]
    fn test_orphan_headings_are_skipped() {
        let outline = CourseOutline::parse("### 孤立小节\n## 孤立章节\n# 部分\n### 仍然孤立\n", "课");
        assert_eq!(outline.parts.len(), 1);
        assert!(outline.parts[0].chapters.is_empty());
    }

    #[test]
    fn test_build_course_graph() {
        let outline = CourseOutline::parse(INDEX, DEFAULT_COURSE_TITLE);
        let graph = build_course_graph(&outline, CONTENT);

        let counts = graph.type_counts();
        assert_eq!(counts[COURSE_TYPE], 1);
        assert_eq!(counts[PART_TYPE], 2);
        assert_eq!(counts[CHAPTER_TYPE], 3);
        assert_eq!(counts[SECTION_TYPE], 3);
        assert_eq!(counts[TOPIC_TYPE], 3);

        assert!(graph.relations().iter().all(|r| r.label == CONTAINS));
        assert!(graph.relations().contains(&Relation::new(
            "section_1.1 动画的起源",
            "topic_走马灯",
            CONTAINS
        )));
        assert_eq!(graph.default_root().unwrap().id, "course_三维动画设计原理");

        let path = crate::find_path(
            &graph.to_adjacency(),
            "course_三维动画设计原理",
            "topic_关键帧",
        )
        .unwrap();
        assert_eq!(
            path,
            vec![
                "course_三维动画设计原理",
                "part_第一部分 基础",
                "chapter_第2章 关键帧",
                "section_2.1 关键帧动画",
                "topic_关键帧",
            ]
        );
    }

    #[test]
    fn test_topics_before_any_section_stay_unattached() {
        let outline = CourseOutline::parse("", "课");
        let graph = build_course_graph(&outline, "#### 序\n正文\n#### 序\n");

        assert_eq!(graph.len(), 2);
        assert!(graph.relations().is_empty());
    }

    #[test]
    fn test_knowledge_point_content() {
        assert_eq!(
            knowledge_point_content(CONTENT, "视觉暂留"),
            Some("人眼的视觉暂留现象。")
        );
        assert_eq!(
            knowledge_point_content(CONTENT, "走马灯"),
            Some("早期的动画装置。\n![走马灯](images/zoumadeng.png)\n### 2.1 关键帧动画")
        );
        assert_eq!(knowledge_point_content(CONTENT, "关键帧"), Some("动画中的关键姿态。"));
        assert_eq!(knowledge_point_content(CONTENT, "骨骼绑定"), None);
    }

    #[test]
    fn test_knowledge_point_matches_whole_heading() {
        let content = "### 2.1 关键帧\n#### 关键帧动画\n动画体内容。\n#### 关键帧\n关键帧体内容。\n##### 关键帧\n";

        assert_eq!(
            knowledge_point_content(content, "关键帧"),
            Some("关键帧体内容。\n##### 关键帧")
        );
        assert_eq!(knowledge_point_content(content, "关键帧动画"), Some("动画体内容。"));
        assert_eq!(knowledge_point_content("##### 关键帧\n正文", "关键帧"), None);
        assert_eq!(knowledge_point_content("#### 关键帧", "关键帧"), Some(""));
    }

    #[test]
    fn test_type_colors() {
        assert_eq!(type_color(TOPIC_TYPE), "#d62728");
        assert_eq!(type_color("概念"), "#7f7f7f");
    }
}
