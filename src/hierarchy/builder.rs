//! Deferred parent resolution with conflict and cycle checks.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{EdgeType, HierarchyEdge, NodeKey, NodeLabel, Warning};

use super::range::CodeRange;
use super::rule::ParentRef;

/// The nodes known to exist, by label, plus the ICD10 group ranges.
#[derive(Debug, Default, Clone)]
pub struct NodeIndex {
    ids: HashMap<NodeLabel, HashSet<String>>,
    groups: Vec<CodeRange>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &NodeKey) {
        if key.label == NodeLabel::IcdGroup {
            if let Some(range) = CodeRange::parse(&key.id) {
                if !self.groups.contains(&range) {
                    self.groups.push(range);
                }
            }
        }
        self.ids
            .entry(key.label)
            .or_default()
            .insert(key.id.clone());
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.ids
            .get(&key.label)
            .is_some_and(|ids| ids.contains(&key.id))
    }

    pub fn len(&self) -> usize {
        self.ids.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The node a candidate points to, looking in the labels allowed as
    /// parents of `child`, nearest level first.
    pub fn resolve(&self, candidate: &ParentRef, child: NodeLabel) -> Option<NodeKey> {
        match candidate {
            ParentRef::Code(code) => parent_labels(child)
                .iter()
                .map(|label| NodeKey::new(*label, code.as_str()))
                .find(|key| self.contains(key)),
            ParentRef::Range(code) if parent_labels(child).contains(&NodeLabel::IcdGroup) => {
                CodeRange::narrowest(&self.groups, code)
                    .map(|range| NodeKey::new(NodeLabel::IcdGroup, range.id.as_str()))
            }
            ParentRef::Range(_) => None,
        }
    }
}

impl<'a> FromIterator<&'a NodeKey> for NodeIndex {
    fn from_iter<I: IntoIterator<Item = &'a NodeKey>>(iter: I) -> Self {
        let mut index = NodeIndex::new();
        for key in iter {
            index.insert(key);
        }
        index
    }
}

fn parent_labels(child: NodeLabel) -> &'static [NodeLabel] {
    match child {
        NodeLabel::IcdDisease => &[
            NodeLabel::IcdDisease,
            NodeLabel::IcdGroup,
            NodeLabel::IcdChapter,
        ],
        NodeLabel::IcdGroup => &[NodeLabel::IcdChapter],
        NodeLabel::HpoPhenotype => &[NodeLabel::HpoPhenotype],
        _ => &[],
    }
}

/// Collects children with their parent candidates and links them once
/// the parents exist.
///
/// Every child gets at most one parent. Links that already exist in the
/// store can be registered with [`link_existing`](Self::link_existing) so
/// cycle checks see them.
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    candidates: HashMap<NodeKey, Vec<ParentRef>>,
    pending: BTreeSet<NodeKey>,
    parents: HashMap<NodeKey, NodeKey>,
    warnings: Vec<Warning>,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a child. Returns `false` when the child was already
    /// registered with different candidates; the first registration wins.
    pub fn add(&mut self, child: NodeKey, candidates: Vec<ParentRef>) -> bool {
        if candidates.is_empty() || self.parents.contains_key(&child) {
            return true;
        }
        if let Some(existing) = self.candidates.get(&child) {
            if *existing != candidates {
                self.warnings.push(Warning::HierarchyConflict {
                    label: child.label.to_string(),
                    child: child.id.clone(),
                    kept: join(existing),
                    rejected: join(&candidates),
                });
                return false;
            }
            return true;
        }
        self.pending.insert(child.clone());
        self.candidates.insert(child, candidates);
        true
    }

    /// Records a link that already exists.
    pub fn link_existing(&mut self, child: NodeKey, parent: NodeKey) {
        self.pending.remove(&child);
        self.parents.insert(child, parent);
    }

    /// Children still waiting for a parent.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Links every pending child whose parent is now in `index`.
    ///
    /// Returns the new edges in child order. Children that would close a
    /// cycle are dropped with a warning.
    pub fn resolve(&mut self, index: &NodeIndex) -> Vec<HierarchyEdge> {
        let mut edges = Vec::new();
        let children: Vec<NodeKey> = self.pending.iter().cloned().collect();

        for child in children {
            let Some(candidates) = self.candidates.get(&child) else {
                continue;
            };
            let found = candidates.iter().find_map(|candidate| {
                index
                    .resolve(candidate, child.label)
                    .filter(|parent| *parent != child)
                    .and_then(|parent| {
                        EdgeType::hierarchy(parent.label, child.label).map(|t| (parent, t))
                    })
            });
            let Some((parent, edge_type)) = found else {
                continue;
            };

            self.pending.remove(&child);
            if self.reaches(&parent, &child) {
                self.warnings.push(Warning::Cycle {
                    label: child.label.to_string(),
                    child: child.id.clone(),
                    parent: parent.id.clone(),
                });
                continue;
            }

            self.parents.insert(child.clone(), parent.clone());
            edges.push(HierarchyEdge {
                edge_type,
                parent,
                child,
            });
        }

        edges
    }

    /// Whether following parents up from `start` reaches `target`.
    fn reaches(&self, start: &NodeKey, target: &NodeKey) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(node) = current {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                return false;
            }
            current = self.parents.get(node);
        }
        false
    }

    /// Warnings collected so far, leaving the builder usable.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Ends resolution: every child still pending is a dangling reference.
    pub fn finish(mut self) -> Vec<Warning> {
        for child in &self.pending {
            let parent = self
                .candidates
                .get(child)
                .and_then(|c| c.first())
                .map(ToString::to_string)
                .unwrap_or_default();
            self.warnings.push(Warning::DanglingReference {
                label: child.label.to_string(),
                child: child.id.clone(),
                parent,
            });
        }
        self.warnings
    }
}

fn join(candidates: &[ParentRef]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: NodeLabel, id: &str) -> NodeKey {
        NodeKey::new(label, id)
    }

    fn code(id: &str) -> ParentRef {
        ParentRef::Code(id.to_string())
    }

    #[test]
    fn test_deferred_until_group_loads() {
        let mut builder = HierarchyBuilder::new();
        let cholera = key(NodeLabel::IcdDisease, "A00");
        builder.add(cholera.clone(), vec![code("A00-A09")]);

        let mut index: NodeIndex = [&cholera].into_iter().collect();
        assert!(builder.resolve(&index).is_empty());
        assert_eq!(builder.pending(), 1);

        index.insert(&key(NodeLabel::IcdGroup, "A00-A09"));
        let edges = builder.resolve(&index);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, EdgeType::GroupHasDisease);
        assert_eq!(edges[0].parent.id, "A00-A09");
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn test_first_resolving_candidate_wins() {
        let mut builder = HierarchyBuilder::new();
        let child = key(NodeLabel::IcdDisease, "A01.2");
        builder.add(
            child.clone(),
            vec![code("A01"), ParentRef::Range("A01.2".to_string())],
        );

        // Only the group exists: the range candidate resolves.
        let index: NodeIndex = [&child, &key(NodeLabel::IcdGroup, "A00-A09")]
            .into_iter()
            .collect();
        let edges = builder.resolve(&index);
        assert_eq!(edges[0].parent, key(NodeLabel::IcdGroup, "A00-A09"));

        // Once linked, a later resolve does not link again.
        let mut index = index;
        index.insert(&key(NodeLabel::IcdDisease, "A01"));
        assert!(builder.resolve(&index).is_empty());
    }

    #[test]
    fn test_conflicting_parent_is_rejected() {
        let mut builder = HierarchyBuilder::new();
        let child = key(NodeLabel::HpoPhenotype, "HP:0000002");
        assert!(builder.add(child.clone(), vec![code("HP:0000001")]));
        assert!(builder.add(child.clone(), vec![code("HP:0000001")]));
        assert!(!builder.add(child.clone(), vec![code("HP:0000118")]));

        let index: NodeIndex = [&child, &key(NodeLabel::HpoPhenotype, "HP:0000001")]
            .into_iter()
            .collect();
        let edges = builder.resolve(&index);
        assert_eq!(edges[0].parent.id, "HP:0000001");

        let warnings = builder.finish();
        assert!(matches!(
            &warnings[0],
            Warning::HierarchyConflict { kept, rejected, .. } if kept == "HP:0000001" && rejected == "HP:0000118"
        ));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let a = key(NodeLabel::HpoPhenotype, "HP:1");
        let b = key(NodeLabel::HpoPhenotype, "HP:2");
        let mut builder = HierarchyBuilder::new();
        builder.link_existing(b.clone(), a.clone());
        builder.add(a.clone(), vec![code("HP:2")]);

        let index: NodeIndex = [&a, &b].into_iter().collect();
        assert!(builder.resolve(&index).is_empty());

        let warnings = builder.finish();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(&warnings[0], Warning::Cycle { child, .. } if child == "HP:1"));
    }

    #[test]
    fn test_finish_reports_dangling() {
        let mut builder = HierarchyBuilder::new();
        builder.add(
            key(NodeLabel::IcdDisease, "Z99.9"),
            vec![code("Z99"), ParentRef::Range("Z99.9".to_string())],
        );
        builder.resolve(&NodeIndex::new());

        let warnings = builder.finish();
        assert_eq!(
            warnings,
            vec![Warning::DanglingReference {
                label: "IcdDisease".to_string(),
                child: "Z99.9".to_string(),
                parent: "Z99".to_string(),
            }]
        );
    }

    #[test]
    fn test_group_links_to_chapter_only() {
        let mut builder = HierarchyBuilder::new();
        let group = key(NodeLabel::IcdGroup, "A00-A09");
        builder.add(group.clone(), vec![code("01")]);

        // A disease with the same id as the chapter is not a valid parent.
        let index: NodeIndex = [&group, &key(NodeLabel::IcdDisease, "01")]
            .into_iter()
            .collect();
        assert!(builder.resolve(&index).is_empty());

        let mut index = index;
        index.insert(&key(NodeLabel::IcdChapter, "01"));
        let edges = builder.resolve(&index);
        assert_eq!(edges[0].edge_type, EdgeType::ChapterHasGroup);
    }
}
