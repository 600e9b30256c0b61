//! Component tree arena assembled from the agent's flat traversal records.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use pagescope_types::{ComponentId, ComponentNode, DomRef, Framework};

/// One component as reported by the page traversal. Parents always precede
/// their children.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub id: ComponentId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<ComponentId>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub dom: Option<DomRef>,
}

/// Flat, id-keyed component tree.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTree {
    frameworks: BTreeSet<Framework>,
    roots: Vec<ComponentId>,
    nodes: Vec<ComponentNode>,
    /// The traversal hit its depth or node bound.
    truncated: bool,
    /// Records discarded because their id was already present.
    dropped: usize,
    #[serde(skip)]
    index: HashMap<ComponentId, usize>,
}

impl ComponentTree {
    /// Assemble per-framework record batches into one tree.
    ///
    /// A record whose parent is not already present becomes a root, so the
    /// result is acyclic whatever the page reported. Child lists and depths
    /// are recomputed host-side.
    pub fn assemble(batches: Vec<(Framework, Vec<ComponentRecord>)>, truncated: bool) -> Self {
        let mut tree = ComponentTree {
            truncated,
            ..Default::default()
        };

        for (framework, records) in batches {
            tree.frameworks.insert(framework);
            for record in records {
                if tree.index.contains_key(&record.id) {
                    tree.dropped += 1;
                    continue;
                }
                let parent = record
                    .parent
                    .and_then(|p| tree.index.get(&p).copied().map(|slot| (p, slot)));
                let (parent, depth) = match parent {
                    Some((id, slot)) => (Some(id), tree.nodes[slot].depth + 1),
                    None => (None, 0),
                };

                let slot = tree.nodes.len();
                match &parent {
                    Some(p) => {
                        let parent_slot = tree.index[p];
                        tree.nodes[parent_slot].children.push(record.id.clone());
                    }
                    None => tree.roots.push(record.id.clone()),
                }
                tree.index.insert(record.id.clone(), slot);
                tree.nodes.push(ComponentNode {
                    id: record.id,
                    name: record.name,
                    framework,
                    depth,
                    parent,
                    children: Vec::new(),
                    dom: record.dom,
                });
            }
        }

        if tree.dropped > 0 {
            tracing::debug!(dropped = tree.dropped, "dropped duplicate component records");
        }
        tree
    }

    pub fn frameworks(&self) -> &BTreeSet<Framework> {
        &self.frameworks
    }

    pub fn roots(&self) -> &[ComponentId] {
        &self.roots
    }

    pub fn nodes(&self) -> &[ComponentNode] {
        &self.nodes
    }

    pub fn get(&self, id: &ComponentId) -> Option<&ComponentNode> {
        self.index.get(id).map(|slot| &self.nodes[*slot])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// `id` and everything below it, breadth first.
    pub fn subtree(&self, id: &ComponentId) -> Vec<&ComponentNode> {
        let mut out = Vec::new();
        let mut queue: VecDeque<&ComponentId> = VecDeque::new();
        queue.push_back(id);
        while let Some(next) = queue.pop_front() {
            if let Some(node) = self.get(next) {
                out.push(node);
                queue.extend(node.children.iter());
            }
        }
        out
    }

    /// Same ids, names, and edges, regardless of record order.
    pub fn same_shape(&self, other: &ComponentTree) -> bool {
        if self.len() != other.len() || self.roots.len() != other.roots.len() {
            return false;
        }
        if id_set(&self.roots) != id_set(&other.roots) {
            return false;
        }
        self.nodes.iter().all(|node| {
            other.get(&node.id).is_some_and(|theirs| {
                theirs.name == node.name
                    && theirs.parent == node.parent
                    && id_set(&theirs.children) == id_set(&node.children)
            })
        })
    }
}

fn id_set(ids: &[ComponentId]) -> BTreeSet<&ComponentId> {
    ids.iter().collect()
}
