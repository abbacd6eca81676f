//! The partition tree mirrors the directory hierarchy of a dataset. Every node (directory or
//! file) carries the conjunction of its own partition expression and those of its ancestors, so a
//! whole subtree can be pruned by evaluating a filter once at its root.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use itertools::{EitherOrBoth, Itertools};
use object_store::path::Path;
use tracing::{debug, trace};

use crate::expressions::{Expression, KnownFieldValues};
use crate::filesystem::{FileInfo, FileKind};
use crate::predicates::TruthEvaluator;
use crate::utils::natural_cmp;
use crate::{DatasetResult, Error};

#[derive(Debug)]
pub(crate) struct PartitionNode {
    pub(crate) path: Path,
    pub(crate) kind: FileKind,
    /// This node's partition expression, conjoined with those of all its ancestors.
    pub(crate) partition: Expression,
    known: KnownFieldValues,
    // Index-based links: the arena owns the nodes, a parent is only looked up.
    parent: Option<usize>,
    children: Vec<usize>,
    explicit: bool,
    fragment: Option<usize>,
}

/// An arena of [`PartitionNode`]s. Fragments are numbered in depth-first order, which is also
/// the order of their paths compared segment by segment, with numbers in names compared by value.
#[derive(Debug, Default)]
pub(crate) struct PartitionTree {
    nodes: Vec<PartitionNode>,
    roots: Vec<usize>,
    fragments: Vec<usize>,
}

impl PartitionTree {
    /// Builds the tree from a listing and the partition expression of each listed entry. Parents
    /// missing from the listing are created with the partition expression `true`.
    pub(crate) fn try_new(
        entries: impl IntoIterator<Item = (FileInfo, Expression)>,
    ) -> DatasetResult<Self> {
        let mut entries: Vec<_> = entries
            .into_iter()
            .map(|(info, partition)| {
                let segments: Vec<String> =
                    info.path.parts().map(|part| part.as_ref().to_string()).collect();
                (segments, info, partition)
            })
            .collect();
        // Parents before children, and rolled-over files in the order they were written
        entries.sort_by(|(a, ..), (b, ..)| {
            a.iter()
                .zip_longest(b.iter())
                .map(|pair| match pair {
                    EitherOrBoth::Both(a, b) => natural_cmp(a, b),
                    EitherOrBoth::Left(_) => Ordering::Greater,
                    EitherOrBoth::Right(_) => Ordering::Less,
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let mut tree = Self::default();
        let mut index: HashMap<(Option<usize>, String), usize> = HashMap::new();
        for (segments, info, partition) in entries {
            let Some((last, ancestors)) = segments.split_last() else {
                return Err(Error::generic("Cannot add the empty path to a partition tree"));
            };
            let mut parent = None;
            for (depth, segment) in ancestors.iter().enumerate() {
                let id = match index.get(&(parent, segment.clone())) {
                    Some(id) => *id,
                    None => {
                        let path = Path::from_iter(info.path.parts().take(depth + 1));
                        let id = tree.push(
                            parent,
                            path,
                            FileKind::Directory,
                            Expression::always_true(),
                            false,
                        );
                        index.insert((parent, segment.clone()), id);
                        id
                    }
                };
                if tree.nodes[id].kind == FileKind::File {
                    return Err(Error::generic(format!(
                        "{} is listed below the file {}",
                        info.path, tree.nodes[id].path
                    )));
                }
                parent = Some(id);
            }
            if let Some(existing) = index.get(&(parent, last.clone())) {
                return Err(Error::generic(format!(
                    "{} is listed more than once",
                    tree.nodes[*existing].path
                )));
            }
            let id = tree.push(parent, info.path, info.kind, partition, true);
            index.insert((parent, last.clone()), id);
        }
        debug!(
            "Built partition tree with {} nodes ({} inferred directories) and {} fragments",
            tree.nodes.len(),
            tree.nodes.iter().filter(|node| !node.explicit).count(),
            tree.fragments.len()
        );
        Ok(tree)
    }

    fn push(
        &mut self,
        parent: Option<usize>,
        path: Path,
        kind: FileKind,
        partition: Expression,
        explicit: bool,
    ) -> usize {
        let id = self.nodes.len();
        let (partition, known) = match parent {
            Some(parent) => {
                let parent = &self.nodes[parent];
                let mut known = parent.known.clone();
                partition.insert_known_field_values(&mut known);
                (
                    Expression::conjunction([parent.partition.clone(), partition]),
                    known,
                )
            }
            None => {
                let known = partition.known_field_values();
                (Expression::conjunction([partition]), known)
            }
        };
        let fragment = (kind == FileKind::File).then(|| {
            self.fragments.push(id);
            self.fragments.len() - 1
        });
        self.nodes.push(PartitionNode {
            path,
            kind,
            partition,
            known,
            parent,
            children: vec![],
            explicit,
            fragment,
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// The file nodes, in fragment order.
    pub(crate) fn fragment_nodes(&self) -> impl Iterator<Item = &PartitionNode> + '_ {
        self.fragments.iter().map(|id| &self.nodes[*id])
    }

    #[cfg(test)]
    fn num_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// The parent of `node`, if it has one.
    pub(crate) fn parent(&self, node: &PartitionNode) -> Option<&PartitionNode> {
        node.parent.map(|id| &self.nodes[id])
    }

    #[cfg(test)]
    fn is_listed(&self, node: &PartitionNode) -> bool {
        node.explicit
    }

    /// The fragments that survive `filter`, as a lazy iterator over fragment indices. `root`
    /// holds the bindings of the dataset's root partition, which every node inherits.
    pub(crate) fn prune(
        self: &Arc<Self>,
        filter: Expression,
        root: KnownFieldValues,
    ) -> PrunedFragments {
        PrunedFragments {
            tree: self.clone(),
            skip_evaluation: filter.is_always_true(),
            filter,
            root,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }
}

/// Depth-first walk of a [`PartitionTree`] that skips every subtree whose partition expression
/// rules out the filter. Subtrees where the filter is unknown are always entered.
#[derive(Debug)]
pub(crate) struct PrunedFragments {
    tree: Arc<PartitionTree>,
    filter: Expression,
    skip_evaluation: bool,
    root: KnownFieldValues,
    stack: Vec<usize>,
}

impl Iterator for PrunedFragments {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while let Some(id) = self.stack.pop() {
            let node = &self.tree.nodes[id];
            if !self.skip_evaluation {
                let evaluator = TruthEvaluator::from((&node.known, &self.root));
                if evaluator.eval_sql_where(&self.filter) == Some(false) {
                    let parent = self.tree.parent(node).map(|parent| parent.path.to_string());
                    trace!(
                        "Pruned {} with partition {} below {}",
                        node.path,
                        node.partition,
                        parent.as_deref().unwrap_or("the root")
                    );
                    continue;
                }
            }
            self.stack.extend(node.children.iter().rev());
            if let Some(fragment) = node.fragment {
                return Some(fragment);
            }
        }
        None
    }
}
