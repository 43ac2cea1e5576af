//! The declared task tree. A node is either a single task or an ordered group
//! of nodes; whether a group runs its children one after another or fans them
//! out to the worker pool is a property of its shape, decided once when the
//! group is built.

use std::fmt::Debug;

use crate::task::Task;

/// One node of the task tree.
pub enum Node {
    Leaf(Box<dyn Task>),
    Group(Group),
}

impl Node {
    pub fn leaf(task: impl Task + 'static) -> Self {
        Node::Leaf(Box::new(task))
    }

    pub fn group(children: impl IntoIterator<Item = Node>) -> Self {
        Node::Group(Group::new(children))
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Leaf(task) => write!(f, "Leaf({})", task.kind()),
            Node::Group(group) => f
                .debug_tuple(match group.kind {
                    GroupKind::Sequential => "Sequential",
                    GroupKind::Parallel => "Parallel",
                })
                .field(&group.children)
                .finish(),
        }
    }
}

/// How a group traverses its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    /// Children run in declared order, stopping at the first failure.
    Sequential,
    /// Every child is dispatched to the worker pool; all of them run.
    Parallel,
}

/// An ordered sequence of nodes.
///
/// A group is parallel exactly when every immediate child is itself a group.
/// As soon as one child is a plain task, the group runs sequentially. This
/// structural rule is the whole concurrency contract; there is no annotation
/// to set.
pub struct Group {
    children: Vec<Node>,
    kind: GroupKind,
}

impl Group {
    pub fn new(children: impl IntoIterator<Item = Node>) -> Self {
        let children: Vec<Node> = children.into_iter().collect();
        let all_groups = children
            .iter()
            .all(|child| matches!(child, Node::Group(_)));

        let kind = match all_groups {
            true => GroupKind::Parallel,
            false => GroupKind::Sequential,
        };

        Self { children, kind }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Report, TaskResult};

    struct Noop;

    impl Task for Noop {
        fn kind(&self) -> &'static str {
            "noop"
        }

        fn action(&mut self) -> TaskResult<Report> {
            Ok(None)
        }
    }

    #[test]
    fn group_with_a_task_child_is_sequential() {
        let group = Group::new([Node::leaf(Noop), Node::group([Node::leaf(Noop)])]);
        assert_eq!(group.kind(), GroupKind::Sequential);
    }

    #[test]
    fn group_of_only_groups_is_parallel() {
        let group = Group::new([
            Node::group([Node::leaf(Noop)]),
            Node::group([Node::leaf(Noop), Node::leaf(Noop)]),
        ]);
        assert_eq!(group.kind(), GroupKind::Parallel);
    }

    #[test]
    fn empty_group_counts_as_parallel() {
        assert_eq!(Group::new([]).kind(), GroupKind::Parallel);
        assert!(Group::new([]).is_empty());
    }
}
