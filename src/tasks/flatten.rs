//! Expansion of a task's reference graph into an ordered list of leaves.
//!
//! The walk is depth-first pre-order. Each task is expanded at most once per
//! call, so cycles and diamonds terminate; a revisit contributes nothing.
//! References to tasks that no longer exist are skipped.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;
use crate::tasks::model::Task;

/// Snapshot of a leaf task at flatten time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRef {
    pub id: Uuid,
    pub title: Option<String>,
    pub text: String,
}

impl From<&Task> for LeafRef {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            text: task.text.clone(),
        }
    }
}

/// Resolves task ids during flattening.
#[async_trait]
pub trait TaskLookup: Send + Sync {
    async fn lookup_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;
}

#[async_trait]
impl TaskLookup for dyn Database {
    async fn lookup_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        self.get_task(id).await
    }
}

/// Flatten `root` into its leaves in execution order.
///
/// A leaf root yields itself. A root whose expansion reaches no leaf yields
/// an empty list; callers decide how to handle that.
pub async fn flatten<L>(lookup: &L, root: Uuid) -> Result<Vec<LeafRef>, DatabaseError>
where
    L: TaskLookup + ?Sized,
{
    let mut leaves = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(task) = lookup.lookup_task(id).await? else {
            continue;
        };
        if task.is_leaf() {
            leaves.push(LeafRef::from(&task));
        } else {
            // Reversed so the first reference is expanded first.
            stack.extend(task.sub_ids.iter().rev().copied());
        }
    }

    Ok(leaves)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct MapLookup(HashMap<Uuid, Task>);

    #[async_trait]
    impl TaskLookup for MapLookup {
        async fn lookup_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
            Ok(self.0.get(&id).cloned())
        }
    }

    fn leaf(text: &str) -> Task {
        Task::new(Uuid::nil(), text)
    }

    fn chain(text: &str, subs: &[&Task]) -> Task {
        Task::new(Uuid::nil(), text).with_sub_ids(subs.iter().map(|t| t.id).collect())
    }

    fn lookup(tasks: &[&Task]) -> MapLookup {
        MapLookup(tasks.iter().map(|t| (t.id, (*t).clone())).collect())
    }

    fn texts(leaves: &[LeafRef]) -> Vec<&str> {
        leaves.iter().map(|l| l.text.as_str()).collect()
    }

    #[tokio::test]
    async fn leaf_flattens_to_itself() {
        let a = leaf("a").with_title("A");
        let leaves = flatten(&lookup(&[&a]), a.id).await.unwrap();
        assert_eq!(leaves, vec![LeafRef::from(&a)]);
        assert_eq!(leaves[0].title.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn nested_chain_is_preorder() {
        let d = leaf("d");
        let e = leaf("e");
        let c = leaf("c");
        let b = chain("b", &[&d, &e]);
        let a = chain("a", &[&b, &c]);

        let leaves = flatten(&lookup(&[&a, &b, &c, &d, &e]), a.id).await.unwrap();
        assert_eq!(texts(&leaves), vec!["d", "e", "c"]);
    }

    #[tokio::test]
    async fn cycle_terminates_empty() {
        let mut a = leaf("a");
        let mut b = leaf("b");
        a.sub_ids = vec![b.id];
        b.sub_ids = vec![a.id];

        let leaves = flatten(&lookup(&[&a, &b]), a.id).await.unwrap();
        assert!(leaves.is_empty());
    }

    #[tokio::test]
    async fn shared_leaf_is_emitted_once() {
        let shared = leaf("shared");
        let b = chain("b", &[&shared]);
        let a = chain("a", &[&b, &shared]);

        let leaves = flatten(&lookup(&[&a, &b, &shared]), a.id).await.unwrap();
        assert_eq!(texts(&leaves), vec!["shared"]);
    }

    #[tokio::test]
    async fn missing_references_are_skipped() {
        let c = leaf("c");
        let a = Task::new(Uuid::nil(), "a").with_sub_ids(vec![Uuid::new_v4(), c.id]);

        let leaves = flatten(&lookup(&[&a, &c]), a.id).await.unwrap();
        assert_eq!(texts(&leaves), vec!["c"]);
    }

    #[tokio::test]
    async fn repeated_reference_in_one_chain() {
        let x = leaf("x");
        let a = chain("a", &[&x, &x]);

        let leaves = flatten(&lookup(&[&a, &x]), a.id).await.unwrap();
        assert_eq!(texts(&leaves), vec!["x"]);
    }
}
