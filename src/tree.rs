//! Reassemble flat (parent, self) pairs into a forest.
//!
//! Input may arrive in any order: children can precede their parents, so
//! nodes whose parent has not been seen yet are buffered and re-attached in
//! a second pass. Whatever still has no parent becomes a root. Child and
//! root order follows input order; callers that want a display order sort
//! afterwards.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq)]
pub struct Node<T> {
    /// Parent id by value. Roots may still carry a parent that was never seen.
    pub parent: Option<T>,
    pub value: T,
    pub children: Vec<Node<T>>,
}

impl<T: PartialEq> Node<T> {
    /// Number of nodes in this subtree, including self
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Node::len).sum::<usize>()
    }

    pub fn find(&self, value: &T) -> Option<&Node<T>> {
        if &self.value == value {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(value))
    }

    /// Pre-order walk of the subtree's values
    pub fn values(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.len());
        self.collect_values(&mut out);
        out
    }

    fn collect_values<'a>(&'a self, out: &mut Vec<&'a T>) {
        out.push(&self.value);
        for child in &self.children {
            child.collect_values(out);
        }
    }
}

struct Slot<T> {
    parent: Option<T>,
    value: T,
    children: Vec<usize>,
}

pub fn build_forest<T, I>(edges: I) -> Vec<Node<T>>
where
    T: Clone + Eq + Hash,
    I: IntoIterator<Item = (Option<T>, T)>,
{
    let mut slots: Vec<Option<Slot<T>>> = Vec::new();
    let mut ids: HashMap<T, usize> = HashMap::new();
    let mut orphans = Vec::new();

    for (parent, value) in edges {
        if ids.contains_key(&value) {
            continue;
        }
        let idx = slots.len();
        ids.insert(value.clone(), idx);

        match parent.as_ref().and_then(|p| ids.get(p)).copied() {
            Some(p) if p != idx => {
                if let Some(slot) = slots[p].as_mut() {
                    slot.children.push(idx);
                }
            }
            _ => orphans.push(idx),
        }

        slots.push(Some(Slot {
            parent,
            value,
            children: Vec::new(),
        }));
    }

    let mut roots = Vec::new();
    for idx in orphans {
        let parent_idx = slots[idx]
            .as_ref()
            .and_then(|s| s.parent.as_ref())
            .and_then(|p| ids.get(p))
            .copied();

        match parent_idx {
            Some(p) if p != idx => {
                if let Some(slot) = slots[p].as_mut() {
                    slot.children.push(idx);
                }
            }
            _ => roots.push(idx),
        }
    }

    // Late attachments went to the back; restore input order
    for slot in slots.iter_mut().flatten() {
        slot.children.sort_unstable();
    }

    roots
        .into_iter()
        .filter_map(|idx| take_node(&mut slots, idx))
        .collect()
}

fn take_node<T>(slots: &mut [Option<Slot<T>>], idx: usize) -> Option<Node<T>> {
    let slot = slots.get_mut(idx)?.take()?;
    let children = slot
        .children
        .into_iter()
        .filter_map(|child| take_node(slots, child))
        .collect();
    Some(Node {
        parent: slot.parent,
        value: slot.value,
        children,
    })
}
