#![forbid(unsafe_code)]

//! Observable list and map values.
//!
//! # Design
//!
//! A container is a shared handle (`Rc<RefCell<Node>>`); cloning the handle
//! shares the node. Every node carries a [`Link`]:
//!
//! ```text
//!   Root(sink) ◄── Parent ◄── Parent        (property value tree)
//!   Detached                                (free-standing value)
//! ```
//!
//! A mutating call finishes the mutation, releases its borrow, then walks
//! parent links to the top. If the top is a `Root`, the owning property
//! is told once. Intermediate containers only relay.
//!
//! # Invariants
//!
//! 1. Any list or map inserted into a container is deep-copied into the
//!    tree with a parent link to its new container (the caller's handle
//!    stays independent). A container can therefore never be in two trees.
//! 2. Containers removed from a tree are detached; mutating them later
//!    notifies nobody.
//! 3. One mutating call produces at most one notification. Structural
//!    no-ops (empty `extend`/`update`, missed `remove`, `pop` on empty,
//!    `setdefault` of a present key, `clear` of an empty container) produce
//!    none. Construction never notifies.
//! 4. No borrow is held while the owning property dispatches, so
//!    subscribers may read or mutate the same tree.
//!
//! # Copy on change
//!
//! Trees adopted with `copy_on_change` take a detached deep snapshot of the
//! whole tree before each mutation and report it as `old`. Otherwise `old`
//! is `None`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::ops::{Bound, RangeBounds};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::callback::Flow;
use crate::error::DispatchError;
use crate::value::Value;

/// Receives the change notification of a root container.
pub(crate) trait ChangeSink {
    fn container_changed(&self, old: Value) -> Result<Flow, DispatchError>;
}

#[derive(Clone, Default)]
enum Link {
    #[default]
    Detached,
    Parent(ParentLink),
    Root(Weak<dyn ChangeSink>),
}

#[derive(Clone)]
enum ParentLink {
    List(Weak<RefCell<ListNode>>),
    Map(Weak<RefCell<MapNode>>),
}

impl ParentLink {
    fn upgrade(&self) -> Option<Node> {
        match self {
            Self::List(weak) => weak.upgrade().map(Node::List),
            Self::Map(weak) => weak.upgrade().map(Node::Map),
        }
    }
}

struct ListNode {
    items: Vec<Value>,
    link: Link,
    copy_on_change: bool,
}

struct MapNode {
    entries: BTreeMap<String, Value>,
    link: Link,
    copy_on_change: bool,
}

#[derive(Clone)]
enum Node {
    List(Rc<RefCell<ListNode>>),
    Map(Rc<RefCell<MapNode>>),
}

impl Node {
    fn link(&self) -> Link {
        match self {
            Self::List(node) => node.borrow().link.clone(),
            Self::Map(node) => node.borrow().link.clone(),
        }
    }

    fn copy_on_change(&self) -> bool {
        match self {
            Self::List(node) => node.borrow().copy_on_change,
            Self::Map(node) => node.borrow().copy_on_change,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::List(node) => Value::List(ObservableList {
                node: Rc::clone(node),
            }),
            Self::Map(node) => Value::Map(ObservableMap {
                node: Rc::clone(node),
            }),
        }
    }

    /// Walk parent links to the topmost live node.
    fn top(self) -> (Node, Link) {
        let mut node = self;
        loop {
            match node.link() {
                Link::Parent(parent) => match parent.upgrade() {
                    Some(next) => node = next,
                    None => return (node, Link::Detached),
                },
                link => return (node, link),
            }
        }
    }

    fn before_change(&self) -> Option<Value> {
        if !self.copy_on_change() {
            return None;
        }
        let (top, _) = self.clone().top();
        Some(top.to_value().snapshot())
    }

    fn after_change(&self, old: Option<Value>) -> Result<Flow, DispatchError> {
        let (_, link) = self.clone().top();
        let Link::Root(sink) = link else {
            return Ok(Flow::Continue);
        };
        let Some(sink) = sink.upgrade() else {
            return Ok(Flow::Continue);
        };
        trace!("container change bubbled to root");
        sink.container_changed(old.unwrap_or_default())
    }
}

fn adopt_with(value: Value, link: Link, copy_on_change: bool) -> Value {
    match value {
        Value::List(list) => Value::List(ObservableList::build(list.to_vec(), link, copy_on_change)),
        Value::Map(map) => Value::Map(ObservableMap::build(map.to_btree(), link, copy_on_change)),
        scalar => scalar,
    }
}

/// Deep-copy `value` into a property tree rooted at `sink`.
pub(crate) fn adopt_root(value: Value, sink: Weak<dyn ChangeSink>, copy_on_change: bool) -> Value {
    adopt_with(value, Link::Root(sink), copy_on_change)
}

/// Cut `value` loose from whatever tree it was in.
pub(crate) fn detach(value: &Value) {
    match value {
        Value::List(list) => list.node.borrow_mut().link = Link::Detached,
        Value::Map(map) => map.node.borrow_mut().link = Link::Detached,
        _ => {}
    }
}

fn clamp_range(range: impl RangeBounds<usize>, len: usize) -> (usize, usize) {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    }
    .min(len);
    let end = match range.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    }
    .clamp(start, len);
    (start, end)
}

// ============================================================================
// ObservableList
// ============================================================================

/// A list that reports mutations to its owning property.
#[derive(Clone)]
pub struct ObservableList {
    node: Rc<RefCell<ListNode>>,
}

impl ObservableList {
    /// An empty, detached list.
    #[must_use]
    pub fn new() -> Self {
        Self::from_values(std::iter::empty())
    }

    /// A detached list populated from `items` without notifying anyone.
    pub fn from_values(items: impl IntoIterator<Item = Value>) -> Self {
        Self::build(items, Link::Detached, false)
    }

    fn build(items: impl IntoIterator<Item = Value>, link: Link, copy_on_change: bool) -> Self {
        let node = Rc::new(RefCell::new(ListNode {
            items: Vec::new(),
            link,
            copy_on_change,
        }));
        let parent = ParentLink::List(Rc::downgrade(&node));
        let items: Vec<Value> = items
            .into_iter()
            .map(|v| adopt_with(v, Link::Parent(parent.clone()), copy_on_change))
            .collect();
        node.borrow_mut().items = items;
        Self { node }
    }

    fn as_node(&self) -> Node {
        Node::List(Rc::clone(&self.node))
    }

    fn adopt(&self, value: Value) -> Value {
        let copy = self.node.borrow().copy_on_change;
        adopt_with(
            value,
            Link::Parent(ParentLink::List(Rc::downgrade(&self.node))),
            copy,
        )
    }

    fn commit(&self, old: Option<Value>) -> Result<(), DispatchError> {
        self.as_node().after_change(old).map(drop)
    }

    /// Whether mutations report a pre-mutation snapshot as `old`.
    #[must_use]
    pub fn copy_on_change(&self) -> bool {
        self.node.borrow().copy_on_change
    }

    /// Whether both handles refer to the same list.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Detached deep copy.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::build(self.to_vec(), Link::Detached, false)
    }

    /// Element at `index`. Nested containers come back as live handles.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.node.borrow().items.get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.node.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.node.borrow().items.contains(value)
    }

    /// Shallow copy of the elements (nested containers stay live handles).
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.node.borrow().items.clone()
    }

    /// Replace the element at `index`; `Ok(None)` if out of range.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<Option<Value>, DispatchError> {
        if index >= self.len() {
            return Ok(None);
        }
        let value = self.adopt(value.into());
        let old = self.as_node().before_change();
        let replaced = match self.node.borrow_mut().items.get_mut(index) {
            Some(slot) => mem::replace(slot, value),
            None => return Ok(None),
        };
        detach(&replaced);
        self.commit(old)?;
        Ok(Some(replaced))
    }

    /// Delete the element at `index`; `Ok(None)` if out of range.
    pub fn remove_at(&self, index: usize) -> Result<Option<Value>, DispatchError> {
        if index >= self.len() {
            return Ok(None);
        }
        let old = self.as_node().before_change();
        let removed = self.node.borrow_mut().items.remove(index);
        detach(&removed);
        self.commit(old)?;
        Ok(Some(removed))
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), DispatchError> {
        let value = self.adopt(value.into());
        let old = self.as_node().before_change();
        self.node.borrow_mut().items.push(value);
        self.commit(old)
    }

    /// Insert before `index`, clamped to the end.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), DispatchError> {
        let value = self.adopt(value.into());
        let old = self.as_node().before_change();
        {
            let mut node = self.node.borrow_mut();
            let index = index.min(node.items.len());
            node.items.insert(index, value);
        }
        self.commit(old)
    }

    /// Append every item with a single notification.
    pub fn extend<I, V>(&self, items: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(|v| self.adopt(v.into())).collect();
        if items.is_empty() {
            return Ok(());
        }
        let old = self.as_node().before_change();
        self.node.borrow_mut().items.extend(items);
        self.commit(old)
    }

    /// Remove the first element equal to `value`. Returns whether one was found.
    pub fn remove(&self, value: &Value) -> Result<bool, DispatchError> {
        let Some(index) = self.node.borrow().items.iter().position(|v| v == value) else {
            return Ok(false);
        };
        self.remove_at(index).map(|removed| removed.is_some())
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Option<Value>, DispatchError> {
        match self.len() {
            0 => Ok(None),
            len => self.remove_at(len - 1),
        }
    }

    pub fn clear(&self) -> Result<(), DispatchError> {
        if self.is_empty() {
            return Ok(());
        }
        let old = self.as_node().before_change();
        let removed = mem::take(&mut self.node.borrow_mut().items);
        removed.iter().for_each(detach);
        self.commit(old)
    }

    /// Replace `range` (clamped to the list) with `replace_with`, as a slice
    /// assignment. Returns the removed elements.
    pub fn splice<R, I, V>(&self, range: R, replace_with: I) -> Result<Vec<Value>, DispatchError>
    where
        R: RangeBounds<usize>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let (start, end) = clamp_range(range, self.len());
        let values: Vec<Value> = replace_with
            .into_iter()
            .map(|v| self.adopt(v.into()))
            .collect();
        if start == end && values.is_empty() {
            return Ok(Vec::new());
        }
        let old = self.as_node().before_change();
        let removed: Vec<Value> = self
            .node
            .borrow_mut()
            .items
            .splice(start..end, values)
            .collect();
        removed.iter().for_each(detach);
        self.commit(old)?;
        Ok(removed)
    }
}

impl Default for ObservableList {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ObservableList {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.node.borrow().items == other.node.borrow().items
    }
}

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.node.borrow().items.iter()).finish()
    }
}

// ============================================================================
// ObservableMap
// ============================================================================

/// A string-keyed map that reports mutations to its owning property.
#[derive(Clone)]
pub struct ObservableMap {
    node: Rc<RefCell<MapNode>>,
}

impl ObservableMap {
    /// An empty, detached map.
    #[must_use]
    pub fn new() -> Self {
        Self::from_entries(std::iter::empty())
    }

    /// A detached map populated from `entries` without notifying anyone.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::build(entries, Link::Detached, false)
    }

    fn build(
        entries: impl IntoIterator<Item = (String, Value)>,
        link: Link,
        copy_on_change: bool,
    ) -> Self {
        let node = Rc::new(RefCell::new(MapNode {
            entries: BTreeMap::new(),
            link,
            copy_on_change,
        }));
        let parent = ParentLink::Map(Rc::downgrade(&node));
        let entries: BTreeMap<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, adopt_with(v, Link::Parent(parent.clone()), copy_on_change)))
            .collect();
        node.borrow_mut().entries = entries;
        Self { node }
    }

    fn as_node(&self) -> Node {
        Node::Map(Rc::clone(&self.node))
    }

    fn adopt(&self, value: Value) -> Value {
        let copy = self.node.borrow().copy_on_change;
        adopt_with(
            value,
            Link::Parent(ParentLink::Map(Rc::downgrade(&self.node))),
            copy,
        )
    }

    fn commit(&self, old: Option<Value>) -> Result<(), DispatchError> {
        self.as_node().after_change(old).map(drop)
    }

    #[must_use]
    pub fn copy_on_change(&self) -> bool {
        self.node.borrow().copy_on_change
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Detached deep copy.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::build(self.to_btree(), Link::Detached, false)
    }

    /// Value under `key`. Nested containers come back as live handles.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.node.borrow().entries.get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.node.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.node.borrow().entries.contains_key(key)
    }

    /// Keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.node.borrow().entries.keys().cloned().collect()
    }

    /// Shallow copy of the entries (nested containers stay live handles).
    #[must_use]
    pub fn to_btree(&self) -> BTreeMap<String, Value> {
        self.node.borrow().entries.clone()
    }

    /// Set `key`, returning the replaced value. Always notifies.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, DispatchError> {
        let value = self.adopt(value.into());
        let old = self.as_node().before_change();
        let replaced = self.node.borrow_mut().entries.insert(key.into(), value);
        if let Some(replaced) = &replaced {
            detach(replaced);
        }
        self.commit(old)?;
        Ok(replaced)
    }

    /// Delete `key`; notifies only if it was present.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, DispatchError> {
        if !self.contains_key(key) {
            return Ok(None);
        }
        let old = self.as_node().before_change();
        let removed = self.node.borrow_mut().entries.remove(key);
        if let Some(removed) = &removed {
            detach(removed);
        }
        self.commit(old)?;
        Ok(removed)
    }

    /// Remove and return `key`, or `default` (without notifying) if absent.
    pub fn pop(&self, key: &str, default: impl Into<Value>) -> Result<Value, DispatchError> {
        Ok(self.remove(key)?.unwrap_or_else(|| default.into()))
    }

    pub fn clear(&self) -> Result<(), DispatchError> {
        if self.is_empty() {
            return Ok(());
        }
        let old = self.as_node().before_change();
        let removed = mem::take(&mut self.node.borrow_mut().entries);
        removed.values().for_each(detach);
        self.commit(old)
    }

    /// Value under `key`, inserting `default` first if absent.
    pub fn setdefault(
        &self,
        key: impl Into<String>,
        default: impl Into<Value>,
    ) -> Result<Value, DispatchError> {
        let key = key.into();
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let value = self.adopt(default.into());
        let old = self.as_node().before_change();
        self.node.borrow_mut().entries.insert(key, value.clone());
        self.commit(old)?;
        Ok(value)
    }

    /// Insert every entry with a single notification.
    pub fn update<I, K, V>(&self, entries: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let entries: Vec<(String, Value)> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), self.adopt(v.into())))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        let old = self.as_node().before_change();
        let replaced: Vec<Value> = {
            let mut node = self.node.borrow_mut();
            entries
                .into_iter()
                .filter_map(|(k, v)| node.entries.insert(k, v))
                .collect()
        };
        replaced.iter().for_each(detach);
        self.commit(old)
    }
}

impl Default for ObservableMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ObservableMap {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.node.borrow().entries == other.node.borrow().entries
    }
}

impl fmt::Debug for ObservableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.node.borrow().entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink {
        olds: RefCell<Vec<Value>>,
    }

    impl ChangeSink for Sink {
        fn container_changed(&self, old: Value) -> Result<Flow, DispatchError> {
            self.olds.borrow_mut().push(old);
            Ok(Flow::Continue)
        }
    }

    fn rooted(value: Value, copy: bool) -> (Rc<Sink>, Value) {
        let sink = Rc::new(Sink {
            olds: RefCell::new(Vec::new()),
        });
        let dyn_sink: Rc<dyn ChangeSink> = sink.clone();
        let value = adopt_root(value, Rc::downgrade(&dyn_sink), copy);
        (sink, value)
    }

    fn hits(sink: &Sink) -> usize {
        sink.olds.borrow().len()
    }

    #[test]
    fn detached_containers_notify_nobody() {
        let list = ObservableList::from_values([Value::Int(1)]);
        list.push(2).unwrap();
        assert_eq!(list.to_vec(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn each_list_mutation_notifies_once() {
        let (sink, value) = rooted(Value::list([1, 2, 3]), false);
        let list = value.as_list().unwrap();
        list.push(4).unwrap();
        list.insert(0, 0).unwrap();
        list.set(1, 10).unwrap();
        list.remove_at(1).unwrap();
        list.remove(&Value::Int(2)).unwrap();
        list.pop().unwrap();
        list.splice(0..1, [7, 8]).unwrap();
        list.clear().unwrap();
        assert_eq!(hits(&sink), 8);
        assert!(sink.olds.borrow().iter().all(Value::is_none));
    }

    #[test]
    fn structural_noops_stay_silent() {
        let (sink, value) = rooted(Value::list(Vec::<i32>::new()), false);
        let list = value.as_list().unwrap();
        list.extend(Vec::<i32>::new()).unwrap();
        assert!(!list.remove(&Value::Int(1)).unwrap());
        assert!(list.pop().unwrap().is_none());
        assert!(list.set(5, 1).unwrap().is_none());
        list.clear().unwrap();
        assert_eq!(hits(&sink), 0);

        list.extend([1, 2, 3]).unwrap();
        assert_eq!(hits(&sink), 1);
    }

    #[test]
    fn nested_mutation_bubbles_to_root() {
        let (sink, value) = rooted(Value::map(Vec::<(String, Value)>::new()), false);
        let map = value.as_map().unwrap();
        map.insert("x", Value::map(Vec::<(String, Value)>::new()))
            .unwrap();
        let inner = map.get("x").unwrap();
        inner.as_map().unwrap().insert("y", 1).unwrap();
        assert_eq!(hits(&sink), 2);
        assert_eq!(
            map.get("x").unwrap().as_map().unwrap().get("y"),
            Some(Value::Int(1))
        );
    }

    #[test]
    fn inserted_containers_are_copied_in() {
        let (sink, value) = rooted(Value::list(Vec::<i32>::new()), false);
        let outside = ObservableList::from_values([Value::Int(1)]);
        value.as_list().unwrap().push(outside.clone()).unwrap();
        outside.push(2).unwrap();
        assert_eq!(hits(&sink), 1);
        assert_eq!(value.as_list().unwrap().get(0), Some(Value::list([1])));
    }

    #[test]
    fn removed_containers_are_detached() {
        let (sink, value) = rooted(Value::list([Value::list([1])]), false);
        let list = value.as_list().unwrap();
        let removed = list.pop().unwrap().unwrap();
        assert_eq!(hits(&sink), 1);
        removed.as_list().unwrap().push(2).unwrap();
        assert_eq!(hits(&sink), 1);
    }

    #[test]
    fn copy_on_change_reports_snapshot_of_root() {
        let (sink, value) = rooted(Value::map([("a", Value::list([1]))]), true);
        let map = value.as_map().unwrap();
        map.get("a").unwrap().as_list().unwrap().push(2).unwrap();
        let olds = sink.olds.borrow();
        assert_eq!(olds.len(), 1);
        assert_eq!(olds[0], Value::map([("a", Value::list([1]))]));
        assert_eq!(value, Value::map([("a", Value::list([1, 2]))]));
    }

    #[test]
    fn map_operations() {
        let (sink, value) = rooted(Value::map([("a", 1)]), false);
        let map = value.as_map().unwrap();
        assert_eq!(map.setdefault("a", 5).unwrap(), Value::Int(1));
        assert_eq!(hits(&sink), 0);
        assert_eq!(map.setdefault("b", 2).unwrap(), Value::Int(2));
        assert_eq!(map.pop("zz", "fallback").unwrap(), Value::from("fallback"));
        assert_eq!(hits(&sink), 1);
        map.update([("c", 3), ("d", 4)]).unwrap();
        assert_eq!(hits(&sink), 2);
        assert_eq!(map.keys(), vec!["a", "b", "c", "d"]);
        assert_eq!(map.pop("a", ()).unwrap(), Value::Int(1));
        assert_eq!(map.remove("b").unwrap(), Some(Value::Int(2)));
        assert!(map.remove("b").unwrap().is_none());
        map.clear().unwrap();
        assert_eq!(hits(&sink), 5);
        assert!(map.is_empty());
    }

    #[test]
    fn dropped_sink_is_ignored() {
        let (sink, value) = rooted(Value::list([1]), false);
        drop(sink);
        value.as_list().unwrap().push(2).unwrap();
        assert_eq!(value.as_list().unwrap().len(), 2);
    }

    #[test]
    fn splice_clamps_range() {
        let list = ObservableList::from_values([1, 2, 3].map(Value::from));
        let removed = list.splice(1.., [9]).unwrap();
        assert_eq!(removed, vec![Value::Int(2), Value::Int(3)]);
        list.splice(10..20, [4]).unwrap();
        assert_eq!(list.to_vec(), vec![Value::Int(1), Value::Int(9), Value::Int(4)]);
    }

    #[derive(Debug, Clone)]
    enum ListOp {
        Push(i64),
        Insert(usize, i64),
        Set(usize, i64),
        RemoveAt(usize),
        Pop,
        Clear,
    }

    fn list_op() -> impl proptest::strategy::Strategy<Value = ListOp> {
        use proptest::prelude::*;
        prop_oneof![
            any::<i64>().prop_map(ListOp::Push),
            (0usize..8, any::<i64>()).prop_map(|(i, v)| ListOp::Insert(i, v)),
            (0usize..8, any::<i64>()).prop_map(|(i, v)| ListOp::Set(i, v)),
            (0usize..8).prop_map(ListOp::RemoveAt),
            Just(ListOp::Pop),
            Just(ListOp::Clear),
        ]
    }

    proptest::proptest! {
        /// A rooted list tracks a plain `Vec` and notifies once per
        /// effective mutation.
        #[test]
        fn list_matches_vec_model(ops in proptest::collection::vec(list_op(), 0..30)) {
            let (sink, value) = rooted(Value::list(Vec::<i64>::new()), false);
            let list = value.as_list().unwrap();
            let mut model: Vec<i64> = Vec::new();
            let mut expected = 0usize;
            for op in ops {
                match op {
                    ListOp::Push(v) => {
                        list.push(v).unwrap();
                        model.push(v);
                        expected += 1;
                    }
                    ListOp::Insert(i, v) => {
                        list.insert(i, v).unwrap();
                        model.insert(i.min(model.len()), v);
                        expected += 1;
                    }
                    ListOp::Set(i, v) => {
                        let replaced = list.set(i, v).unwrap();
                        proptest::prop_assert_eq!(replaced.is_some(), i < model.len());
                        if let Some(slot) = model.get_mut(i) {
                            *slot = v;
                            expected += 1;
                        }
                    }
                    ListOp::RemoveAt(i) => {
                        let removed = list.remove_at(i).unwrap();
                        let modelled = (i < model.len()).then(|| model.remove(i));
                        proptest::prop_assert_eq!(removed, modelled.map(Value::Int));
                        expected += usize::from(modelled.is_some());
                    }
                    ListOp::Pop => {
                        let popped = list.pop().unwrap();
                        let modelled = model.pop();
                        proptest::prop_assert_eq!(popped, modelled.map(Value::Int));
                        expected += usize::from(modelled.is_some());
                    }
                    ListOp::Clear => {
                        expected += usize::from(!model.is_empty());
                        list.clear().unwrap();
                        model.clear();
                    }
                }
            }
            let items: Vec<Value> = model.into_iter().map(Value::Int).collect();
            proptest::prop_assert_eq!(list.to_vec(), items);
            proptest::prop_assert_eq!(hits(&sink), expected);
        }
    }
}
