//! Observed views and change records.
//!
//! An observed view wraps a node of a component's value tree together with
//! the change record for that node. Every write goes through to the
//! underlying value and records the net effect, so a consumer reading the
//! record at the step boundary sees the minimal per-leaf diff:
//!
//! - struct fields and array indices record the most recent assigned value;
//! - object and map entries record the value or a removal sentinel, with
//!   reassignment overriding the sentinel;
//! - sets record `added` / `removed` membership with last-operation-wins;
//! - arrays additionally track their updated length.
//!
//! Requesting a view of a composite child yields a nested view recording
//! under the child's entry. When the child was whole-value assigned earlier,
//! nested writes instead keep the recorded value current (the recorded value
//! is a live mirror of the child, matching assign-by-reference semantics).
//!
//! Clearing a record is the consumer's responsibility
//! ([`Component::clear_changes`](crate::component::Component::clear_changes)).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::{segment_key, Key, Value};

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// Net mutation recorded for one entry of a composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// The entry was assigned this value (kept current under later nested
    /// writes through the same entry).
    Assigned(Value),
    /// The entry was deleted.
    Removed,
    /// The entry was mutated through a nested view without a whole-value
    /// assignment.
    Nested(ChangeRecord),
}

impl Change {
    /// Whether this entry carries no net mutation (an empty nested record).
    pub fn is_noop(&self) -> bool {
        matches!(self, Change::Nested(record) if record.is_empty())
    }
}

/// Per-field changes of a struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructChanges {
    /// Field name to net change.
    pub fields: BTreeMap<String, Change>,
}

/// Sparse per-index changes of an ordered array, plus the tracked length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayChanges {
    /// Index to net change. Indices beyond the current length are pruned.
    pub indices: BTreeMap<usize, Change>,
    /// Length after the most recent structural write.
    pub length: Option<usize>,
}

/// Per-entry changes of a keyed object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectChanges {
    /// Key to net change; [`Change::Removed`] is the deletion sentinel.
    pub entries: BTreeMap<String, Change>,
}

/// Membership changes of a set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetChanges {
    /// Keys added this step.
    pub added: BTreeSet<Key>,
    /// Keys removed this step.
    pub removed: BTreeSet<Key>,
}

/// Per-entry changes of a keyed map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapChanges {
    /// Key to net change; [`Change::Removed`] is the deletion sentinel.
    pub entries: BTreeMap<Key, Change>,
}

/// The change record for one value-tree node, mirroring the node's shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ChangeRecord {
    /// No mutations recorded.
    #[default]
    Empty,
    /// Record for a struct node.
    Struct(StructChanges),
    /// Record for an array node.
    Array(ArrayChanges),
    /// Record for an object node.
    Object(ObjectChanges),
    /// Record for a set node.
    Set(SetChanges),
    /// Record for a map node.
    Map(MapChanges),
}

impl ChangeRecord {
    /// Whether the record (recursively) holds no net mutation.
    pub fn is_empty(&self) -> bool {
        match self {
            ChangeRecord::Empty => true,
            ChangeRecord::Struct(s) => s.fields.values().all(|c| c.is_noop()),
            ChangeRecord::Array(a) => {
                a.length.is_none() && a.indices.values().all(|c| c.is_noop())
            }
            ChangeRecord::Object(o) => o.entries.values().all(|c| c.is_noop()),
            ChangeRecord::Set(s) => s.added.is_empty() && s.removed.is_empty(),
            ChangeRecord::Map(m) => m.entries.values().all(|c| c.is_noop()),
        }
    }

    /// Drop all recorded mutations.
    pub fn clear(&mut self) {
        *self = ChangeRecord::Empty;
    }

    /// The struct-shaped record, if this is one.
    pub fn as_struct(&self) -> Option<&StructChanges> {
        match self {
            ChangeRecord::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The array-shaped record, if this is one.
    pub fn as_array(&self) -> Option<&ArrayChanges> {
        match self {
            ChangeRecord::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The object-shaped record, if this is one.
    pub fn as_object(&self) -> Option<&ObjectChanges> {
        match self {
            ChangeRecord::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The set-shaped record, if this is one.
    pub fn as_set(&self) -> Option<&SetChanges> {
        match self {
            ChangeRecord::Set(s) => Some(s),
            _ => None,
        }
    }

    /// The map-shaped record, if this is one.
    pub fn as_map(&self) -> Option<&MapChanges> {
        match self {
            ChangeRecord::Map(m) => Some(m),
            _ => None,
        }
    }

    fn struct_mut(&mut self) -> &mut StructChanges {
        if !matches!(self, ChangeRecord::Struct(_)) {
            *self = ChangeRecord::Struct(StructChanges::default());
        }
        match self {
            ChangeRecord::Struct(s) => s,
            _ => unreachable!(),
        }
    }

    fn array_mut(&mut self) -> &mut ArrayChanges {
        if !matches!(self, ChangeRecord::Array(_)) {
            *self = ChangeRecord::Array(ArrayChanges::default());
        }
        match self {
            ChangeRecord::Array(a) => a,
            _ => unreachable!(),
        }
    }

    fn object_mut(&mut self) -> &mut ObjectChanges {
        if !matches!(self, ChangeRecord::Object(_)) {
            *self = ChangeRecord::Object(ObjectChanges::default());
        }
        match self {
            ChangeRecord::Object(o) => o,
            _ => unreachable!(),
        }
    }

    fn set_mut(&mut self) -> &mut SetChanges {
        if !matches!(self, ChangeRecord::Set(_)) {
            *self = ChangeRecord::Set(SetChanges::default());
        }
        match self {
            ChangeRecord::Set(s) => s,
            _ => unreachable!(),
        }
    }

    fn map_mut(&mut self) -> &mut MapChanges {
        if !matches!(self, ChangeRecord::Map(_)) {
            *self = ChangeRecord::Map(MapChanges::default());
        }
        match self {
            ChangeRecord::Map(m) => m,
            _ => unreachable!(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trackers -- where a view records its writes
// ---------------------------------------------------------------------------

/// Recording destination for one observed node.
///
/// `Record` is the normal mode: writes produce entries in a change record.
/// `Shadow` backs nested views under a whole-value assignment: writes keep
/// the recorded (assigned) value identical to the underlying one.
enum Tracker<'a> {
    Record(&'a mut ChangeRecord),
    Shadow(&'a mut Value),
}

enum StructTracker<'a> {
    Record(&'a mut StructChanges),
    Shadow(&'a mut BTreeMap<String, Value>),
}

enum ArrayTracker<'a> {
    Record(&'a mut ArrayChanges),
    Shadow(&'a mut Vec<Value>),
}

enum ObjectTracker<'a> {
    Record(&'a mut ObjectChanges),
    Shadow(&'a mut BTreeMap<String, Value>),
}

enum SetTracker<'a> {
    Record(&'a mut SetChanges),
    Shadow(&'a mut BTreeSet<Key>),
}

enum MapTracker<'a> {
    Record(&'a mut MapChanges),
    Shadow(&'a mut BTreeMap<Key, Value>),
}

// ---------------------------------------------------------------------------
// ObservedValue -- shape dispatch
// ---------------------------------------------------------------------------

/// An observed view over one value-tree node.
///
/// Composite nodes get a shape-specific mutable view; leaves are read-only
/// through nested views (leaf writes go through the parent container).
pub enum ObservedValue<'a> {
    /// View over a struct node.
    Struct(ObservedStruct<'a>),
    /// View over an array node.
    Array(ObservedArray<'a>),
    /// View over an object node.
    Object(ObservedObject<'a>),
    /// View over a set node.
    Set(ObservedSet<'a>),
    /// View over a map node.
    Map(ObservedMap<'a>),
    /// A scalar leaf.
    Leaf(&'a Value),
}

impl<'a> ObservedValue<'a> {
    /// The struct view, if the node is a struct.
    pub fn into_struct(self) -> Option<ObservedStruct<'a>> {
        match self {
            ObservedValue::Struct(v) => Some(v),
            _ => None,
        }
    }

    /// The array view, if the node is an array.
    pub fn into_array(self) -> Option<ObservedArray<'a>> {
        match self {
            ObservedValue::Array(v) => Some(v),
            _ => None,
        }
    }

    /// The object view, if the node is an object.
    pub fn into_object(self) -> Option<ObservedObject<'a>> {
        match self {
            ObservedValue::Object(v) => Some(v),
            _ => None,
        }
    }

    /// The set view, if the node is a set.
    pub fn into_set(self) -> Option<ObservedSet<'a>> {
        match self {
            ObservedValue::Set(v) => Some(v),
            _ => None,
        }
    }

    /// The map view, if the node is a map.
    pub fn into_map(self) -> Option<ObservedMap<'a>> {
        match self {
            ObservedValue::Map(v) => Some(v),
            _ => None,
        }
    }

    /// The leaf value, if the node is a leaf.
    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            ObservedValue::Leaf(v) => Some(v),
            _ => None,
        }
    }
}

/// Entry point used by [`Component::observe`](crate::component::Component::observe).
pub(crate) fn observed_root<'a>(
    value: &'a mut Value,
    changes: &'a mut ChangeRecord,
) -> ObservedValue<'a> {
    observed(value, Tracker::Record(changes))
}

fn observed<'a>(value: &'a mut Value, tracker: Tracker<'a>) -> ObservedValue<'a> {
    match value {
        Value::Struct(fields) => {
            let tracker = match tracker {
                Tracker::Record(record) => StructTracker::Record(record.struct_mut()),
                Tracker::Shadow(shadow) => {
                    if !matches!(shadow, Value::Struct(_)) {
                        *shadow = Value::Struct(fields.clone());
                    }
                    match shadow {
                        Value::Struct(mirror) => StructTracker::Shadow(mirror),
                        _ => unreachable!(),
                    }
                }
            };
            ObservedValue::Struct(ObservedStruct { fields, tracker })
        }
        Value::Array(items) => {
            let tracker = match tracker {
                Tracker::Record(record) => ArrayTracker::Record(record.array_mut()),
                Tracker::Shadow(shadow) => {
                    if !matches!(shadow, Value::Array(_)) {
                        *shadow = Value::Array(items.clone());
                    }
                    match shadow {
                        Value::Array(mirror) => ArrayTracker::Shadow(mirror),
                        _ => unreachable!(),
                    }
                }
            };
            ObservedValue::Array(ObservedArray { items, tracker })
        }
        Value::Object(entries) => {
            let tracker = match tracker {
                Tracker::Record(record) => ObjectTracker::Record(record.object_mut()),
                Tracker::Shadow(shadow) => {
                    if !matches!(shadow, Value::Object(_)) {
                        *shadow = Value::Object(entries.clone());
                    }
                    match shadow {
                        Value::Object(mirror) => ObjectTracker::Shadow(mirror),
                        _ => unreachable!(),
                    }
                }
            };
            ObservedValue::Object(ObservedObject { entries, tracker })
        }
        Value::Set(keys) => {
            let tracker = match tracker {
                Tracker::Record(record) => SetTracker::Record(record.set_mut()),
                Tracker::Shadow(shadow) => {
                    if !matches!(shadow, Value::Set(_)) {
                        *shadow = Value::Set(keys.clone());
                    }
                    match shadow {
                        Value::Set(mirror) => SetTracker::Shadow(mirror),
                        _ => unreachable!(),
                    }
                }
            };
            ObservedValue::Set(ObservedSet { keys, tracker })
        }
        Value::Map(entries) => {
            let tracker = match tracker {
                Tracker::Record(record) => MapTracker::Record(record.map_mut()),
                Tracker::Shadow(shadow) => {
                    if !matches!(shadow, Value::Map(_)) {
                        *shadow = Value::Map(entries.clone());
                    }
                    match shadow {
                        Value::Map(mirror) => MapTracker::Shadow(mirror),
                        _ => unreachable!(),
                    }
                }
            };
            ObservedValue::Map(ObservedMap { entries, tracker })
        }
        leaf => ObservedValue::Leaf(&*leaf),
    }
}

/// Resolve the tracker for a nested view under an entry-style change slot.
fn nested_tracker<'a>(entry: &'a mut Change) -> Tracker<'a> {
    if matches!(entry, Change::Removed) {
        *entry = Change::Nested(ChangeRecord::Empty);
    }
    match entry {
        Change::Assigned(mirror) => Tracker::Shadow(mirror),
        Change::Nested(record) => Tracker::Record(record),
        Change::Removed => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// ObservedStruct
// ---------------------------------------------------------------------------

/// Observed view over a struct node.
pub struct ObservedStruct<'a> {
    fields: &'a mut BTreeMap<String, Value>,
    tracker: StructTracker<'a>,
}

impl ObservedStruct<'_> {
    /// Read a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Whether the field exists.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Assign a field, recording the new value.
    pub fn set(&mut self, field: &str, value: Value) {
        match &mut self.tracker {
            StructTracker::Record(changes) => {
                changes
                    .fields
                    .insert(field.to_owned(), Change::Assigned(value.clone()));
            }
            StructTracker::Shadow(mirror) => {
                mirror.insert(field.to_owned(), value.clone());
            }
        }
        self.fields.insert(field.to_owned(), value);
    }

    /// A nested observed view over a field.
    pub fn field_mut(&mut self, field: &str) -> Option<ObservedValue<'_>> {
        let child = self.fields.get_mut(field)?;
        let tracker = match &mut self.tracker {
            StructTracker::Record(changes) => {
                let entry = changes
                    .fields
                    .entry(field.to_owned())
                    .or_insert_with(|| Change::Nested(ChangeRecord::Empty));
                nested_tracker(entry)
            }
            StructTracker::Shadow(mirror) => {
                let mirrored = mirror
                    .entry(field.to_owned())
                    .or_insert_with(|| child.clone());
                Tracker::Shadow(mirrored)
            }
        };
        Some(observed(child, tracker))
    }
}

// ---------------------------------------------------------------------------
// ObservedArray
// ---------------------------------------------------------------------------

/// Observed view over an array node.
pub struct ObservedArray<'a> {
    items: &'a mut Vec<Value>,
    tracker: ArrayTracker<'a>,
}

impl ObservedArray<'_> {
    /// Current length.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Read an element.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Re-record the touched index span and the new length.
    fn sync(&mut self, touched: std::ops::Range<usize>) {
        match &mut self.tracker {
            ArrayTracker::Record(changes) => {
                for i in touched {
                    if let Some(v) = self.items.get(i) {
                        changes.indices.insert(i, Change::Assigned(v.clone()));
                    }
                }
                let len = self.items.len();
                changes.indices.retain(|&i, _| i < len);
                changes.length = Some(len);
            }
            ArrayTracker::Shadow(mirror) => {
                mirror.clone_from(self.items);
            }
        }
    }

    /// Assign an element, extending with `Null` if the index is past the end.
    pub fn set(&mut self, index: usize, value: Value) {
        let old_len = self.items.len();
        if index >= old_len {
            self.items.resize(index + 1, Value::Null);
        }
        self.items[index] = value;
        self.sync(old_len.min(index)..index + 1);
    }

    /// Append an element.
    pub fn push(&mut self, value: Value) {
        self.items.push(value);
        self.sync(self.items.len() - 1..self.items.len());
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<Value> {
        let popped = self.items.pop();
        if popped.is_some() {
            let len = self.items.len();
            self.sync(len..len);
        }
        popped
    }

    /// Insert an element, shifting the tail.
    pub fn insert(&mut self, index: usize, value: Value) {
        let index = index.min(self.items.len());
        self.items.insert(index, value);
        self.sync(index..self.items.len());
    }

    /// Remove an element, shifting the tail. Out-of-range indices no-op.
    pub fn remove(&mut self, index: usize) -> Option<Value> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        self.sync(index..self.items.len());
        Some(removed)
    }

    /// Truncate or extend (with `Null`) to the given length.
    pub fn set_len(&mut self, len: usize) {
        let old_len = self.items.len();
        self.items.resize(len, Value::Null);
        self.sync(old_len.min(len)..len);
    }

    /// A nested observed view over an element.
    pub fn index_mut(&mut self, index: usize) -> Option<ObservedValue<'_>> {
        let child = self.items.get_mut(index)?;
        let tracker = match &mut self.tracker {
            ArrayTracker::Record(changes) => {
                let entry = changes
                    .indices
                    .entry(index)
                    .or_insert_with(|| Change::Nested(ChangeRecord::Empty));
                nested_tracker(entry)
            }
            ArrayTracker::Shadow(mirror) => {
                if mirror.len() <= index {
                    mirror.resize(index + 1, Value::Null);
                }
                Tracker::Shadow(&mut mirror[index])
            }
        };
        Some(observed(child, tracker))
    }
}

// ---------------------------------------------------------------------------
// ObservedObject
// ---------------------------------------------------------------------------

/// Observed view over a keyed-object node.
pub struct ObservedObject<'a> {
    entries: &'a mut BTreeMap<String, Value>,
    tracker: ObjectTracker<'a>,
}

impl ObservedObject<'_> {
    /// Read an entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether the key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the object has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assign an entry, recording the new value (overrides a prior removal).
    pub fn set(&mut self, key: &str, value: Value) {
        match &mut self.tracker {
            ObjectTracker::Record(changes) => {
                changes
                    .entries
                    .insert(key.to_owned(), Change::Assigned(value.clone()));
            }
            ObjectTracker::Shadow(mirror) => {
                mirror.insert(key.to_owned(), value.clone());
            }
        }
        self.entries.insert(key.to_owned(), value);
    }

    /// Delete an entry, recording the removal sentinel.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match &mut self.tracker {
            ObjectTracker::Record(changes) => {
                changes.entries.insert(key.to_owned(), Change::Removed);
            }
            ObjectTracker::Shadow(mirror) => {
                mirror.remove(key);
            }
        }
        self.entries.remove(key)
    }

    /// A nested observed view over an entry.
    pub fn entry_mut(&mut self, key: &str) -> Option<ObservedValue<'_>> {
        let child = self.entries.get_mut(key)?;
        let tracker = match &mut self.tracker {
            ObjectTracker::Record(changes) => {
                let entry = changes
                    .entries
                    .entry(key.to_owned())
                    .or_insert_with(|| Change::Nested(ChangeRecord::Empty));
                nested_tracker(entry)
            }
            ObjectTracker::Shadow(mirror) => {
                let mirrored = mirror.entry(key.to_owned()).or_insert_with(|| child.clone());
                Tracker::Shadow(mirrored)
            }
        };
        Some(observed(child, tracker))
    }
}

// ---------------------------------------------------------------------------
// ObservedSet
// ---------------------------------------------------------------------------

/// Observed view over a set node.
pub struct ObservedSet<'a> {
    keys: &'a mut BTreeSet<Key>,
    tracker: SetTracker<'a>,
}

impl ObservedSet<'_> {
    /// Whether the set contains a key.
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate the members in order.
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Add a member. Records into `added` and un-records a prior removal.
    pub fn add(&mut self, key: impl Into<Key>) {
        let key = key.into();
        match &mut self.tracker {
            SetTracker::Record(changes) => {
                changes.removed.remove(&key);
                changes.added.insert(key.clone());
            }
            SetTracker::Shadow(mirror) => {
                mirror.insert(key.clone());
            }
        }
        self.keys.insert(key);
    }

    /// Remove a member. Records into `removed` and un-records a prior add.
    pub fn remove(&mut self, key: impl Into<Key>) -> bool {
        let key = key.into();
        match &mut self.tracker {
            SetTracker::Record(changes) => {
                changes.added.remove(&key);
                changes.removed.insert(key.clone());
            }
            SetTracker::Shadow(mirror) => {
                mirror.remove(&key);
            }
        }
        self.keys.remove(&key)
    }
}

// ---------------------------------------------------------------------------
// ObservedMap
// ---------------------------------------------------------------------------

/// Observed view over a keyed-map node.
pub struct ObservedMap<'a> {
    entries: &'a mut BTreeMap<Key, Value>,
    tracker: MapTracker<'a>,
}

impl ObservedMap<'_> {
    /// Read an entry.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether the key exists.
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assign an entry, recording the new value (overrides a prior removal).
    pub fn set(&mut self, key: impl Into<Key>, value: Value) {
        let key = key.into();
        match &mut self.tracker {
            MapTracker::Record(changes) => {
                changes
                    .entries
                    .insert(key.clone(), Change::Assigned(value.clone()));
            }
            MapTracker::Shadow(mirror) => {
                mirror.insert(key.clone(), value.clone());
            }
        }
        self.entries.insert(key, value);
    }

    /// Delete an entry, recording the removal sentinel.
    pub fn remove(&mut self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        match &mut self.tracker {
            MapTracker::Record(changes) => {
                changes.entries.insert(key.clone(), Change::Removed);
            }
            MapTracker::Shadow(mirror) => {
                mirror.remove(&key);
            }
        }
        self.entries.remove(&key)
    }

    /// A nested observed view over an entry.
    pub fn entry_mut(&mut self, key: impl Into<Key>) -> Option<ObservedValue<'_>> {
        let key = key.into();
        let child = self.entries.get_mut(&key)?;
        let tracker = match &mut self.tracker {
            MapTracker::Record(changes) => {
                let entry = changes
                    .entries
                    .entry(key)
                    .or_insert_with(|| Change::Nested(ChangeRecord::Empty));
                nested_tracker(entry)
            }
            MapTracker::Shadow(mirror) => {
                let mirrored = mirror.entry(key).or_insert_with(|| child.clone());
                Tracker::Shadow(mirrored)
            }
        };
        Some(observed(child, tracker))
    }
}

// ---------------------------------------------------------------------------
// Path writes
// ---------------------------------------------------------------------------

/// Write a leaf at a dotted-path position through observed views, so the
/// write is recorded like any other. Returns `false` when the path cannot
/// be walked (a missing intermediate or a non-container segment).
pub(crate) fn write_at_path(view: ObservedValue<'_>, segments: &[String], value: Value) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return false;
    };
    let last = rest.is_empty();
    match view {
        ObservedValue::Struct(mut s) => {
            if last {
                s.set(segment, value);
                true
            } else {
                s.field_mut(segment)
                    .is_some_and(|child| write_at_path(child, rest, value))
            }
        }
        ObservedValue::Object(mut o) => {
            if last {
                o.set(segment, value);
                true
            } else {
                o.entry_mut(segment)
                    .is_some_and(|child| write_at_path(child, rest, value))
            }
        }
        ObservedValue::Array(mut a) => {
            let Ok(index) = segment.parse::<usize>() else {
                return false;
            };
            if last {
                a.set(index, value);
                true
            } else {
                a.index_mut(index)
                    .is_some_and(|child| write_at_path(child, rest, value))
            }
        }
        ObservedValue::Map(mut m) => {
            let key = segment_key(segment);
            if last {
                m.set(key, value);
                true
            } else {
                m.entry_mut(key)
                    .is_some_and(|child| write_at_path(child, rest, value))
            }
        }
        ObservedValue::Set(_) | ObservedValue::Leaf(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn observe<'a>(value: &'a mut Value, changes: &'a mut ChangeRecord) -> ObservedValue<'a> {
        observed_root(value, changes)
    }

    #[test]
    fn struct_writes_record_latest_value() {
        let mut value = Value::struct_of([("x", Value::Int(0)), ("y", Value::Int(0))]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_struct().unwrap();
            view.set("x", Value::Int(1));
            view.set("y", Value::Int(2));
            view.set("x", Value::Int(3));
        }
        let record = changes.as_struct().unwrap();
        assert_eq!(record.fields.get("x"), Some(&Change::Assigned(Value::Int(3))));
        assert_eq!(record.fields.get("y"), Some(&Change::Assigned(Value::Int(2))));
        assert_eq!(value.at_path(&"x".into()), Some(&Value::Int(3)));
    }

    #[test]
    fn map_delete_then_set_overrides_sentinel() {
        let mut value = Value::map_of::<Key, _>([]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_map().unwrap();
            view.set("k", Value::Int(1));
            view.remove("k");
            view.set("k", Value::Int(2));
        }
        let record = changes.as_map().unwrap();
        assert_eq!(
            record.entries.get(&Key::from("k")),
            Some(&Change::Assigned(Value::Int(2)))
        );
    }

    #[test]
    fn map_set_then_delete_records_sentinel() {
        let mut value = Value::map_of([("k", Value::Int(1))]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_map().unwrap();
            view.remove("k");
        }
        assert_eq!(
            changes.as_map().unwrap().entries.get(&Key::from("k")),
            Some(&Change::Removed)
        );
        assert_eq!(value, Value::map_of::<Key, _>([]));
    }

    #[test]
    fn set_add_remove_toggles_final_state() {
        let mut value = Value::set_of(["a"]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_set().unwrap();
            view.add("b");
            view.remove("b");
            view.remove("a");
            view.add("c");
        }
        let record = changes.as_set().unwrap();
        assert!(record.added.contains(&Key::from("c")));
        assert!(!record.added.contains(&Key::from("b")));
        assert!(record.removed.contains(&Key::from("a")));
        assert!(record.removed.contains(&Key::from("b")));
    }

    #[test]
    fn array_push_pop_tracks_length() {
        let mut value = Value::array_of([Value::Int(1)]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_array().unwrap();
            view.push(Value::Int(2));
            view.push(Value::Int(3));
            assert_eq!(view.pop(), Some(Value::Int(3)));
            view.set(0, Value::Int(9));
        }
        let record = changes.as_array().unwrap();
        assert_eq!(record.length, Some(2));
        assert_eq!(record.indices.get(&0), Some(&Change::Assigned(Value::Int(9))));
        assert_eq!(record.indices.get(&1), Some(&Change::Assigned(Value::Int(2))));
        assert!(!record.indices.contains_key(&2));
    }

    #[test]
    fn array_remove_rerecords_shifted_tail() {
        let mut value = Value::array_of([Value::Int(1), Value::Int(2), Value::Int(3)]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_array().unwrap();
            assert_eq!(view.remove(0), Some(Value::Int(1)));
        }
        let record = changes.as_array().unwrap();
        assert_eq!(record.length, Some(2));
        assert_eq!(record.indices.get(&0), Some(&Change::Assigned(Value::Int(2))));
        assert_eq!(record.indices.get(&1), Some(&Change::Assigned(Value::Int(3))));
        assert!(!record.indices.contains_key(&2));
    }

    #[test]
    fn nested_struct_writes_record_under_parent_entry() {
        let mut value = Value::struct_of([(
            "pos",
            Value::struct_of([("x", Value::Int(0)), ("y", Value::Int(0))]),
        )]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_struct().unwrap();
            let mut pos = view.field_mut("pos").unwrap().into_struct().unwrap();
            pos.set("x", Value::Int(7));
        }
        let record = changes.as_struct().unwrap();
        match record.fields.get("pos") {
            Some(Change::Nested(ChangeRecord::Struct(nested))) => {
                assert_eq!(nested.fields.get("x"), Some(&Change::Assigned(Value::Int(7))));
            }
            other => panic!("expected nested record, got {other:?}"),
        }
    }

    #[test]
    fn assigned_composite_stays_current_under_nested_writes() {
        let mut value = Value::struct_of([("pos", Value::Null)]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_struct().unwrap();
            view.set(
                "pos",
                Value::struct_of([("x", Value::Int(1)), ("y", Value::Int(2))]),
            );
            let mut pos = view.field_mut("pos").unwrap().into_struct().unwrap();
            pos.set("x", Value::Int(5));
        }
        // The recorded assigned value mirrors the nested write.
        let record = changes.as_struct().unwrap();
        let expected = Value::struct_of([("x", Value::Int(5)), ("y", Value::Int(2))]);
        assert_eq!(record.fields.get("pos"), Some(&Change::Assigned(expected.clone())));
        assert_eq!(value.at_path(&"pos".into()), Some(&expected));
    }

    #[test]
    fn empty_nested_view_is_not_a_change() {
        let mut value = Value::struct_of([("pos", Value::struct_of([("x", Value::Int(0))]))]);
        let mut changes = ChangeRecord::default();
        {
            let mut view = observe(&mut value, &mut changes).into_struct().unwrap();
            let _ = view.field_mut("pos");
        }
        assert!(changes.is_empty());
    }

    #[test]
    fn write_at_path_reaches_nested_leaves() {
        let mut value = Value::struct_of([(
            "inventory",
            Value::array_of([Value::map_of([("gold", Value::Int(0))])]),
        )]);
        let mut changes = ChangeRecord::default();
        let ok = write_at_path(
            observe(&mut value, &mut changes),
            &["inventory".to_owned(), "0".to_owned(), "gold".to_owned()],
            Value::Int(50),
        );
        assert!(ok);
        assert_eq!(
            value.at_path(&"inventory.0.gold".into()),
            Some(&Value::Int(50))
        );
        assert!(!changes.is_empty());
    }

    #[test]
    fn write_at_path_rejects_unwalkable_paths() {
        let mut value = Value::struct_of([("x", Value::Int(0))]);
        let mut changes = ChangeRecord::default();
        let ok = write_at_path(
            observe(&mut value, &mut changes),
            &["x".to_owned(), "deeper".to_owned()],
            Value::Int(1),
        );
        assert!(!ok);
    }
}
