//! Identity tables mapping object references to small integer ids.
//!
//! Ids are allocated densely in first-encounter order. The decoder allocates
//! in the same order as the encoder, so ids never need to be written for
//! first occurrences; only back references carry an id.
//!
//! The shared tables span every context forked from one root, possibly on
//! several threads. Their ids are always written explicitly, and objects
//! first met inside a fork are encoded out of line as records.

use crate::error::DecodeError;
use crate::value::ObjectRef;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::HashMap;

/// Marker written in place of an id for an object's first occurrence.
pub const FIRST_OCCURRENCE: i32 = -1;

/// Encoder side: object address to id.
#[derive(Debug, Default)]
pub struct WriteIdentities {
    ids: HashMap<usize, u32>,
    // Keeps every registered object alive so no address is reused mid-session.
    retained: Vec<ObjectRef>,
}

impl WriteIdentities {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `obj` if it has been seen.
    pub fn get_id(&self, obj: &ObjectRef) -> Option<u32> {
        self.ids.get(&obj.addr()).copied()
    }

    /// Returns the id of `obj`, allocating one on first call.
    pub fn new_id(&mut self, obj: &ObjectRef) -> u32 {
        if let Some(id) = self.get_id(obj) {
            return id;
        }
        let id = self.retained.len() as u32;
        self.ids.insert(obj.addr(), id);
        self.retained.push(obj.clone());
        id
    }

    /// Returns the number of registered objects.
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    /// Returns `true` if no object has been registered.
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }
}

/// Decoder side: id to reconstructed instance.
#[derive(Debug, Default)]
pub struct ReadIdentities {
    instances: Vec<Option<ObjectRef>>,
}

impl ReadIdentities {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next id for an object whose payload is about to be read.
    pub fn reserve(&mut self) -> u32 {
        self.instances.push(None);
        (self.instances.len() - 1) as u32
    }

    /// Registers `obj` under a reserved `id`.
    ///
    /// Codecs for cyclic types call this before reading the object's
    /// contents, so back references inside the payload resolve.
    pub fn put_instance(&mut self, id: u32, obj: ObjectRef) {
        let index = id as usize;
        if index >= self.instances.len() {
            self.instances.resize(index + 1, None);
        }
        self.instances[index] = Some(obj);
    }

    /// Returns the instance registered under `id`.
    pub fn get_instance(&self, id: u32) -> Option<ObjectRef> {
        self.instances.get(id as usize).and_then(Clone::clone)
    }

    /// Returns the number of reserved ids.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if no id has been reserved.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Encoder side of the shared identity table of one session.
#[derive(Debug, Default)]
pub struct SharedWrites {
    state: Mutex<SharedWriteState>,
}

#[derive(Debug, Default)]
struct SharedWriteState {
    ids: WriteIdentities,
    records: Vec<(u32, Vec<u8>)>,
}

impl SharedWrites {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `obj` and whether this call allocated it.
    pub fn claim(&self, obj: &ObjectRef) -> (u32, bool) {
        let mut state = self.state.lock();
        match state.ids.get_id(obj) {
            Some(id) => (id, false),
            None => (state.ids.new_id(obj), true),
        }
    }

    /// Stores the out-of-line payload of the object registered under `id`.
    pub fn add_record(&self, id: u32, payload: Vec<u8>) {
        self.state.lock().records.push((id, payload));
    }

    /// Removes and returns every stored record, ordered by id.
    pub fn take_records(&self) -> Vec<(u32, Vec<u8>)> {
        let mut records = std::mem::take(&mut self.state.lock().records);
        records.sort_by_key(|(id, _)| *id);
        records
    }

    /// Returns the number of registered objects.
    pub fn len(&self) -> usize {
        self.state.lock().ids.len()
    }

    /// Returns `true` if no object has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoder side of the shared identity table of one session.
///
/// Records are decoded on first reference. One thread decodes at a time;
/// the lock is reentrant so a record may reference further records.
pub struct SharedReads {
    state: ReentrantMutex<RefCell<SharedReadState>>,
}

#[derive(Default)]
struct SharedReadState {
    instances: ReadIdentities,
    records: HashMap<u32, Vec<u8>>,
}

impl SharedReads {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(SharedReadState::default())),
        }
    }

    /// Registers `obj` under `id`.
    pub fn put_instance(&self, id: u32, obj: ObjectRef) {
        self.state.lock().borrow_mut().instances.put_instance(id, obj);
    }

    /// Stores the out-of-line payload of `id` until it is first referenced.
    pub fn add_record(&self, id: u32, payload: Vec<u8>) {
        self.state.lock().borrow_mut().records.insert(id, payload);
    }

    /// Returns the instance for `id`, decoding its record with `decode` on first use.
    ///
    /// A record referencing itself before it has registered an instance
    /// resolves as an unknown identity.
    pub fn resolve(
        &self,
        id: u32,
        decode: impl FnOnce(Vec<u8>) -> Result<ObjectRef, DecodeError>,
    ) -> Result<ObjectRef, DecodeError> {
        let guard = self.state.lock();
        let payload = {
            let mut state = guard.borrow_mut();
            if let Some(obj) = state.instances.get_instance(id) {
                return Ok(obj);
            }
            state.records.remove(&id)
        };
        let payload = payload.ok_or(DecodeError::UnknownIdentity { id: id as i32 })?;
        let obj = decode(payload)?;
        guard.borrow_mut().instances.put_instance(id, obj.clone());
        Ok(obj)
    }
}

impl Default for SharedReads {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedReads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedReads").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Node;

    #[test]
    fn ids_are_dense_and_stable() {
        let mut table = WriteIdentities::new();
        let a = ObjectRef::new(Node);
        let b = ObjectRef::new(Node);
        assert_eq!(table.get_id(&a), None);
        assert_eq!(table.new_id(&a), 0);
        assert_eq!(table.new_id(&b), 1);
        assert_eq!(table.new_id(&a), 0);
        assert_eq!(table.get_id(&b), Some(1));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reserve_then_put() {
        let mut table = ReadIdentities::new();
        let id = table.reserve();
        assert_eq!(id, 0);
        assert!(table.get_instance(id).is_none());
        let obj = ObjectRef::new(Node);
        table.put_instance(id, obj.clone());
        assert!(table.get_instance(id).unwrap().ptr_eq(&obj));
    }

    #[test]
    fn unknown_id_is_none() {
        let table = ReadIdentities::new();
        assert!(table.get_instance(5).is_none());
    }

    #[test]
    fn claim_reports_first_allocation() {
        let table = SharedWrites::new();
        let a = ObjectRef::new(Node);
        assert_eq!(table.claim(&a), (0, true));
        assert_eq!(table.claim(&a), (0, false));
        assert_eq!(table.claim(&ObjectRef::new(Node)), (1, true));
    }

    #[test]
    fn records_are_taken_in_id_order() {
        let table = SharedWrites::new();
        table.add_record(2, vec![2]);
        table.add_record(0, vec![0]);
        let ids: Vec<u32> = table.take_records().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(table.take_records().is_empty());
    }

    #[test]
    fn record_decodes_once() {
        let table = SharedReads::new();
        table.add_record(0, vec![7]);
        let mut decoded = 0;
        let first = table
            .resolve(0, |payload| {
                decoded += 1;
                assert_eq!(payload, vec![7]);
                Ok(ObjectRef::new(Node))
            })
            .unwrap();
        let again = table.resolve(0, |_| panic!("decoded twice")).unwrap();
        assert!(first.ptr_eq(&again));
        assert_eq!(decoded, 1);
    }

    #[test]
    fn nested_record_resolves_on_same_thread() {
        let table = SharedReads::new();
        table.add_record(0, Vec::new());
        table.add_record(1, Vec::new());
        let outer = table
            .resolve(0, |_| {
                let inner = table.resolve(1, |_| Ok(ObjectRef::new(Node)))?;
                Ok(inner)
            })
            .unwrap();
        assert!(outer.ptr_eq(&table.resolve(1, |_| panic!("decoded twice")).unwrap()));
    }

    #[test]
    fn missing_record_is_unknown_identity() {
        let table = SharedReads::new();
        let err = table.resolve(3, |_| Ok(ObjectRef::new(Node))).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownIdentity { id: 3 }));
    }
}
