use log::debug;
use object::{ObjectFormat, ObjectMemory, Value};

use crate::error::VmError;
use crate::special::class_index;

/// Open-addressing map from selector to method.
///
/// A FixedSize object of three slots: `tally`, `keys` and `values`, the
/// latter two parallel Arrays. Unused keys are nil. Entries are never
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDictionary(pub Value);

impl MethodDictionary {
    pub const TALLY: usize = 0;
    pub const KEYS: usize = 1;
    pub const VALUES: usize = 2;
    pub const SLOT_COUNT: usize = 3;

    pub const MIN_CAPACITY: usize = 16;

    pub fn new(memory: &mut ObjectMemory, capacity: usize) -> Result<Self, VmError> {
        let dict = memory.allocate(
            Self::SLOT_COUNT,
            0,
            ObjectFormat::FixedSize,
            class_index::METHOD_DICTIONARY,
            None,
        )?;
        let keys = new_array(memory, capacity)?;
        let values = new_array(memory, capacity)?;
        memory.store_pointer(dict, Self::TALLY, Value::from_i64(0))?;
        memory.store_pointer(dict, Self::KEYS, keys)?;
        memory.store_pointer(dict, Self::VALUES, values)?;
        Ok(Self(dict))
    }

    pub fn tally(self, memory: &ObjectMemory) -> Result<usize, VmError> {
        let tally = memory.fetch_pointer(self.0, Self::TALLY)?;
        tally
            .as_small_integer()
            .map(|n| n as usize)
            .ok_or(VmError::TypeError {
                expected: "SmallInteger",
                got: tally,
            })
    }

    pub fn capacity(self, memory: &ObjectMemory) -> Result<usize, VmError> {
        Ok(memory.element_count(self.keys(memory)?)?)
    }

    fn keys(self, memory: &ObjectMemory) -> Result<Value, VmError> {
        Ok(memory.fetch_pointer(self.0, Self::KEYS)?)
    }

    fn values(self, memory: &ObjectMemory) -> Result<Value, VmError> {
        Ok(memory.fetch_pointer(self.0, Self::VALUES)?)
    }

    /// Index of the slot holding `key`, or of the first nil slot on its
    /// probe sequence. `None` when the table has no room.
    pub fn find_slot(self, memory: &ObjectMemory, key: Value) -> Result<Option<usize>, VmError> {
        let keys = self.keys(memory)?;
        find_slot_in(memory, keys, key)
    }

    pub fn at(self, memory: &ObjectMemory, key: Value) -> Result<Option<Value>, VmError> {
        let Some(index) = self.find_slot(memory, key)? else {
            return Ok(None);
        };
        if memory.fetch_pointer(self.keys(memory)?, index)? != key {
            return Ok(None);
        }
        Ok(Some(memory.fetch_pointer(self.values(memory)?, index)?))
    }

    pub fn at_put(self, memory: &mut ObjectMemory, key: Value, value: Value) -> Result<(), VmError> {
        let index = match self.find_slot(memory, key)? {
            Some(index) => index,
            None => {
                self.grow(memory)?;
                self.find_slot(memory, key)?
                    .ok_or(VmError::Unrepresentable { kind: "method dictionary slot" })?
            }
        };
        let keys = self.keys(memory)?;
        let values = self.values(memory)?;
        if memory.fetch_pointer(keys, index)? == memory.nil() {
            let tally = self.tally(memory)?;
            memory.store_pointer(self.0, Self::TALLY, Value::from_i64(tally as i64 + 1))?;
        }
        memory.store_pointer(keys, index, key)?;
        memory.store_pointer(values, index, value)?;
        Ok(())
    }

    /// Live `(key, value)` pairs in table order.
    pub fn entries(self, memory: &ObjectMemory) -> Result<Vec<(Value, Value)>, VmError> {
        let keys = self.keys(memory)?;
        let values = self.values(memory)?;
        let nil = memory.nil();
        let mut out = Vec::new();
        for i in 0..memory.element_count(keys)? {
            let key = memory.fetch_pointer(keys, i)?;
            if key != nil {
                out.push((key, memory.fetch_pointer(values, i)?));
            }
        }
        Ok(out)
    }

    fn grow(self, memory: &mut ObjectMemory) -> Result<(), VmError> {
        let old_capacity = self.capacity(memory)?;
        let capacity = Self::MIN_CAPACITY.max(2 * old_capacity);
        let entries = self.entries(memory)?;

        let keys = new_array(memory, capacity)?;
        let values = new_array(memory, capacity)?;
        for (key, value) in entries {
            let index = find_slot_in(memory, keys, key)?
                .ok_or(VmError::Unrepresentable { kind: "method dictionary slot" })?;
            memory.store_pointer(keys, index, key)?;
            memory.store_pointer(values, index, value)?;
        }
        memory.store_pointer(self.0, Self::KEYS, keys)?;
        memory.store_pointer(self.0, Self::VALUES, values)?;
        debug!("method dictionary {:?} grew {old_capacity} -> {capacity}", self.0);
        Ok(())
    }
}

fn new_array(memory: &mut ObjectMemory, size: usize) -> Result<Value, VmError> {
    Ok(memory.allocate(0, size, ObjectFormat::VariableSize, class_index::ARRAY, None)?)
}

fn find_slot_in(memory: &ObjectMemory, keys: Value, key: Value) -> Result<Option<usize>, VmError> {
    let capacity = memory.element_count(keys)?;
    if capacity == 0 {
        return Ok(None);
    }
    let nil = memory.nil();
    let start = memory.identity_hash_of(key)? as usize % capacity;
    for index in (start..capacity).chain(0..start) {
        let probe = memory.fetch_pointer(keys, index)?;
        if probe == key || probe == nil {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::MemorySettings;

    fn memory() -> ObjectMemory {
        let mut memory = ObjectMemory::new(MemorySettings::default());
        let nil = memory
            .allocate(0, 0, ObjectFormat::Empty, class_index::UNDEFINED_OBJECT, None)
            .unwrap();
        memory.set_nil(nil);
        memory
    }

    #[test]
    fn empty_dictionary_grows_on_first_insert() {
        let mut m = memory();
        let dict = MethodDictionary::new(&mut m, 0).unwrap();
        assert_eq!(dict.capacity(&m).unwrap(), 0);
        assert_eq!(dict.at(&m, Value::from_i64(5)).unwrap(), None);

        dict.at_put(&mut m, Value::from_i64(5), Value::from_i64(50)).unwrap();
        assert_eq!(dict.capacity(&m).unwrap(), 16);
        assert_eq!(dict.tally(&m).unwrap(), 1);
        assert_eq!(dict.at(&m, Value::from_i64(5)).unwrap(), Some(Value::from_i64(50)));
    }

    #[test]
    fn overwriting_keeps_tally() {
        let mut m = memory();
        let dict = MethodDictionary::new(&mut m, 16).unwrap();
        let key = Value::from_char('x');
        dict.at_put(&mut m, key, Value::from_i64(1)).unwrap();
        dict.at_put(&mut m, key, Value::from_i64(2)).unwrap();
        assert_eq!(dict.tally(&m).unwrap(), 1);
        assert_eq!(dict.at(&m, key).unwrap(), Some(Value::from_i64(2)));
    }

    #[test]
    fn colliding_keys_probe_and_wrap() {
        let mut m = memory();
        let dict = MethodDictionary::new(&mut m, 16).unwrap();
        // Payload hashes 15, 31 and 47 all start probing at the last slot.
        for n in [15, 31, 47] {
            dict.at_put(&mut m, Value::from_code_point(n), Value::from_i64(n as i64)).unwrap();
        }
        for n in [15, 31, 47] {
            assert_eq!(
                dict.at(&m, Value::from_code_point(n)).unwrap(),
                Some(Value::from_i64(n as i64))
            );
        }
        assert_eq!(dict.find_slot(&m, Value::from_code_point(31)).unwrap(), Some(0));
    }

    #[test]
    fn growth_preserves_every_entry() {
        let mut m = memory();
        let dict = MethodDictionary::new(&mut m, 16).unwrap();
        for k in 0..40 {
            dict.at_put(&mut m, Value::from_i64(k), Value::from_i64(k * 10)).unwrap();
        }
        assert_eq!(dict.tally(&m).unwrap(), 40);
        assert_eq!(dict.capacity(&m).unwrap(), 64);
        for k in 0..40 {
            assert_eq!(dict.at(&m, Value::from_i64(k)).unwrap(), Some(Value::from_i64(k * 10)));
        }
        assert_eq!(dict.at(&m, Value::from_i64(40)).unwrap(), None);
        assert_eq!(dict.entries(&m).unwrap().len(), 40);
    }
}
