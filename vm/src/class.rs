use log::debug;
use object::{Header, MemoryError, ObjectFormat, Value};

use crate::VM;
use crate::dictionary::MethodDictionary;
use crate::error::VmError;
use crate::special::class_index;

/// Field indices of Behavior, Class and Metaclass objects.
pub struct ClassSlot;

impl ClassSlot {
    pub const SUPERCLASS: usize = 0;
    pub const METHOD_DICT: usize = 1;
    /// SmallInteger `instanceFormat << 16 | fixedInstanceVariableCount`.
    pub const FORMAT: usize = 2;
    /// Class: the name Symbol. Metaclass: the sole instance.
    pub const NAME: usize = 3;
    pub const THIS_CLASS: usize = 3;

    pub const BEHAVIOR_SIZE: usize = 3;
    pub const CLASS_SIZE: usize = 4;
}

const FORMAT_SHIFT: i64 = 16;
const INSTANCE_SIZE_MASK: i64 = 0xFFFF;

/// Decoded instance specification of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSpec {
    pub format: ObjectFormat,
    pub instance_size: usize,
}

impl InstanceSpec {
    pub fn pack(self) -> Value {
        Value::from_i64((self.format.encode(0) as i64) << FORMAT_SHIFT | self.instance_size as i64)
    }

    pub fn unpack(word: Value) -> Option<Self> {
        let word = word.as_small_integer()?;
        let (format, _) = ObjectFormat::decode((word >> FORMAT_SHIFT) as u8)?;
        Some(Self {
            format,
            instance_size: (word & INSTANCE_SIZE_MASK) as usize,
        })
    }
}

impl VM {
    /// The class object at `index`, if one is installed there.
    pub fn class_at(&self, index: u32) -> Option<Value> {
        self.class_table
            .get(index as usize)
            .copied()
            .filter(|&class| class != self.nil())
    }

    pub fn class_of(&self, value: Value) -> Result<Value, VmError> {
        let index = self.memory.class_index_of(value)?;
        self.class_at(index).ok_or(VmError::InvalidClass(value))
    }

    /// Whether `value` is a class or metaclass installed in the class table.
    pub fn is_class(&self, value: Value) -> bool {
        if !value.is_object() {
            return false;
        }
        match self.memory.identity_hash_of(value) {
            Ok(hash) => self.class_at(hash).is_some_and(|c| c == value),
            Err(_) => false,
        }
    }

    fn expect_class(&self, value: Value) -> Result<Value, VmError> {
        if self.is_class(value) {
            Ok(value)
        } else {
            Err(VmError::InvalidClass(value))
        }
    }

    /// Class index that instances of `class` carry.
    pub fn class_index_of_class(&self, class: Value) -> Result<u32, VmError> {
        let class = self.expect_class(class)?;
        Ok(self.memory.identity_hash_of(class)?)
    }

    pub fn superclass(&self, class: Value) -> Result<Value, VmError> {
        let class = self.expect_class(class)?;
        Ok(self.memory.fetch_pointer(class, ClassSlot::SUPERCLASS)?)
    }

    pub fn method_dictionary(&self, class: Value) -> Result<MethodDictionary, VmError> {
        let class = self.expect_class(class)?;
        Ok(MethodDictionary(
            self.memory.fetch_pointer(class, ClassSlot::METHOD_DICT)?,
        ))
    }

    pub fn instance_spec(&self, class: Value) -> Result<InstanceSpec, VmError> {
        let class = self.expect_class(class)?;
        let word = self.memory.fetch_pointer(class, ClassSlot::FORMAT)?;
        InstanceSpec::unpack(word).ok_or(VmError::InvalidClass(class))
    }

    pub fn is_metaclass(&self, class: Value) -> bool {
        self.is_class(class)
            && self
                .memory
                .class_index_of(class)
                .is_ok_and(|index| index == class_index::METACLASS)
    }

    /// `Foo` for a class, `Foo class` for its metaclass.
    pub fn class_name(&self, class: Value) -> Option<String> {
        if !self.is_class(class) {
            return None;
        }
        let slot = self.memory.fetch_pointer(class, ClassSlot::NAME).ok()?;
        if self.is_metaclass(class) {
            return Some(format!("{} class", self.class_name(slot)?));
        }
        self.symbol_name(slot)
    }

    /// Reserve the next free class index.
    fn reserve_class_index(&mut self) -> Result<u32, VmError> {
        let index = self.class_table.len().max(class_index::FIRST_DYNAMIC as usize);
        if index > Header::MAX_CLASS_INDEX as usize {
            return Err(MemoryError::ClassIndexOutOfRange {
                class_index: index as u32,
            }
            .into());
        }
        let nil = self.nil();
        self.class_table.resize(index + 1, nil);
        Ok(index as u32)
    }

    /// Define a new class and its metaclass under fresh class indices.
    pub fn define_class(
        &mut self,
        name: &str,
        superclass: Value,
        format: ObjectFormat,
        instance_size: usize,
    ) -> Result<Value, VmError> {
        let index = self.reserve_class_index()?;
        self.create_class(index, name, superclass, format, instance_size)
    }

    /// Build the class object for `index` and a metaclass under a fresh
    /// index.
    ///
    /// The class object is an instance of its metaclass and its identity
    /// hash is `index`. The metaclass is an instance of Metaclass.
    pub(crate) fn create_class(
        &mut self,
        index: u32,
        name: &str,
        superclass: Value,
        format: ObjectFormat,
        instance_size: usize,
    ) -> Result<Value, VmError> {
        if superclass != self.nil() {
            self.expect_class(superclass)?;
        }
        let meta_index = self.reserve_class_index()?;
        let class = self.memory.allocate(
            ClassSlot::CLASS_SIZE,
            0,
            ObjectFormat::FixedSize,
            meta_index,
            Some(index),
        )?;
        let meta = self.memory.allocate(
            ClassSlot::CLASS_SIZE,
            0,
            ObjectFormat::FixedSize,
            class_index::METACLASS,
            Some(meta_index),
        )?;
        if self.class_table.len() <= index as usize {
            let nil = self.nil();
            self.class_table.resize(index as usize + 1, nil);
        }
        self.class_table[index as usize] = class;
        self.class_table[meta_index as usize] = meta;

        let name_symbol = self.intern(name)?;
        let dict = MethodDictionary::new(&mut self.memory, 0)?;
        let spec = InstanceSpec {
            format,
            instance_size,
        };
        self.memory.store_pointer(class, ClassSlot::METHOD_DICT, dict.0)?;
        self.memory.store_pointer(class, ClassSlot::FORMAT, spec.pack())?;
        self.memory.store_pointer(class, ClassSlot::NAME, name_symbol)?;

        let meta_dict = MethodDictionary::new(&mut self.memory, 0)?;
        let meta_spec = InstanceSpec {
            format: ObjectFormat::FixedSize,
            instance_size: ClassSlot::CLASS_SIZE,
        };
        self.memory.store_pointer(meta, ClassSlot::METHOD_DICT, meta_dict.0)?;
        self.memory.store_pointer(meta, ClassSlot::FORMAT, meta_spec.pack())?;
        self.memory.store_pointer(meta, ClassSlot::THIS_CLASS, class)?;

        self.set_superclass(class, superclass)?;
        debug!("defined class {name} at index {index}, metaclass at {meta_index}");
        Ok(class)
    }

    /// Point `class` at `superclass` and its metaclass at the superclass's
    /// metaclass. A nil superclass makes the metaclass inherit from Class.
    pub fn set_superclass(&mut self, class: Value, superclass: Value) -> Result<(), VmError> {
        let class = self.expect_class(class)?;
        let nil = self.nil();

        let meta_superclass = if superclass == nil {
            self.class_at(class_index::CLASS).unwrap_or(nil)
        } else {
            self.expect_class(superclass)?;
            let mut current = superclass;
            let mut depth = 0;
            while current != nil {
                if current == class || depth > self.class_table.len() {
                    return Err(VmError::SuperclassCycle { class });
                }
                current = self.superclass(current)?;
                depth += 1;
            }
            self.class_of(superclass)?
        };

        self.memory
            .store_pointer(class, ClassSlot::SUPERCLASS, superclass)?;
        if !self.is_metaclass(class) {
            let meta = self.class_of(class)?;
            self.memory
                .store_pointer(meta, ClassSlot::SUPERCLASS, meta_superclass)?;
        }
        Ok(())
    }

    /// Install `method` under `selector` in `class`'s method dictionary.
    pub fn add_method(&mut self, class: Value, selector: Value, method: Value) -> Result<(), VmError> {
        let dict = self.method_dictionary(class)?;
        dict.at_put(&mut self.memory, selector, method)
    }

    /// Allocate an instance of `class` with `indexable_size` indexable
    /// elements.
    pub fn instantiate(&mut self, class: Value, indexable_size: usize) -> Result<Value, VmError> {
        let index = self.class_index_of_class(class)?;
        if matches!(
            index,
            class_index::SMALL_INTEGER | class_index::CHARACTER | class_index::SMALL_FLOAT
        ) {
            return Err(VmError::InvalidClass(class));
        }
        let spec = self.instance_spec(class)?;
        Ok(self.memory.allocate(
            spec.instance_size,
            indexable_size,
            spec.format,
            index,
            None,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    fn vm() -> VM {
        VM::new(VmSettings::default()).unwrap()
    }

    #[test]
    fn instance_spec_round_trip() {
        let spec = InstanceSpec {
            format: ObjectFormat::VariableSizeIvars,
            instance_size: 5,
        };
        assert_eq!(spec.pack().as_small_integer(), Some(3 << 16 | 5));
        assert_eq!(InstanceSpec::unpack(spec.pack()), Some(spec));
        assert_eq!(InstanceSpec::unpack(Value::from_char('a')), None);
    }

    #[test]
    fn defined_classes_get_fresh_indices() {
        let mut vm = vm();
        let object = vm.class_at(class_index::OBJECT).unwrap();
        let point = vm.define_class("Point", object, ObjectFormat::FixedSize, 2).unwrap();
        let index = vm.class_index_of_class(point).unwrap();
        assert!(index >= class_index::FIRST_DYNAMIC);
        assert_eq!(vm.class_at(index), Some(point));
        assert_eq!(vm.superclass(point).unwrap(), object);
        assert_eq!(vm.class_name(point).as_deref(), Some("Point"));

        let meta = vm.class_of(point).unwrap();
        assert!(vm.is_metaclass(meta));
        assert_eq!(vm.class_name(meta).as_deref(), Some("Point class"));
        assert_eq!(vm.superclass(meta).unwrap(), vm.class_of(object).unwrap());
    }

    #[test]
    fn instances_carry_their_class_index() {
        let mut vm = vm();
        let object = vm.class_at(class_index::OBJECT).unwrap();
        let point = vm.define_class("Point", object, ObjectFormat::FixedSize, 2).unwrap();
        let p = vm.instantiate(point, 0).unwrap();
        assert_eq!(vm.class_of(p).unwrap(), point);
        assert_eq!(vm.memory.slot_count(p).unwrap(), 2);
        assert_eq!(vm.memory.fetch_pointer(p, 1).unwrap(), vm.nil());

        assert!(matches!(
            vm.instantiate(point, 3),
            Err(VmError::Memory(MemoryError::InvalidLayout { .. }))
        ));
        let small_int = vm.class_at(class_index::SMALL_INTEGER).unwrap();
        assert_eq!(vm.instantiate(small_int, 0), Err(VmError::InvalidClass(small_int)));
        assert_eq!(vm.instantiate(p, 0), Err(VmError::InvalidClass(p)));
    }

    #[test]
    fn superclass_cycles_are_rejected() {
        let mut vm = vm();
        let object = vm.class_at(class_index::OBJECT).unwrap();
        let a = vm.define_class("A", object, ObjectFormat::FixedSize, 0).unwrap();
        let b = vm.define_class("B", a, ObjectFormat::FixedSize, 0).unwrap();
        let c = vm.define_class("C", b, ObjectFormat::FixedSize, 0).unwrap();

        assert_eq!(vm.set_superclass(a, c), Err(VmError::SuperclassCycle { class: a }));
        assert_eq!(vm.set_superclass(a, a), Err(VmError::SuperclassCycle { class: a }));
        assert_eq!(vm.superclass(a).unwrap(), object);

        vm.set_superclass(c, a).unwrap();
        assert_eq!(vm.superclass(c).unwrap(), a);
        assert_eq!(vm.superclass(vm.class_of(c).unwrap()).unwrap(), vm.class_of(a).unwrap());
    }

    #[test]
    fn non_classes_are_not_superclasses() {
        let mut vm = vm();
        let object = vm.class_at(class_index::OBJECT).unwrap();
        let err = vm.define_class("Bad", Value::from_i64(1), ObjectFormat::FixedSize, 0);
        assert_eq!(err, Err(VmError::InvalidClass(Value::from_i64(1))));
        let a = vm.define_class("A", object, ObjectFormat::FixedSize, 0).unwrap();
        assert_eq!(vm.set_superclass(a, vm.nil()), Ok(()));
        assert_eq!(vm.superclass(a).unwrap(), vm.nil());
    }
}
