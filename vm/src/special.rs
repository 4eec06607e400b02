use std::collections::HashMap;

use bytecode::SPECIAL_SELECTORS;
use log::debug;
use object::{ObjectFormat, ObjectMemory, Value};

use crate::class::ClassSlot;
use crate::error::VmError;
use crate::stack::StackRegistry;
use crate::{VM, VmSettings, primitives};

/// Fixed class-table indices of the kernel classes.
///
/// Immediates use the indices their tag bits imply. Everything from
/// [`FIRST_DYNAMIC`](class_index::FIRST_DYNAMIC) on is handed out at class
/// definition, metaclasses included.
pub mod class_index {
    pub const SMALL_INTEGER: u32 = object::SMALL_INTEGER_CLASS_INDEX;
    pub const CHARACTER: u32 = object::CHARACTER_CLASS_INDEX;
    pub const SMALL_FLOAT: u32 = object::SMALL_FLOAT_CLASS_INDEX;

    pub const UNDEFINED_OBJECT: u32 = 8;
    pub const TRUE: u32 = 9;
    pub const FALSE: u32 = 10;
    pub const OBJECT: u32 = 11;
    pub const BOOLEAN: u32 = 12;
    pub const SYMBOL: u32 = 13;
    pub const STRING: u32 = 14;
    pub const ARRAY: u32 = 15;
    pub const BYTE_ARRAY: u32 = 16;
    pub const METHOD_DICTIONARY: u32 = 17;
    pub const COMPILED_METHOD: u32 = 18;
    pub const NATIVE_METHOD: u32 = 19;
    pub const ASSOCIATION: u32 = 20;
    pub const BEHAVIOR: u32 = 21;
    pub const CLASS: u32 = 22;
    pub const METACLASS: u32 = 23;

    pub const FIRST_DYNAMIC: u32 = 24;
}

/// Objects the VM refers to directly.
#[derive(Debug, Clone, Copy)]
pub struct SpecialObjects {
    pub nil: Value,
    pub true_obj: Value,
    pub false_obj: Value,
}

struct KernelClass {
    index: u32,
    name: &'static str,
    superclass: Option<u32>,
    format: ObjectFormat,
    instance_size: usize,
}

const fn kernel(
    index: u32,
    name: &'static str,
    superclass: Option<u32>,
    format: ObjectFormat,
    instance_size: usize,
) -> KernelClass {
    KernelClass {
        index,
        name,
        superclass,
        format,
        instance_size,
    }
}

use class_index as ci;

/// Superclasses come before their subclasses.
const KERNEL_CLASSES: &[KernelClass] = &[
    kernel(ci::OBJECT, "Object", None, ObjectFormat::FixedSize, 0),
    kernel(ci::BEHAVIOR, "Behavior", Some(ci::OBJECT), ObjectFormat::FixedSize, ClassSlot::BEHAVIOR_SIZE),
    kernel(ci::CLASS, "Class", Some(ci::BEHAVIOR), ObjectFormat::FixedSize, ClassSlot::CLASS_SIZE),
    kernel(ci::METACLASS, "Metaclass", Some(ci::BEHAVIOR), ObjectFormat::FixedSize, ClassSlot::CLASS_SIZE),
    kernel(ci::UNDEFINED_OBJECT, "UndefinedObject", Some(ci::OBJECT), ObjectFormat::Empty, 0),
    kernel(ci::BOOLEAN, "Boolean", Some(ci::OBJECT), ObjectFormat::Empty, 0),
    kernel(ci::TRUE, "True", Some(ci::BOOLEAN), ObjectFormat::Empty, 0),
    kernel(ci::FALSE, "False", Some(ci::BOOLEAN), ObjectFormat::Empty, 0),
    kernel(ci::SMALL_INTEGER, "SmallInteger", Some(ci::OBJECT), ObjectFormat::Empty, 0),
    kernel(ci::CHARACTER, "Character", Some(ci::OBJECT), ObjectFormat::Empty, 0),
    kernel(ci::SMALL_FLOAT, "SmallFloat", Some(ci::OBJECT), ObjectFormat::Empty, 0),
    kernel(ci::STRING, "String", Some(ci::OBJECT), ObjectFormat::Indexable8, 0),
    kernel(ci::SYMBOL, "Symbol", Some(ci::STRING), ObjectFormat::Indexable8, 0),
    kernel(ci::ARRAY, "Array", Some(ci::OBJECT), ObjectFormat::VariableSize, 0),
    kernel(ci::BYTE_ARRAY, "ByteArray", Some(ci::OBJECT), ObjectFormat::Indexable8, 0),
    kernel(ci::METHOD_DICTIONARY, "MethodDictionary", Some(ci::OBJECT), ObjectFormat::FixedSize, 3),
    kernel(ci::COMPILED_METHOD, "CompiledMethod", Some(ci::OBJECT), ObjectFormat::CompiledMethod, 0),
    kernel(ci::NATIVE_METHOD, "NativeMethod", Some(ci::OBJECT), ObjectFormat::FixedSize, 3),
    kernel(ci::ASSOCIATION, "Association", Some(ci::OBJECT), ObjectFormat::FixedSize, 2),
];

/// Build a VM with its kernel classes, special selectors and kernel
/// natives installed.
///
/// nil is the first object allocated so every later pointer slot starts
/// out as nil.
pub fn bootstrap(settings: VmSettings) -> Result<VM, VmError> {
    let mut memory = ObjectMemory::new(settings.memory);
    let nil = memory.allocate(0, 0, ObjectFormat::Empty, ci::UNDEFINED_OBJECT, None)?;
    memory.set_nil(nil);
    let true_obj = memory.allocate(0, 0, ObjectFormat::Empty, ci::TRUE, None)?;
    let false_obj = memory.allocate(0, 0, ObjectFormat::Empty, ci::FALSE, None)?;

    let mut vm = VM {
        memory,
        special: SpecialObjects {
            nil,
            true_obj,
            false_obj,
        },
        class_table: vec![nil; ci::FIRST_DYNAMIC as usize],
        intern_table: HashMap::new(),
        natives: Vec::new(),
        special_selectors: Vec::with_capacity(SPECIAL_SELECTORS.len()),
        stacks: StackRegistry::new(),
        settings,
        does_not_understand: None,
    };

    for k in KERNEL_CLASSES {
        let superclass = match k.superclass {
            Some(index) => vm.class_at(index).ok_or(VmError::InvalidClass(nil))?,
            None => nil,
        };
        vm.create_class(k.index, k.name, superclass, k.format, k.instance_size)?;
    }

    // Object has no superclass, so its metaclass could not be linked to
    // Class before Class existed.
    let object = vm.class_at(ci::OBJECT).ok_or(VmError::InvalidClass(nil))?;
    let class = vm.class_at(ci::CLASS).ok_or(VmError::InvalidClass(nil))?;
    let object_meta = vm.class_of(object)?;
    vm.memory
        .store_pointer(object_meta, ClassSlot::SUPERCLASS, class)?;

    for (name, _) in SPECIAL_SELECTORS {
        let selector = vm.intern(name)?;
        vm.special_selectors.push(selector);
    }

    primitives::install_kernel_natives(&mut vm)?;

    debug!(
        "bootstrapped {} kernel classes, {} objects, {} bytes",
        KERNEL_CLASSES.len(),
        vm.memory.object_count(),
        vm.memory.used_bytes()
    );
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_classes_sit_at_their_indices() {
        let vm = bootstrap(VmSettings::default()).unwrap();
        for k in KERNEL_CLASSES {
            let class = vm.class_at(k.index).unwrap();
            assert_eq!(vm.memory.identity_hash_of(class).unwrap(), k.index);
            assert_eq!(vm.class_name(class).unwrap(), k.name);
        }
    }

    #[test]
    fn special_objects_have_their_classes() {
        let vm = bootstrap(VmSettings::default()).unwrap();
        let name_of = |v| vm.class_name(vm.class_of(v).unwrap()).unwrap();
        assert_eq!(name_of(vm.nil()), "UndefinedObject");
        assert_eq!(name_of(vm.boolean(true)), "True");
        assert_eq!(name_of(vm.boolean(false)), "False");
        assert_eq!(name_of(Value::from_i64(3)), "SmallInteger");
        assert_eq!(name_of(Value::from_char('a')), "Character");
    }

    #[test]
    fn metaclass_hierarchy_closes() {
        let vm = bootstrap(VmSettings::default()).unwrap();
        let object = vm.class_at(ci::OBJECT).unwrap();
        let class = vm.class_at(ci::CLASS).unwrap();
        let metaclass = vm.class_at(ci::METACLASS).unwrap();

        let object_meta = vm.class_of(object).unwrap();
        assert_eq!(vm.class_name(object_meta).unwrap(), "Object class");
        assert_eq!(vm.superclass(object_meta).unwrap(), class);
        assert_eq!(vm.class_of(object_meta).unwrap(), metaclass);
        // Metaclass class class == Metaclass
        let metaclass_meta = vm.class_of(metaclass).unwrap();
        assert_eq!(vm.class_of(metaclass_meta).unwrap(), metaclass);

        let true_class = vm.class_at(ci::TRUE).unwrap();
        let boolean = vm.class_at(ci::BOOLEAN).unwrap();
        assert_eq!(
            vm.superclass(vm.class_of(true_class).unwrap()).unwrap(),
            vm.class_of(boolean).unwrap()
        );
    }

    #[test]
    fn special_selectors_are_interned_in_table_order() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        assert_eq!(vm.special_selectors.len(), 32);
        let plus = vm.intern("+").unwrap();
        assert_eq!(vm.special_selectors[0], plus);
        assert_eq!(vm.symbol_name(vm.special_selectors[22]).as_deref(), Some("=="));
    }
}
