mod common;

use std::sync::Arc;
use wren_interop::prelude::*;

// =============================================================================
// Strings and primitives
// =============================================================================

#[test]
fn test_string_round_trips() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(1).unwrap();
    let slot = vm.slot(0);

    for text in ["", "plain", "héllo wörld ✓"] {
        slot.set_string(text).unwrap();
        assert_eq!(slot.slot_type().unwrap(), SlotType::String);
        assert_eq!(slot.get_string().unwrap(), text);
    }
}

#[test]
fn test_bytes_keep_interior_nul_and_length() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(1).unwrap();
    let slot = vm.slot(0);

    slot.set_bytes(b"a\0b\0").unwrap();
    assert_eq!(slot.get_bytes().unwrap(), b"a\0b\0");

    slot.set_bytes(&[]).unwrap();
    assert_eq!(slot.slot_type().unwrap(), SlotType::String);
    assert!(slot.get_bytes().unwrap().is_empty());
}

#[test]
fn test_numbers_and_bools() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(2).unwrap();
    let [a, b, ..] = vm.slots();

    a.set_bool(true).unwrap();
    assert!(a.get_bool().unwrap());

    b.set_double(2.6).unwrap();
    assert_eq!(b.get_int().unwrap(), 3);
    b.set_double(2.4).unwrap();
    assert_eq!(b.get_int().unwrap(), 2);
    b.set_double(-2.5).unwrap();
    assert_eq!(b.get_int().unwrap(), -3);

    b.set_float(0.5).unwrap();
    assert_eq!(b.get_float().unwrap(), 0.5);
    b.set_int(-7).unwrap();
    assert_eq!(b.get_double().unwrap(), -7.0);
}

#[test]
fn test_wrong_type_is_reported_with_both_types() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(1).unwrap();
    let slot = vm.slot(0);
    slot.set_double(1.0).unwrap();

    assert_eq!(
        slot.get_string(),
        Err(BridgeError::SlotTypeMismatch {
            index: 0,
            expected: SlotType::String,
            actual: SlotType::Number,
        })
    );
    assert!(matches!(slot.get_bool(), Err(BridgeError::SlotTypeMismatch { .. })));
    assert!(matches!(slot.list_count(), Err(BridgeError::SlotTypeMismatch { .. })));
}

#[test]
fn test_out_of_range_slot_is_rejected_before_reading() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(2).unwrap();
    let count = vm.slot_count().unwrap();

    assert_eq!(
        vm.slot(count + 3).get_double(),
        Err(BridgeError::SlotOutOfRange {
            index: count + 3,
            count,
        })
    );
    assert!(matches!(
        vm.slot(count).set_null(),
        Err(BridgeError::SlotOutOfRange { .. })
    ));
}

#[test]
fn test_optional_string_reads_null_as_none() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(1).unwrap();
    let slot = vm.slot(0);

    slot.set_null().unwrap();
    assert!(slot.is_null().unwrap());
    assert_eq!(slot.get_optional_string().unwrap(), None);

    slot.set_string("x").unwrap();
    assert_eq!(slot.get_optional_string().unwrap().as_deref(), Some("x"));
}

#[test]
fn test_slots_preaddresses_sixteen() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    let slots = vm.slots();

    assert_eq!(slots.len(), 16);
    assert!(slots.iter().enumerate().all(|(i, slot)| slot.index() == i));
    assert!(slots[0].vm().same_vm(&vm));
}

// =============================================================================
// Lists
// =============================================================================

#[test]
fn test_list_indices_count_from_both_ends() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(2).unwrap();
    let [list, item, ..] = vm.slots();

    list.set_new_list().unwrap();
    for value in [1, 2, 3] {
        item.set_int(value).unwrap();
        list.insert_in_list(-1, &item).unwrap();
    }
    item.set_int(0).unwrap();
    list.insert_in_list(0, &item).unwrap();
    assert_eq!(list.list_count().unwrap(), 4);

    list.get_list_element(-1, &item).unwrap();
    assert_eq!(item.get_int().unwrap(), 3);
    list.get_list_element(0, &item).unwrap();
    assert_eq!(item.get_int().unwrap(), 0);

    item.set_string("two").unwrap();
    list.set_list_element(-2, &item).unwrap();
    list.get_list_element(2, &item).unwrap();
    assert_eq!(item.get_string().unwrap(), "two");
}

#[test]
fn test_list_index_out_of_range() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(2).unwrap();
    let [list, item, ..] = vm.slots();

    list.set_new_list().unwrap();
    assert_eq!(
        list.get_list_element(0, &item),
        Err(BridgeError::ListIndexOutOfRange { index: 0, count: 0 })
    );

    item.set_bool(false).unwrap();
    list.insert_in_list(0, &item).unwrap();
    assert!(matches!(
        list.set_list_element(1, &item),
        Err(BridgeError::ListIndexOutOfRange { index: 1, count: 1 })
    ));
    assert!(matches!(
        list.get_list_element(-2, &item),
        Err(BridgeError::ListIndexOutOfRange { .. })
    ));
    assert!(matches!(
        list.insert_in_list(3, &item),
        Err(BridgeError::ListIndexOutOfRange { .. })
    ));
}

// =============================================================================
// Maps
// =============================================================================

#[test]
fn test_map_entries() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(3).unwrap();
    let [map, key, value, ..] = vm.slots();

    map.set_new_map().unwrap();
    key.set_string("answer").unwrap();
    value.set_int(42).unwrap();
    map.set_map_value(&key, &value).unwrap();
    key.set_double(1.0).unwrap();
    value.set_bool(true).unwrap();
    map.set_map_value(&key, &value).unwrap();
    assert_eq!(map.map_count().unwrap(), 2);

    key.set_string("answer").unwrap();
    assert!(map.map_contains_key(&key).unwrap());
    map.get_map_value(&key, &value).unwrap();
    assert_eq!(value.get_int().unwrap(), 42);

    map.remove_map_value(&key, &value).unwrap();
    assert_eq!(value.get_int().unwrap(), 42);
    assert!(!map.map_contains_key(&key).unwrap());
    assert_eq!(map.map_count().unwrap(), 1);

    map.get_map_value(&key, &value).unwrap();
    assert!(value.is_null().unwrap());
    map.remove_map_value(&key, &value).unwrap();
    assert!(value.is_null().unwrap());
}

#[test]
fn test_collections_cannot_be_map_keys() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(3).unwrap();
    let [map, key, value, ..] = vm.slots();

    map.set_new_map().unwrap();
    key.set_new_list().unwrap();
    value.set_null().unwrap();

    assert_eq!(
        map.set_map_value(&key, &value),
        Err(BridgeError::UnhashableKey {
            index: 1,
            actual: SlotType::List,
        })
    );
    assert!(matches!(
        map.map_contains_key(&key),
        Err(BridgeError::UnhashableKey { .. })
    ));
}

#[test]
fn test_class_objects_are_accepted_as_map_keys() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    assert!(vm.interpret("main", "class Plain {}").unwrap().is_success());
    vm.ensure_slots(3).unwrap();
    let [map, key, value, ..] = vm.slots();

    map.set_new_map().unwrap();
    vm.get_variable("main", "Plain", &key).unwrap();
    assert_eq!(key.slot_type().unwrap(), SlotType::Unknown);
    value.set_string("class").unwrap();

    map.set_map_value(&key, &value).unwrap();
    value.set_null().unwrap();
    map.get_map_value(&key, &value).unwrap();
    assert_eq!(value.get_string().unwrap(), "class");
}

// =============================================================================
// Foreign objects
// =============================================================================

#[derive(Debug, PartialEq)]
struct Account {
    owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vec2 {
    x: f64,
    y: f64,
}

/// Declares foreign classes `A` and `B`, both bound to an allocator that
/// does nothing so that their instances get finalized.
fn declare_foreign_classes(vm: &Vm) {
    let key = vm.bridge().register_class(ForeignClassBinding::new(|_| Ok(())));
    vm.set_foreign_class_binder(move |_, _, _| Some(key));
    let result = vm
        .interpret("main", "foreign class A {}\nforeign class B {}\nclass Plain {}")
        .unwrap();
    assert!(result.is_success());
}

#[test]
fn test_foreign_object_payload_is_typed() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    declare_foreign_classes(&vm);
    vm.ensure_slots(2).unwrap();
    let [object, class, ..] = vm.slots();

    vm.get_variable("main", "A", &class).unwrap();
    let account = Arc::new(Account {
        owner: "ada".to_string(),
    });
    let ptr = object
        .set_new_foreign_object(&class, Arc::clone(&account))
        .unwrap();

    assert_eq!(object.slot_type().unwrap(), SlotType::Foreign);
    assert_eq!(object.get_foreign_ptr().unwrap(), ptr);
    assert!(object.is_foreign::<Account>().unwrap());
    assert!(!object.is_foreign::<Vec2>().unwrap());
    assert!(Arc::ptr_eq(&object.get_foreign_object::<Account>().unwrap(), &account));
    assert!(matches!(
        object.get_foreign_object::<String>(),
        Err(BridgeError::InvalidForeignType { .. })
    ));

    class.set_double(3.0).unwrap();
    assert!(!class.is_foreign::<Account>().unwrap());
}

#[test]
fn test_foreign_struct_is_copied_in_and_out() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    declare_foreign_classes(&vm);
    vm.ensure_slots(2).unwrap();
    let [object, class, ..] = vm.slots();

    vm.get_variable("main", "B", &class).unwrap();
    object
        .set_new_foreign_struct(&class, Vec2 { x: 1.0, y: 2.0 })
        .unwrap();
    assert_eq!(object.get_foreign_struct::<Vec2>().unwrap(), Vec2 { x: 1.0, y: 2.0 });

    object.set_foreign_struct(Vec2 { x: -1.0, y: 0.5 }).unwrap();
    assert_eq!(object.get_foreign_struct::<Vec2>().unwrap(), Vec2 { x: -1.0, y: 0.5 });
    assert!(matches!(
        object.set_foreign_struct(7_u32),
        Err(BridgeError::InvalidForeignType { .. })
    ));
}

#[test]
fn test_object_payload_cannot_be_overwritten_as_struct() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    declare_foreign_classes(&vm);
    vm.ensure_slots(2).unwrap();
    let [object, class, ..] = vm.slots();

    vm.get_variable("main", "A", &class).unwrap();
    let shared = Arc::new(5_u32);
    let ptr = object.set_new_foreign_object(&class, Arc::clone(&shared)).unwrap();

    assert_eq!(
        object.set_foreign_struct(6_u32),
        Err(BridgeError::PayloadKindMismatch {
            addr: ptr.addr(),
            expected: PayloadKind::Struct,
            actual: PayloadKind::Object,
        })
    );
    assert!(Arc::ptr_eq(&object.get_foreign_object::<u32>().unwrap(), &shared));
}

#[test]
fn test_foreign_payloads_are_released_at_dispose() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    declare_foreign_classes(&vm);
    vm.ensure_slots(3).unwrap();
    let [first, second, class, ..] = vm.slots();

    vm.get_variable("main", "A", &class).unwrap();
    first
        .set_new_foreign_object(&class, Arc::new(Account { owner: "x".into() }))
        .unwrap();
    second.set_new_foreign_struct(&class, Vec2 { x: 0.0, y: 0.0 }).unwrap();
    assert_eq!(bridge.foreign().len(), 2);

    vm.dispose();

    assert!(bridge.foreign().is_empty());
}

#[test]
fn test_non_foreign_class_cannot_hold_a_payload() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    declare_foreign_classes(&vm);
    vm.ensure_slots(2).unwrap();
    let [object, class, ..] = vm.slots();

    vm.get_variable("main", "Plain", &class).unwrap();
    assert_eq!(
        object.set_new_foreign_struct(&class, Vec2 { x: 0.0, y: 0.0 }),
        Err(BridgeError::ForeignAllocationFailed { index: 0 })
    );
    assert!(bridge.foreign().is_empty());
}

#[test]
fn test_foreign_read_of_plain_value_is_a_mismatch() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(1).unwrap();
    let slot = vm.slot(0);
    slot.set_string("not foreign").unwrap();

    assert_eq!(
        slot.get_foreign_ptr(),
        Err(BridgeError::SlotTypeMismatch {
            index: 0,
            expected: SlotType::Foreign,
            actual: SlotType::String,
        })
    );
}

// =============================================================================
// Module variables
// =============================================================================

#[test]
fn test_module_variables() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    assert!(vm.interpret("main", "var greeting = \"hey\"").unwrap().is_success());
    vm.ensure_slots(1).unwrap();
    let slot = vm.slot(0);

    assert!(vm.has_module("main").unwrap());
    assert!(!vm.has_module("other").unwrap());
    assert!(vm.has_variable("main", "greeting").unwrap());
    assert!(!vm.has_variable("main", "missing").unwrap());

    vm.get_variable("main", "greeting", &slot).unwrap();
    assert_eq!(slot.get_string().unwrap(), "hey");

    assert_eq!(
        vm.get_variable("main", "missing", &slot),
        Err(BridgeError::VariableNotFound {
            module: "main".to_string(),
            name: "missing".to_string(),
        })
    );
    assert_eq!(
        vm.has_variable("other", "greeting"),
        Err(BridgeError::ModuleNotFound("other".to_string()))
    );
}

#[test]
fn test_slot_of_another_vm_is_rejected() {
    let bridge = common::bridge();
    let first = common::vm(&bridge);
    let second = common::vm(&bridge);
    first.ensure_slots(2).unwrap();
    second.ensure_slots(2).unwrap();

    let list = first.slot(0);
    list.set_new_list().unwrap();
    let err = list.insert_in_list(-1, &second.slot(1)).unwrap_err();

    assert!(matches!(
        err,
        BridgeError::CrossVmMisuse {
            operation: "insert_in_list",
            ..
        }
    ));
    assert!(err.is_fatal());
}
