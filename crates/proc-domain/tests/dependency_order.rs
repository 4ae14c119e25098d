use proc_domain::{EntityDependencyOrder, EntityKind, ForeignKeys};

#[test]
fn insert_order_is_exact_reverse_of_delete_order() {
  let order = EntityDependencyOrder::standard();
  let n = order.delete_order().len();
  assert_eq!(n, EntityKind::all().len());
  for (i, kind) in order.delete_order().iter().enumerate() {
    assert_eq!(order.insert_order()[n - 1 - i], *kind, "kind {} out of place", kind);
    assert_eq!(order.insert_position(*kind), Some(n - 1 - i));
  }
}

#[test]
fn every_foreign_key_child_is_deleted_before_and_inserted_after_its_parent() {
  let order = EntityDependencyOrder::standard();
  let fks = ForeignKeys::standard();
  for fk in fks.iter().filter(|fk| !fk.is_self_reference()) {
    let (child_del, parent_del) = (order.delete_position(fk.child).unwrap(), order.delete_position(fk.parent).unwrap());
    let (child_ins, parent_ins) = (order.insert_position(fk.child).unwrap(), order.insert_position(fk.parent).unwrap());
    assert!(child_del < parent_del, "{}.{} -> {} delete order", fk.child, fk.field, fk.parent);
    assert!(child_ins > parent_ins, "{}.{} -> {} insert order", fk.child, fk.field, fk.parent);
  }
  order.validate(&fks).expect("standard order must validate");
}

#[test]
fn derived_order_also_satisfies_declared_keys() {
  let fks = ForeignKeys::standard();
  let derived = EntityDependencyOrder::derive_from_foreign_keys(&fks).expect("no cycles in the standard model");
  derived.validate(&fks).expect("derived order must validate");
  assert_eq!(derived.delete_order().len(), EntityKind::all().len());
}
