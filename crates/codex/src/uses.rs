//
// uses.rs
//
// Find-uses over a store set
//

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::element::Definition;
use crate::store::Store;
use crate::store_set::StoreSet;

/// Use offsets of `def` grouped by the store containing them.
///
/// Every store in the set is consulted, in set order; offsets within a store
/// are ascending. The definition's own declaration is not a use.
pub fn find_uses(set: &StoreSet, def: &Definition) -> IndexMap<Store, BTreeSet<usize>> {
    let target = def.to_ref();
    let mut found: IndexMap<Store, BTreeSet<usize>> = IndexMap::new();

    for symbols in set.iter() {
        for (store, u) in symbols.uses(&target) {
            found.entry(store).or_default().insert(u.offset);
        }
    }

    log::trace!(
        "Found {} uses of {} in {} stores",
        found.values().map(BTreeSet::len).sum::<usize>(),
        target,
        found.len()
    );
    found
}
