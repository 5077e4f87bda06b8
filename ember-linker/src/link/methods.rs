//! Dispatch-table construction: iftable, then vtable, then imt. The order
//! is load-bearing; the iftable decides whether inherited default-method
//! slots need updating, and the imt is filled from the finished iftable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use smallvec::SmallVec;

use ember_base::flags::{ClassAccessFlags, MethodAccessFlags};
use ember_base::id::hash_descriptor;

use crate::class::{ClassRef, IfTable, IfTableEntry, ImtEntry};
use crate::linker::ClassLinker;
use crate::method::{Method, MethodRef};
use crate::util::{self, NoSuspendScope};
use crate::LinkError;

/// Upper bound a vtable index must fit in.
const MAX_VTABLE_INDEX: usize = u16::MAX as usize;

pub(crate) fn link_methods(
    linker: &ClassLinker,
    class: &ClassRef,
    interfaces_override: Option<&[ClassRef]>,
) -> Result<(), LinkError> {
    util::allow_thread_suspension();
    // Vtable slots that must be redirected to a newer default implementation;
    // the replacement records are not in the class's virtual array until
    // interface linking runs.
    let mut default_translations: HashMap<usize, MethodRef> = HashMap::new();
    let iftable = setup_interface_lookup_table(linker, class, interfaces_override)?;
    link_virtual_methods(linker, class, &iftable, &mut default_translations)?;
    link_interface_methods(linker, class, iftable, &default_translations)
}

/// Flatten the interface inheritance hierarchy: the superclass's table is
/// the prefix, each directly implemented interface contributes its own
/// transitive closure, and every super-interface precedes its sub-interfaces.
pub(crate) fn setup_interface_lookup_table(
    linker: &ClassLinker,
    class: &ClassRef,
    interfaces_override: Option<&[ClassRef]>,
) -> Result<IfTable, LinkError> {
    let _ = linker;
    let super_class = class.super_class();
    let super_iftable = super_class.as_ref().map(|s| s.iftable());
    let super_ifcount = super_iftable.as_ref().map_or(0, |t| t.count());

    let direct: Vec<ClassRef> = match interfaces_override {
        Some(list) => list.to_vec(),
        None => class.direct_interfaces(),
    };

    if direct.is_empty() {
        let Some(super_iftable) = &super_iftable else {
            // Class implements no interfaces.
            return Ok(IfTable::default());
        };
        // Same interfaces as the parent; if they are all marker interfaces
        // the parent's table can be recycled wholesale.
        let has_non_marker = super_iftable.entries.iter().any(|e| !e.methods.is_empty());
        if !has_non_marker {
            return Ok((**super_iftable).clone());
        }
    }

    // Every class being implemented must actually be an interface.
    for interface in &direct {
        if !interface.is_interface() {
            return Err(LinkError::IncompatibleClassChange {
                message: format!(
                    "class {} implements non-interface class {}",
                    class.descriptor().pretty(),
                    interface.descriptor().pretty()
                ),
            });
        }
    }

    let mut iftable = IfTable::default();
    let mut seen: HashSet<usize> = HashSet::new();
    if let Some(super_iftable) = &super_iftable {
        for entry in &super_iftable.entries {
            debug_assert!(not_subinterface_of_any(&iftable, &entry.interface));
            seen.insert(Arc::as_ptr(&entry.interface) as usize);
            iftable.entries.push(IfTableEntry {
                interface: entry.interface.clone(),
                methods: Vec::new(),
            });
        }
    }
    debug_assert_eq!(iftable.count(), super_ifcount);

    let _no_suspend = NoSuspendScope::new("flattening interface hierarchy");
    for interface in direct {
        // If the interface was already seen, its super-interfaces are
        // necessarily present as well.
        if seen.contains(&(Arc::as_ptr(&interface) as usize)) {
            if cfg!(debug_assertions) {
                for entry in &interface.iftable().entries {
                    debug_assert!(
                        seen.contains(&(Arc::as_ptr(&entry.interface) as usize)),
                        "iftable missing {}, a superinterface of {}",
                        entry.interface.descriptor().pretty(),
                        interface.descriptor().pretty()
                    );
                }
            }
            continue;
        }
        for super_entry in &interface.iftable().entries {
            let key = Arc::as_ptr(&super_entry.interface) as usize;
            if seen.insert(key) {
                debug_assert!(not_subinterface_of_any(&iftable, &super_entry.interface));
                iftable.entries.push(IfTableEntry {
                    interface: super_entry.interface.clone(),
                    methods: Vec::new(),
                });
            }
        }
        debug_assert!(not_subinterface_of_any(&iftable, &interface));
        seen.insert(Arc::as_ptr(&interface) as usize);
        iftable.entries.push(IfTableEntry {
            interface,
            methods: Vec::new(),
        });
    }

    iftable.debug_verify_order();
    Ok(iftable)
}

/// No interface already in the table is a sub-interface of `candidate`.
fn not_subinterface_of_any(iftable: &IfTable, candidate: &ClassRef) -> bool {
    iftable
        .entries
        .iter()
        .all(|e| !candidate.is_assignable_from(&e.interface))
}

const INVALID_INDEX: u32 = u32::MAX;
const REMOVED_INDEX: u32 = u32::MAX - 1;

/// Linear-probe table from (name, signature) to the class's virtual-method
/// indices, sized 3n+1. Lives on the stack for the common small case.
struct LinkVirtualHashTable<'a> {
    virtuals: &'a [MethodRef],
    table: SmallVec<[u32; 64]>,
}
impl<'a> LinkVirtualHashTable<'a> {
    fn new(virtuals: &'a [MethodRef]) -> LinkVirtualHashTable<'a> {
        // + 1 so that a class contributing only new default methods still
        // gets a non-empty table.
        let size = virtuals.len() * 3 + 1;
        let mut table = SmallVec::with_capacity(size);
        table.resize(size, INVALID_INDEX);
        LinkVirtualHashTable { virtuals, table }
    }

    fn hash_of(method: &Method) -> usize {
        hash_descriptor(method.name()) as usize
    }

    fn add(&mut self, virtual_index: u32) {
        let method = &self.virtuals[virtual_index as usize];
        let mut index = Self::hash_of(method) % self.table.len();
        while self.table[index] != INVALID_INDEX {
            index = (index + 1) % self.table.len();
        }
        self.table[index] = virtual_index;
    }

    fn find_and_remove(&mut self, target: &Method) -> Option<u32> {
        let mut index = Self::hash_of(target) % self.table.len();
        loop {
            let value = self.table[index];
            // Linear probing makes continuous blocks; an invalid slot ends
            // the block and the search.
            if value == INVALID_INDEX {
                return None;
            }
            if value != REMOVED_INDEX {
                let candidate = &self.virtuals[value as usize];
                if target.has_same_name_and_signature(candidate) {
                    self.table[index] = REMOVED_INDEX;
                    return Some(value);
                }
            }
            index = (index + 1) % self.table.len();
        }
    }
}

/// Build the vtable: the superclass's table as a prefix, overridden slots
/// replaced, new methods appended. Interfaces get declaration-position
/// method indices instead.
pub(crate) fn link_virtual_methods(
    linker: &ClassLinker,
    class: &ClassRef,
    iftable: &IfTable,
    default_translations: &mut HashMap<usize, MethodRef>,
) -> Result<(), LinkError> {
    let _ = linker;
    let virtuals = class.virtual_methods();
    let num_virtual_methods = virtuals.len();

    if class.is_interface() {
        // No vtable; each method's index is its declaration position.
        if num_virtual_methods > MAX_VTABLE_INDEX {
            return Err(LinkError::ClassFormat {
                message: format!("too many methods on interface: {num_virtual_methods}"),
            });
        }
        let mut has_defaults = false;
        for (i, method) in virtuals.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            method.set_method_index(i as u32);
            if !method.access_flags().is_abstract() {
                method.add_access_flags(MethodAccessFlags::DEFAULT);
                has_defaults = true;
            }
        }
        // Record the default-method mark so initialization does not have to
        // rescan the virtual array.
        if has_defaults {
            class.add_access_flags(ClassAccessFlags::HAS_DEFAULT_METHODS);
        }
        return Ok(());
    }

    let Some(super_class) = class.super_class() else {
        // The root object class: a vtable of exactly its own methods.
        if num_virtual_methods > MAX_VTABLE_INDEX {
            return Err(LinkError::ClassFormat {
                message: format!("too many methods: {num_virtual_methods}"),
            });
        }
        for (i, method) in virtuals.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            method.set_method_index(i as u32);
        }
        class.data().vtable = Arc::new(virtuals);
        return Ok(());
    };

    let super_vtable = super_class.vtable();
    let super_vtable_length = super_vtable.len();

    // No new methods and no new interfaces: nothing can override, and no
    // fresher default can exist, so the super's table is reused as-is.
    if num_virtual_methods == 0 && super_class.iftable().count() == iftable.count() {
        class.data().vtable = super_vtable;
        return Ok(());
    }

    let mut vtable: Vec<MethodRef> = super_vtable.iter().cloned().collect();
    let mut hash_table = LinkVirtualHashTable::new(&virtuals);
    #[allow(clippy::cast_possible_truncation)]
    for i in 0..num_virtual_methods {
        hash_table.add(i as u32);
    }

    // See if any superclass slot is overridden by one of our methods.
    for j in 0..super_vtable_length {
        let super_method = vtable[j].clone();
        let Some(hash_index) = hash_table.find_and_remove(&super_method) else {
            if super_method.access_flags().is_default() {
                // Not directly overridden, but a more specific default
                // implementation may exist through our interfaces.
                let default_method =
                    find_default_method_implementation(&super_method, iftable)?;
                if let Some(default_method) = default_method {
                    let same_origin = match (
                        default_method.declaring_class(),
                        super_method.declaring_class(),
                    ) {
                        (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                        _ => false,
                    };
                    if !same_origin {
                        // Note that slot j needs updating once the default's
                        // copy exists in our virtual array.
                        tracing::debug!(
                            "method {} overridden by default {} in {}",
                            super_method.pretty(),
                            default_method.pretty(),
                            class.descriptor().pretty()
                        );
                        default_translations.insert(j, default_method);
                    }
                }
            }
            continue;
        };
        let virtual_method = virtuals[hash_index as usize].clone();
        let super_declaring = super_method
            .declaring_class()
            .ok_or(LinkError::MissingLoadedValue("super method declaring class"))?;
        if class.can_access_member(&super_declaring, super_method.access_flags()) {
            if super_method.access_flags().is_final() {
                return Err(LinkError::IncompatibleClassChange {
                    message: format!(
                        "method {} overrides final method in class {}",
                        virtual_method.pretty(),
                        super_declaring.descriptor().pretty()
                    ),
                });
            }
            vtable[j] = virtual_method.clone();
            #[allow(clippy::cast_possible_truncation)]
            virtual_method.set_method_index(j as u32);
        } else {
            tracing::warn!(
                "method {} would have incorrectly overridden the package-private method in {}",
                virtual_method.pretty(),
                super_declaring.descriptor().pretty()
            );
        }
    }

    // Add the non-overridden methods at the end.
    for method in &virtuals {
        let method_idx = method.method_index() as usize;
        if method_idx < super_vtable_length
            && Arc::ptr_eq(method, &vtable[method_idx])
        {
            continue;
        }
        #[allow(clippy::cast_possible_truncation)]
        method.set_method_index(vtable.len() as u32);
        vtable.push(method.clone());
    }

    if vtable.len() > MAX_VTABLE_INDEX {
        return Err(LinkError::ClassFormat {
            message: format!("too many methods defined on class: {}", vtable.len()),
        });
    }
    class.data().vtable = Arc::new(vtable);
    Ok(())
}

/// Walk the flattened iftable in reverse for the most specific non-abstract
/// method matching `target`. Later candidates must be masked (declared on a
/// super-interface of the chosen one); anything else is a conflict.
pub(crate) fn find_default_method_implementation(
    target: &Method,
    iftable: &IfTable,
) -> Result<Option<MethodRef>, LinkError> {
    let mut chosen: Option<(MethodRef, ClassRef)> = None;
    for entry in iftable.entries.iter().rev() {
        let iface = &entry.interface;
        for current in iface.virtual_methods() {
            if current.access_flags().is_abstract()
                || !target.has_same_name_and_signature(&current)
            {
                continue;
            }
            debug_assert!(
                current.access_flags().is_public(),
                "interface method is not public"
            );
            if let Some((chosen_method, chosen_iface)) = &chosen {
                // The chosen candidate masks this one only if this interface
                // is one of its super-interfaces.
                if iface.is_assignable_from(chosen_iface) {
                    break;
                }
                return Err(LinkError::IncompatibleClassChange {
                    message: format!(
                        "conflicting default method implementations: '{}' and '{}'",
                        current.pretty(),
                        chosen_method.pretty()
                    ),
                });
            }
            chosen = Some((current, iface.clone()));
            break;
        }
    }
    Ok(chosen.map(|(method, _)| method))
}

fn imt_index_of(method: &Method, imt_size: usize) -> usize {
    let raw = method
        .method_idx()
        .map_or_else(|| hash_descriptor(method.name()) as usize, |idx| idx.index());
    raw % imt_size
}

/// Place a method in an imt slot: empty takes it, a same-signature occupant
/// is replaced, anything else degrades the slot to a conflict.
fn set_imt_ref(slot: &mut ImtEntry, method: &MethodRef) {
    match slot {
        ImtEntry::Unimplemented => *slot = ImtEntry::Method(method.clone()),
        ImtEntry::Method(existing) => {
            if existing.has_same_name_and_signature(method) {
                *slot = ImtEntry::Method(method.clone());
            } else {
                *slot = ImtEntry::Conflict;
            }
        }
        ImtEntry::Conflict => {}
    }
}

/// Fill the iftable's method arrays, synthesize mirandas, promote selected
/// defaults into the class's own virtual array, and build the imt.
pub(crate) fn link_interface_methods(
    linker: &ClassLinker,
    class: &ClassRef,
    mut iftable: IfTable,
    default_translations: &HashMap<usize, MethodRef>,
) -> Result<(), LinkError> {
    if class.is_interface() {
        class.data().iftable = Arc::new(iftable);
        return Ok(());
    }
    let config = linker.config();
    let imt_size = config.imt_size;
    let super_class = class.super_class();
    let super_ifcount = super_class.as_ref().map_or(0, |s| s.iftable().count());
    let ifcount = iftable.count();

    let mut imt: Vec<ImtEntry> = vec![ImtEntry::Unimplemented; imt_size];
    if let Some(super_class) = &super_class {
        let super_imt = super_class.imt();
        if super_imt.len() == imt_size {
            imt.clone_from_slice(&super_imt);
        }
    }

    let mut vtable: Vec<MethodRef> = class.vtable().iter().cloned().collect();
    let virtuals = class.virtual_methods();

    // Working method arrays; every slot must be filled by the time they are
    // installed (mirandas guarantee it).
    let mut method_arrays: Vec<Vec<Option<MethodRef>>> = Vec::with_capacity(ifcount);
    for (i, entry) in iftable.entries.iter().enumerate() {
        let num_methods = entry.interface.virtual_methods().len();
        if num_methods == 0 {
            method_arrays.push(Vec::new());
            continue;
        }
        let from_super = if i < super_ifcount {
            super_class.as_ref().and_then(|s| {
                let super_iftable = s.iftable();
                let methods = &super_iftable.entries[i].methods;
                (!methods.is_empty()).then(|| methods.iter().cloned().map(Some).collect())
            })
        } else {
            None
        };
        method_arrays.push(from_super.unwrap_or_else(|| vec![None; num_methods]));
    }

    let _no_suspend = NoSuspendScope::new("copying method records for interface linking");
    let mut miranda_methods: Vec<MethodRef> = Vec::new();
    let mut default_methods: Vec<MethodRef> = Vec::new();

    for i in 0..ifcount {
        let interface = iftable.entries[i].interface.clone();
        let interface_methods = interface.virtual_methods();
        if interface_methods.is_empty() {
            continue;
        }
        let super_interface = i < super_ifcount && super_class.is_some();
        for (j, interface_method) in interface_methods.iter().enumerate() {
            let imt_idx = imt_index_of(interface_method, imt_size);
            // Favor the subclass: walk the input array backwards. For super
            // interfaces only this class's own methods can change anything.
            let input: &[MethodRef] = if super_interface { &virtuals } else { &vtable };
            let mut found_impl = false;
            let mut found_default_impl: Option<MethodRef> = None;
            for vtable_method in input.iter().rev() {
                if !interface_method.has_same_name_and_signature(vtable_method) {
                    continue;
                }
                let flags = vtable_method.access_flags();
                if !flags.is_abstract() && !flags.is_public() {
                    return Err(LinkError::IllegalAccess {
                        message: format!(
                            "method '{}' implementing interface method '{}' is not public",
                            vtable_method.pretty(),
                            interface_method.pretty()
                        ),
                    });
                }
                if flags.is_default() {
                    // A newer, better default might exist; remember this one
                    // so an identical re-selection does not copy again.
                    found_default_impl = Some(vtable_method.clone());
                    break;
                }
                found_impl = true;
                method_arrays[i][j] = Some(vtable_method.clone());
                set_imt_ref(&mut imt[imt_idx], vtable_method);
                break;
            }

            // Search for defaults when the class has no direct
            // implementation and the inherited slot (if any) is overridable.
            let inherited_overridable = !super_interface
                || method_arrays[i][j]
                    .as_ref()
                    .map_or(true, |m| m.is_overridable_by_default_method());
            if !found_impl && inherited_overridable {
                let current = find_default_method_implementation(interface_method, &iftable)?;
                if let Some(mut current) = current {
                    let same_as_found = found_default_impl.as_ref().map_or(false, |existing| {
                        match (current.declaring_class(), existing.declaring_class()) {
                            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                            _ => false,
                        }
                    });
                    if same_as_found {
                        // The same default we already own; no second copy.
                        current = found_default_impl.clone().expect("checked above");
                    } else if !default_methods
                        .iter()
                        .any(|m| Arc::ptr_eq(m, &current))
                    {
                        default_methods.push(current.clone());
                    }
                    method_arrays[i][j] = Some(current.clone());
                    set_imt_ref(&mut imt[imt_idx], &current);
                    found_impl = true;
                }
            }

            if !found_impl && !super_interface {
                // Nobody implements it: synthesize the abstract placeholder
                // that keeps every iftable slot owned by this class.
                let existing = miranda_methods
                    .iter()
                    .find(|m| interface_method.has_same_name_and_signature(m))
                    .cloned();
                let miranda = match existing {
                    Some(m) => m,
                    None => {
                        let m = Method::copy_of(
                            interface_method,
                            MethodAccessFlags::MIRANDA | MethodAccessFlags::COPIED,
                        );
                        debug_assert!(m.access_flags().is_abstract());
                        miranda_methods.push(m.clone());
                        m
                    }
                };
                method_arrays[i][j] = Some(miranda);
            }
        }
    }

    if !miranda_methods.is_empty() || !default_methods.is_empty() {
        // Grow the virtual-method array. Records already owned keep their
        // identity; promoted defaults are copied and every holder of the
        // original is rewritten through the translation map.
        let mut move_table: HashMap<usize, MethodRef> = HashMap::new();
        let mut new_virtuals = virtuals.clone();
        for miranda in &miranda_methods {
            miranda.set_declaring_class(class);
            new_virtuals.push(miranda.clone());
        }
        for default in &default_methods {
            let copy = Method::copy_of(
                default,
                MethodAccessFlags::DEFAULT | MethodAccessFlags::COPIED,
            );
            copy.set_declaring_class(class);
            move_table.insert(Arc::as_ptr(default) as usize, copy.clone());
            new_virtuals.push(copy);
        }

        let old_vtable_count = vtable.len();
        for method in new_virtuals.iter().skip(virtuals.len()) {
            #[allow(clippy::cast_possible_truncation)]
            method.set_method_index(vtable.len() as u32);
            vtable.push(method.clone());
        }
        if vtable.len() > MAX_VTABLE_INDEX {
            return Err(LinkError::ClassFormat {
                message: format!("too many methods defined on class: {}", vtable.len()),
            });
        }

        // Update old vtable slots: first apply the recorded default
        // translations, then chase any promoted copy.
        for (i, slot) in vtable.iter_mut().enumerate().take(old_vtable_count) {
            let mut translated = slot.clone();
            let mut found_translation = false;
            if let Some(replacement) = default_translations.get(&i) {
                translated = replacement.clone();
                found_translation = true;
            }
            if let Some(moved) = move_table.get(&(Arc::as_ptr(&translated) as usize)) {
                *slot = moved.clone();
            } else {
                // A translation target is always one of the freshly promoted
                // copies; anything else means the bookkeeping above is wrong.
                debug_assert!(
                    !found_translation,
                    "recorded translation was not applied for {}",
                    translated.pretty()
                );
            }
        }

        // Chase stale records out of the iftable arrays and the imt.
        for array in &mut method_arrays {
            for slot in array.iter_mut().flatten() {
                if let Some(moved) = move_table.get(&(Arc::as_ptr(slot) as usize)) {
                    *slot = moved.clone();
                }
            }
        }
        for slot in &mut imt {
            if let ImtEntry::Method(m) = slot {
                if let Some(moved) = move_table.get(&(Arc::as_ptr(m) as usize)) {
                    *m = moved.clone();
                }
            }
        }

        let mut data = class.data();
        data.virtual_methods = new_virtuals;
        data.vtable = Arc::new(vtable);
    } else {
        class.data().vtable = Arc::new(vtable);
    }

    // Install the finished method arrays.
    for (entry, array) in iftable.entries.iter_mut().zip(method_arrays) {
        debug_assert!(array.iter().all(Option::is_some));
        entry.methods = array.into_iter().flatten().collect();
    }

    let mut data = class.data();
    data.iftable = Arc::new(iftable);
    data.imt = Arc::new(imt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRef;
    use crate::linker::LinkerConfig;
    use crate::testing;
    use ember_base::container::{DexFile, DexFileBuilder};

    fn public() -> MethodAccessFlags {
        MethodAccessFlags::PUBLIC
    }

    fn abstract_public() -> MethodAccessFlags {
        MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT
    }

    fn iface_flags() -> ClassAccessFlags {
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
    }

    fn vtable_slot(class: &ClassRef, name: &str) -> MethodRef {
        class
            .vtable()
            .iter()
            .find(|m| &**m.name() == name)
            .unwrap_or_else(|| panic!("no vtable slot {name}"))
            .clone()
    }

    /// Every vtable entry belongs to the class or one of its supers; every
    /// iftable slot belongs to the class itself.
    fn assert_table_ownership(class: &ClassRef) {
        for method in class.vtable().iter() {
            let declaring = method.declaring_class().expect("declaring class");
            assert!(
                declaring.is_assignable_from(class),
                "vtable entry {} declared outside the hierarchy of {}",
                method.pretty(),
                class.descriptor().pretty()
            );
        }
        let iftable = class.iftable();
        for entry in &iftable.entries {
            for method in &entry.methods {
                let declaring = method.declaring_class().expect("declaring class");
                assert!(
                    Arc::ptr_eq(&declaring, class),
                    "iftable slot {} not owned by {}",
                    method.pretty(),
                    class.descriptor().pretty()
                );
            }
        }
        iftable.debug_verify_order();
    }

    #[test]
    fn override_replaces_super_slot() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("override.dex");
        b.class("Ltest/A;")
            .super_class("Ljava/lang/Object;")
            .virtual_method("f", "V", &[], public())
            .finish();
        b.class("Ltest/B;")
            .super_class("Ltest/A;")
            .virtual_method("f", "V", &[], public())
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let a = testing::find(&linker, "Ltest/A;");
        let b_class = testing::find(&linker, "Ltest/B;");
        assert_eq!(b_class.vtable().len(), a.vtable().len());
        let slot = vtable_slot(&b_class, "f");
        assert!(Arc::ptr_eq(&slot.declaring_class().unwrap(), &b_class));
        // The replacing method inherits the replaced slot's index.
        let a_slot = vtable_slot(&a, "f");
        assert_eq!(slot.method_index(), a_slot.method_index());
        assert_table_ownership(&b_class);
    }

    #[test]
    fn overriding_final_method_is_rejected() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("final.dex");
        b.class("Ltest/A;")
            .super_class("Ljava/lang/Object;")
            .virtual_method("f", "V", &[], public() | MethodAccessFlags::FINAL)
            .finish();
        b.class("Ltest/B;")
            .super_class("Ltest/A;")
            .virtual_method("f", "V", &[], public())
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let err = linker
            .find_system_class("Ltest/B;")
            .expect_err("final override must fail");
        match err {
            LinkError::IncompatibleClassChange { message } => {
                assert!(message.contains("final"), "message was {message:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn diamond_container(related: bool) -> std::sync::Arc<DexFile> {
        let mut b = DexFileBuilder::new("diamond.dex");
        b.class("Ltest/I1;")
            .access_flags(iface_flags())
            .super_class("Ljava/lang/Object;")
            .virtual_method("g", "V", &[], public())
            .finish();
        let mut i2 = b
            .class("Ltest/I2;")
            .access_flags(iface_flags())
            .super_class("Ljava/lang/Object;");
        if related {
            i2 = i2.interface("Ltest/I1;");
        }
        i2.virtual_method("g", "V", &[], public()).finish();
        let mut k = b.class("Ltest/K;").super_class("Ljava/lang/Object;");
        if !related {
            k = k.interface("Ltest/I1;");
        }
        k.interface("Ltest/I2;").finish();
        b.build()
    }

    #[test]
    fn unrelated_default_methods_conflict() {
        let linker = testing::boot_linker();
        linker.append_to_boot_class_path(&diamond_container(false));
        let err = linker
            .find_system_class("Ltest/K;")
            .expect_err("conflicting defaults must fail");
        match err {
            LinkError::IncompatibleClassChange { message } => {
                assert!(
                    message.to_lowercase().contains("conflicting default"),
                    "message was {message:?}"
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn related_default_methods_pick_most_specific() {
        let linker = testing::boot_linker();
        linker.append_to_boot_class_path(&diamond_container(true));
        let i2 = testing::find(&linker, "Ltest/I2;");
        let k = testing::find(&linker, "Ltest/K;");

        // The promoted copy is owned by K, flagged as a copied default, and
        // traces back to I2's container record.
        let slot = vtable_slot(&k, "g");
        assert!(Arc::ptr_eq(&slot.declaring_class().unwrap(), &k));
        assert!(slot.access_flags().is_default());
        assert!(slot.access_flags().contains(MethodAccessFlags::COPIED));
        let i2_g = i2
            .virtual_methods()
            .first()
            .cloned()
            .expect("I2 declares g");
        assert_eq!(slot.method_idx(), i2_g.method_idx());

        // Both interface slots for g route to the same copy.
        let iftable = k.iftable();
        let mut g_slots = Vec::new();
        for entry in &iftable.entries {
            for (j, m) in entry.interface.virtual_methods().iter().enumerate() {
                if &**m.name() == "g" {
                    g_slots.push(entry.methods[j].clone());
                }
            }
        }
        assert_eq!(g_slots.len(), 2);
        assert!(Arc::ptr_eq(&g_slots[0], &g_slots[1]));
        assert_table_ownership(&k);
    }

    #[test]
    fn super_interface_precedes_sub_interface() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("order.dex");
        b.class("Ltest/J;")
            .access_flags(iface_flags())
            .super_class("Ljava/lang/Object;")
            .finish();
        b.class("Ltest/I;")
            .access_flags(iface_flags())
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/J;")
            .finish();
        b.class("Ltest/K;")
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/I;")
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let j = testing::find(&linker, "Ltest/J;");
        let i = testing::find(&linker, "Ltest/I;");
        let k = testing::find(&linker, "Ltest/K;");
        let iftable = k.iftable();
        let pos = |class: &ClassRef| {
            iftable
                .entries
                .iter()
                .position(|e| Arc::ptr_eq(&e.interface, class))
                .expect("interface present")
        };
        assert!(pos(&j) < pos(&i));
        iftable.debug_verify_order();
    }

    #[test]
    fn missing_implementation_synthesizes_miranda() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("miranda.dex");
        b.class("Ltest/I;")
            .access_flags(iface_flags())
            .super_class("Ljava/lang/Object;")
            .virtual_method("m", "I", &[], abstract_public())
            .finish();
        b.class("Ltest/K;")
            .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/I;")
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let k = testing::find(&linker, "Ltest/K;");
        let miranda = k
            .virtual_methods()
            .into_iter()
            .find(|m| &**m.name() == "m")
            .expect("miranda appended to the virtual array");
        assert!(miranda.access_flags().is_miranda());
        assert!(miranda.access_flags().is_abstract());
        assert!(Arc::ptr_eq(&miranda.declaring_class().unwrap(), &k));
        let slot = vtable_slot(&k, "m");
        assert!(Arc::ptr_eq(&slot, &miranda));
        assert_table_ownership(&k);
    }

    #[test]
    fn imt_conflicts_route_to_slow_path() {
        let config = LinkerConfig {
            imt_size: 1,
            ..LinkerConfig::default()
        };
        let linker = testing::boot_linker_with(
            config,
            Box::new(crate::services::AlwaysVerified),
            Box::new(crate::services::NoopClinitRunner),
        );
        let mut b = DexFileBuilder::new("imt.dex");
        b.class("Ltest/I;")
            .access_flags(iface_flags())
            .super_class("Ljava/lang/Object;")
            .virtual_method("one", "V", &[], abstract_public())
            .virtual_method("two", "V", &[], abstract_public())
            .finish();
        b.class("Ltest/K;")
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/I;")
            .virtual_method("one", "V", &[], public())
            .virtual_method("two", "V", &[], public())
            .finish();
        b.class("Ltest/Single;")
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/I;")
            .virtual_method("one", "V", &[], public())
            .virtual_method("two", "V", &[], public())
            .finish();
        linker.append_to_boot_class_path(&b.build());

        // Two distinct signatures hash into the single slot: conflict.
        let k = testing::find(&linker, "Ltest/K;");
        assert!(matches!(k.imt()[0], ImtEntry::Conflict));
    }

    #[test]
    fn relinking_is_deterministic() {
        let shape = |linker: &crate::linker::ClassLinker| -> Vec<(String, u32)> {
            let k = testing::find(linker, "Ltest/K;");
            k.vtable()
                .iter()
                .map(|m| (format!("{}{}", m.name(), m.signature()), m.method_index()))
                .collect()
        };
        let first = {
            let linker = testing::boot_linker();
            linker.append_to_boot_class_path(&diamond_container(true));
            shape(&linker)
        };
        let second = {
            let linker = testing::boot_linker();
            linker.append_to_boot_class_path(&diamond_container(true));
            shape(&linker)
        };
        assert_eq!(first, second);
    }

    #[test]
    fn implementing_non_interface_is_rejected() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("noniface.dex");
        b.class("Ltest/NotIface;")
            .super_class("Ljava/lang/Object;")
            .finish();
        b.class("Ltest/K;")
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/NotIface;")
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let err = linker
            .find_system_class("Ltest/K;")
            .expect_err("implementing a class must fail");
        assert!(matches!(err, LinkError::IncompatibleClassChange { .. }));
    }
}
