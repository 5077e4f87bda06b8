//! Field layout: pack a class's fields (instance and static separately)
//! into buckets by width, references first, reusing alignment gaps from a
//! max-heap keyed by gap size.

use std::collections::{BinaryHeap, VecDeque};

use crate::class::{ClassRef, REFERENCE_OFFSETS_OVERFLOW};
use crate::field::FieldRef;
use crate::linker::ClassLinker;
use crate::util::{self, NoSuspendScope};
use crate::LinkError;

/// An unused hole left behind by an alignment round-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldGap {
    start: u32,
    /// 1, 2, or 4 bytes; holes are pre-split into aligned power-of-two runs.
    size: u32,
}
impl Ord for FieldGap {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Largest size first out of the heap; ties prefer the lowest offset.
        self.size
            .cmp(&other.size)
            .then_with(|| other.start.cmp(&self.start))
    }
}
impl PartialOrd for FieldGap {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

type FieldGaps = BinaryHeap<FieldGap>;

/// Record `[gap_start, gap_end)` as one or more aligned power-of-two gaps.
fn add_field_gap(gap_start: u32, gap_end: u32, gaps: &mut FieldGaps) {
    let mut current = gap_start;
    while current != gap_end {
        let remaining = gap_end - current;
        if remaining >= 4 && current % 4 == 0 {
            gaps.push(FieldGap {
                start: current,
                size: 4,
            });
            current += 4;
        } else if remaining >= 2 && current % 2 == 0 {
            gaps.push(FieldGap {
                start: current,
                size: 2,
            });
            current += 2;
        } else {
            gaps.push(FieldGap {
                start: current,
                size: 1,
            });
            current += 1;
        }
        debug_assert!(current <= gap_end, "overran gap");
    }
}

/// Width bucket for sorting: references, then 8, 4, 2, 1-byte primitives.
fn bucket_rank(field: &FieldRef) -> u32 {
    if field.is_reference() {
        return 0;
    }
    match field.descriptor().width(8) {
        8 => 1,
        4 => 2,
        2 => 3,
        _ => 4,
    }
}

fn field_width(field: &FieldRef, reference_width: usize) -> usize {
    field.descriptor().width(reference_width)
}

/// Shuffle `n`-byte fields forward, making use of gaps whenever possible.
/// Gaps come out of a max-heap, largest first, so a big hole is never wasted
/// on a small field while a bigger one still waits.
fn shuffle_forward(
    n: usize,
    field_offset: &mut u32,
    queue: &mut VecDeque<FieldRef>,
    gaps: &mut FieldGaps,
    reference_width: usize,
) {
    debug_assert!(n.is_power_of_two());
    #[allow(clippy::cast_possible_truncation)]
    let n32 = n as u32;
    while let Some(field) = queue.front() {
        let width = field_width(field, reference_width);
        if width < n {
            break;
        }
        debug_assert!(!field.is_reference());
        if *field_offset % n32 != 0 {
            let old_offset = *field_offset;
            #[allow(clippy::cast_possible_truncation)]
            let new_offset = util::round_up(old_offset as usize, n) as u32;
            *field_offset = new_offset;
            add_field_gap(old_offset, new_offset, gaps);
        }
        let field = queue.pop_front().expect("front checked above");
        if gaps.peek().map_or(false, |gap| gap.size >= n32) {
            let gap = gaps.pop().expect("peeked above");
            debug_assert_eq!(gap.start % n32, 0);
            field.set_offset(gap.start);
            if gap.size > n32 {
                add_field_gap(gap.start + n32, gap.start + gap.size, gaps);
            }
        } else {
            debug_assert_eq!(*field_offset % n32, 0);
            field.set_offset(*field_offset);
            *field_offset += n32;
        }
    }
}

/// Lay out one side of a class's fields. Instance fields start at the
/// superclass's object size; static fields start past the class record's
/// embedded tables.
pub(crate) fn link_fields(
    linker: &ClassLinker,
    class: &ClassRef,
    is_static: bool,
) -> Result<(), LinkError> {
    util::allow_thread_suspension();
    let config = linker.config();
    let reference_width = config.pointer_size;

    let (fields, mut field_offset, variable_size) = {
        let data = class.data();
        let fields = if is_static {
            data.static_fields.clone()
        } else {
            data.instance_fields.clone()
        };
        let start = if is_static {
            first_static_field_offset(linker, &data, class)
        } else if let Some(super_class) = &data.super_class {
            debug_assert!(
                super_class.is_resolved(),
                "layout of {} before its super resolved",
                class.descriptor().pretty()
            );
            super_class.object_size()
        } else {
            0
        };
        #[allow(clippy::cast_possible_truncation)]
        let start = start as u32;
        (fields, start, data.variable_size)
    };

    // A stable order keyed on the container's numeric field index, so adding
    // fields upstream minimally disturbs existing offsets.
    let mut grouped_and_sorted: Vec<FieldRef> = fields.clone();
    grouped_and_sorted.sort_by(|a, b| {
        bucket_rank(a)
            .cmp(&bucket_rank(b))
            .then_with(|| a.field_idx().cmp(&b.field_idx()))
    });
    let mut queue: VecDeque<FieldRef> = grouped_and_sorted.into();

    let _no_suspend = NoSuspendScope::new("field offsets in flight during layout");

    // References occupy a contiguous prefix, aligned to reference width.
    let mut num_reference_fields = 0usize;
    let mut gaps = FieldGaps::new();
    #[allow(clippy::cast_possible_truncation)]
    let ref_width32 = reference_width as u32;
    while let Some(field) = queue.front() {
        if !field.is_reference() {
            // Past the last reference; move on to the primitive phases.
            break;
        }
        if field_offset % ref_width32 != 0 {
            let old_offset = field_offset;
            field_offset = util::round_up(field_offset as usize, reference_width) as u32;
            add_field_gap(old_offset, field_offset, &mut gaps);
        }
        let field = queue.pop_front().expect("front checked above");
        num_reference_fields += 1;
        field.set_offset(field_offset);
        field_offset += ref_width32;
    }

    // Largest-first so gap fills never strand a big hole.
    shuffle_forward(8, &mut field_offset, &mut queue, &mut gaps, reference_width);
    shuffle_forward(4, &mut field_offset, &mut queue, &mut gaps, reference_width);
    shuffle_forward(2, &mut field_offset, &mut queue, &mut gaps, reference_width);
    shuffle_forward(1, &mut field_offset, &mut queue, &mut gaps, reference_width);
    debug_assert!(queue.is_empty(), "missed {} fields", queue.len());

    // The scanner must not chase Reference.referent; it is the last declared
    // field, and its slot is dropped from the reference count.
    if !is_static && class.descriptor().as_str() == "Ljava/lang/ref/Reference;" {
        debug_assert_eq!(num_reference_fields, fields.len());
        debug_assert_eq!(
            fields.last().map(|f| &**f.name()),
            Some("referent"),
            "Reference.referent must be the last field"
        );
        num_reference_fields -= 1;
    }

    let size = field_offset as usize;
    {
        let mut data = class.data();
        if is_static {
            data.num_reference_static_fields = num_reference_fields;
            data.class_size = size;
        } else {
            data.num_reference_instance_fields = num_reference_fields;
            if !variable_size {
                let previous = data.object_size;
                let padded = util::round_up(size, crate::class::OBJECT_ALIGNMENT);
                debug_assert!(
                    previous == 0 || previous == padded,
                    "{} had object size {previous}, layout computed {padded}",
                    class.descriptor().pretty()
                );
                data.object_size = padded;
            }
        }
    }

    if cfg!(debug_assertions) {
        verify_packing(class, &fields, is_static, num_reference_fields, reference_width);
    }
    Ok(())
}

/// Where the static field area of this class record begins. Works from the
/// caller's guard; must not take the class monitor again.
pub(crate) fn first_static_field_offset(
    linker: &ClassLinker,
    data: &crate::class::ClassData,
    class: &ClassRef,
) -> usize {
    let config = linker.config();
    let instantiable = if class.is_primitive() {
        false
    } else if class.is_array() {
        true
    } else {
        !data.access_flags.is_interface() && !data.access_flags.is_abstract()
    };
    let embed = config.embed_tables && instantiable;
    crate::class::Class::size_without_statics(
        embed,
        if embed { config.imt_size } else { 0 },
        if embed {
            data.vtable.len().min(config.embedded_vtable_limit)
        } else {
            0
        },
        config.pointer_size,
    )
}

/// Post-layout packing check: references form a prefix, every field is
/// naturally aligned, nothing overlaps the reference region but sub-width
/// gap fills.
fn verify_packing(
    class: &ClassRef,
    fields: &[FieldRef],
    is_static: bool,
    num_reference_fields: usize,
    reference_width: usize,
) {
    let mut ref_offsets: Vec<u32> = fields
        .iter()
        .filter(|f| f.is_reference())
        .map(|f| f.offset())
        .collect();
    ref_offsets.sort_unstable();
    // The reference region is contiguous (modulo the dropped referent slot).
    let expected_contiguous = num_reference_fields.min(ref_offsets.len());
    for pair in ref_offsets[..expected_contiguous].windows(2) {
        #[allow(clippy::cast_possible_truncation)]
        let width = reference_width as u32;
        debug_assert_eq!(
            pair[0] + width,
            pair[1],
            "non-contiguous references in {} ({is_static})",
            class.descriptor().pretty()
        );
    }
    for field in fields {
        let width = field_width(field, reference_width);
        #[allow(clippy::cast_possible_truncation)]
        let width32 = width as u32;
        debug_assert_eq!(
            field.offset() % width32,
            0,
            "misaligned field {} in {}",
            field.name(),
            class.descriptor().pretty()
        );
    }
}

/// Compute the 32-bit reference bitmap for instance scanning. Bit `k` covers
/// the `k`-th reference-width slot; overflow hands the scanner the sentinel
/// that sends it up the class hierarchy.
pub(crate) fn create_reference_instance_offsets(linker: &ClassLinker, class: &ClassRef) {
    let reference_width = linker.config().pointer_size;
    let mut reference_offsets: u32 = 0;
    if let Some(super_class) = class.super_class() {
        reference_offsets = super_class.reference_offsets();
    }
    if reference_offsets != REFERENCE_OFFSETS_OVERFLOW {
        let data = class.data();
        let count = data.num_reference_instance_fields;
        for field in data.instance_fields.iter().filter(|f| f.is_reference()).take(count) {
            let slot = field.offset() as usize / reference_width;
            if slot >= 32 {
                reference_offsets = REFERENCE_OFFSETS_OVERFLOW;
                break;
            }
            reference_offsets |= 1 << slot;
        }
    }
    class.data().reference_offsets = reference_offsets;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(start: u32, size: u32) -> FieldGap {
        FieldGap { start, size }
    }

    #[test]
    fn gaps_pop_largest_first() {
        let mut gaps = FieldGaps::new();
        add_field_gap(1, 8, &mut gaps);
        // [1,8) splits into 1@1, 2@2, 4@4.
        assert_eq!(gaps.pop(), Some(gap(4, 4)));
        assert_eq!(gaps.pop(), Some(gap(2, 2)));
        assert_eq!(gaps.pop(), Some(gap(1, 1)));
        assert_eq!(gaps.pop(), None);
    }

    #[test]
    fn equal_size_gaps_prefer_lower_offsets() {
        let mut gaps = FieldGaps::new();
        add_field_gap(8, 12, &mut gaps);
        add_field_gap(4, 8, &mut gaps);
        assert_eq!(gaps.pop(), Some(gap(4, 4)));
        assert_eq!(gaps.pop(), Some(gap(8, 4)));
    }

    use crate::class::{Class, ClassRef, REFERENCE_OFFSETS_OVERFLOW};
    use crate::linker::LinkerConfig;
    use crate::testing;
    use ember_base::container::DexFileBuilder;
    use ember_base::flags::FieldAccessFlags;

    fn instance_offset(class: &ClassRef, name: &str) -> u32 {
        class
            .instance_fields()
            .iter()
            .find(|f| &**f.name() == name)
            .unwrap_or_else(|| panic!("no field {name}"))
            .offset()
    }

    fn static_offset(class: &ClassRef, name: &str) -> u32 {
        class
            .static_fields()
            .iter()
            .find(|f| &**f.name() == name)
            .unwrap_or_else(|| panic!("no field {name}"))
            .offset()
    }

    #[test]
    fn linear_hierarchy_layout() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("layout.dex");
        b.class("Ltest/A;")
            .super_class("Ljava/lang/Object;")
            .instance_field("x", "Ljava/lang/Object;", FieldAccessFlags::PUBLIC)
            .instance_field("i", "I", FieldAccessFlags::PUBLIC)
            .instance_field("j", "J", FieldAccessFlags::PUBLIC)
            .finish();
        b.class("Ltest/B;")
            .super_class("Ltest/A;")
            .instance_field("b", "B", FieldAccessFlags::PUBLIC)
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let a = testing::find(&linker, "Ltest/A;");
        assert_eq!(instance_offset(&a, "x"), 0);
        assert_eq!(instance_offset(&a, "j"), 8);
        assert_eq!(instance_offset(&a, "i"), 16);
        assert_eq!(a.object_size(), 24);

        let b_class = testing::find(&linker, "Ltest/B;");
        assert_eq!(instance_offset(&b_class, "x"), 0);
        assert_eq!(instance_offset(&b_class, "j"), 8);
        assert_eq!(instance_offset(&b_class, "i"), 16);
        assert_eq!(instance_offset(&b_class, "b"), 24);
        // Padded up to object alignment.
        assert_eq!(b_class.object_size(), 32);
    }

    #[test]
    fn static_layout_reuses_alignment_gaps() {
        // 4-byte references put the first static offset off 8-byte
        // alignment paths and exercise the gap heap.
        let config = LinkerConfig {
            pointer_size: 4,
            ..LinkerConfig::default()
        };
        let linker = testing::boot_linker_with(
            config,
            Box::new(crate::services::AlwaysVerified),
            Box::new(crate::services::NoopClinitRunner),
        );
        let mut b = DexFileBuilder::new("statics.dex");
        b.class("Ltest/S;")
            .super_class("Ljava/lang/Object;")
            .static_field("r", "Ljava/lang/Object;", FieldAccessFlags::PUBLIC)
            .static_field("j", "J", FieldAccessFlags::PUBLIC)
            .static_field("i", "I", FieldAccessFlags::PUBLIC)
            .static_field("s", "S", FieldAccessFlags::PUBLIC)
            .static_field("b", "B", FieldAccessFlags::PUBLIC)
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let s = testing::find(&linker, "Ltest/S;");
        // Object contributes five virtual methods; S adds none.
        let start = Class::size_without_statics(true, 64, 5, 4);
        assert_eq!(static_offset(&s, "r") as usize, start);
        if (start + 4) % 8 == 0 {
            // Reference end already 8-aligned; no gap to reuse.
            assert_eq!(static_offset(&s, "j") as usize, start + 4);
            assert_eq!(static_offset(&s, "i") as usize, start + 12);
        } else {
            // The long rounds up, leaving a 4-byte gap the int reclaims.
            assert_eq!(static_offset(&s, "j") as usize, start + 8);
            assert_eq!(static_offset(&s, "i") as usize, start + 4);
        }
        // Every field naturally aligned regardless.
        assert_eq!(static_offset(&s, "j") % 8, 0);
        assert_eq!(static_offset(&s, "i") % 4, 0);
        assert_eq!(static_offset(&s, "s") % 2, 0);
    }

    #[test]
    fn reference_bitmap_tracks_reference_slots() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("bitmap.dex");
        b.class("Ltest/R;")
            .super_class("Ljava/lang/Object;")
            .instance_field("a", "Ljava/lang/Object;", FieldAccessFlags::PUBLIC)
            .instance_field("n", "I", FieldAccessFlags::PUBLIC)
            .instance_field("b", "Ljava/lang/String;", FieldAccessFlags::PUBLIC)
            .finish();
        let mut big = b.class("Ltest/Big;").super_class("Ljava/lang/Object;");
        for i in 0..33 {
            let name = format!("r{i}");
            big = big.instance_field(&name, "Ljava/lang/Object;", FieldAccessFlags::PUBLIC);
        }
        big.finish();
        linker.append_to_boot_class_path(&b.build());

        let r = testing::find(&linker, "Ltest/R;");
        // Two reference slots at the front: bits 0 and 1.
        assert_eq!(r.reference_offsets(), 0b11);

        // 33 reference slots cannot fit the bitmap; the scanner walks the
        // hierarchy instead.
        let big = testing::find(&linker, "Ltest/Big;");
        assert_eq!(big.reference_offsets(), REFERENCE_OFFSETS_OVERFLOW);

        // The root object class keeps an empty bitmap.
        let object = linker.object_class();
        assert_eq!(object.reference_offsets(), 0);
    }

    #[test]
    fn reference_referent_is_not_scanned() {
        let linker = testing::boot_linker();
        let reference = testing::find(&linker, "Ljava/lang/ref/Reference;");
        let data_fields = reference.instance_fields();
        assert_eq!(data_fields.len(), 4);
        assert_eq!(&**data_fields.last().unwrap().name(), "referent");
        // Four reference fields, but the referent is dropped from the count.
        assert_eq!(reference.data().num_reference_instance_fields, 3);
        assert_eq!(reference.object_size(), 32);
    }
}
