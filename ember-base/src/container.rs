//! In-memory model of a source container (a compiled-class container in the
//! dex shape): parallel id tables for strings, types, prototypes, fields and
//! methods, plus the class-definition records that reference them.
//!
//! Parsing the on-disk binary format is out of scope; containers are built
//! programmatically (see [`DexFileBuilder`]) by whatever owns the bytes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::{Descriptor, MethodProto};
use crate::flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

macro_rules! container_index {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
        impl $name {
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

container_index!(
    /// Index into the string id table.
    StringIdx
);
container_index!(
    /// Index into the type id table.
    TypeIdx
);
container_index!(
    /// Index into the prototype id table.
    ProtoIdx
);
container_index!(
    /// Index into the field id table.
    FieldIdx
);
container_index!(
    /// Index into the method id table.
    MethodIdx
);
container_index!(
    /// Index into the class-definition table.
    ClassDefIdx
);

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContainerIndexError {
    BadStringIdx(StringIdx),
    BadTypeIdx(TypeIdx),
    BadProtoIdx(ProtoIdx),
    BadFieldIdx(FieldIdx),
    BadMethodIdx(MethodIdx),
    BadClassDefIdx(ClassDefIdx),
}

#[derive(Debug, Clone)]
pub struct TypeItem {
    pub string: StringIdx,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone)]
pub struct ProtoDef {
    pub return_type: TypeIdx,
    pub params: Vec<TypeIdx>,
}

/// A field id: `(declaring type, field type, name)`.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub class: TypeIdx,
    pub ty: TypeIdx,
    pub name: StringIdx,
}

/// A method id: `(declaring type, prototype, name)`.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub class: TypeIdx,
    pub proto: ProtoIdx,
    pub name: StringIdx,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassFieldEntry {
    pub field: FieldIdx,
    pub access_flags: FieldAccessFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassMethodEntry {
    pub method: MethodIdx,
    pub access_flags: MethodAccessFlags,
}

/// One value of the encoded static-value stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(StringIdx),
    Type(TypeIdx),
    Null,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub class_type: TypeIdx,
    pub access_flags: ClassAccessFlags,
    pub superclass: Option<TypeIdx>,
    /// Directly implemented interfaces, in declaration order.
    pub interfaces: Vec<TypeIdx>,
    /// Declaration order; the numeric field index is the position here.
    pub static_fields: Vec<ClassFieldEntry>,
    pub instance_fields: Vec<ClassFieldEntry>,
    pub direct_methods: Vec<ClassMethodEntry>,
    pub virtual_methods: Vec<ClassMethodEntry>,
    /// Prefix-assigned to `static_fields` in order; may be shorter.
    pub static_values: Vec<EncodedValue>,
}

#[derive(Debug)]
pub struct DexFile {
    location: Box<str>,
    strings: Vec<Arc<str>>,
    types: Vec<TypeItem>,
    protos: Vec<ProtoDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    class_defs: Vec<ClassDef>,
}
impl DexFile {
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn num_class_defs(&self) -> usize {
        self.class_defs.len()
    }

    pub fn string(&self, idx: StringIdx) -> Result<&Arc<str>, ContainerIndexError> {
        self.strings
            .get(idx.index())
            .ok_or(ContainerIndexError::BadStringIdx(idx))
    }

    pub fn type_item(&self, idx: TypeIdx) -> Result<&TypeItem, ContainerIndexError> {
        self.types
            .get(idx.index())
            .ok_or(ContainerIndexError::BadTypeIdx(idx))
    }

    pub fn type_descriptor(&self, idx: TypeIdx) -> Result<&Descriptor, ContainerIndexError> {
        Ok(&self.type_item(idx)?.descriptor)
    }

    pub fn proto(&self, idx: ProtoIdx) -> Result<&ProtoDef, ContainerIndexError> {
        self.protos
            .get(idx.index())
            .ok_or(ContainerIndexError::BadProtoIdx(idx))
    }

    pub fn field(&self, idx: FieldIdx) -> Result<&FieldDef, ContainerIndexError> {
        self.fields
            .get(idx.index())
            .ok_or(ContainerIndexError::BadFieldIdx(idx))
    }

    pub fn method(&self, idx: MethodIdx) -> Result<&MethodDef, ContainerIndexError> {
        self.methods
            .get(idx.index())
            .ok_or(ContainerIndexError::BadMethodIdx(idx))
    }

    pub fn class_def(&self, idx: ClassDefIdx) -> Result<&ClassDef, ContainerIndexError> {
        self.class_defs
            .get(idx.index())
            .ok_or(ContainerIndexError::BadClassDefIdx(idx))
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn class_defs_iter(&self) -> impl Iterator<Item = (ClassDefIdx, &ClassDef)> {
        // Containers hold well under u32::MAX class defs.
        self.class_defs
            .iter()
            .enumerate()
            .map(|(i, def)| (ClassDefIdx(i as u32), def))
    }

    /// Index of a descriptor in the type id table, if interned there.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_type_idx(&self, descriptor: &Descriptor) -> Option<TypeIdx> {
        // Containers hold well under u32::MAX types.
        self.types
            .iter()
            .position(|item| &item.descriptor == descriptor)
            .map(|i| TypeIdx(i as u32))
    }

    /// Linear probe over the class-definition table.
    #[must_use]
    pub fn find_class_def(&self, descriptor: &Descriptor) -> Option<ClassDefIdx> {
        self.class_defs_iter()
            .find(|(_, def)| {
                self.type_descriptor(def.class_type)
                    .map_or(false, |d| d == descriptor)
            })
            .map(|(idx, _)| idx)
    }

    pub fn method_name(&self, idx: MethodIdx) -> Result<&Arc<str>, ContainerIndexError> {
        self.string(self.method(idx)?.name)
    }

    pub fn field_name(&self, idx: FieldIdx) -> Result<&Arc<str>, ContainerIndexError> {
        self.string(self.field(idx)?.name)
    }

    /// Materialize the full prototype of a method id.
    pub fn method_proto(&self, idx: MethodIdx) -> Result<MethodProto, ContainerIndexError> {
        let def = self.method(idx)?;
        let proto = self.proto(def.proto)?;
        let mut params = Vec::with_capacity(proto.params.len());
        for p in &proto.params {
            params.push(self.type_descriptor(*p)?.clone());
        }
        Ok(MethodProto::new(
            params,
            self.type_descriptor(proto.return_type)?.clone(),
        ))
    }
}

/// Programmatic construction of a [`DexFile`]. All `add_*` operations
/// deduplicate, so the id tables end up with dex-like sharing.
#[derive(Debug)]
pub struct DexFileBuilder {
    location: String,
    strings: Vec<Arc<str>>,
    string_map: HashMap<Arc<str>, StringIdx>,
    types: Vec<TypeItem>,
    type_map: HashMap<Descriptor, TypeIdx>,
    protos: Vec<ProtoDef>,
    proto_map: HashMap<(TypeIdx, Vec<TypeIdx>), ProtoIdx>,
    fields: Vec<FieldDef>,
    field_map: HashMap<(TypeIdx, TypeIdx, StringIdx), FieldIdx>,
    methods: Vec<MethodDef>,
    method_map: HashMap<(TypeIdx, ProtoIdx, StringIdx), MethodIdx>,
    class_defs: Vec<ClassDef>,
}
impl DexFileBuilder {
    #[must_use]
    pub fn new(location: impl Into<String>) -> DexFileBuilder {
        DexFileBuilder {
            location: location.into(),
            strings: Vec::new(),
            string_map: HashMap::new(),
            types: Vec::new(),
            type_map: HashMap::new(),
            protos: Vec::new(),
            proto_map: HashMap::new(),
            fields: Vec::new(),
            field_map: HashMap::new(),
            methods: Vec::new(),
            method_map: HashMap::new(),
            class_defs: Vec::new(),
        }
    }

    pub fn add_string(&mut self, text: &str) -> StringIdx {
        if let Some(idx) = self.string_map.get(text) {
            return *idx;
        }
        let value: Arc<str> = Arc::from(text);
        #[allow(clippy::cast_possible_truncation)]
        let idx = StringIdx(self.strings.len() as u32);
        self.strings.push(value.clone());
        self.string_map.insert(value, idx);
        idx
    }

    /// # Panics
    /// If `descriptor` is not a valid type descriptor.
    pub fn add_type(&mut self, descriptor: &str) -> TypeIdx {
        let descriptor = Descriptor::parse(descriptor)
            .unwrap_or_else(|err| panic!("bad type descriptor {descriptor:?}: {err:?}"));
        if let Some(idx) = self.type_map.get(&descriptor) {
            return *idx;
        }
        let string = self.add_string(descriptor.as_str());
        #[allow(clippy::cast_possible_truncation)]
        let idx = TypeIdx(self.types.len() as u32);
        self.types.push(TypeItem {
            string,
            descriptor: descriptor.clone(),
        });
        self.type_map.insert(descriptor, idx);
        idx
    }

    pub fn add_proto(&mut self, return_type: &str, params: &[&str]) -> ProtoIdx {
        let return_type = self.add_type(return_type);
        let params: Vec<TypeIdx> = params.iter().map(|p| self.add_type(p)).collect();
        if let Some(idx) = self.proto_map.get(&(return_type, params.clone())) {
            return *idx;
        }
        #[allow(clippy::cast_possible_truncation)]
        let idx = ProtoIdx(self.protos.len() as u32);
        self.protos.push(ProtoDef {
            return_type,
            params: params.clone(),
        });
        self.proto_map.insert((return_type, params), idx);
        idx
    }

    pub fn add_field(&mut self, class: &str, ty: &str, name: &str) -> FieldIdx {
        let class = self.add_type(class);
        let ty = self.add_type(ty);
        let name = self.add_string(name);
        if let Some(idx) = self.field_map.get(&(class, ty, name)) {
            return *idx;
        }
        #[allow(clippy::cast_possible_truncation)]
        let idx = FieldIdx(self.fields.len() as u32);
        self.fields.push(FieldDef { class, ty, name });
        self.field_map.insert((class, ty, name), idx);
        idx
    }

    pub fn add_method(
        &mut self,
        class: &str,
        name: &str,
        return_type: &str,
        params: &[&str],
    ) -> MethodIdx {
        let class = self.add_type(class);
        let proto = self.add_proto(return_type, params);
        let name = self.add_string(name);
        if let Some(idx) = self.method_map.get(&(class, proto, name)) {
            return *idx;
        }
        #[allow(clippy::cast_possible_truncation)]
        let idx = MethodIdx(self.methods.len() as u32);
        self.methods.push(MethodDef { class, proto, name });
        self.method_map.insert((class, proto, name), idx);
        idx
    }

    /// Begin a class definition; finish it with [`ClassDefBuilder::finish`].
    pub fn class(&mut self, descriptor: &str) -> ClassDefBuilder<'_> {
        let class_type = self.add_type(descriptor);
        ClassDefBuilder {
            descriptor: descriptor.to_owned(),
            builder: self,
            def: ClassDef {
                class_type,
                access_flags: ClassAccessFlags::PUBLIC,
                superclass: None,
                interfaces: Vec::new(),
                static_fields: Vec::new(),
                instance_fields: Vec::new(),
                direct_methods: Vec::new(),
                virtual_methods: Vec::new(),
                static_values: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn build(self) -> Arc<DexFile> {
        Arc::new(DexFile {
            location: self.location.into_boxed_str(),
            strings: self.strings,
            types: self.types,
            protos: self.protos,
            fields: self.fields,
            methods: self.methods,
            class_defs: self.class_defs,
        })
    }
}

pub struct ClassDefBuilder<'a> {
    descriptor: String,
    builder: &'a mut DexFileBuilder,
    def: ClassDef,
}
impl ClassDefBuilder<'_> {
    #[must_use]
    pub fn access_flags(mut self, flags: ClassAccessFlags) -> Self {
        self.def.access_flags = flags;
        self
    }

    #[must_use]
    pub fn super_class(mut self, descriptor: &str) -> Self {
        self.def.superclass = Some(self.builder.add_type(descriptor));
        self
    }

    #[must_use]
    pub fn interface(mut self, descriptor: &str) -> Self {
        let idx = self.builder.add_type(descriptor);
        self.def.interfaces.push(idx);
        self
    }

    #[must_use]
    pub fn instance_field(mut self, name: &str, ty: &str, flags: FieldAccessFlags) -> Self {
        debug_assert!(!flags.is_static());
        let field = self.builder.add_field(&self.descriptor, ty, name);
        self.def.instance_fields.push(ClassFieldEntry {
            field,
            access_flags: flags,
        });
        self
    }

    #[must_use]
    pub fn static_field(mut self, name: &str, ty: &str, flags: FieldAccessFlags) -> Self {
        let field = self.builder.add_field(&self.descriptor, ty, name);
        self.def.static_fields.push(ClassFieldEntry {
            field,
            access_flags: flags | FieldAccessFlags::STATIC,
        });
        self
    }

    #[must_use]
    pub fn direct_method(
        mut self,
        name: &str,
        return_type: &str,
        params: &[&str],
        flags: MethodAccessFlags,
    ) -> Self {
        debug_assert!(
            flags.is_static()
                || flags.is_private()
                || flags.contains(MethodAccessFlags::CONSTRUCTOR),
            "direct methods are static, private, or constructors"
        );
        let method = self
            .builder
            .add_method(&self.descriptor, name, return_type, params);
        self.def.direct_methods.push(ClassMethodEntry {
            method,
            access_flags: flags,
        });
        self
    }

    #[must_use]
    pub fn virtual_method(
        mut self,
        name: &str,
        return_type: &str,
        params: &[&str],
        flags: MethodAccessFlags,
    ) -> Self {
        debug_assert!(
            !flags.is_static() && !flags.is_private(),
            "virtual methods are neither static nor private"
        );
        let method = self
            .builder
            .add_method(&self.descriptor, name, return_type, params);
        self.def.virtual_methods.push(ClassMethodEntry {
            method,
            access_flags: flags,
        });
        self
    }

    #[must_use]
    pub fn static_value(mut self, value: EncodedValue) -> Self {
        self.def.static_values.push(value);
        self
    }

    pub fn finish(self) {
        debug_assert!(
            self.def.static_values.len() <= self.def.static_fields.len(),
            "static-value stream longer than the static field list"
        );
        if self
            .builder
            .class_defs
            .iter()
            .any(|existing| existing.class_type == self.def.class_type)
        {
            // Legal in a malformed container; lookups resolve to the first.
            tracing::warn!("duplicate class definition for {}", self.descriptor);
        }
        self.builder.class_defs.push(self.def);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_dedups_ids() {
        let mut b = DexFileBuilder::new("test.dex");
        let s1 = b.add_string("hello");
        let s2 = b.add_string("hello");
        assert_eq!(s1, s2);
        let t1 = b.add_type("Ljava/lang/Object;");
        let t2 = b.add_type("Ljava/lang/Object;");
        assert_eq!(t1, t2);
        let m1 = b.add_method("La/B;", "f", "V", &["I"]);
        let m2 = b.add_method("La/B;", "f", "V", &["I"]);
        assert_eq!(m1, m2);
        let m3 = b.add_method("La/B;", "f", "V", &["J"]);
        assert_ne!(m1, m3);
    }

    #[test]
    fn class_defs_are_findable() {
        let mut b = DexFileBuilder::new("test.dex");
        b.class("La/B;")
            .super_class("Ljava/lang/Object;")
            .instance_field("x", "I", FieldAccessFlags::PUBLIC)
            .virtual_method("f", "V", &[], MethodAccessFlags::PUBLIC)
            .finish();
        let dex = b.build();
        let desc = Descriptor::parse("La/B;").unwrap();
        let def_idx = dex.find_class_def(&desc).unwrap();
        let def = dex.class_def(def_idx).unwrap();
        assert_eq!(dex.type_descriptor(def.class_type).unwrap(), &desc);
        assert_eq!(def.instance_fields.len(), 1);
        assert_eq!(def.virtual_methods.len(), 1);
        let entry = def.virtual_methods[0];
        assert_eq!(&**dex.method_name(entry.method).unwrap(), "f");
        assert_eq!(dex.method_proto(entry.method).unwrap().signature(), "()V");
        assert!(dex
            .find_class_def(&Descriptor::parse("La/C;").unwrap())
            .is_none());
    }
}
