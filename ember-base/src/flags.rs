use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassAccessFlags: u32 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;

        // Runtime-only bits; never present in a source container.
        /// Fabricated by proxy synthesis rather than loaded from a container.
        const PROXY = 0x0004_0000;
        /// Verification already performed (snapshot classes, proxies).
        const PREVERIFIED = 0x0008_0000;
        /// At least one non-abstract method declared on this interface.
        const HAS_DEFAULT_METHODS = 0x0010_0000;
        /// Default-interface initialization already walked this interface.
        const RECURSIVELY_INITIALIZED = 0x0020_0000;
        /// The runtime string class.
        const STRING_CLASS = 0x0040_0000;
        /// A class-loader class.
        const CLASS_LOADER_CLASS = 0x0080_0000;
        /// Instances need finalizer registration.
        const FINALIZABLE = 0x8000_0000;
    }
}
impl ClassAccessFlags {
    #[must_use]
    pub fn is_interface(self) -> bool {
        self.contains(ClassAccessFlags::INTERFACE)
    }

    #[must_use]
    pub fn is_final(self) -> bool {
        self.contains(ClassAccessFlags::FINAL)
    }

    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(ClassAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_public(self) -> bool {
        self.contains(ClassAccessFlags::PUBLIC)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MethodAccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        /// `<init>` or `<clinit>` (dex-style marker).
        const CONSTRUCTOR = 0x0001_0000;

        // Runtime-only bits.
        /// A non-abstract interface method.
        const DEFAULT = 0x0040_0000;
        /// Synthesized abstract placeholder owned by the implementing class.
        const MIRANDA = 0x0080_0000;
        /// Copied into the owning class from an interface declaration.
        const COPIED = 0x0100_0000;
        const PREVERIFIED = 0x0200_0000;
    }
}
impl MethodAccessFlags {
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(MethodAccessFlags::STATIC)
    }

    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(MethodAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_native(self) -> bool {
        self.contains(MethodAccessFlags::NATIVE)
    }

    #[must_use]
    pub fn is_final(self) -> bool {
        self.contains(MethodAccessFlags::FINAL)
    }

    #[must_use]
    pub fn is_public(self) -> bool {
        self.contains(MethodAccessFlags::PUBLIC)
    }

    #[must_use]
    pub fn is_private(self) -> bool {
        self.contains(MethodAccessFlags::PRIVATE)
    }

    #[must_use]
    pub fn is_default(self) -> bool {
        self.contains(MethodAccessFlags::DEFAULT)
    }

    #[must_use]
    pub fn is_miranda(self) -> bool {
        self.contains(MethodAccessFlags::MIRANDA)
    }

    /// Whether a package-private member; no visibility bit at all.
    #[must_use]
    pub fn is_package_private(self) -> bool {
        !self.intersects(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::PRIVATE | MethodAccessFlags::PROTECTED,
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldAccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}
impl FieldAccessFlags {
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(FieldAccessFlags::STATIC)
    }
}
