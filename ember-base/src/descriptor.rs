use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

/// The nine primitive kinds a descriptor character can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}
impl PrimitiveKind {
    #[must_use]
    pub fn from_desc_char(c: char) -> Option<PrimitiveKind> {
        Some(match c {
            'Z' => PrimitiveKind::Boolean,
            'B' => PrimitiveKind::Byte,
            'C' => PrimitiveKind::Char,
            'S' => PrimitiveKind::Short,
            'I' => PrimitiveKind::Int,
            'J' => PrimitiveKind::Long,
            'F' => PrimitiveKind::Float,
            'D' => PrimitiveKind::Double,
            'V' => PrimitiveKind::Void,
            _ => return None,
        })
    }

    #[must_use]
    pub fn desc_char(self) -> char {
        match self {
            PrimitiveKind::Boolean => 'Z',
            PrimitiveKind::Byte => 'B',
            PrimitiveKind::Char => 'C',
            PrimitiveKind::Short => 'S',
            PrimitiveKind::Int => 'I',
            PrimitiveKind::Long => 'J',
            PrimitiveKind::Float => 'F',
            PrimitiveKind::Double => 'D',
            PrimitiveKind::Void => 'V',
        }
    }

    /// Storage width of a field of this kind, in bytes. Void has none.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Boolean | PrimitiveKind::Byte => 1,
            PrimitiveKind::Char | PrimitiveKind::Short => 2,
            PrimitiveKind::Int | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::Double => 8,
        }
    }

    #[must_use]
    pub fn pretty_name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Void => "void",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DescriptorError {
    Empty,
    /// An `L` descriptor without the closing `;`
    UnterminatedClass,
    /// A class descriptor with an empty name (`L;`)
    EmptyClassName,
    /// An array descriptor with nothing after the brackets
    BareArray,
    /// A character that does not start any descriptor form
    UnknownTag(char),
    /// Extra bytes after a complete descriptor
    TrailingData,
}

/// A canonical type descriptor in JVM form (`Lfoo/Bar;`, `[I`, `V`, ...).
///
/// Cheap to clone; the text is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(Arc<str>);
impl Descriptor {
    pub fn parse(text: &str) -> Result<Descriptor, DescriptorError> {
        let rest = Self::validate_one(text)?;
        if !rest.is_empty() {
            return Err(DescriptorError::TrailingData);
        }
        Ok(Descriptor(Arc::from(text)))
    }

    /// Validates a single descriptor at the front of `text`, returning the remainder.
    fn validate_one(text: &str) -> Result<&str, DescriptorError> {
        let mut chars = text.char_indices();
        let (_, first) = chars.next().ok_or(DescriptorError::Empty)?;
        match first {
            '[' => {
                let inner = &text[1..];
                if inner.is_empty() {
                    return Err(DescriptorError::BareArray);
                }
                Self::validate_one(inner)
            }
            'L' => {
                let end = text.find(';').ok_or(DescriptorError::UnterminatedClass)?;
                if end == 1 {
                    return Err(DescriptorError::EmptyClassName);
                }
                Ok(&text[end + 1..])
            }
            c => {
                if PrimitiveKind::from_desc_char(c).is_none() {
                    return Err(DescriptorError::UnknownTag(c));
                }
                Ok(&text[1..])
            }
        }
    }

    #[must_use]
    pub fn from_primitive(kind: PrimitiveKind) -> Descriptor {
        // Single chars; no allocation worth worrying about.
        Descriptor(Arc::from(kind.desc_char().to_string().as_str()))
    }

    /// Wrap `component` in one more array level.
    #[must_use]
    pub fn array_of(component: &Descriptor) -> Descriptor {
        let mut text = String::with_capacity(component.0.len() + 1);
        text.push('[');
        text.push_str(&component.0);
        Descriptor(Arc::from(text.as_str()))
    }

    /// Build `Lname;` from a `/`-separated binary name.
    #[must_use]
    pub fn object(binary_name: &str) -> Descriptor {
        let mut text = String::with_capacity(binary_name.len() + 2);
        text.push('L');
        text.push_str(binary_name);
        text.push(';');
        Descriptor(Arc::from(text.as_str()))
    }

    /// Build a descriptor from a dotted source-level name (`java.lang.Foo`).
    #[must_use]
    pub fn from_dotted(dotted: &str) -> Descriptor {
        let slashed = dotted.replace('.', "/");
        Descriptor::object(&slashed)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        if self.0.len() == 1 {
            PrimitiveKind::from_desc_char(self.0.chars().next()?)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.primitive_kind().is_some()
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.0.starts_with('L') || self.is_array()
    }

    /// The descriptor of the component type, for arrays.
    #[must_use]
    pub fn component(&self) -> Option<Descriptor> {
        self.0
            .strip_prefix('[')
            .map(|inner| Descriptor(Arc::from(inner)))
    }

    /// Number of leading `[`s.
    #[must_use]
    pub fn array_level(&self) -> usize {
        self.0.bytes().take_while(|b| *b == b'[').count()
    }

    /// The `/`-separated binary name for `L...;` descriptors.
    #[must_use]
    pub fn class_binary_name(&self) -> Option<&str> {
        self.0.strip_prefix('L').and_then(|x| x.strip_suffix(';'))
    }

    /// The package portion of the binary name, if any.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        let name = self.class_binary_name()?;
        let idx = name.rfind('/')?;
        Some(&name[..idx])
    }

    /// Field width in bytes; references take `reference_width`.
    #[must_use]
    pub fn width(&self, reference_width: usize) -> usize {
        match self.primitive_kind() {
            Some(kind) => kind.width(),
            None => reference_width,
        }
    }

    /// Human-readable dotted form, `int[]`-style for arrays.
    #[must_use]
    pub fn pretty(&self) -> String {
        let level = self.array_level();
        let base = &self.0[level..];
        let prim = (base.len() == 1)
            .then(|| base.chars().next())
            .flatten()
            .and_then(PrimitiveKind::from_desc_char);
        let mut out = if let Some(kind) = prim {
            kind.pretty_name().to_owned()
        } else if let Some(name) = base.strip_prefix('L').and_then(|x| x.strip_suffix(';')) {
            name.replace('/', ".")
        } else {
            base.to_owned()
        };
        for _ in 0..level {
            out.push_str("[]");
        }
        out
    }
}
impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodProto {
    pub params: SmallVec<[Descriptor; 4]>,
    pub return_type: Descriptor,
}
impl MethodProto {
    #[must_use]
    pub fn new(params: impl IntoIterator<Item = Descriptor>, return_type: Descriptor) -> Self {
        MethodProto {
            params: params.into_iter().collect(),
            return_type,
        }
    }

    /// The canonical `(...)R` signature string.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut out = String::with_capacity(2 + self.return_type.as_str().len());
        out.push('(');
        for p in &self.params {
            out.push_str(p.as_str());
        }
        out.push(')');
        out.push_str(self.return_type.as_str());
        out
    }

    /// Shorty: one char per type, references collapsed to `L`, return first.
    #[must_use]
    pub fn shorty(&self) -> String {
        let shorty_char = |d: &Descriptor| match d.primitive_kind() {
            Some(kind) => kind.desc_char(),
            None => 'L',
        };
        let mut out = String::with_capacity(1 + self.params.len());
        out.push(shorty_char(&self.return_type));
        for p in &self.params {
            out.push(shorty_char(p));
        }
        out
    }
}
impl fmt::Display for MethodProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert!(Descriptor::parse("I").is_ok());
        assert!(Descriptor::parse("Ljava/lang/Object;").is_ok());
        assert!(Descriptor::parse("[[J").is_ok());
        assert!(Descriptor::parse("").is_err());
        assert!(Descriptor::parse("Lfoo").is_err());
        assert!(Descriptor::parse("L;").is_err());
        assert!(Descriptor::parse("[").is_err());
        assert!(Descriptor::parse("II").is_err());
        assert!(Descriptor::parse("Q").is_err());
    }

    #[test]
    fn array_components() {
        let d = Descriptor::parse("[[Lfoo/Bar;").unwrap();
        assert_eq!(d.array_level(), 2);
        let c = d.component().unwrap();
        assert_eq!(c.as_str(), "[Lfoo/Bar;");
        assert_eq!(c.component().unwrap().class_binary_name(), Some("foo/Bar"));
        assert!(Descriptor::parse("I").unwrap().component().is_none());
    }

    #[test]
    fn pretty_names() {
        assert_eq!(Descriptor::parse("[I").unwrap().pretty(), "int[]");
        assert_eq!(
            Descriptor::parse("Ljava/lang/String;").unwrap().pretty(),
            "java.lang.String"
        );
        assert_eq!(Descriptor::from_dotted("a.b.C").as_str(), "La/b/C;");
    }

    #[test]
    fn proto_signature_and_shorty() {
        let proto = MethodProto::new(
            [
                Descriptor::parse("I").unwrap(),
                Descriptor::parse("Ljava/lang/String;").unwrap(),
            ],
            Descriptor::parse("V").unwrap(),
        );
        assert_eq!(proto.signature(), "(ILjava/lang/String;)V");
        assert_eq!(proto.shorty(), "VIL");
    }
}
