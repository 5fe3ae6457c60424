//! In-memory model of a managed module image
//!
//! A [`Module`] is read from a CLI (ECMA-335) image with [`Module::load`]. It
//! owns an ordered list of [`TypeDef`]s, each with fields and methods, and
//! methods own their decoded instruction list. [`Module::write`] turns the
//! model back into an image:
//!
//! - an unchanged module is written back byte for byte
//! - methods whose instruction list changed get a new body, with branch
//!   targets and exception clauses moved along with the code
//! - types added with [`Module::add_type`] are appended, together with any
//!   member and assembly references their bodies need
//! - types removed with [`Module::remove_type`] must own the last rows of the
//!   metadata tables, which is where [`Module::add_type`] puts them
//!
//! Decoding and encoding go through [`dotscope`]. Each model element keeps a
//! link to the rows it came from; the link never takes part in equality, so
//! two models compare equal when their names, versions and instructions do.

mod body;
mod compact;
mod emitter;
mod instruction;
mod reader;

use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

pub use instruction::{Instruction, MemberRef, OpCode, Operand};

use crate::error::{self, Result};

/// Low-level decode/encode failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image: {0}")]
    Metadata(String),

    #[error("method {method}: {message}")]
    Body { method: String, message: String },

    #[error("unsupported edit: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Io(String),
}

impl ImageError {
    pub(crate) fn body(method: impl Into<String>, message: impl Into<String>) -> Self {
        ImageError::Body {
            method: method.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        ImageError::Unsupported(message.into())
    }
}

impl From<dotscope::Error> for ImageError {
    fn from(e: dotscope::Error) -> Self {
        ImageError::Metadata(e.to_string())
    }
}

impl From<std::io::Error> for ImageError {
    fn from(e: std::io::Error) -> Self {
        ImageError::Io(e.to_string())
    }
}

/// Link from a model element back to the image it was read from
///
/// Always equal to any other `Backing`, so provenance never changes the
/// outcome of comparing two models.
#[derive(Debug, Clone)]
pub(crate) struct Backing<T>(Option<T>);

impl<T> Backing<T> {
    pub(crate) const fn none() -> Self {
        Backing(None)
    }

    pub(crate) const fn new(value: T) -> Self {
        Backing(Some(value))
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub(crate) fn clear(&mut self) {
        self.0 = None;
    }
}

impl<T> Default for Backing<T> {
    fn default() -> Self {
        Backing(None)
    }
}

impl<T> PartialEq for Backing<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for Backing<T> {}

impl<T> Hash for Backing<T> {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

/// Four-part assembly version stored in module metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AssemblyVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl AssemblyVersion {
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Compile-time constant attached to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    String(String),
    Int32(i32),
    Int64(i64),
    Boolean(bool),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::String(s) => f.write_str(s),
            Constant::Int32(v) => write!(f, "{v}"),
            Constant::Int64(v) => write!(f, "{v}"),
            Constant::Boolean(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub flags: u16,
    pub constant: Option<Constant>,
    pub(crate) rid: Backing<u32>,
    pub(crate) signature: Backing<Vec<u8>>,
}

impl FieldDef {
    /// `public static literal`
    pub const LITERAL: u16 = 0x8056;

    /// Public constant field holding `value`
    pub fn constant(name: impl Into<String>, value: Constant) -> Self {
        Self {
            name: name.into(),
            flags: Self::LITERAL,
            constant: Some(value),
            rid: Backing::none(),
            signature: Backing::none(),
        }
    }
}

/// Layout of an exception clause, in IL offsets of the body it was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Clause {
    pub flags: u16,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    /// Catch type token, or filter start for filter clauses
    pub class_or_filter: u32,
}

impl Clause {
    pub const CATCH: u16 = 0x0000;
    pub const FILTER: u16 = 0x0001;
}

/// Method body header details that are not instructions
#[derive(Debug, Clone, Default)]
pub(crate) struct BodyInfo {
    pub max_stack: u16,
    pub local_sig: u32,
    pub init_locals: bool,
    /// Size of the code the spans refer to
    pub code_size: u32,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    pub name: String,
    pub flags: u16,
    pub body: Vec<Instruction>,
    pub(crate) rid: Backing<u32>,
    pub(crate) signature: Backing<Vec<u8>>,
    pub(crate) info: Backing<BodyInfo>,
}

impl MethodDef {
    /// `public static hidebysig`
    pub const PUBLIC_STATIC: u16 = 0x0096;

    /// Public static method taking no arguments
    pub fn new(name: impl Into<String>, body: Vec<Instruction>) -> Self {
        Self {
            name: name.into(),
            flags: Self::PUBLIC_STATIC,
            body,
            rid: Backing::none(),
            signature: Backing::none(),
            info: Backing::none(),
        }
    }

    /// Index of the first instruction equal to `needle`
    #[must_use]
    pub fn position_of(&self, needle: &Instruction) -> Option<usize> {
        self.body.iter().position(|instr| instr == needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub flags: u32,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub(crate) rid: Backing<u32>,
}

impl TypeDef {
    /// `public auto ansi beforefieldinit`
    pub const PUBLIC_CLASS: u32 = 0x0010_0001;

    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            flags: Self::PUBLIC_CLASS,
            fields: Vec::new(),
            methods: Vec::new(),
            rid: Backing::none(),
        }
    }

    /// `Namespace.Name`, or just `Name` for the global namespace
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }

    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    #[must_use]
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Value of a constant field rendered as a string
    #[must_use]
    pub fn constant_string(&self, field: &str) -> Option<String> {
        self.find_field(field)
            .and_then(|f| f.constant.as_ref())
            .map(ToString::to_string)
    }

    /// Reference to one of this type's methods
    #[must_use]
    pub fn member_ref(&self, method: &str) -> MemberRef {
        MemberRef::new(self.full_name(), method)
    }

    /// Forget which rows this type was read from, so it can be added to
    /// another module as a new type
    fn detach(&mut self) {
        self.rid.clear();
        for field in &mut self.fields {
            field.rid.clear();
        }
        for method in &mut self.methods {
            method.rid.clear();
        }
    }
}

pub(crate) fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// The image a module was loaded from, as it was loaded
struct Source {
    bytes: Vec<u8>,
    name: String,
    version: AssemblyVersion,
    types: Vec<TypeDef>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("bytes", &self.bytes.len())
            .field("name", &self.name)
            .field("types", &self.types.len())
            .finish()
    }
}

/// Owned, editable module image
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub version: AssemblyVersion,
    types: Vec<TypeDef>,
    source: Arc<Source>,
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version && self.types == other.types
    }
}

impl Eq for Module {}

impl Module {
    /// Decode a module image
    ///
    /// # Errors
    /// Returns [`ImageError`] if the bytes are not a well-formed CLI image.
    pub fn load(bytes: &[u8]) -> std::result::Result<Self, ImageError> {
        let loaded = reader::read(bytes)?;
        let source = Source {
            bytes: bytes.to_vec(),
            name: loaded.name.clone(),
            version: loaded.version,
            types: loaded.types.clone(),
        };
        Ok(Self {
            name: loaded.name,
            version: loaded.version,
            types: loaded.types,
            source: Arc::new(source),
        })
    }

    /// Encode this module
    ///
    /// # Errors
    /// Returns [`ImageError`] if an edit cannot be expressed in the image.
    pub fn write(&self) -> std::result::Result<Vec<u8>, ImageError> {
        emitter::emit(self)
    }

    /// Read and decode a module file
    pub fn load_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| error::module::load_failed(path.display().to_string(), e.to_string()))?;
        Self::load(&bytes)
            .map_err(|e| error::module::load_failed(path.display().to_string(), e.to_string()))
    }

    /// Encode and write this module to `path`
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let bytes = self
            .write()
            .map_err(|e| error::fs::write_failed(path.display().to_string(), e.to_string()))?;
        fs::write(path, bytes)
            .map_err(|e| error::fs::write_failed(path.display().to_string(), e.to_string()))
    }

    #[must_use]
    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.full_name() == full_name)
    }

    #[must_use]
    pub fn type_index(&self, full_name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.full_name() == full_name)
    }

    pub fn type_at_mut(&mut self, index: usize) -> Option<&mut TypeDef> {
        self.types.get_mut(index)
    }

    /// Append a type; returns `false` and leaves the module unchanged if the
    /// full name is already taken
    pub fn add_type(&mut self, mut ty: TypeDef) -> bool {
        if self.find_type(&ty.full_name()).is_some() {
            return false;
        }
        ty.detach();
        self.types.push(ty);
        true
    }

    /// Remove the type with the given full name
    pub fn remove_type(&mut self, full_name: &str) -> Option<TypeDef> {
        let index = self.type_index(full_name)?;
        Some(self.types.remove(index))
    }
}

#[cfg(test)]
mod tests;
