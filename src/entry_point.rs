//! Entry point parsing and resolution
//!
//! An entry point names the method that receives the bootstrap call:
//!
//! ```text
//! [Assembly-CSharp.dll]Game.Bootstrap.Main:After
//!  ^ assembly file      ^ type path    ^ method ^ insertion point
//! ```
//!
//! The assembly prefix and the insertion point are optional. Syntax is
//! checked by [`EntryPointSpec::parse`] before any module is touched;
//! [`EntryPointSpec::resolve`] then finds the method inside a loaded module.

use std::fmt;
use std::str::FromStr;

use crate::error::{self, ModhookError, Result};
use crate::module::{MethodDef, Module};

/// Assembly assumed when an entry point has no `[file.dll]` prefix
pub const DEFAULT_ASSEMBLY: &str = "Assembly-CSharp.dll";

/// Where the bootstrap call goes inside the method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertionPoint {
    /// Before the first instruction
    Before,
    /// Immediately before the final instruction (the method's return)
    #[default]
    After,
}

impl InsertionPoint {
    /// Index at which the call is inserted into a body of `len` instructions
    #[must_use]
    pub fn offset(self, len: usize) -> usize {
        match self {
            InsertionPoint::Before => 0,
            InsertionPoint::After => len.saturating_sub(1),
        }
    }
}

impl fmt::Display for InsertionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertionPoint::Before => f.write_str("Before"),
            InsertionPoint::After => f.write_str("After"),
        }
    }
}

impl FromStr for InsertionPoint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(InsertionPoint::Before),
            "after" => Ok(InsertionPoint::After),
            other => Err(format!("unknown insertion point '{other}'")),
        }
    }
}

/// Parsed entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointSpec {
    assembly: Option<String>,
    type_name: String,
    method: String,
    insertion: InsertionPoint,
}

/// Location of a resolved entry point inside a specific module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEntryPoint {
    pub type_index: usize,
    pub method_index: usize,
    pub insertion: InsertionPoint,
}

impl ResolvedEntryPoint {
    pub fn method<'m>(&self, module: &'m Module) -> Option<&'m MethodDef> {
        module
            .types()
            .get(self.type_index)
            .and_then(|ty| ty.methods.get(self.method_index))
    }

    /// Borrow the resolved method mutably
    ///
    /// Only valid for the module that produced this resolution.
    pub fn method_mut<'m>(&self, module: &'m mut Module) -> Option<&'m mut MethodDef> {
        module
            .type_at_mut(self.type_index)
            .and_then(|ty| ty.methods.get_mut(self.method_index))
    }
}

impl EntryPointSpec {
    /// Parse an entry point string
    ///
    /// # Errors
    /// Returns [`ModhookError::EntryPointInvalid`] on any syntax error.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| error::module::entry_point_invalid(input, reason);
        let text = input.trim();
        if text.is_empty() {
            return Err(invalid("entry point is empty"));
        }

        let (assembly, rest) = if let Some(after_open) = text.strip_prefix('[') {
            let close = after_open
                .find(']')
                .ok_or_else(|| invalid("missing ']' after assembly name"))?;
            let assembly = after_open[..close].trim();
            if assembly.is_empty() {
                return Err(invalid("assembly name is empty"));
            }
            (Some(assembly.to_string()), &after_open[close + 1..])
        } else {
            (None, text)
        };

        let (path, insertion) = match rest.rsplit_once(':') {
            Some((path, policy)) => (
                path,
                policy
                    .trim()
                    .parse::<InsertionPoint>()
                    .map_err(|reason| invalid(&reason))?,
            ),
            None => (rest, InsertionPoint::default()),
        };

        let (type_name, method) = split_method(path.trim()).ok_or_else(|| {
            invalid("expected a dotted type path followed by a method name")
        })?;

        if !type_name.split('.').all(is_identifier) {
            return Err(invalid("type path contains an invalid segment"));
        }
        if !is_identifier(method.strip_prefix('.').unwrap_or(method)) {
            return Err(invalid("method name is invalid"));
        }

        Ok(Self {
            assembly,
            type_name: type_name.to_string(),
            method: method.to_string(),
            insertion,
        })
    }

    /// Assembly file named by the prefix, if any
    #[must_use]
    pub fn assembly(&self) -> Option<&str> {
        self.assembly.as_deref()
    }

    /// Assembly file inside the managed folder that holds this entry point
    #[must_use]
    pub fn assembly_file(&self) -> &str {
        self.assembly.as_deref().unwrap_or(DEFAULT_ASSEMBLY)
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn insertion(&self) -> InsertionPoint {
        self.insertion
    }

    /// Whether both name the same method in the same assembly file,
    /// regardless of insertion policy
    pub fn same_method(&self, other: &Self) -> bool {
        self.assembly_file() == other.assembly_file()
            && self.type_name == other.type_name
            && self.method == other.method
    }

    /// Locate the entry point inside `module`
    ///
    /// # Errors
    /// Returns [`ModhookError::EntryPointNotFound`] if the type or the method is missing.
    pub fn resolve(&self, module: &Module) -> Result<ResolvedEntryPoint> {
        let type_index = module.type_index(&self.type_name).ok_or_else(|| {
            self.not_found(format!(
                "type '{}' does not exist in '{}'",
                self.type_name, module.name
            ))
        })?;
        let method_index = module.types()[type_index]
            .method_index(&self.method)
            .ok_or_else(|| {
                self.not_found(format!(
                    "method '{}' does not exist on '{}'",
                    self.method, self.type_name
                ))
            })?;

        Ok(ResolvedEntryPoint {
            type_index,
            method_index,
            insertion: self.insertion,
        })
    }

    fn not_found(&self, reason: String) -> ModhookError {
        error::module::entry_point_not_found(self.to_string(), reason)
    }
}

impl FromStr for EntryPointSpec {
    type Err = ModhookError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EntryPointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(assembly) = &self.assembly {
            write!(f, "[{assembly}]")?;
        }
        write!(f, "{}.{}:{}", self.type_name, self.method, self.insertion)
    }
}

/// Split `Namespace.Type.Method` at the last dot, keeping the leading dot of
/// constructor names (`Type..cctor` -> `Type`, `.cctor`)
fn split_method(path: &str) -> Option<(&str, &str)> {
    let dot = path.rfind('.')?;
    let split = if dot > 0 && path.as_bytes()[dot - 1] == b'.' {
        dot - 1
    } else {
        dot
    };
    let type_name = &path[..split];
    let method = &path[split + 1..];
    if type_name.is_empty() || method.is_empty() {
        return None;
    }
    Some((type_name, method))
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '`' | '<' | '>' | '+' | '/'))
}
