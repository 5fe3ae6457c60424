//! Encoding the module model back into its image
//!
//! Writing starts from the bytes the module was loaded from. Removed types
//! are cut off the end of the tables first; the remaining edits go through a
//! dotscope [`BuilderContext`] over the shortened image: new types get fresh
//! rows, changed method bodies get new bodies, and every operand that names
//! something resolves to a definition or reference in this image, creating
//! the reference rows it lacks.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;

use dotscope::metadata::tables::{
    AssemblyRefBuilder, CodedIndex, CodedIndexType, ConstantBuilder, CustomAttributeRaw,
    FieldBuilder, InterfaceImplRaw, MemberRefBuilder, MethodDefBuilder, NestedClassRaw,
    TableDataOwned, TableId, TypeDefBuilder, TypeRefBuilder,
};
use dotscope::{BuilderContext, CilAssembly, ValidationConfig};
use tracing::debug;

use super::body::{self, Original};
use super::compact::{self, Cut};
use super::reader::{self, Image, rows};
use super::{
    Clause, Constant, FieldDef, ImageError, MemberRef, MethodDef, Module, Operand, TypeDef,
};

const TYPE_REF: u32 = 0x0100_0000;
const TYPE_DEF: u32 = 0x0200_0000;
const FIELD: u32 = 0x0400_0000;
const METHOD_DEF: u32 = 0x0600_0000;
const MEMBER_REF: u32 = 0x0A00_0000;
const USER_STRING: u32 = 0x7000_0000;

const INTERFACE: u32 = 0x0000_0020;
const INTERNAL_CALL: u32 = 0x1000;

const STATIC_VOID: [u8; 3] = [0x00, 0x00, 0x01];
const FIELD_SIGNATURE: u8 = 0x06;
const ELEMENT_BOOLEAN: u8 = 0x02;
const ELEMENT_I4: u8 = 0x08;
const ELEMENT_I8: u8 = 0x0A;
const ELEMENT_STRING: u8 = 0x0E;
const ELEMENT_OBJECT: u8 = 0x1C;

const OBJECT: &str = "System.Object";
const CORE_LIBRARY: &str = "mscorlib";
const CORE_LIBRARY_KEY_TOKEN: [u8; 8] = [0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89];

pub(super) fn emit(module: &Module) -> Result<Vec<u8>, ImageError> {
    let source = &module.source;
    if module.name == source.name
        && module.version == source.version
        && module.types == source.types
    {
        return Ok(source.bytes.clone());
    }

    let kept: HashSet<u32> = module.types.iter().filter_map(|t| t.rid.get().copied()).collect();
    let removed: Vec<&TypeDef> = source
        .types
        .iter()
        .filter(|t| t.rid.get().is_some_and(|rid| !kept.contains(rid)))
        .collect();

    let bytes = if removed.is_empty() {
        source.bytes.clone()
    } else {
        strip(&source.bytes, &removed)?
    };

    let lookup = reader::open(bytes.clone())?;
    let edit = reader::open(bytes)?;
    let mut editor = Editor::new(Image::new(&lookup), BuilderContext::new(CilAssembly::new(edit)));
    editor.removed = removed.iter().map(|t| t.full_name()).collect();
    editor.gone = editor
        .removed
        .iter()
        .filter(|name| module.find_type(name).is_none())
        .cloned()
        .collect();

    editor.assembly(module)?;
    editor.register(module);
    for ty in &module.types {
        match ty.rid.get() {
            Some(&rid) => editor.existing(source_type(module, rid)?, ty)?,
            None => editor.added(ty)?,
        }
    }

    let mut assembly = editor.ctx.finish();
    assembly.validate_and_apply_changes_with_config(ValidationConfig::minimal())?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("module.dll");
    assembly.write_to_file(&path)?;
    Ok(fs::read(&path)?)
}

fn source_type(module: &Module, rid: u32) -> Result<&TypeDef, ImageError> {
    module
        .source
        .types
        .iter()
        .find(|t| t.rid.get() == Some(&rid))
        .ok_or_else(|| ImageError::Metadata(format!("type row {rid} not in the source image")))
}

/// Cut the rows of `removed` off the end of the tables
fn strip(bytes: &[u8], removed: &[&TypeDef]) -> Result<Vec<u8>, ImageError> {
    let view = reader::open(bytes.to_vec())?;
    let image = Image::new(&view);

    let mut types = BTreeSet::new();
    let mut methods = BTreeSet::new();
    let mut fields = BTreeSet::new();
    let mut params = BTreeSet::new();
    for ty in removed {
        let Some(&rid) = ty.rid.get() else { continue };
        let index = rid as usize - 1;
        types.insert(index);
        fields.extend(image.field_range(index));
        for method in image.method_range(index) {
            methods.insert(method);
            params.extend(image.param_range(method));
        }
    }
    let constants: BTreeSet<usize> = image
        .constants
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            let index = (c.parent.row as usize).wrapping_sub(1);
            match c.parent.tag {
                TableId::Field => fields.contains(&index),
                TableId::Param => params.contains(&index),
                _ => false,
            }
        })
        .map(|(i, _)| i)
        .collect();

    let owned = |ci: &CodedIndex| {
        let index = (ci.row as usize).wrapping_sub(1);
        match ci.tag {
            TableId::TypeDef => types.contains(&index),
            TableId::MethodDef => methods.contains(&index),
            TableId::Field => fields.contains(&index),
            TableId::Param => params.contains(&index),
            _ => false,
        }
    };
    let referenced = rows!(view, CustomAttributeRaw)
        .iter()
        .any(|a| owned(&a.parent) || owned(&a.constructor))
        || rows!(view, NestedClassRaw).iter().any(|n| {
            types.contains(&(n.nested_class as usize).wrapping_sub(1))
                || types.contains(&(n.enclosing_class as usize).wrapping_sub(1))
        })
        || rows!(view, InterfaceImplRaw)
            .iter()
            .any(|i| types.contains(&(i.class as usize).wrapping_sub(1)))
        || image.member_refs.iter().any(|m| owned(&m.class));
    if referenced {
        return Err(ImageError::unsupported(
            "removed types are still referenced by other metadata",
        ));
    }

    let mut cuts = Vec::new();
    for (table, rows, len) in [
        (TableId::TypeDef, &types, image.type_defs.len()),
        (TableId::Field, &fields, image.fields.len()),
        (TableId::MethodDef, &methods, image.method_defs.len()),
        (TableId::Param, &params, image.params.len()),
        (TableId::Constant, &constants, image.constants.len()),
    ] {
        if rows.is_empty() {
            continue;
        }
        let keep = len - rows.len();
        if rows.first() != Some(&keep) || rows.last() != Some(&(len - 1)) {
            return Err(ImageError::unsupported(format!(
                "removed types do not own the last {table:?} rows"
            )));
        }
        cuts.push(Cut {
            table,
            keep: u32::try_from(keep)
                .map_err(|_| ImageError::Metadata(format!("{table:?} too large")))?,
        });
    }
    debug!(?cuts, "Dropping trailing rows");

    compact::truncate(bytes, &view, &cuts)
}

/// Rows added during this write, keyed by type and member name
#[derive(Default)]
struct Added {
    types: HashMap<String, u32>,
    methods: HashMap<(String, String), u32>,
    fields: HashMap<(String, String), u32>,
}

struct Editor<'v> {
    image: Image<'v>,
    ctx: BuilderContext,
    added: Added,
    /// Types removed in this write
    removed: HashSet<String>,
    /// Removed types not added back
    gone: HashSet<String>,
    assembly_refs: HashMap<String, CodedIndex>,
    type_refs: HashMap<String, u32>,
    member_refs: HashMap<(String, String, Vec<u8>), u32>,
    /// Whether the body being encoded came from another module
    foreign: bool,
}

impl<'v> Editor<'v> {
    fn new(image: Image<'v>, ctx: BuilderContext) -> Self {
        Self {
            image,
            ctx,
            added: Added::default(),
            removed: HashSet::new(),
            gone: HashSet::new(),
            assembly_refs: HashMap::new(),
            type_refs: HashMap::new(),
            member_refs: HashMap::new(),
            foreign: false,
        }
    }

    /// Rewrite the assembly row if the name or version changed
    fn assembly(&mut self, module: &Module) -> Result<(), ImageError> {
        let source = &module.source;
        if module.name == source.name && module.version == source.version {
            return Ok(());
        }
        let mut row = self
            .image
            .assembly
            .clone()
            .ok_or_else(|| ImageError::unsupported("renaming a module without an assembly row"))?;
        if module.name != source.name {
            row.name = self.ctx.string_get_or_add(&module.name)?;
        }
        let version = module.version;
        row.major_version = u32::from(version.major);
        row.minor_version = u32::from(version.minor);
        row.build_number = u32::from(version.build);
        row.revision_number = u32::from(version.revision);
        self.ctx
            .table_row_update(TableId::Assembly, row.rid, TableDataOwned::Assembly(row))?;
        Ok(())
    }

    /// Reserve tokens for every added type and member, in the order their
    /// rows are created
    fn register(&mut self, module: &Module) {
        let mut type_rid = self.ctx.next_rid(TableId::TypeDef);
        let mut field_rid = self.ctx.next_rid(TableId::Field);
        let mut method_rid = self.ctx.next_rid(TableId::MethodDef);
        for ty in module.types.iter().filter(|t| t.rid.get().is_none()) {
            let name = ty.full_name();
            self.added.types.insert(name.clone(), TYPE_DEF | type_rid);
            type_rid += 1;
            for field in &ty.fields {
                self.added
                    .fields
                    .entry((name.clone(), field.name.clone()))
                    .or_insert(FIELD | field_rid);
                field_rid += 1;
            }
            for method in &ty.methods {
                self.added
                    .methods
                    .entry((name.clone(), method.name.clone()))
                    .or_insert(METHOD_DEF | method_rid);
                method_rid += 1;
            }
        }
    }

    /// Carry over edits to a type read from this image
    ///
    /// Only method bodies may change.
    fn existing(&mut self, before: &TypeDef, after: &TypeDef) -> Result<(), ImageError> {
        let name = after.full_name();
        if before.namespace != after.namespace
            || before.name != after.name
            || before.flags != after.flags
            || before.fields != after.fields
            || before.methods.len() != after.methods.len()
        {
            return Err(ImageError::unsupported(format!(
                "{name}: only method bodies of existing types can change"
            )));
        }

        for (old, new) in before.methods.iter().zip(&after.methods) {
            if old.name != new.name || old.flags != new.flags {
                return Err(ImageError::unsupported(format!(
                    "{name}: only method bodies of existing types can change"
                )));
            }
            // bodies naming a removed type hold tokens of rows that moved
            let stale = new
                .body
                .iter()
                .any(|i| names_any(&self.removed, &i.operand));
            if old.body == new.body && !stale {
                continue;
            }
            let Some(&rid) = new.rid.get() else {
                continue;
            };
            self.rewrite_body(&name, old, new, rid, stale)?;
        }
        Ok(())
    }

    fn rewrite_body(
        &mut self,
        type_name: &str,
        old: &MethodDef,
        new: &MethodDef,
        rid: u32,
        stale: bool,
    ) -> Result<(), ImageError> {
        let label = format!("{type_name}::{}", new.name);
        if new.body.is_empty() {
            return Err(ImageError::body(label, "empty body"));
        }
        let mut row = self
            .image
            .method_defs
            .get(rid as usize - 1)
            .cloned()
            .ok_or_else(|| ImageError::Metadata(format!("method row {rid} out of range")))?;

        let code = if stale { None } else { self.image.body(row.rva)?.map(|(_, code)| code) };
        let original = code.map(|code| Original {
            code,
            instructions: &old.body,
        });
        let info = new.info.get().filter(|_| row.rva != 0);

        self.foreign = false;
        let bytes = body::assemble(&label, &new.body, info, original.as_ref(), &mut |operand| {
            self.resolve(operand)
        })?;
        debug!(method = %label, size = bytes.len(), "Rewrote method body");

        if row.rva == 0 {
            row.impl_flags &= !INTERNAL_CALL;
        }
        row.rva = self.ctx.store_method_body(bytes);
        self.ctx
            .table_row_update(TableId::MethodDef, rid, TableDataOwned::MethodDef(row))?;
        Ok(())
    }

    /// Append a type copied from another module, or built from scratch
    fn added(&mut self, ty: &TypeDef) -> Result<(), ImageError> {
        let name = ty.full_name();
        let field_list = self.ctx.next_rid(TableId::Field);
        let method_list = self.ctx.next_rid(TableId::MethodDef);
        let extends = if ty.flags & INTERFACE == 0 {
            self.object()?
        } else {
            CodedIndex::null(CodedIndexType::TypeDefOrRef)
        };

        let token = TypeDefBuilder::new()
            .name(ty.name.clone())
            .namespace(ty.namespace.clone())
            .flags(ty.flags)
            .extends(extends)
            .field_list(field_list)
            .method_list(method_list)
            .build(&mut self.ctx)?;
        Self::check_reserved(&name, token.value(), self.added.types.get(&name))?;

        for field in &ty.fields {
            self.add_field(&name, field)?;
        }
        for method in &ty.methods {
            self.add_method(&name, method)?;
        }
        debug!(type_name = %name, "Added type");
        Ok(())
    }

    fn add_field(&mut self, type_name: &str, field: &FieldDef) -> Result<(), ImageError> {
        let element = field.constant.as_ref().map_or(ELEMENT_OBJECT, |c| match c {
            Constant::String(_) => ELEMENT_STRING,
            Constant::Int32(_) => ELEMENT_I4,
            Constant::Int64(_) => ELEMENT_I8,
            Constant::Boolean(_) => ELEMENT_BOOLEAN,
        });
        let signature = field
            .signature
            .get()
            .cloned()
            .unwrap_or_else(|| vec![FIELD_SIGNATURE, element]);

        let token = FieldBuilder::new()
            .name(field.name.clone())
            .flags(u32::from(field.flags))
            .signature(&signature)
            .build(&mut self.ctx)?;
        let key = (type_name.to_string(), field.name.clone());
        Self::check_reserved(&field.name, token.value(), self.added.fields.get(&key))?;

        if let Some(constant) = &field.constant {
            let parent = CodedIndex::new(TableId::Field, token.row(), CodedIndexType::HasConstant);
            let builder = ConstantBuilder::new().element_type(element).parent(parent);
            let builder = match constant {
                Constant::String(s) => builder.string_value(s),
                Constant::Int32(v) => builder.i4_value(*v),
                Constant::Int64(v) => builder.value(&v.to_le_bytes()),
                Constant::Boolean(v) => builder.boolean_value(*v),
            };
            builder.build(&mut self.ctx)?;
        }
        Ok(())
    }

    fn add_method(&mut self, type_name: &str, method: &MethodDef) -> Result<(), ImageError> {
        let label = format!("{type_name}::{}", method.name);
        let info = method.info.get();
        if info.is_some_and(|i| i.local_sig != 0) {
            return Err(ImageError::unsupported(format!(
                "{label}: copying a body with local variables"
            )));
        }
        if info.is_some_and(|i| i.clauses.iter().any(|c| c.flags == Clause::CATCH)) {
            return Err(ImageError::unsupported(format!(
                "{label}: copying a body with typed catch clauses"
            )));
        }

        let rva = if method.body.is_empty() {
            0
        } else {
            self.foreign = true;
            let bytes = body::assemble(&label, &method.body, info, None, &mut |operand| {
                self.resolve(operand)
            })?;
            self.ctx.store_method_body(bytes)
        };

        let signature = method.signature.get().map_or(&STATIC_VOID[..], Vec::as_slice);
        let token = MethodDefBuilder::new()
            .name(method.name.clone())
            .flags(u32::from(method.flags))
            .impl_flags(0)
            .signature(signature)
            .rva(rva)
            .param_list(self.ctx.next_rid(TableId::Param))
            .build(&mut self.ctx)?;
        let key = (type_name.to_string(), method.name.clone());
        Self::check_reserved(&label, token.value(), self.added.methods.get(&key))?;
        Ok(())
    }

    /// Check a created row landed on the token handed out for it
    fn check_reserved(
        what: &str,
        token: u32,
        reserved: Option<&u32>,
    ) -> Result<(), ImageError> {
        match reserved {
            Some(&r) if r != token => Err(ImageError::Metadata(format!(
                "{what}: row 0x{token:08X} created where 0x{r:08X} was reserved"
            ))),
            _ => Ok(()),
        }
    }

    fn resolve(&mut self, operand: &Operand) -> Result<u32, ImageError> {
        if names_any(&self.gone, operand) {
            return Err(ImageError::unsupported(format!(
                "operand {operand:?} names a removed type"
            )));
        }
        match operand {
            Operand::String(value) => Ok(USER_STRING | self.ctx.userstring_add(value)?),
            Operand::Method(member) => self.member(member, false),
            Operand::Field(member) => self.member(member, true),
            Operand::Type(name) => self.type_token(name),
            Operand::Token(token) if !self.foreign => Ok(*token),
            other => Err(ImageError::unsupported(format!(
                "operand {other:?} cannot be carried into another module"
            ))),
        }
    }

    fn member(&mut self, member: &MemberRef, is_field: bool) -> Result<u32, ImageError> {
        let key = (member.declaring_type.clone(), member.name.clone());
        let added = if is_field {
            &self.added.fields
        } else {
            &self.added.methods
        };
        if let Some(&token) = added.get(&key) {
            return Ok(token);
        }

        let import = member.import.get();
        let signature = import.map(|i| i.signature.as_slice());
        if let Some(token) = self.defined_member(member, is_field, signature)? {
            return Ok(token);
        }
        if let Some(token) = self.referenced_member(member, signature)? {
            return Ok(token);
        }

        let own_name = self.image.assembly_name()?;
        let scope = import.map_or_else(|| root_namespace(&member.declaring_type), |i| i.scope.clone());
        if scope == own_name {
            return Err(ImageError::unsupported(format!(
                "{member} is not defined in {own_name}"
            )));
        }
        let signature = signature.map_or_else(
            || {
                if is_field {
                    vec![FIELD_SIGNATURE, ELEMENT_OBJECT]
                } else {
                    STATIC_VOID.to_vec()
                }
            },
            <[u8]>::to_vec,
        );
        let cache_key = (member.declaring_type.clone(), member.name.clone(), signature.clone());
        if let Some(&token) = self.member_refs.get(&cache_key) {
            return Ok(token);
        }

        let parent = self.type_ref(&member.declaring_type, &scope)?;
        let token = MemberRefBuilder::new()
            .class(CodedIndex::new(
                TableId::TypeRef,
                parent,
                CodedIndexType::MemberRefParent,
            ))
            .name(member.name.clone())
            .signature(&signature)
            .build(&mut self.ctx)?
            .value();
        debug!(%member, scope, "Added member reference");
        self.member_refs.insert(cache_key, token);
        Ok(token)
    }

    /// Member defined by a type of this image
    fn defined_member(
        &self,
        member: &MemberRef,
        is_field: bool,
        signature: Option<&[u8]>,
    ) -> Result<Option<u32>, ImageError> {
        let Some(owner) = self.type_def_index(&member.declaring_type)? else {
            return Ok(None);
        };
        let mut by_name = None;
        if is_field {
            for index in self.image.field_range(owner) {
                let row = &self.image.fields[index];
                if self.image.string(row.name)? != member.name {
                    continue;
                }
                if signature.is_none_or(|s| self.image.blob(row.signature).is_ok_and(|b| b == s)) {
                    return Ok(Some(FIELD | row.rid));
                }
                by_name.get_or_insert(FIELD | row.rid);
            }
        } else {
            for index in self.image.method_range(owner) {
                let row = &self.image.method_defs[index];
                if self.image.string(row.name)? != member.name {
                    continue;
                }
                if signature.is_none_or(|s| self.image.blob(row.signature).is_ok_and(|b| b == s)) {
                    return Ok(Some(METHOD_DEF | row.rid));
                }
                by_name.get_or_insert(METHOD_DEF | row.rid);
            }
        }
        Ok(by_name)
    }

    /// Member reference already present in this image
    fn referenced_member(
        &self,
        member: &MemberRef,
        signature: Option<&[u8]>,
    ) -> Result<Option<u32>, ImageError> {
        let mut by_name = None;
        for row in &self.image.member_refs {
            if row.class.tag != TableId::TypeRef
                || self.image.string(row.name)? != member.name
                || self.image.type_ref_name(row.class.row)? != member.declaring_type
            {
                continue;
            }
            if signature.is_none_or(|s| self.image.blob(row.signature).is_ok_and(|b| b == s)) {
                return Ok(Some(MEMBER_REF | row.rid));
            }
            by_name.get_or_insert(MEMBER_REF | row.rid);
        }
        Ok(by_name)
    }

    fn type_def_index(&self, full_name: &str) -> Result<Option<usize>, ImageError> {
        for index in 0..self.image.type_defs.len() {
            if self.image.type_def_name(index)? == full_name {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn type_token(&mut self, full_name: &str) -> Result<u32, ImageError> {
        if let Some(&token) = self.added.types.get(full_name) {
            return Ok(token);
        }
        if let Some(index) = self.type_def_index(full_name)? {
            return Ok(self.image.type_defs[index].rid | TYPE_DEF);
        }
        let scope = root_namespace(full_name);
        Ok(TYPE_REF | self.type_ref(full_name, &scope)?)
    }

    /// Row of a reference to `full_name`, created against `scope` if missing
    fn type_ref(&mut self, full_name: &str, scope: &str) -> Result<u32, ImageError> {
        if let Some(&rid) = self.type_refs.get(full_name) {
            return Ok(rid);
        }
        for row in &self.image.type_refs {
            if self.image.type_ref_name(row.rid)? == full_name {
                return Ok(row.rid);
            }
        }

        let resolution_scope = self.assembly_ref(scope)?;
        let (namespace, name) = full_name.rsplit_once('.').unwrap_or(("", full_name));
        let rid = TypeRefBuilder::new()
            .name(name)
            .namespace(namespace)
            .resolution_scope(resolution_scope)
            .build(&mut self.ctx)?
            .row();
        self.type_refs.insert(full_name.to_string(), rid);
        Ok(rid)
    }

    fn assembly_ref(&mut self, name: &str) -> Result<CodedIndex, ImageError> {
        if let Some(scope) = self.assembly_refs.get(name) {
            return Ok(scope.clone());
        }
        let mut rid = None;
        for row in &self.image.assembly_refs {
            if self.image.string(row.name)? == name {
                rid = Some(row.rid);
                break;
            }
        }
        let rid = match rid {
            Some(rid) => rid,
            None => {
                let builder = AssemblyRefBuilder::new().name(name);
                let builder = if name == CORE_LIBRARY {
                    builder
                        .version(4, 0, 0, 0)
                        .public_key_token(&CORE_LIBRARY_KEY_TOKEN)
                } else {
                    builder.version(0, 0, 0, 0)
                };
                debug!(assembly = name, "Added assembly reference");
                builder.build(&mut self.ctx)?.row()
            }
        };
        let scope = CodedIndex::new(TableId::AssemblyRef, rid, CodedIndexType::ResolutionScope);
        self.assembly_refs.insert(name.to_string(), scope.clone());
        Ok(scope)
    }

    /// Base type for added classes
    fn object(&mut self) -> Result<CodedIndex, ImageError> {
        let scope = match self.ctx.find_core_library_ref() {
            Some(core) => self.image.assembly_ref_name(core.row)?,
            None => CORE_LIBRARY.to_string(),
        };
        let rid = self.type_ref(OBJECT, &scope)?;
        Ok(CodedIndex::new(
            TableId::TypeRef,
            rid,
            CodedIndexType::TypeDefOrRef,
        ))
    }
}

/// Whether `operand` names one of `types`
fn names_any(types: &HashSet<String>, operand: &Operand) -> bool {
    match operand {
        Operand::Method(m) | Operand::Field(m) => types.contains(&m.declaring_type),
        Operand::Type(t) => types.contains(t),
        _ => false,
    }
}

/// First segment of a namespace-qualified type name, used as the assembly
/// name when nothing better is known
fn root_namespace(full_name: &str) -> String {
    full_name
        .split('.')
        .next()
        .unwrap_or(full_name)
        .to_string()
}
