//! Decoding a CLI image into the module model

use std::ops::Range;

use dotscope::assembly::{self, FlowType, Immediate};
use dotscope::metadata::method::MethodBody;
use dotscope::metadata::tables::{
    AssemblyRaw, AssemblyRefRaw, CodedIndex, ConstantRaw, FieldRaw, MemberRefRaw, MethodDefRaw,
    ModuleRaw, ParamRaw, TableId, TypeDefRaw, TypeRefRaw,
};
use dotscope::{Blob, CilAssemblyView, Parser, Strings, UserStrings, ValidationConfig};

use super::instruction::{Import, Span};
use super::{
    AssemblyVersion, Backing, BodyInfo, Clause, Constant, FieldDef, ImageError, Instruction,
    MemberRef, MethodDef, OpCode, Operand, TypeDef, full_name,
};

/// Every row of a metadata table, or none if the table is absent
macro_rules! rows {
    ($view:expr, $raw:ty) => {
        $view
            .tables()
            .and_then(|tables| tables.table::<$raw>())
            .map(|table| table.iter().collect::<Vec<$raw>>())
            .unwrap_or_default()
    };
}

pub(super) use rows;

const TOKEN_TABLE_SHIFT: u32 = 24;
const TOKEN_ROW_MASK: u32 = 0x00FF_FFFF;

const ELEMENT_BOOLEAN: u8 = 0x02;
const ELEMENT_I4: u8 = 0x08;
const ELEMENT_I8: u8 = 0x0A;
const ELEMENT_STRING: u8 = 0x0E;

/// Field signatures start with this byte; method signatures never do
const FIELD_SIGNATURE: u8 = 0x06;

/// Name of the pseudo type holding module-level members
const MODULE_TYPE: &str = "<Module>";

/// Decoded model, before it is wrapped into a [`super::Module`]
pub(super) struct Loaded {
    pub name: String,
    pub version: AssemblyVersion,
    pub types: Vec<TypeDef>,
}

pub(super) fn open(bytes: Vec<u8>) -> Result<CilAssemblyView, ImageError> {
    Ok(CilAssemblyView::from_mem_with_validation(
        bytes,
        ValidationConfig::minimal(),
    )?)
}

pub(super) fn read(bytes: &[u8]) -> Result<Loaded, ImageError> {
    let view = open(bytes.to_vec())?;
    let image = Image::new(&view);

    let name = image.assembly_name()?;
    let version = image.version()?;

    let mut types = Vec::new();
    for index in 0..image.type_defs.len() {
        let ty = image.type_def(index)?;
        if ty.rid.get() == Some(&1) && ty.name == MODULE_TYPE {
            continue;
        }
        types.push(ty);
    }

    Ok(Loaded {
        name,
        version,
        types,
    })
}

/// Rows and heaps of an open image
pub(super) struct Image<'v> {
    view: &'v CilAssemblyView,
    strings: Option<&'v Strings<'v>>,
    blobs: Option<&'v Blob<'v>>,
    user_strings: Option<&'v UserStrings<'v>>,
    pub assembly: Option<AssemblyRaw>,
    pub modules: Vec<ModuleRaw>,
    pub type_defs: Vec<TypeDefRaw>,
    pub fields: Vec<FieldRaw>,
    pub method_defs: Vec<MethodDefRaw>,
    pub params: Vec<ParamRaw>,
    pub member_refs: Vec<MemberRefRaw>,
    pub constants: Vec<ConstantRaw>,
    pub type_refs: Vec<TypeRefRaw>,
    pub assembly_refs: Vec<AssemblyRefRaw>,
}

impl<'v> Image<'v> {
    pub fn new(view: &'v CilAssemblyView) -> Self {
        Self {
            view,
            strings: view.strings(),
            blobs: view.blobs(),
            user_strings: view.userstrings(),
            assembly: rows!(view, AssemblyRaw).into_iter().next(),
            modules: rows!(view, ModuleRaw),
            type_defs: rows!(view, TypeDefRaw),
            fields: rows!(view, FieldRaw),
            method_defs: rows!(view, MethodDefRaw),
            params: rows!(view, ParamRaw),
            member_refs: rows!(view, MemberRefRaw),
            constants: rows!(view, ConstantRaw),
            type_refs: rows!(view, TypeRefRaw),
            assembly_refs: rows!(view, AssemblyRefRaw),
        }
    }

    pub fn string(&self, index: u32) -> Result<String, ImageError> {
        if index == 0 {
            return Ok(String::new());
        }
        let strings = self
            .strings
            .ok_or_else(|| ImageError::Metadata("missing #Strings heap".to_string()))?;
        Ok(strings.get(index as usize)?.to_string())
    }

    pub fn blob(&self, index: u32) -> Result<Vec<u8>, ImageError> {
        if index == 0 {
            return Ok(Vec::new());
        }
        let blobs = self
            .blobs
            .ok_or_else(|| ImageError::Metadata("missing #Blob heap".to_string()))?;
        Ok(blobs.get(index as usize)?.to_vec())
    }

    fn user_string(&self, index: u32) -> Result<String, ImageError> {
        let user_strings = self
            .user_strings
            .ok_or_else(|| ImageError::Metadata("missing #US heap".to_string()))?;
        Ok(user_strings.get(index as usize)?.to_string_lossy())
    }

    /// Name from the assembly row, or the module name for a bare module
    pub fn assembly_name(&self) -> Result<String, ImageError> {
        match (&self.assembly, self.modules.first()) {
            (Some(assembly), _) => self.string(assembly.name),
            (None, Some(module)) => self.string(module.name),
            (None, None) => Err(ImageError::Metadata(
                "image has neither an assembly nor a module row".to_string(),
            )),
        }
    }

    fn version(&self) -> Result<AssemblyVersion, ImageError> {
        let Some(assembly) = &self.assembly else {
            return Ok(AssemblyVersion::default());
        };
        let part = |value: u32| {
            u16::try_from(value)
                .map_err(|_| ImageError::Metadata(format!("version part {value} out of range")))
        };
        Ok(AssemblyVersion::new(
            part(assembly.major_version)?,
            part(assembly.minor_version)?,
            part(assembly.build_number)?,
            part(assembly.revision_number)?,
        ))
    }

    pub fn type_def_name(&self, index: usize) -> Result<String, ImageError> {
        let row = &self.type_defs[index];
        Ok(full_name(
            &self.string(row.type_namespace)?,
            &self.string(row.type_name)?,
        ))
    }

    pub fn type_ref_name(&self, rid: u32) -> Result<String, ImageError> {
        let row = row_at(&self.type_refs, rid, "TypeRef")?;
        Ok(full_name(
            &self.string(row.type_namespace)?,
            &self.string(row.type_name)?,
        ))
    }

    pub fn assembly_ref_name(&self, rid: u32) -> Result<String, ImageError> {
        let row = row_at(&self.assembly_refs, rid, "AssemblyRef")?;
        self.string(row.name)
    }

    /// Assembly a type reference resolves against
    ///
    /// Nested references are followed to their outermost type; anything not
    /// scoped to another assembly lives in this one.
    pub fn scope_name(&self, scope: &CodedIndex) -> Result<String, ImageError> {
        let mut scope = scope.clone();
        for _ in 0..self.type_refs.len() + 1 {
            match scope.tag {
                TableId::AssemblyRef => return self.assembly_ref_name(scope.row),
                TableId::TypeRef => {
                    scope = row_at(&self.type_refs, scope.row, "TypeRef")?
                        .resolution_scope
                        .clone();
                }
                _ => return self.assembly_name(),
            }
        }
        Err(ImageError::Metadata(
            "type reference scopes form a cycle".to_string(),
        ))
    }

    pub fn method_range(&self, type_index: usize) -> Range<usize> {
        list_range(
            &self.type_defs,
            type_index,
            |row| row.method_list,
            self.method_defs.len(),
        )
    }

    pub fn field_range(&self, type_index: usize) -> Range<usize> {
        list_range(
            &self.type_defs,
            type_index,
            |row| row.field_list,
            self.fields.len(),
        )
    }

    pub fn param_range(&self, method_index: usize) -> Range<usize> {
        list_range(
            &self.method_defs,
            method_index,
            |row| row.param_list,
            self.params.len(),
        )
    }

    fn method_owner(&self, rid: u32) -> Option<usize> {
        let index = usize::try_from(rid).ok()?.checked_sub(1)?;
        (0..self.type_defs.len()).find(|&t| self.method_range(t).contains(&index))
    }

    fn field_owner(&self, rid: u32) -> Option<usize> {
        let index = usize::try_from(rid).ok()?.checked_sub(1)?;
        (0..self.type_defs.len()).find(|&t| self.field_range(t).contains(&index))
    }

    /// Header and code of the body at `rva`; `None` for methods without one
    pub fn body(&self, rva: u32) -> Result<Option<(MethodBody, &'v [u8])>, ImageError> {
        if rva == 0 {
            return Ok(None);
        }
        let offset = self.view.file().rva_to_offset(rva as usize)?;
        let data = self
            .view
            .data()
            .get(offset..)
            .ok_or_else(|| ImageError::Metadata(format!("body RVA 0x{rva:08X} out of range")))?;
        let header = MethodBody::from(data)?;
        let code = data
            .get(header.size_header..header.size_header + header.size_code)
            .ok_or_else(|| ImageError::Metadata(format!("body at RVA 0x{rva:08X} truncated")))?;
        Ok(Some((header, code)))
    }

    fn type_def(&self, index: usize) -> Result<TypeDef, ImageError> {
        let row = &self.type_defs[index];

        let mut fields = Vec::new();
        for field_index in self.field_range(index) {
            fields.push(self.field_def(&self.fields[field_index])?);
        }

        let mut methods = Vec::new();
        for method_index in self.method_range(index) {
            methods.push(self.method_def(&self.method_defs[method_index])?);
        }

        Ok(TypeDef {
            namespace: self.string(row.type_namespace)?,
            name: self.string(row.type_name)?,
            flags: row.flags,
            fields,
            methods,
            rid: Backing::new(row.rid),
        })
    }

    fn field_def(&self, row: &FieldRaw) -> Result<FieldDef, ImageError> {
        let constant = self
            .constants
            .iter()
            .find(|c| c.parent.tag == TableId::Field && c.parent.row == row.rid)
            .map(|c| self.constant(c))
            .transpose()?
            .flatten();

        Ok(FieldDef {
            name: self.string(row.name)?,
            flags: narrow_flags(row.flags)?,
            constant,
            rid: Backing::new(row.rid),
            signature: Backing::new(self.blob(row.signature)?),
        })
    }

    /// Constants of kinds the model has no variant for read as `None`
    fn constant(&self, row: &ConstantRaw) -> Result<Option<Constant>, ImageError> {
        let value = self.blob(row.value)?;
        let constant = match row.base {
            ELEMENT_STRING => {
                let units: Vec<u16> = value
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                Some(Constant::String(String::from_utf16_lossy(&units)))
            }
            ELEMENT_I4 => value
                .first_chunk::<4>()
                .map(|b| Constant::Int32(i32::from_le_bytes(*b))),
            ELEMENT_I8 => value
                .first_chunk::<8>()
                .map(|b| Constant::Int64(i64::from_le_bytes(*b))),
            ELEMENT_BOOLEAN => value.first().map(|b| Constant::Boolean(*b != 0)),
            _ => None,
        };
        Ok(constant)
    }

    fn method_def(&self, row: &MethodDefRaw) -> Result<MethodDef, ImageError> {
        let name = self.string(row.name)?;

        let (body, info) = match self.body(row.rva)? {
            Some((header, code)) => {
                let body = self.decode_body(&name, code)?;
                let info = BodyInfo {
                    max_stack: u16::try_from(header.max_stack).unwrap_or(u16::MAX),
                    local_sig: header.local_var_sig_token,
                    init_locals: header.is_init_local,
                    code_size: narrow(header.size_code as u64)?,
                    clauses: header
                        .exception_handlers
                        .iter()
                        .map(|handler| Clause {
                            flags: handler.flags.bits(),
                            try_offset: handler.try_offset,
                            try_length: handler.try_length,
                            handler_offset: handler.handler_offset,
                            handler_length: handler.handler_length,
                            class_or_filter: handler.filter_offset,
                        })
                        .collect(),
                };
                (body, Backing::new(info))
            }
            None => (Vec::new(), Backing::none()),
        };

        Ok(MethodDef {
            name,
            flags: narrow_flags(row.flags)?,
            body,
            rid: Backing::new(row.rid),
            signature: Backing::new(self.blob(row.signature)?),
            info,
        })
    }

    fn decode_body(&self, method: &str, code: &[u8]) -> Result<Vec<Instruction>, ImageError> {
        let mut parser = Parser::new(code);
        let decoded = assembly::decode_stream(&mut parser, 0)
            .map_err(|e| ImageError::body(method, e.to_string()))?;
        decoded
            .iter()
            .map(|raw| self.decode_instruction(raw))
            .collect()
    }

    fn decode_instruction(&self, raw: &assembly::Instruction) -> Result<Instruction, ImageError> {
        let opcode = if raw.prefix == 0xFE {
            OpCode(0xFE00 | u16::from(raw.opcode))
        } else {
            OpCode(u16::from(raw.opcode))
        };
        let span = Span {
            offset: narrow(raw.offset)?,
            size: narrow(raw.size)?,
        };
        let next = i64::from(span.offset) + i64::from(span.size);

        let operand = match (&raw.operand, raw.flow_type) {
            (
                assembly::Operand::Immediate(delta),
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave,
            ) => Operand::Branch(branch_target(next, signed(delta))?),
            (assembly::Operand::Switch(deltas), _) => Operand::Switch(
                deltas
                    .iter()
                    .map(|d| branch_target(next, i64::from(i32::from_le_bytes(d.to_le_bytes()))))
                    .collect::<Result<_, _>>()?,
            ),
            (assembly::Operand::Immediate(value), _) => immediate(value),
            (assembly::Operand::Token(token), _) => self.resolve_token(token.value())?,
            (assembly::Operand::Local(index) | assembly::Operand::Argument(index), _) => {
                Operand::Int32(i32::from(*index))
            }
            (assembly::Operand::Target(target), _) => Operand::Branch(narrow(*target)?),
            (assembly::Operand::None, _) => Operand::None,
        };

        Ok(Instruction::decoded(opcode, operand, span))
    }

    /// Turn a metadata token into the operand it names
    fn resolve_token(&self, token: u32) -> Result<Operand, ImageError> {
        let row = token & TOKEN_ROW_MASK;
        let operand = match token >> TOKEN_TABLE_SHIFT {
            0x70 => Operand::String(self.user_string(row)?),
            0x01 => Operand::Type(self.type_ref_name(row)?),
            0x02 => match usize::try_from(row).ok().and_then(|r| r.checked_sub(1)) {
                Some(index) if index < self.type_defs.len() => {
                    Operand::Type(self.type_def_name(index)?)
                }
                _ => Operand::Token(token),
            },
            0x04 => match self.field_owner(row) {
                Some(owner) => {
                    let field = row_at(&self.fields, row, "Field")?;
                    Operand::Field(MemberRef::imported(
                        self.type_def_name(owner)?,
                        self.string(field.name)?,
                        Import {
                            scope: self.assembly_name()?,
                            signature: self.blob(field.signature)?,
                        },
                    ))
                }
                None => Operand::Token(token),
            },
            0x06 => match self.method_owner(row) {
                Some(owner) => {
                    let method = row_at(&self.method_defs, row, "MethodDef")?;
                    Operand::Method(MemberRef::imported(
                        self.type_def_name(owner)?,
                        self.string(method.name)?,
                        Import {
                            scope: self.assembly_name()?,
                            signature: self.blob(method.signature)?,
                        },
                    ))
                }
                None => Operand::Token(token),
            },
            0x0A => self.member_ref_operand(row)?.unwrap_or(Operand::Token(token)),
            _ => Operand::Token(token),
        };
        Ok(operand)
    }

    /// Member references whose parent is a type; others stay raw tokens
    fn member_ref_operand(&self, rid: u32) -> Result<Option<Operand>, ImageError> {
        let row = row_at(&self.member_refs, rid, "MemberRef")?;
        let (declaring_type, scope) = match row.class.tag {
            TableId::TypeRef => {
                let type_ref = row_at(&self.type_refs, row.class.row, "TypeRef")?;
                (
                    self.type_ref_name(row.class.row)?,
                    self.scope_name(&type_ref.resolution_scope)?,
                )
            }
            TableId::TypeDef => {
                let index = usize::try_from(row.class.row)
                    .ok()
                    .and_then(|r| r.checked_sub(1))
                    .filter(|&i| i < self.type_defs.len())
                    .ok_or_else(|| ImageError::Metadata(format!("bad TypeDef row {}", row.class.row)))?;
                (self.type_def_name(index)?, self.assembly_name()?)
            }
            _ => return Ok(None),
        };

        let signature = self.blob(row.signature)?;
        let is_field = signature.first() == Some(&FIELD_SIGNATURE);
        let member = MemberRef::imported(
            declaring_type,
            self.string(row.name)?,
            Import { scope, signature },
        );
        Ok(Some(if is_field {
            Operand::Field(member)
        } else {
            Operand::Method(member)
        }))
    }
}

/// Rows `[start, next start)` of a list column, clamped to the target table
fn list_range<T>(rows: &[T], index: usize, start: impl Fn(&T) -> u32, len: usize) -> Range<usize> {
    let begin = |row: &T| (start(row) as usize).saturating_sub(1).min(len);
    let first = begin(&rows[index]);
    let end = rows.get(index + 1).map_or(len, begin);
    first..end.max(first)
}

fn row_at<'r, T>(rows: &'r [T], rid: u32, table: &str) -> Result<&'r T, ImageError> {
    usize::try_from(rid)
        .ok()
        .and_then(|r| r.checked_sub(1))
        .and_then(|index| rows.get(index))
        .ok_or_else(|| ImageError::Metadata(format!("{table} row {rid} out of range")))
}

fn narrow(value: u64) -> Result<u32, ImageError> {
    u32::try_from(value).map_err(|_| ImageError::Metadata(format!("offset {value} out of range")))
}

fn narrow_flags(flags: u32) -> Result<u16, ImageError> {
    u16::try_from(flags).map_err(|_| ImageError::Metadata(format!("flags 0x{flags:X} out of range")))
}

fn signed(value: &Immediate) -> i64 {
    match *value {
        Immediate::Int8(v) => i64::from(v),
        Immediate::UInt8(v) => i64::from(v),
        Immediate::Int16(v) => i64::from(v),
        Immediate::UInt16(v) => i64::from(v),
        Immediate::Int32(v) => i64::from(v),
        Immediate::UInt32(v) => i64::from(v),
        Immediate::Int64(v) => v,
        Immediate::UInt64(v) => i64::from_le_bytes(v.to_le_bytes()),
        Immediate::Float32(v) => i64::from(v.to_bits()),
        Immediate::Float64(v) => i64::from_le_bytes(v.to_bits().to_le_bytes()),
    }
}

fn immediate(value: &Immediate) -> Operand {
    match *value {
        Immediate::Int8(v) => Operand::Int32(i32::from(v)),
        Immediate::UInt8(v) => Operand::Int32(i32::from(v)),
        Immediate::Int16(v) => Operand::Int32(i32::from(v)),
        Immediate::UInt16(v) => Operand::Int32(i32::from(v)),
        Immediate::Int32(v) => Operand::Int32(v),
        Immediate::UInt32(v) => Operand::Int32(i32::from_le_bytes(v.to_le_bytes())),
        Immediate::Int64(v) => Operand::Int64(v),
        Immediate::UInt64(v) => Operand::Int64(i64::from_le_bytes(v.to_le_bytes())),
        Immediate::Float32(v) => Operand::Float(u64::from(v.to_bits())),
        Immediate::Float64(v) => Operand::Float(v.to_bits()),
    }
}

fn branch_target(next: i64, delta: i64) -> Result<u32, ImageError> {
    u32::try_from(next + delta)
        .map_err(|_| ImageError::Metadata(format!("branch target {} out of range", next + delta)))
}
