//! Method body assembly
//!
//! A body is rebuilt from its instruction list. Instructions still carrying
//! the span they were decoded from are copied byte for byte out of the
//! original code; everything else is encoded. Branch targets and exception
//! clause boundaries are IL offsets of the body the instructions came from,
//! and are moved to wherever the instruction at that offset ends up. An
//! offset whose instruction was dropped moves to the next one that was kept,
//! so a call inserted right before the target of a branch is skipped by that
//! branch.

use dotscope::assembly::{INSTRUCTIONS, INSTRUCTIONS_FE, OperandType};
use dotscope::metadata::method::encode_method_body_header;

use super::instruction::Span;
use super::{BodyInfo, Clause, ImageError, Instruction, OpCode, Operand};

const INIT_LOCALS: u8 = 0x10;
const SECTION_EH_FAT: u8 = 0x41;
const FAT_CLAUSE_SIZE: u32 = 24;

/// Code a body was decoded from, with the instructions decoded from it
pub(super) struct Original<'a> {
    pub code: &'a [u8],
    pub instructions: &'a [Instruction],
}

/// Operand encoding of a known opcode
#[derive(Debug, Clone, Copy)]
struct Shape {
    operand: OperandType,
    pushes: u8,
}

fn shape(opcode: OpCode) -> Result<Shape, ImageError> {
    let [prefix, code] = opcode.0.to_be_bytes();
    let entry = match prefix {
        0x00 => INSTRUCTIONS.get(code as usize).map(|e| (e.op_type, e.stack_pushes, e.instr.is_empty())),
        0xFE => INSTRUCTIONS_FE
            .get(code as usize)
            .map(|e| (e.op_type, e.stack_pushes, e.instr.is_empty())),
        _ => None,
    };
    match entry {
        Some((operand, pushes, false)) => Ok(Shape { operand, pushes }),
        _ => Err(ImageError::unsupported(format!("unknown opcode {opcode}"))),
    }
}

fn operand_size(shape: Shape, operand: &Operand) -> usize {
    match shape.operand {
        OperandType::None => 0,
        OperandType::Int8 | OperandType::UInt8 => 1,
        OperandType::Int16 | OperandType::UInt16 => 2,
        OperandType::Int32 | OperandType::UInt32 | OperandType::Float32 | OperandType::Token => 4,
        OperandType::Int64 | OperandType::UInt64 | OperandType::Float64 => 8,
        OperandType::Switch => match operand {
            Operand::Switch(targets) => 4 + 4 * targets.len(),
            _ => 4,
        },
    }
}

/// How one instruction gets into the new code
enum Piece {
    Copy(Span),
    Encode(Shape),
}

/// Old-to-new offset translation for one body
struct OffsetMap {
    /// `(old offset, new offset, new size)` sorted by old offset
    entries: Vec<(u32, u32, u32)>,
    end: u32,
}

impl OffsetMap {
    /// New offset of the first kept instruction at or after `old`
    fn map(&self, old: u32) -> u32 {
        let index = self.entries.partition_point(|&(o, _, _)| o < old);
        self.entries.get(index).map_or(self.end, |&(_, new, _)| new)
    }

    /// New end of the last kept instruction before `old`
    ///
    /// Region ends map this way, so code inserted right after a region
    /// stays outside it.
    fn map_end(&self, old: u32) -> u32 {
        let index = self.entries.partition_point(|&(o, _, _)| o < old);
        match index.checked_sub(1).and_then(|i| self.entries.get(i)) {
            Some(&(_, new, size)) => new + size,
            None => self.map(old),
        }
    }
}

/// Encode `body` into a complete method body: header, code and exception
/// clauses
///
/// `resolve` turns an operand into the metadata token written for it.
pub(super) fn assemble(
    method: &str,
    body: &[Instruction],
    info: Option<&BodyInfo>,
    original: Option<&Original<'_>>,
    resolve: &mut dyn FnMut(&Operand) -> Result<u32, ImageError>,
) -> Result<Vec<u8>, ImageError> {
    let fail = |message: String| ImageError::body(method, message);

    let mut used = vec![false; original.map_or(0, |o| o.instructions.len())];
    let mut pieces = Vec::with_capacity(body.len());
    let mut offsets = Vec::with_capacity(body.len());
    let mut size = 0usize;
    let mut added_pushes = 0u16;

    for instr in body {
        let piece = match retained(instr, original, &mut used) {
            Some(span) => Piece::Copy(span),
            None => {
                let shape = shape(instr.opcode)?;
                if instr.span.get().is_none() {
                    added_pushes = added_pushes.saturating_add(u16::from(shape.pushes));
                }
                Piece::Encode(shape)
            }
        };
        offsets.push(u32::try_from(size).map_err(|_| fail("code too large".to_string()))?);
        size += match &piece {
            Piece::Copy(span) => span.size as usize,
            Piece::Encode(shape) => instr.opcode.encode().len() + operand_size(*shape, &instr.operand),
        };
        pieces.push(piece);
    }
    let code_size = u32::try_from(size).map_err(|_| fail("code too large".to_string()))?;

    let mut entries: Vec<(u32, u32, u32)> = body
        .iter()
        .enumerate()
        .filter_map(|(i, instr)| {
            let span = instr.span.get()?;
            let end = offsets.get(i + 1).copied().unwrap_or(code_size);
            Some((span.offset, offsets[i], end - offsets[i]))
        })
        .collect();
    entries.sort_by_key(|&(old, _, _)| old);
    entries.dedup_by_key(|&mut (old, _, _)| old);
    let offsets_map = OffsetMap {
        entries,
        end: code_size,
    };

    let mut code = Vec::with_capacity(size);
    for ((instr, piece), &offset) in body.iter().zip(&pieces).zip(&offsets) {
        match piece {
            Piece::Copy(span) => {
                let start = span.offset as usize;
                let bytes = original
                    .and_then(|o| o.code.get(start..start + span.size as usize))
                    .ok_or_else(|| fail(format!("span at IL_{:04X} out of range", span.offset)))?;
                code.extend_from_slice(bytes);
            }
            Piece::Encode(shape) => {
                encode(instr, *shape, offset, &offsets_map, &mut code, resolve)
                    .map_err(|e| match e {
                        ImageError::Metadata(message) => fail(message),
                        other => other,
                    })?;
            }
        }
    }

    let (local_sig, init_locals, base_stack, clauses) = match info {
        Some(info) => (
            info.local_sig,
            info.init_locals,
            info.max_stack,
            info.clauses.as_slice(),
        ),
        None => (0, false, 0, &[][..]),
    };
    let max_stack = base_stack.saturating_add(added_pushes);
    let mut out = encode_method_body_header(code_size, max_stack, local_sig, !clauses.is_empty())?;
    if out.len() > 1 && init_locals {
        out[0] |= INIT_LOCALS;
    }
    out.extend_from_slice(&code);

    if !clauses.is_empty() {
        write_clauses(&mut out, clauses, &offsets_map, method)?;
    }
    Ok(out)
}

/// Span to copy `instr` from, if it is an untouched original instruction
///
/// Branches are always re-encoded, since their distance may change.
fn retained(
    instr: &Instruction,
    original: Option<&Original<'_>>,
    used: &mut [bool],
) -> Option<Span> {
    let original = original?;
    let span = *instr.span.get()?;
    if matches!(instr.operand, Operand::Branch(_) | Operand::Switch(_)) {
        return None;
    }
    let index = original
        .instructions
        .binary_search_by_key(&span.offset, |i| i.span.get().map_or(u32::MAX, |s| s.offset))
        .ok()?;
    let source = &original.instructions[index];
    if used[index] || source != instr || source.span.get() != Some(&span) {
        return None;
    }
    used[index] = true;
    Some(span)
}

fn encode(
    instr: &Instruction,
    shape: Shape,
    offset: u32,
    offsets: &OffsetMap,
    code: &mut Vec<u8>,
    resolve: &mut dyn FnMut(&Operand) -> Result<u32, ImageError>,
) -> Result<(), ImageError> {
    let opcode = instr.opcode.encode();
    let next = i64::from(offset) + (opcode.len() + operand_size(shape, &instr.operand)) as i64;
    code.extend_from_slice(&opcode);

    let mismatch = || {
        ImageError::Metadata(format!(
            "operand {:?} does not fit {}",
            instr.operand, instr.opcode
        ))
    };

    match (shape.operand, &instr.operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::Int8, Operand::Branch(target)) => {
            let delta = i64::from(offsets.map(*target)) - next;
            let delta = i8::try_from(delta).map_err(|_| {
                ImageError::Metadata(format!(
                    "short branch to IL_{target:04X} no longer reaches its target"
                ))
            })?;
            code.extend_from_slice(&delta.to_le_bytes());
        }
        (OperandType::Int32, Operand::Branch(target)) => {
            let delta = i32::try_from(i64::from(offsets.map(*target)) - next).map_err(|_| mismatch())?;
            code.extend_from_slice(&delta.to_le_bytes());
        }
        (OperandType::Switch, Operand::Switch(targets)) => {
            let count = u32::try_from(targets.len()).map_err(|_| mismatch())?;
            code.extend_from_slice(&count.to_le_bytes());
            for target in targets {
                let delta =
                    i32::try_from(i64::from(offsets.map(*target)) - next).map_err(|_| mismatch())?;
                code.extend_from_slice(&delta.to_le_bytes());
            }
        }
        (OperandType::Int8, Operand::Int32(v)) => {
            code.extend_from_slice(&i8::try_from(*v).map_err(|_| mismatch())?.to_le_bytes());
        }
        (OperandType::UInt8, Operand::Int32(v)) => {
            code.extend_from_slice(&u8::try_from(*v).map_err(|_| mismatch())?.to_le_bytes());
        }
        (OperandType::Int16, Operand::Int32(v)) => {
            code.extend_from_slice(&i16::try_from(*v).map_err(|_| mismatch())?.to_le_bytes());
        }
        (OperandType::UInt16, Operand::Int32(v)) => {
            code.extend_from_slice(&u16::try_from(*v).map_err(|_| mismatch())?.to_le_bytes());
        }
        (OperandType::Int32 | OperandType::UInt32, Operand::Int32(v)) => {
            code.extend_from_slice(&v.to_le_bytes());
        }
        (OperandType::Int64 | OperandType::UInt64, Operand::Int64(v)) => {
            code.extend_from_slice(&v.to_le_bytes());
        }
        (OperandType::Float32, Operand::Float(bits)) => {
            code.extend_from_slice(&u32::try_from(*bits).map_err(|_| mismatch())?.to_le_bytes());
        }
        (OperandType::Float64, Operand::Float(bits)) => {
            code.extend_from_slice(&bits.to_le_bytes());
        }
        (
            OperandType::Token,
            Operand::String(_)
            | Operand::Method(_)
            | Operand::Field(_)
            | Operand::Type(_)
            | Operand::Token(_),
        ) => {
            code.extend_from_slice(&resolve(&instr.operand)?.to_le_bytes());
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn write_clauses(
    out: &mut Vec<u8>,
    clauses: &[Clause],
    offsets: &OffsetMap,
    method: &str,
) -> Result<(), ImageError> {
    while out.len() % 4 != 0 {
        out.push(0);
    }

    let count = u32::try_from(clauses.len())
        .map_err(|_| ImageError::body(method, "too many exception clauses"))?;
    let size = 4 + FAT_CLAUSE_SIZE * count;
    if size > 0x00FF_FFFF {
        return Err(ImageError::body(method, "too many exception clauses"));
    }
    let [s0, s1, s2, _] = size.to_le_bytes();
    out.extend_from_slice(&[SECTION_EH_FAT, s0, s1, s2]);

    for clause in clauses {
        let try_start = offsets.map(clause.try_offset);
        let try_end = offsets.map_end(clause.try_offset + clause.try_length);
        let handler_start = offsets.map(clause.handler_offset);
        let handler_end = offsets.map_end(clause.handler_offset + clause.handler_length);
        let class_or_filter = if clause.flags & Clause::FILTER != 0 {
            offsets.map(clause.class_or_filter)
        } else {
            clause.class_or_filter
        };

        for value in [
            u32::from(clause.flags),
            try_start,
            try_end.saturating_sub(try_start),
            handler_start,
            handler_end.saturating_sub(handler_start),
            class_or_filter,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(())
}
