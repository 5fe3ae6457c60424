//! Dropping trailing metadata rows
//!
//! Removed types are cut out of the compressed `#~` table stream directly:
//! their rows are the last ones of each table, so cutting them shortens the
//! tables without renumbering anything that stays. Heaps are left alone,
//! which keeps the strings and blobs the dropped rows pointed to as garbage.

use dotscope::CilAssemblyView;
use dotscope::metadata::tables::{
    ConstantRaw, FieldRaw, InterfaceImplRaw, MemberRefRaw, MethodDefRaw, ModuleRaw, ParamRaw,
    TableId, TableInfoRef, TableRow, TypeDefRaw, TypeRefRaw,
};

use super::ImageError;

const TABLES_STREAM: &str = "#~";
const HEADER_SIZE: usize = 24;
const HEAP_SIZES_OFFSET: usize = 6;
const VALID_OFFSET: usize = 8;
const HEAP_EXTRA_DATA: u8 = 0x40;

/// Row counts at which index columns change width
const WIDTH_THRESHOLDS: [u32; 6] = [1 << 11, 1 << 12, 1 << 13, 1 << 14, 1 << 15, 1 << 16];

/// Rows a table keeps after the cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Cut {
    pub table: TableId,
    pub keep: u32,
}

/// Copy of `bytes` with each table in `cuts` shortened to its `keep` rows
///
/// `view` must be open over `bytes`.
pub(super) fn truncate(
    bytes: &[u8],
    view: &CilAssemblyView,
    cuts: &[Cut],
) -> Result<Vec<u8>, ImageError> {
    let tables = view
        .tables()
        .ok_or_else(|| ImageError::Metadata("missing metadata tables".to_string()))?;
    let stream = view
        .streams()
        .iter()
        .find(|s| s.name == TABLES_STREAM)
        .ok_or_else(|| ImageError::unsupported("removing types from uncompressed metadata"))?;

    let root = view
        .file()
        .rva_to_offset(view.cor20header().meta_data_rva as usize)?;
    let start = root + stream.offset as usize;
    let end = start + stream.size as usize;
    let original = bytes
        .get(start..end)
        .ok_or_else(|| ImageError::Metadata("table stream out of range".to_string()))?;
    if original.get(HEAP_SIZES_OFFSET).is_some_and(|b| b & HEAP_EXTRA_DATA != 0) {
        return Err(ImageError::unsupported(
            "removing types from metadata with extra table data",
        ));
    }

    let present: Vec<TableId> = tables.present_tables().collect();
    let mut stream_bytes = original.to_vec();
    let mut valid = tables.valid;
    // byte ranges of the stream to drop
    let mut drops = Vec::new();

    // row counts; a table cut to nothing loses its count slot and valid bit
    for cut in cuts {
        let count = tables.table_row_count(cut.table);
        if cut.keep > count {
            return Err(ImageError::Metadata(format!(
                "cannot shorten {:?} from {count} to {} rows",
                cut.table, cut.keep
            )));
        }
        if WIDTH_THRESHOLDS
            .iter()
            .any(|&t| cut.keep < t && t <= count)
        {
            return Err(ImageError::unsupported(format!(
                "shortening {:?} would change index widths",
                cut.table
            )));
        }
        let slot = present
            .iter()
            .position(|&id| id == cut.table)
            .ok_or_else(|| ImageError::Metadata(format!("{:?} table is absent", cut.table)))?;
        let at = HEADER_SIZE + 4 * slot;
        if cut.keep == 0 {
            valid &= !(1u64 << (cut.table as u8));
            drops.push((at, at + 4));
        } else {
            stream_bytes[at..at + 4].copy_from_slice(&cut.keep.to_le_bytes());
        }
    }
    stream_bytes[VALID_OFFSET..VALID_OFFSET + 8].copy_from_slice(&valid.to_le_bytes());

    // row data
    let mut offset = HEADER_SIZE + 4 * present.len();
    for &id in &present {
        if cuts.iter().all(|c| (c.table as u8) < (id as u8)) {
            break;
        }
        let row = row_size(id, &tables.info)?;
        let count = tables.table_row_count(id) as usize;
        if let Some(cut) = cuts.iter().find(|c| c.table == id) {
            drops.push((offset + row * cut.keep as usize, offset + row * count));
        }
        offset += row * count;
    }
    if offset > stream_bytes.len() {
        return Err(ImageError::Metadata("table data out of range".to_string()));
    }

    drops.sort_unstable();
    for (from, to) in drops.into_iter().rev() {
        stream_bytes.drain(from..to);
    }
    stream_bytes.resize(original.len(), 0);

    let mut out = bytes.to_vec();
    out[start..end].copy_from_slice(&stream_bytes);
    Ok(out)
}

/// Row size of the tables that sort before the ones a type owns rows in
fn row_size(id: TableId, info: &TableInfoRef) -> Result<usize, ImageError> {
    let size = match id {
        TableId::Module => ModuleRaw::row_size(info),
        TableId::TypeRef => TypeRefRaw::row_size(info),
        TableId::TypeDef => TypeDefRaw::row_size(info),
        TableId::Field => FieldRaw::row_size(info),
        TableId::MethodDef => MethodDefRaw::row_size(info),
        TableId::Param => ParamRaw::row_size(info),
        TableId::InterfaceImpl => InterfaceImplRaw::row_size(info),
        TableId::MemberRef => MemberRefRaw::row_size(info),
        TableId::Constant => ConstantRaw::row_size(info),
        other => {
            return Err(ImageError::unsupported(format!(
                "removing types from metadata with a {other:?} table"
            )));
        }
    };
    Ok(size as usize)
}
