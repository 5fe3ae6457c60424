//! Embedded bootstrap template
//!
//! `bootstrap.dll` is a managed assembly holding the marker type and its start
//! routine, which hands over to the mod manager's loader. It is decoded once
//! on first use; every injection clones the type out of it.

use std::sync::LazyLock;

use super::{MARKER_FULL_NAME, MARKER_START};
use crate::error::{self, Result};
use crate::module::{ImageError, Module, TypeDef};

const TEMPLATE_BYTES: &[u8] = include_bytes!("bootstrap.dll");

const TEMPLATE_SOURCE: &str = "<embedded bootstrap template>";

static TEMPLATE: LazyLock<std::result::Result<Module, ImageError>> =
    LazyLock::new(|| Module::load(TEMPLATE_BYTES));

/// Fresh copy of the marker type with its start routine
pub fn starter_type() -> Result<TypeDef> {
    let module = TEMPLATE
        .as_ref()
        .map_err(|e| error::module::load_failed(TEMPLATE_SOURCE, e.to_string()))?;

    let starter = module
        .find_type(MARKER_FULL_NAME)
        .ok_or_else(|| error::module::load_failed(TEMPLATE_SOURCE, "marker type missing"))?;

    if starter.find_method(MARKER_START).is_none() {
        return Err(error::module::load_failed(
            TEMPLATE_SOURCE,
            "marker type has no start routine",
        ));
    }

    Ok(starter.clone())
}
