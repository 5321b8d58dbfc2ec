use serde::{Deserialize, Serialize};

use crate::hashing::hash_string;
use crate::symbol_table::SymbolInfo;

/// A named code region inside a module.
///
/// The `address` is the load-bias-adjusted entry point ("virtual address"),
/// i.e. the address space in which the module's symbol table is indexed. The
/// identity of a function is (module path, relative address); the name hash
/// is only used for preset matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    name: String,
    pretty_name: String,
    address: u64,
    size: u64,
    load_bias: u64,
    module_path: String,
    module_base: u64,
    source_file: String,
    source_line: u32,
    hash: u64,
    selected: bool,
}

impl Function {
    pub(crate) fn new(
        symbol: &SymbolInfo,
        load_bias: u64,
        module_path: &str,
        module_base: u64,
    ) -> Self {
        Self {
            name: symbol.name.clone(),
            pretty_name: symbol.demangled_name.clone(),
            address: symbol.address,
            size: symbol.size,
            load_bias,
            module_path: module_path.to_string(),
            module_base,
            source_file: symbol.source_file.clone(),
            source_line: symbol.source_line,
            hash: hash_string(&symbol.demangled_name),
            selected: false,
        }
    }

    /// The mangled name, exactly as it appeared in the symbol payload.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    pub fn virtual_address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn source_line(&self) -> u32 {
        self.source_line
    }

    /// Stable hash of the demangled name, used for preset matching.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The address of the entry point in the traced process.
    pub fn absolute_address(&self) -> u64 {
        self.module_base + self.address - self.load_bias
    }

    /// Offset of the entry point within the module's file image, as sent to
    /// the agent when instrumenting this function.
    pub fn file_offset(&self) -> u64 {
        self.address - self.load_bias
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn select(&mut self) {
        self.selected = true;
    }

    pub fn deselect(&mut self) {
        self.selected = false;
    }
}
