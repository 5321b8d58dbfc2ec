use std::path::Path;

use crate::function::Function;
use crate::preset::Preset;
use crate::symbol_table::{ModuleSymbols, SymbolTable};

/// Returned by [`Module::validate_address`] when an address is neither inside
/// the module nor a plausible offset into it. Consumers must treat this as
/// "not an address", never as a valid program counter.
pub const INVALID_ADDRESS: u64 = 0x0000_0000_00ba_dadd;

/// A loaded executable image: a file path plus the half-open absolute address
/// range `[address_start, address_end)` it occupies in the traced process.
///
/// A module starts out without symbols. Once [`Module::load_symbols`] has
/// installed a [`SymbolTable`], `is_loaded` reports true and program counters
/// inside the range can be resolved to functions.
#[derive(Debug, Clone)]
pub struct Module {
    path: String,
    name: String,
    directory: String,
    file_size: u64,
    address_start: u64,
    address_end: u64,
    loadable: bool,
    loaded: bool,
    symbol_table: Option<SymbolTable>,
}

impl Module {
    /// A missing file is logged but not fatal: modules are routinely created
    /// from mapping metadata before the image is reachable on this machine.
    pub fn new(path: &str, address_start: u64, address_end: u64) -> Self {
        debug_assert!(address_start < address_end);

        let file_size = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                log::error!("Creating module from path {path:?}: file does not exist");
                0
            }
        };

        let p = Path::new(path);
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let directory = p
            .parent()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            path: path.to_string(),
            name,
            directory,
            file_size,
            address_start,
            address_end,
            loadable: true,
            loaded: false,
            symbol_table: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The file's base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn address_start(&self) -> u64 {
        self.address_start
    }

    pub fn address_end(&self) -> u64 {
        self.address_end
    }

    pub fn pretty_name(&self) -> &str {
        &self.path
    }

    pub fn address_range_string(&self) -> String {
        format!("[{:016x} - {:016x}]", self.address_start, self.address_end)
    }

    /// Whether loading symbols for this module is permitted at all.
    pub fn is_loadable(&self) -> bool {
        self.loadable
    }

    pub fn set_loadable(&mut self, loadable: bool) {
        self.loadable = loadable;
    }

    /// Whether symbols have been resolved for this module.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn symbol_table(&self) -> Option<&SymbolTable> {
        self.symbol_table.as_ref()
    }

    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.address_start && address < self.address_end
    }

    /// Accepts either an absolute address inside the module or a relative
    /// offset into it; anything else maps to [`INVALID_ADDRESS`].
    pub fn validate_address(&self, address: u64) -> u64 {
        if self.contains_address(address) {
            return address;
        }

        let rebased = self.address_start.wrapping_add(address);
        if self.contains_address(rebased) {
            return rebased;
        }

        INVALID_ADDRESS
    }

    /// Installs a symbol table built from `payload`. Re-loading overwrites
    /// the previous table with a warning.
    pub fn load_symbols(&mut self, payload: ModuleSymbols) {
        if self.symbol_table.is_some() {
            log::warn!(
                "Module {} already contained symbols, overwriting",
                self.name
            );
        }

        self.symbol_table = Some(SymbolTable::new(&self.path, self.address_start, payload));
        self.loaded = true;
    }

    fn relative_address(&self, absolute_address: u64, table: &SymbolTable) -> u64 {
        absolute_address
            .wrapping_sub(self.address_start)
            .wrapping_add(table.load_bias())
    }

    /// The function whose entry point is exactly at `absolute_address`.
    pub fn function_at_exact(&self, absolute_address: u64) -> Option<&Function> {
        let table = self.symbol_table.as_ref()?;
        table.function_at(self.relative_address(absolute_address, table))
    }

    /// The function owning `absolute_address`, by nearest-lower entry point.
    pub fn function_containing(&self, absolute_address: u64) -> Option<&Function> {
        let table = self.symbol_table.as_ref()?;
        table.function_containing(self.relative_address(absolute_address, table))
    }

    /// Re-selects the functions a preset names for this module's path.
    /// Hashes with no matching function are skipped.
    pub fn apply_preset(&mut self, preset: &Preset) {
        let Some(preset_module) = preset.modules.get(&self.path) else {
            return;
        };
        let Some(table) = self.symbol_table.as_mut() else {
            return;
        };

        for &hash in &preset_module.function_hashes {
            table.select_by_name_hash(hash);
        }
    }
}
