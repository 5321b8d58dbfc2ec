use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::function::Function;
use crate::hashing::{hash_string, FastHashMap};

/// One symbol from an already-parsed symbol file. `address` is in the
/// load-bias-adjusted address space of the owning module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
    pub source_file: String,
    pub source_line: u32,
}

/// The full symbol payload for one module, delivered by whoever parsed the
/// executable image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSymbols {
    pub load_bias: u64,
    pub symbols_file_path: String,
    pub symbols: Vec<SymbolInfo>,
}

/// The per-module mapping from relative address to [`Function`].
///
/// Keys of the ordered map are unique; a containing-function lookup takes the
/// greatest key at or below the queried address. The table is immutable once
/// built, except for function selection flags.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    load_bias: u64,
    symbols_file_path: String,
    functions: Vec<Function>,
    address_map: BTreeMap<u64, usize>,
    name_hash_index: FastHashMap<u64, usize>,
}

impl SymbolTable {
    pub(crate) fn new(module_path: &str, module_base: u64, payload: ModuleSymbols) -> Self {
        let functions: Vec<Function> = payload
            .symbols
            .iter()
            .map(|symbol| Function::new(symbol, payload.load_bias, module_path, module_base))
            .collect();

        let mut address_map = BTreeMap::new();
        let mut name_hash_index = FastHashMap::default();
        for (index, function) in functions.iter().enumerate() {
            address_map.insert(function.virtual_address(), index);
            name_hash_index.insert(function.hash(), index);
        }

        Self {
            load_bias: payload.load_bias,
            symbols_file_path: payload.symbols_file_path,
            functions,
            address_map,
            name_hash_index,
        }
    }

    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    pub fn symbols_file_path(&self) -> &str {
        &self.symbols_file_path
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// The function whose entry point is exactly `relative_address`.
    pub fn function_at(&self, relative_address: u64) -> Option<&Function> {
        let index = *self.address_map.get(&relative_address)?;
        Some(&self.functions[index])
    }

    /// The function with the greatest entry point at or below
    /// `relative_address`, or `None` if the address is below every known
    /// function. The function's size is deliberately not consulted.
    pub fn function_containing(&self, relative_address: u64) -> Option<&Function> {
        let (_, &index) = self.address_map.range(..=relative_address).next_back()?;
        Some(&self.functions[index])
    }

    pub fn function_by_name_hash(&self, hash: u64) -> Option<&Function> {
        let index = *self.name_hash_index.get(&hash)?;
        Some(&self.functions[index])
    }

    pub fn function_from_name(&self, demangled_name: &str) -> Option<&Function> {
        self.function_by_name_hash(hash_string(demangled_name))
    }

    pub(crate) fn select_by_name_hash(&mut self, hash: u64) -> bool {
        match self.name_hash_index.get(&hash) {
            Some(&index) => {
                self.functions[index].select();
                true
            }
            None => false,
        }
    }
}
