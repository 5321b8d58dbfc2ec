use std::collections::BTreeMap;

use crate::function::Function;
use crate::hashing::FastHashMap;
use crate::module::Module;
use crate::preset::Preset;
use crate::symbol_table::ModuleSymbols;

/// A non-owning reference to a function: the start address of its module plus
/// its index in that module's symbol table. Unloading or replacing the module
/// invalidates every handle pointing into it; [`Process`] drops such
/// directory entries when that happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle {
    pub(crate) module_start: u64,
    pub(crate) function_index: usize,
}

/// The per-process module index.
///
/// Resolution requests carry absolute program counters; the process finds the
/// module whose range contains the counter and delegates to its symbol table.
/// The process additionally keeps two process-wide directories: a reverse
/// lookup from a function's absolute entry point to the function, and the
/// address-to-name directory that sample aggregation publishes resolved names
/// into.
///
/// A process is shared between the capture machinery and the aggregator as
/// `Arc<Mutex<Process>>`; the aggregator keeps the mutex locked for the whole
/// of its resolution pass so symbol loads cannot mutate function tables
/// mid-resolution.
#[derive(Debug, Default)]
pub struct Process {
    pid: i32,
    modules: BTreeMap<u64, Module>,
    function_directory: FastHashMap<u64, FunctionHandle>,
    address_to_function_name: FastHashMap<u64, String>,
    address_to_module_name: FastHashMap<u64, String>,
}

impl Process {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Registers a module. A module already mapped at the same start address
    /// is replaced, and directory entries into the old module are dropped.
    pub fn add_module(&mut self, module: Module) {
        let start = module.address_start();
        if self.modules.insert(start, module).is_some() {
            log::warn!("Replacing module mapped at {start:#x}");
            self.function_directory
                .retain(|_, handle| handle.module_start != start);
        }
    }

    /// The module whose address range contains `absolute_address`.
    pub fn module_for_address(&self, absolute_address: u64) -> Option<&Module> {
        let (_, module) = self.modules.range(..=absolute_address).next_back()?;
        module.contains_address(absolute_address).then_some(module)
    }

    /// Resolves an absolute program counter to a function, either requiring
    /// the counter to be exactly a function entry point or accepting the
    /// nearest-lower owner.
    pub fn function_for_address(
        &self,
        absolute_address: u64,
        require_exact: bool,
    ) -> Option<&Function> {
        let module = self.module_for_address(absolute_address)?;
        if require_exact {
            module.function_at_exact(absolute_address)
        } else {
            module.function_containing(absolute_address)
        }
    }

    /// Installs a symbol payload into the module mapped at `module_start` and
    /// registers every new function in the process-wide directory. Returns
    /// false if no module is mapped there.
    pub fn load_module_symbols(&mut self, module_start: u64, payload: ModuleSymbols) -> bool {
        let Some(module) = self.modules.get_mut(&module_start) else {
            log::error!("No module mapped at {module_start:#x}, dropping symbols");
            return false;
        };

        module.load_symbols(payload);

        let entries: Vec<(u64, FunctionHandle)> = module
            .symbol_table()
            .map(|table| {
                table
                    .functions()
                    .iter()
                    .enumerate()
                    .map(|(function_index, function)| {
                        (
                            function.absolute_address(),
                            FunctionHandle {
                                module_start,
                                function_index,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (absolute_address, handle) in entries {
            self.add_function(absolute_address, handle);
        }
        true
    }

    /// Registers one function in the reverse directory, keyed by its absolute
    /// entry point.
    pub fn add_function(&mut self, absolute_address: u64, handle: FunctionHandle) {
        self.function_directory.insert(absolute_address, handle);
    }

    /// Reverse lookup: the function whose absolute entry point is exactly
    /// `absolute_address`.
    pub fn function_from_absolute_address(&self, absolute_address: u64) -> Option<&Function> {
        let handle = self.function_directory.get(&absolute_address)?;
        let table = self.modules.get(&handle.module_start)?.symbol_table()?;
        table.functions().get(handle.function_index)
    }

    pub fn set_function_name(&mut self, address: u64, name: String) {
        self.address_to_function_name.insert(address, name);
    }

    pub fn function_name_for_address(&self, address: u64) -> Option<&str> {
        self.address_to_function_name
            .get(&address)
            .map(String::as_str)
    }

    /// Records which module an address was resolved in. Resolved function
    /// entry points live in their symbol table's bias-adjusted address space,
    /// where a range lookup can no longer find the owning module; this
    /// directory keeps the association.
    pub fn set_module_name(&mut self, address: u64, name: String) {
        self.address_to_module_name.insert(address, name);
    }

    pub fn module_name_for_address(&self, address: u64) -> Option<&str> {
        self.address_to_module_name
            .get(&address)
            .map(String::as_str)
    }

    pub fn apply_preset(&mut self, preset: &Preset) {
        for module in self.modules.values_mut() {
            module.apply_preset(preset);
        }
    }

    pub fn selected_functions(&self) -> impl Iterator<Item = &Function> {
        self.modules
            .values()
            .filter_map(|module| module.symbol_table())
            .flat_map(|table| table.functions().iter().filter(|f| f.is_selected()))
    }
}
