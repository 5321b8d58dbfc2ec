use serde::{Deserialize, Serialize};

use crate::hashing::FastHashMap;

/// The per-module part of a capture preset: which functions to re-select,
/// identified by the stable hash of their demangled names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetModule {
    pub function_hashes: Vec<u64>,
}

/// A capture preset, keyed by module path. How presets get to disk and back
/// is the host's business; applying one walks each module's demangled-name
/// index and selects every function it can find.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    pub modules: FastHashMap<String, PresetModule>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashing::hash_string;
    use crate::module::Module;
    use crate::symbol_table::{ModuleSymbols, SymbolInfo};

    #[test]
    fn preset_selects_only_named_functions() {
        let mut module = Module::new("/usr/lib/libm.so", 0x40000, 0x50000);
        module.load_symbols(ModuleSymbols {
            load_bias: 0,
            symbols_file_path: String::new(),
            symbols: vec![
                SymbolInfo {
                    name: "_Z3barv".to_string(),
                    demangled_name: "bar".to_string(),
                    address: 0x100,
                    size: 0x20,
                    ..Default::default()
                },
                SymbolInfo {
                    name: "_Z3bazv".to_string(),
                    demangled_name: "baz".to_string(),
                    address: 0x200,
                    size: 0x20,
                    ..Default::default()
                },
            ],
        });

        let mut preset = Preset::default();
        preset.modules.insert(
            "/usr/lib/libm.so".to_string(),
            PresetModule {
                // One matching hash, one that matches nothing.
                function_hashes: vec![hash_string("bar"), hash_string("vanished")],
            },
        );
        module.apply_preset(&preset);

        let table = module.symbol_table().unwrap();
        assert!(table.function_from_name("bar").unwrap().is_selected());
        assert!(!table.function_from_name("baz").unwrap().is_selected());
    }

    #[test]
    fn preset_parses_from_host_json() {
        let json = r#"{"modules":{"/usr/lib/libm.so":{"function_hashes":[17,42]}}}"#;
        let preset: Preset = serde_json::from_str(json).unwrap();
        assert_eq!(
            preset.modules["/usr/lib/libm.so"].function_hashes,
            vec![17, 42]
        );
    }

    #[test]
    fn preset_for_other_module_is_ignored() {
        let mut module = Module::new("/usr/lib/libm.so", 0x40000, 0x50000);
        module.load_symbols(ModuleSymbols {
            load_bias: 0,
            symbols_file_path: String::new(),
            symbols: vec![SymbolInfo {
                demangled_name: "bar".to_string(),
                address: 0x100,
                ..Default::default()
            }],
        });

        let mut preset = Preset::default();
        preset.modules.insert(
            "/usr/lib/libother.so".to_string(),
            PresetModule {
                function_hashes: vec![hash_string("bar")],
            },
        );
        module.apply_preset(&preset);

        let table = module.symbol_table().unwrap();
        assert!(!table.function_from_name("bar").unwrap().is_selected());
    }
}
