//! The capability allowlist.
//!
//! These tables are the complete set of host functionality a strategy can
//! name. The checker consults them at compile time; the interpreter
//! resolves module attributes through `libs::module_member`, which must
//! cover exactly the members listed here.

/// An importable module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    Backtesting,
    BacktestingLib,
    Numpy,
    Pandas,
    Talib,
}

impl ModuleId {
    pub fn path(self) -> &'static str {
        match self {
            ModuleId::Backtesting => "backtesting",
            ModuleId::BacktestingLib => "backtesting.lib",
            ModuleId::Numpy => "numpy",
            ModuleId::Pandas => "pandas",
            ModuleId::Talib => "talib",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        ALL_MODULES.iter().copied().find(|m| m.path() == path)
    }

    /// Names reachable as attributes of the module.
    pub fn members(self) -> &'static [&'static str] {
        match self {
            ModuleId::Backtesting => &["Strategy", "lib"],
            ModuleId::BacktestingLib => &["crossover", "cross", "barssince"],
            ModuleId::Numpy => NUMPY_MEMBERS,
            ModuleId::Pandas => &["Series", "isna", "notna"],
            ModuleId::Talib => TALIB_MEMBERS,
        }
    }

    pub fn has_member(self, name: &str) -> bool {
        self.members().contains(&name)
    }
}

pub const ALL_MODULES: &[ModuleId] = &[
    ModuleId::Backtesting,
    ModuleId::BacktestingLib,
    ModuleId::Numpy,
    ModuleId::Pandas,
    ModuleId::Talib,
];

const NUMPY_MEMBERS: &[&str] = &[
    "array", "asarray", "mean", "std", "sum", "min", "max", "abs", "sqrt", "log", "exp", "isnan",
    "ones", "zeros", "full", "arange", "diff", "cumsum", "maximum", "minimum", "convolve", "where",
    "clip", "sign", "nan", "inf",
];

const TALIB_MEMBERS: &[&str] = &[
    "SMA", "EMA", "RSI", "ATR", "MACD", "BBANDS", "STDDEV", "ROC", "MOM", "MAX", "MIN",
];

/// What a prelude name is bound to before the script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreludeItem {
    StrategyBase,
    Crossover,
    Module(ModuleId),
}

/// Names every script starts with, no import needed.
pub const PRELUDE: &[(&str, PreludeItem)] = &[
    ("Strategy", PreludeItem::StrategyBase),
    ("crossover", PreludeItem::Crossover),
    ("numpy", PreludeItem::Module(ModuleId::Numpy)),
    ("np", PreludeItem::Module(ModuleId::Numpy)),
    ("pandas", PreludeItem::Module(ModuleId::Pandas)),
    ("pd", PreludeItem::Module(ModuleId::Pandas)),
    ("talib", PreludeItem::Module(ModuleId::Talib)),
];

pub fn prelude_item(name: &str) -> Option<PreludeItem> {
    PRELUDE.iter().find(|(n, _)| *n == name).map(|(_, item)| *item)
}

/// Safe builtins. `print` exists but does nothing.
pub const BUILTINS: &[&str] = &[
    "abs", "min", "max", "len", "round", "int", "float", "bool", "str", "list", "tuple", "range",
    "sum", "zip", "sorted", "pow", "print",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Attributes of a strategy instance that belong to the engine.
pub const RESERVED_API: &[&str] = &[
    "data",
    "position",
    "equity",
    "buy",
    "sell",
    "I",
    "closed_trades",
];

pub fn is_reserved_api(name: &str) -> bool {
    RESERVED_API.contains(&name)
}

/// Names that may never appear as identifiers or attributes.
pub fn is_forbidden_name(name: &str) -> bool {
    name.starts_with("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_paths_round_trip() {
        for &module in ALL_MODULES {
            assert_eq!(ModuleId::from_path(module.path()), Some(module));
        }
        assert_eq!(ModuleId::from_path("os"), None);
        assert_eq!(ModuleId::from_path("numpy.linalg"), None);
    }

    #[test]
    fn prelude_and_builtins_are_disjoint() {
        for (name, _) in PRELUDE {
            assert!(!is_builtin(name), "{name} is both prelude and builtin");
        }
    }

    #[test]
    fn dangerous_names_are_not_allowlisted() {
        for name in ["open", "eval", "exec", "compile", "getattr", "globals", "type", "vars"] {
            assert!(!is_builtin(name));
            assert!(prelude_item(name).is_none());
        }
        assert!(is_forbidden_name("__import__"));
        assert!(!is_forbidden_name("_sma"));
    }
}
