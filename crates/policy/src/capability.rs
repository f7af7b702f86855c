use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability categories a tool is never granted. The snake_case name doubles
/// as the violation rule id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FileIo,
    Process,
    DynamicExec,
    DynamicImport,
    Network,
    Environment,
    BuiltinsTamper,
    Reflection,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::FileIo,
        Capability::Process,
        Capability::DynamicExec,
        Capability::DynamicImport,
        Capability::Network,
        Capability::Environment,
        Capability::BuiltinsTamper,
        Capability::Reflection,
    ];

    pub fn rule_id(self) -> &'static str {
        match self {
            Capability::FileIo => "file_io",
            Capability::Process => "process",
            Capability::DynamicExec => "dynamic_exec",
            Capability::DynamicImport => "dynamic_import",
            Capability::Network => "network",
            Capability::Environment => "environment",
            Capability::BuiltinsTamper => "builtins_tamper",
            Capability::Reflection => "reflection",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Capability::FileIo => "file I/O",
            Capability::Process => "process or system invocation",
            Capability::DynamicExec => "dynamic code execution",
            Capability::DynamicImport => "dynamic import",
            Capability::Network => "network access",
            Capability::Environment => "environment access",
            Capability::BuiltinsTamper => "built-in namespace tampering",
            Capability::Reflection => "reflection",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rule_id())
    }
}

/// Rule ids produced by the structural pass only.
pub mod rules {
    pub const IMPORT_NOT_ALLOWED: &str = "import_not_allowed";
    pub const RESERVED_REBIND: &str = "reserved_rebind";
    pub const CLOSURE_CAPTURE: &str = "closure_capture";
    pub const MALFORMED_SOURCE: &str = "malformed_source";
    pub const ENTRY_POINT: &str = "entry_point";
    pub const SOURCE_TOO_LARGE: &str = "source_too_large";
}
