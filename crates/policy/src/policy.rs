use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

use crate::capability::Capability;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid deny pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Policy already contains {0}")]
    Duplicate(String),
    #[error("Policy version must be at least 1")]
    InvalidVersion,
}

/// A raw-text pattern checked by the lexical pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyPattern {
    pub capability: Capability,
    pub pattern: String,
    pub description: String,
}

impl DenyPattern {
    pub fn new(capability: Capability, pattern: &str, description: &str) -> Self {
        Self {
            capability,
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }

    pub fn compile(&self) -> Result<Regex, PolicyError> {
        Regex::new(&self.pattern).map_err(|e| PolicyError::InvalidPattern {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })
    }
}

/// One append-only change to a policy. Every change produces a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyChange {
    AllowModule { module: String },
    DenyPattern { pattern: DenyPattern },
    DenyName { name: String, capability: Capability },
    DenyAttribute { attribute: String, capability: Capability },
    ReserveName { name: String },
}

/// Versioned allow/deny lists consulted by the static validator and the
/// sandbox runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorPolicy {
    pub version: u32,
    pub max_source_bytes: usize,
    pub allowed_modules: BTreeSet<String>,
    pub deny_patterns: Vec<DenyPattern>,
    pub denied_names: BTreeMap<String, Capability>,
    pub denied_attributes: BTreeMap<String, Capability>,
    pub reserved_names: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<PolicyChange>,
}

impl ValidatorPolicy {
    pub fn load_str(content: &str) -> Result<Self, PolicyError> {
        let policy: ValidatorPolicy = serde_yaml::from_str(content)?;
        policy.check()?;
        Ok(policy)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let content = tokio::fs::read_to_string(&path).await?;
        Self::load_str(&content)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PolicyError> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Reject policies whose patterns do not compile.
    pub fn check(&self) -> Result<(), PolicyError> {
        if self.version == 0 {
            return Err(PolicyError::InvalidVersion);
        }
        for pattern in &self.deny_patterns {
            pattern.compile()?;
        }
        Ok(())
    }

    /// Apply `change` and return the next policy version. The receiver is
    /// left untouched so verdicts issued under it stay reproducible.
    pub fn bump(&self, change: PolicyChange) -> Result<Self, PolicyError> {
        let mut next = self.clone();
        match &change {
            PolicyChange::AllowModule { module } => {
                if !next.allowed_modules.insert(module.clone()) {
                    return Err(PolicyError::Duplicate(format!("module {module}")));
                }
            }
            PolicyChange::DenyPattern { pattern } => {
                pattern.compile()?;
                if next.deny_patterns.iter().any(|p| p.pattern == pattern.pattern) {
                    return Err(PolicyError::Duplicate(format!("pattern {}", pattern.pattern)));
                }
                next.deny_patterns.push(pattern.clone());
            }
            PolicyChange::DenyName { name, capability } => {
                if next.denied_names.insert(name.clone(), *capability).is_some() {
                    return Err(PolicyError::Duplicate(format!("name {name}")));
                }
            }
            PolicyChange::DenyAttribute {
                attribute,
                capability,
            } => {
                if next
                    .denied_attributes
                    .insert(attribute.clone(), *capability)
                    .is_some()
                {
                    return Err(PolicyError::Duplicate(format!("attribute {attribute}")));
                }
            }
            PolicyChange::ReserveName { name } => {
                if !next.reserved_names.insert(name.clone()) {
                    return Err(PolicyError::Duplicate(format!("reserved name {name}")));
                }
            }
        }
        next.version += 1;
        next.history.push(change);
        Ok(next)
    }

    pub fn is_module_allowed(&self, module: &str) -> bool {
        let root = module.split('.').next().unwrap_or(module);
        self.allowed_modules.contains(root)
    }

    pub fn denied_name(&self, name: &str) -> Option<Capability> {
        self.denied_names.get(name).copied()
    }

    pub fn denied_attribute(&self, attribute: &str) -> Option<Capability> {
        if is_dunder(attribute) {
            return Some(Capability::Reflection);
        }
        self.denied_attributes.get(attribute).copied()
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_names.contains(name) || is_dunder(name)
    }
}

pub fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            version: 1,
            max_source_bytes: 64 * 1024,
            allowed_modules: default_allowed_modules(),
            deny_patterns: default_deny_patterns(),
            denied_names: default_denied_names(),
            denied_attributes: default_denied_attributes(),
            reserved_names: default_reserved_names(),
            history: Vec::new(),
        }
    }
}

fn default_allowed_modules() -> BTreeSet<String> {
    ["math", "string", "json", "collections", "datetime"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_deny_patterns() -> Vec<DenyPattern> {
    use Capability::*;
    vec![
        DenyPattern::new(FileIo, r"\b(?:open|file)\s*\(", "file open call"),
        DenyPattern::new(
            FileIo,
            r"\.(?:read|readline|readlines|write|writelines|read_text|write_text|read_bytes|write_bytes)\s*\(",
            "file read/write call",
        ),
        DenyPattern::new(
            FileIo,
            r"\bos\.(?:remove|unlink|rmdir|removedirs|mkdir|makedirs|rename|replace|listdir|scandir|walk|open|path|truncate)\b",
            "filesystem call through os",
        ),
        DenyPattern::new(
            FileIo,
            r"\b(?:shutil|pathlib|tempfile|glob|fileinput|io)\.\w+",
            "filesystem module access",
        ),
        DenyPattern::new(FileIo, r"\bjson\.(?:load|dump)\s*\(", "file-based JSON call"),
        DenyPattern::new(Process, r"\bsubprocess\b", "subprocess module"),
        DenyPattern::new(
            Process,
            r"\bos\.(?:system|popen|spawn\w*|exec\w*|fork\w*|kill\w*|_exit|abort)\b",
            "process call through os",
        ),
        DenyPattern::new(
            Process,
            r"\b(?:multiprocessing|threading|pty|signal|ctypes|cffi)\b",
            "process or native interface module",
        ),
        DenyPattern::new(
            DynamicExec,
            r"\b(?:eval|exec|compile|execfile)\s*\(",
            "dynamic code execution",
        ),
        DenyPattern::new(DynamicImport, r"\b__import__\b", "dynamic import hook"),
        DenyPattern::new(DynamicImport, r"\bimportlib\b", "importlib"),
        DenyPattern::new(
            Network,
            r"\b(?:socket|urllib\d?|requests|httpx|aiohttp|ftplib|smtplib|telnetlib|paramiko|websocket|websockets)\b",
            "network module",
        ),
        DenyPattern::new(Network, r"\bhttp\.client\b", "http client"),
        DenyPattern::new(
            Environment,
            r"\bos\.(?:environ|getenv|putenv|unsetenv|chdir|getcwd|getpid|getuid|uname)\b",
            "environment access through os",
        ),
        DenyPattern::new(
            Environment,
            r"\bsys\.(?:argv|path|modules|stdin|stdout|stderr|exit|settrace|setprofile)\b",
            "interpreter state through sys",
        ),
        DenyPattern::new(Environment, r"\bgetenv\s*\(", "environment lookup"),
        DenyPattern::new(BuiltinsTamper, r"\b__builtins__\b", "built-in namespace"),
        DenyPattern::new(BuiltinsTamper, r"\bbuiltins\b", "builtins module"),
        DenyPattern::new(
            Reflection,
            r"\b(?:getattr|setattr|delattr|globals|locals|vars)\s*\(",
            "reflective lookup",
        ),
        DenyPattern::new(
            Reflection,
            r"__(?:class|bases|base|subclasses|mro|globals|code|dict|closure|func|self|getattribute|reduce|reduce_ex|init|new|call|loader|spec)__",
            "dunder attribute",
        ),
    ]
}

fn default_denied_names() -> BTreeMap<String, Capability> {
    use Capability::*;
    [
        ("open", FileIo),
        ("eval", DynamicExec),
        ("exec", DynamicExec),
        ("compile", DynamicExec),
        ("execfile", DynamicExec),
        ("__import__", DynamicImport),
        ("reload", DynamicImport),
        ("importlib", DynamicImport),
        ("getattr", Reflection),
        ("setattr", Reflection),
        ("delattr", Reflection),
        ("globals", Reflection),
        ("locals", Reflection),
        ("vars", Reflection),
        ("memoryview", Reflection),
        ("input", Environment),
        ("help", Environment),
        ("breakpoint", Process),
        ("exit", Process),
        ("quit", Process),
        ("__builtins__", BuiltinsTamper),
        ("builtins", BuiltinsTamper),
        ("os", Process),
        ("sys", Environment),
        ("subprocess", Process),
        ("socket", Network),
    ]
    .into_iter()
    .map(|(name, cap)| (name.to_string(), cap))
    .collect()
}

fn default_denied_attributes() -> BTreeMap<String, Capability> {
    use Capability::*;
    [
        ("system", Process),
        ("popen", Process),
        ("spawn", Process),
        ("fork", Process),
        ("kill", Process),
        ("environ", Environment),
        ("getenv", Environment),
        ("putenv", Environment),
        ("chdir", Environment),
        ("getcwd", Environment),
        ("listdir", FileIo),
        ("unlink", FileIo),
        ("rmdir", FileIo),
        ("mkdir", FileIo),
        ("makedirs", FileIo),
        ("rename", FileIo),
        ("read", FileIo),
        ("readline", FileIo),
        ("readlines", FileIo),
        ("write", FileIo),
        ("writelines", FileIo),
        ("read_text", FileIo),
        ("write_text", FileIo),
        ("read_bytes", FileIo),
        ("write_bytes", FileIo),
        ("load", FileIo),
        ("dump", FileIo),
        ("urlopen", Network),
        ("connect", Network),
        ("modules", Environment),
    ]
    .into_iter()
    .map(|(name, cap)| (name.to_string(), cap))
    .collect()
}

fn default_reserved_names() -> BTreeSet<String> {
    [
        "__builtins__",
        "builtins",
        "__import__",
        "__name__",
        "__file__",
        "__loader__",
        "__spec__",
        "__dict__",
    ]
    .iter()
    .map(|n| n.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_patterns_compile() {
        let policy = ValidatorPolicy::default();
        assert!(policy.check().is_ok());
        assert_eq!(policy.version, 1);
    }

    #[test]
    fn test_default_covers_every_capability() {
        let policy = ValidatorPolicy::default();
        for cap in Capability::ALL {
            assert!(
                policy.deny_patterns.iter().any(|p| p.capability == cap),
                "no lexical pattern for {cap}"
            );
        }
    }

    #[test]
    fn test_bump_is_append_only_and_versioned() {
        let v1 = ValidatorPolicy::default();
        let v2 = v1
            .bump(PolicyChange::AllowModule {
                module: "statistics".into(),
            })
            .unwrap();

        assert_eq!(v2.version, 2);
        assert!(v2.is_module_allowed("statistics"));
        assert!(!v1.is_module_allowed("statistics"));
        assert_eq!(v2.history.len(), 1);
    }

    #[test]
    fn test_bump_rejects_duplicates() {
        let policy = ValidatorPolicy::default();
        let result = policy.bump(PolicyChange::AllowModule {
            module: "math".into(),
        });
        assert!(matches!(result, Err(PolicyError::Duplicate(_))));
    }

    #[test]
    fn test_bump_rejects_bad_regex() {
        let policy = ValidatorPolicy::default();
        let result = policy.bump(PolicyChange::DenyPattern {
            pattern: DenyPattern::new(Capability::Network, "(unclosed", "bad"),
        });
        assert!(matches!(result, Err(PolicyError::InvalidPattern { .. })));
    }

    #[test]
    fn test_submodule_allow_uses_root() {
        let policy = ValidatorPolicy::default();
        assert!(policy.is_module_allowed("collections.abc"));
        assert!(!policy.is_module_allowed("os.path"));
    }

    #[test]
    fn test_dunder_attributes_always_denied() {
        let policy = ValidatorPolicy::default();
        assert_eq!(
            policy.denied_attribute("__anything__"),
            Some(Capability::Reflection)
        );
        assert_eq!(policy.denied_attribute("upper"), None);
    }

    #[tokio::test]
    async fn test_yaml_roundtrip_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        let policy = ValidatorPolicy::default()
            .bump(PolicyChange::ReserveName {
                name: "config".into(),
            })
            .unwrap();

        policy.save(&path).await.unwrap();
        let loaded = ValidatorPolicy::load(&path).await.unwrap();
        assert_eq!(loaded, policy);
        assert_eq!(loaded.version, 2);
    }
}
