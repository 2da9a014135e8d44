use serde::{Deserialize, Serialize};

/// Description of the external toolchain used to build and run sources
///
/// Commands are full argument vectors whose first element is the program.
/// Placeholders: `{module}`, `{entry}`, `{binary}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    /// Creates the build unit inside the workspace (skipped when empty)
    pub init_command: Vec<String>,

    /// Builds the entry file into `binary_name`.
    ///
    /// When set, building and running happen as two separate processes and the
    /// compile/execute timings are exact. When unset, `run_command` is expected
    /// to compile and run in one step and the split is approximate.
    pub build_command: Option<Vec<String>>,

    /// Runs the program
    pub run_command: Vec<String>,

    /// Name of the single source file written into the workspace (e.g., "main.go")
    pub entry_file: String,

    /// Output name substituted for `{binary}`
    pub binary_name: String,

    /// Environment variable carrying build tags (e.g., "GOFLAGS")
    pub tags_env: String,

    /// Value template for `tags_env`; `{tags}` is the comma-joined tag list
    pub tags_format: String,

    /// Import paths rejected by the validator
    pub denied_imports: Vec<String>,
}

impl Toolchain {
    /// A toolchain with every field unset, for use in partial overrides
    pub fn empty() -> Self {
        Self {
            init_command: Vec::new(),
            build_command: None,
            run_command: Vec::new(),
            entry_file: String::new(),
            binary_name: String::new(),
            tags_env: String::new(),
            tags_format: String::new(),
            denied_imports: Vec::new(),
        }
    }

    /// Whether the toolchain builds and runs in separate steps
    pub fn has_build_step(&self) -> bool {
        self.build_command
            .as_ref()
            .is_some_and(|command| !command.is_empty())
    }

    /// Apply the set fields of `other` over `self`
    pub fn merge(&self, other: &Toolchain) -> Toolchain {
        let mut merged = self.clone();

        if !other.init_command.is_empty() {
            merged.init_command = other.init_command.clone();
        }
        if other.build_command.is_some() {
            merged.build_command = other.build_command.clone();
        }
        if !other.run_command.is_empty() {
            merged.run_command = other.run_command.clone();
        }
        if !other.entry_file.is_empty() {
            merged.entry_file = other.entry_file.clone();
        }
        if !other.binary_name.is_empty() {
            merged.binary_name = other.binary_name.clone();
        }
        if !other.tags_env.is_empty() {
            merged.tags_env = other.tags_env.clone();
        }
        if !other.tags_format.is_empty() {
            merged.tags_format = other.tags_format.clone();
        }
        if !other.denied_imports.is_empty() {
            merged.denied_imports = other.denied_imports.clone();
        }

        merged
    }

    /// Expand placeholders in the given command
    pub fn expand(&self, command: &[String], module: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{module}", module)
                    .replace("{entry}", &self.entry_file)
                    .replace("{binary}", &self.binary_name)
            })
            .collect()
    }

    /// The `(name, value)` pair exporting `tags`, if any tags are set
    pub fn tags_variable(&self, tags: &[String]) -> Option<(String, String)> {
        if tags.is_empty() || self.tags_env.is_empty() {
            return None;
        }
        let joined = tags.join(",");
        let value = if self.tags_format.is_empty() {
            joined
        } else {
            self.tags_format.replace("{tags}", &joined)
        };
        Some((self.tags_env.clone(), value))
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            init_command: to_args(&["go", "mod", "init", "{module}"]),
            build_command: None,
            run_command: to_args(&["go", "run", "{entry}"]),
            entry_file: "main.go".to_string(),
            binary_name: "main".to_string(),
            tags_env: "GOFLAGS".to_string(),
            tags_format: "-tags={tags}".to_string(),
            denied_imports: to_args(&["unsafe", "syscall", "reflect"]),
        }
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_string()).collect()
}
