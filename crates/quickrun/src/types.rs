use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome classification of a compile-and-run cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompilationStatus {
    /// Program built and exited with code 0
    #[default]
    Success,

    /// Workspace or build unit setup failed before the program could run
    CompileError,

    /// The program ran and failed, or the compiler refused the call
    RuntimeError,

    /// The configured deadline expired before completion
    Timeout,

    /// Static validation rejected the source; nothing was run
    ValidationError,

    /// Served from the result cache
    CacheHit,
}

impl CompilationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilationStatus::Success => "success",
            CompilationStatus::CompileError => "compile_error",
            CompilationStatus::RuntimeError => "runtime_error",
            CompilationStatus::Timeout => "timeout",
            CompilationStatus::ValidationError => "validation_error",
            CompilationStatus::CacheHit => "cache_hit",
        }
    }

    /// Whether this status may accompany `success == true`
    #[must_use]
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            CompilationStatus::Success | CompilationStatus::CacheHit
        )
    }
}

impl fmt::Display for CompilationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one compile-and-run cycle
///
/// A result is always produced, whatever went wrong; failures are encoded in
/// [`status`](Self::status) and the error text fields. `success` is only ever
/// true together with [`CompilationStatus::Success`] or
/// [`CompilationStatus::CacheHit`] and empty error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationResult {
    pub status: CompilationStatus,

    pub success: bool,

    /// Captured stdout of the program
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<u8>,

    /// Captured stderr of the program
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub error_output: Vec<u8>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compilation_error: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_error: String,

    pub exit_code: i32,

    /// Wall time of the whole call
    #[serde(with = "duration_nanos")]
    pub duration: Duration,

    #[serde(with = "duration_nanos")]
    pub compile_time: Duration,

    #[serde(with = "duration_nanos")]
    pub execution_time: Duration,

    /// Peak resident memory of the toolchain process tree in bytes
    pub memory_used: u64,

    pub cache_hit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Content hash of the source
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl CompilationResult {
    /// A fresh successful result stamped with the current time
    pub fn new() -> Self {
        Self {
            status: CompilationStatus::Success,
            success: true,
            content: Vec::new(),
            error_output: Vec::new(),
            compilation_error: String::new(),
            runtime_error: String::new(),
            exit_code: 0,
            duration: Duration::ZERO,
            compile_time: Duration::ZERO,
            execution_time: Duration::ZERO,
            memory_used: 0,
            cache_hit: false,
            file_path: None,
            hash: String::new(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// A failed result carrying `message` as its runtime error text
    pub fn error(status: CompilationStatus, message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.fail_runtime(status, message);
        result
    }

    /// A failed result carrying `message` as its compilation error text
    pub fn compile_error(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.fail_compile(CompilationStatus::CompileError, message);
        result
    }

    /// Mark this result failed with compile-phase error text
    pub(crate) fn fail_compile(&mut self, status: CompilationStatus, message: impl Into<String>) {
        self.status = status;
        self.success = false;
        self.compilation_error = message.into();
        if self.exit_code == 0 {
            self.exit_code = 1;
        }
    }

    /// Mark this result failed with run-phase error text
    pub(crate) fn fail_runtime(&mut self, status: CompilationStatus, message: impl Into<String>) {
        self.status = status;
        self.success = false;
        self.runtime_error = message.into();
        if self.exit_code == 0 {
            self.exit_code = 1;
        }
    }

    /// Captured stdout as text (lossy)
    pub fn content_str(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Human-readable error text for the result's status
    pub fn error_message(&self) -> String {
        match self.status {
            CompilationStatus::CompileError => self.compilation_error.clone(),
            CompilationStatus::RuntimeError => self.runtime_error.clone(),
            CompilationStatus::Timeout => "operation timed out".to_string(),
            CompilationStatus::ValidationError => "code validation failed".to_string(),
            CompilationStatus::Success | CompilationStatus::CacheHit => {
                String::from_utf8_lossy(&self.error_output).into_owned()
            }
        }
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.success || !self.status.is_successful()
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl Default for CompilationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompilationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "CompilationResult{{status: {}, duration: {:?}, content: {} bytes}}",
                self.status,
                self.duration,
                self.content.len()
            )
        } else {
            write!(
                f,
                "CompilationResult{{status: {}, error: {}, duration: {:?}}}",
                self.status,
                self.error_message(),
                self.duration
            )
        }
    }
}

/// Outcome of the static source check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    /// Denied imports found in the source
    #[serde(default)]
    pub unsafe_imports: Vec<String>,

    /// Line count divided by ten
    pub complexity_score: usize,

    #[serde(with = "duration_nanos")]
    pub validation_time: Duration,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            unsafe_imports: Vec::new(),
            complexity_score: 0,
            validation_time: Duration::ZERO,
        }
    }

    /// Record an error; any error makes the result invalid
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.valid = false;
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_unsafe_import(&mut self, import: impl Into<String>) {
        self.unsafe_imports.push(import.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has_unsafe_imports(&self) -> bool {
        !self.unsafe_imports.is_empty()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize byte buffers as standard base64 text
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(de::Error::custom)
    }
}

/// Serialize durations as integer nanoseconds
pub(crate) mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

/// Serialize durations as (fractional) seconds, the unit used in config files
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
