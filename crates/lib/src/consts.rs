//! Crate-wide constants.

/// Application name, used for config/cache directory names.
pub const APP_NAME: &str = "stackr";

/// The `apiVersion` every stackr document must declare.
pub const API_VERSION: &str = "stackr.dev/v1";

/// `kind` of a service definition document.
pub const KIND_SERVICE: &str = "Service";

/// `kind` of a service override document.
pub const KIND_OVERRIDE: &str = "ServiceOverride";

/// `kind` of a source configuration document.
pub const KIND_SOURCE_CONFIG: &str = "SourceConfig";

/// `kind` of a lock file document.
pub const KIND_LOCK_FILE: &str = "LockFile";

/// File name of a service definition inside its service directory.
pub const DEFINITION_FILENAME: &str = "service.yaml";

/// File name of an optional override next to a service definition.
pub const OVERRIDE_FILENAME: &str = "override.yaml";

/// Directory holding always-on services inside a source root.
pub const CORE_DIR: &str = "core";

/// Directory holding opt-in services inside a source root.
pub const ADDONS_DIR: &str = "addons";

/// Name of the always-present embedded source.
pub const EMBEDDED_SOURCE_NAME: &str = "embedded";

/// Priority of the embedded source. It is always consulted last.
pub const EMBEDDED_PRIORITY: i32 = -1;

/// Commit sentinel reported by the embedded source.
pub const EMBEDDED_COMMIT: &str = "embedded";

/// Number of digest bytes kept in a service definition hash.
pub const DEFINITION_HASH_BYTES: usize = 8;

/// Number of digest bytes kept in a configuration hash.
pub const CONFIG_HASH_BYTES: usize = 16;

/// Prefix of every hash string produced by this crate.
pub const HASH_PREFIX: &str = "sha256:";

/// Default lock file name, written at the project root.
pub const LOCK_FILENAME: &str = ".stackr.lock";

/// Lock file schema version.
pub const LOCK_SCHEMA_VERSION: &str = "1";

/// Name of the cache metadata file inside the cache directory.
pub const CACHE_METADATA_FILENAME: &str = "metadata.json";
