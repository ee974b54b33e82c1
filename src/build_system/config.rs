// Toolchain and library configuration for the build engine
// The core only ever reads a resolved snapshot; loading and saving live here for the front ends

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build_system::request::{CompilerKind, Library};

/// Host operating system, used for ABI-dependent decisions (extensions, loader paths)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    MacOS,
}

impl Platform {
    /// Platform the current binary was compiled for
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    /// File extension of native executables, empty on Unix
    pub fn executable_extension(&self) -> &'static str {
        match self {
            Platform::Windows => "exe",
            Platform::Linux | Platform::MacOS => "",
        }
    }

    /// File extension of shared libraries
    pub fn shared_library_extension(&self) -> &'static str {
        match self {
            Platform::Windows => "dll",
            Platform::Linux => "so",
            Platform::MacOS => "dylib",
        }
    }

    /// Environment variable the dynamic loader consults for extra library directories
    pub fn loader_path_variable(&self) -> Option<&'static str> {
        match self {
            Platform::Linux => Some("LD_LIBRARY_PATH"),
            Platform::MacOS => Some("DYLD_LIBRARY_PATH"),
            Platform::Windows => None,
        }
    }

    pub fn path_list_separator(&self) -> char {
        match self {
            Platform::Windows => ';',
            Platform::Linux | Platform::MacOS => ':',
        }
    }
}

/// Settings for one compiler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler executable; `None` or an empty path means "not configured"
    pub path: Option<PathBuf>,
    /// Language standard and warning flags appended to every compile
    pub default_flags: Vec<String>,
    /// Flags added when a debug build is requested
    pub debug_flags: Vec<String>,
    /// Threading/runtime libraries linked into every native artifact
    pub linked_libs: Vec<String>,
    /// Archiver used for the second stage of static library builds
    pub archiver: Option<PathBuf>,
}

impl CompilerConfig {
    /// Configured compiler path, ignoring empty entries
    pub fn executable(&self) -> Option<&Path> {
        non_empty(self.path.as_deref())
    }

    /// Configured static archiver, `None` when unset or empty
    pub fn archiver_executable(&self) -> Option<&Path> {
        non_empty(self.archiver.as_deref())
    }
}

/// Per-compiler replacement values for a library entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryOverride {
    pub include_dirs: Option<Vec<PathBuf>>,
    pub lib_dirs: Option<Vec<PathBuf>>,
    pub link_names: Option<Vec<String>>,
}

/// Location and link names of a third-party library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub include_dirs: Vec<PathBuf>,
    pub lib_dirs: Vec<PathBuf>,
    pub link_names: Vec<String>,
    pub overrides: BTreeMap<CompilerKind, LibraryOverride>,
}

/// Library settings after applying the override for one compiler
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLibrary {
    pub include_dirs: Vec<PathBuf>,
    pub lib_dirs: Vec<PathBuf>,
    pub link_names: Vec<String>,
}

impl LibraryConfig {
    /// Flags for `compiler`, with its override applied field by field
    pub fn resolve_for(&self, compiler: CompilerKind) -> ResolvedLibrary {
        let over = self.overrides.get(&compiler);
        let pick_paths = |base: &Vec<PathBuf>, replaced: Option<&Vec<PathBuf>>| {
            replaced
                .unwrap_or(base)
                .iter()
                .filter(|p| !p.as_os_str().is_empty())
                .cloned()
                .collect::<Vec<_>>()
        };

        ResolvedLibrary {
            include_dirs: pick_paths(&self.include_dirs, over.and_then(|o| o.include_dirs.as_ref())),
            lib_dirs: pick_paths(&self.lib_dirs, over.and_then(|o| o.lib_dirs.as_ref())),
            link_names: over
                .and_then(|o| o.link_names.clone())
                .unwrap_or_else(|| self.link_names.clone()),
        }
    }
}

/// Interpreters and tools used to execute or debug artifacts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Managed runtime for CLR assemblies (mono); `None` runs them directly
    pub managed_runtime: Option<PathBuf>,
    /// JVM launcher (java)
    pub jvm: Option<PathBuf>,
    /// Native debugger (gdb, lldb)
    pub debugger: Option<PathBuf>,
}

/// Which runtime entry an artifact needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeKind {
    ManagedRuntime,
    Jvm,
    Debugger,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::ManagedRuntime => write!(f, "managed runtime"),
            RuntimeKind::Jvm => write!(f, "JVM"),
            RuntimeKind::Debugger => write!(f, "debugger"),
        }
    }
}

impl RuntimeConfig {
    /// Configured path of `kind`, `None` when unset or empty
    pub fn path_for(&self, kind: RuntimeKind) -> Option<&Path> {
        let path = match kind {
            RuntimeKind::ManagedRuntime => self.managed_runtime.as_deref(),
            RuntimeKind::Jvm => self.jvm.as_deref(),
            RuntimeKind::Debugger => self.debugger.as_deref(),
        };
        non_empty(path)
    }
}

/// Headers needed to compile native code that bridges into a host VM (JNI)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostBridgeConfig {
    pub include_dirs: Vec<PathBuf>,
}

/// Resolved toolchain snapshot consumed by the command builder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigModel {
    pub compilers: BTreeMap<CompilerKind, CompilerConfig>,
    pub libraries: BTreeMap<Library, LibraryConfig>,
    pub runtimes: RuntimeConfig,
    pub host_bridge: HostBridgeConfig,
}

/// Errors while reading or writing a configuration document
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read configuration {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write configuration {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("invalid configuration document {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ConfigModel {
    /// Settings for one compiler
    pub fn compiler(&self, kind: CompilerKind) -> Option<&CompilerConfig> {
        self.compilers.get(&kind)
    }

    /// Settings for one library
    pub fn library(&self, library: Library) -> Option<&LibraryConfig> {
        self.libraries.get(&library)
    }

    /// Default toolchain locations for a host
    pub fn host_default(platform: Platform) -> Self {
        match platform {
            Platform::Windows => Self::windows_default(),
            Platform::Linux => Self::unix_default("/usr/lib/x86_64-linux-gnu", "/usr/lib/jvm/default-java/include", "linux"),
            Platform::MacOS => Self::unix_default("/opt/homebrew/lib", "/Library/Java/JavaVirtualMachines/Current/Contents/Home/include", "darwin"),
        }
    }

    fn unix_default(lib_dir: &str, jdk_include: &str, jdk_platform_dir: &str) -> Self {
        let gnu_like = |path: &str, debug: &[&str]| CompilerConfig {
            path: Some(PathBuf::from(path)),
            default_flags: strings(&["-std=c++17", "-Wall", "-Wextra"]),
            debug_flags: strings(debug),
            linked_libs: strings(&["pthread"]),
            archiver: Some(PathBuf::from("ar")),
        };

        let mut compilers = BTreeMap::new();
        compilers.insert(CompilerKind::Gcc, gnu_like("/usr/bin/g++", &["-g", "-ggdb"]));
        compilers.insert(CompilerKind::Clang, gnu_like("/usr/bin/clang++", &["-g"]));
        compilers.insert(CompilerKind::ManagedCompiler, CompilerConfig {
            path: Some(PathBuf::from("/usr/bin/mcs")),
            ..CompilerConfig::default()
        });
        compilers.insert(CompilerKind::JavaCompiler, CompilerConfig {
            path: Some(PathBuf::from("/usr/bin/javac")),
            debug_flags: strings(&["-g"]),
            ..CompilerConfig::default()
        });

        let mut libraries = BTreeMap::new();
        libraries.insert(Library::CryptoPP, LibraryConfig {
            include_dirs: vec![PathBuf::from("/usr/include/cryptopp")],
            lib_dirs: vec![PathBuf::from(lib_dir)],
            link_names: strings(&["cryptopp"]),
            overrides: BTreeMap::new(),
        });
        libraries.insert(Library::OpenSsl, LibraryConfig {
            include_dirs: vec![PathBuf::from("/usr/include/openssl")],
            lib_dirs: vec![PathBuf::from(lib_dir)],
            link_names: strings(&["ssl", "crypto"]),
            overrides: BTreeMap::new(),
        });

        let jdk_include = PathBuf::from(jdk_include);
        Self {
            compilers,
            libraries,
            runtimes: RuntimeConfig {
                managed_runtime: Some(PathBuf::from("/usr/bin/mono")),
                jvm: Some(PathBuf::from("/usr/bin/java")),
                debugger: Some(PathBuf::from("gdb")),
            },
            host_bridge: HostBridgeConfig {
                include_dirs: vec![jdk_include.clone(), jdk_include.join(jdk_platform_dir)],
            },
        }
    }

    fn windows_default() -> Self {
        let mingw = |path: &str| CompilerConfig {
            path: Some(PathBuf::from(path)),
            default_flags: strings(&["-std=c++17", "-Wall", "-D_WIN32_WINNT=0x0501"]),
            debug_flags: strings(&["-g2"]),
            linked_libs: strings(&["pthread"]),
            archiver: Some(PathBuf::from(r"C:\msys64\mingw64\bin\ar.exe")),
        };

        let mut compilers = BTreeMap::new();
        compilers.insert(CompilerKind::Gcc, mingw(r"C:\msys64\mingw64\bin\g++.exe"));
        compilers.insert(CompilerKind::Clang, mingw(r"C:\msys64\mingw64\bin\clang++.exe"));
        compilers.insert(CompilerKind::MsvcLike, CompilerConfig {
            path: Some(PathBuf::from("cl.exe")),
            default_flags: strings(&["/nologo", "/EHsc", "/std:c++17", "/W4", "/MTd", "/GS"]),
            debug_flags: strings(&["/Zi"]),
            linked_libs: strings(&["crypt32", "ws2_32"]),
            archiver: Some(PathBuf::from("lib.exe")),
        });
        compilers.insert(CompilerKind::ManagedCompiler, CompilerConfig {
            path: Some(PathBuf::from("csc.exe")),
            default_flags: strings(&["/nologo", "/warn:4"]),
            ..CompilerConfig::default()
        });
        compilers.insert(CompilerKind::JavaCompiler, CompilerConfig {
            path: Some(PathBuf::from("javac")),
            debug_flags: strings(&["-g"]),
            ..CompilerConfig::default()
        });

        let mut cryptopp_overrides = BTreeMap::new();
        cryptopp_overrides.insert(CompilerKind::MsvcLike, LibraryOverride {
            link_names: Some(strings(&["cryptlib"])),
            ..LibraryOverride::default()
        });
        let mut openssl_overrides = BTreeMap::new();
        openssl_overrides.insert(CompilerKind::MsvcLike, LibraryOverride {
            link_names: Some(strings(&["libssl", "libcrypto"])),
            ..LibraryOverride::default()
        });
        for kind in [CompilerKind::Gcc, CompilerKind::Clang] {
            openssl_overrides.insert(kind, LibraryOverride {
                link_names: Some(strings(&["ssl", "crypto", "crypt32", "ws2_32"])),
                ..LibraryOverride::default()
            });
        }

        let mut libraries = BTreeMap::new();
        libraries.insert(Library::CryptoPP, LibraryConfig {
            link_names: strings(&["cryptopp"]),
            overrides: cryptopp_overrides,
            ..LibraryConfig::default()
        });
        libraries.insert(Library::OpenSsl, LibraryConfig {
            link_names: strings(&["ssl", "crypto"]),
            overrides: openssl_overrides,
            ..LibraryConfig::default()
        });

        Self {
            compilers,
            libraries,
            runtimes: RuntimeConfig {
                managed_runtime: None,
                jvm: Some(PathBuf::from("java")),
                debugger: Some(PathBuf::from("gdb")),
            },
            host_bridge: HostBridgeConfig::default(),
        }
    }

    /// Overlay `other` onto `self`. Entries present in `other` replace ours wholesale.
    pub fn merge(&mut self, other: ConfigModel) {
        self.compilers.extend(other.compilers);
        self.libraries.extend(other.libraries);

        if other.runtimes.managed_runtime.is_some() {
            self.runtimes.managed_runtime = other.runtimes.managed_runtime;
        }
        if other.runtimes.jvm.is_some() {
            self.runtimes.jvm = other.runtimes.jvm;
        }
        if other.runtimes.debugger.is_some() {
            self.runtimes.debugger = other.runtimes.debugger;
        }
        if !other.host_bridge.include_dirs.is_empty() {
            self.host_bridge = other.host_bridge;
        }
    }

    /// Load a configuration document merged over the host defaults
    pub fn load_or_default(path: &Path, platform: Platform) -> Result<Self, ConfigFileError> {
        let mut config = Self::host_default(platform);
        if !path.exists() {
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let loaded: ConfigModel = serde_json::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.merge(loaded);
        Ok(config)
    }

    /// Persist as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigFileError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
