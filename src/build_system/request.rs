// Build request model
// Declarative description of what the user asked to build

use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Source language family of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// C/C++ compiled to native code
    Native,
    /// C# compiled for a managed runtime
    ManagedClr,
    /// Java compiled to JVM bytecode
    Jvm,
    /// Native shared library loaded by a JVM through JNI
    NativeWithHostBridge,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Native => write!(f, "C/C++"),
            Language::ManagedClr => write!(f, "C#"),
            Language::Jvm => write!(f, "Java"),
            Language::NativeWithHostBridge => write!(f, "JNI"),
        }
    }
}

/// Compiler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompilerKind {
    #[serde(rename = "gcc")]
    Gcc,
    #[serde(rename = "clang")]
    Clang,
    #[serde(rename = "msvc")]
    MsvcLike,
    #[serde(rename = "csc")]
    ManagedCompiler,
    #[serde(rename = "javac")]
    JavaCompiler,
}

impl CompilerKind {
    pub const ALL: [CompilerKind; 5] = [
        CompilerKind::Gcc,
        CompilerKind::Clang,
        CompilerKind::MsvcLike,
        CompilerKind::ManagedCompiler,
        CompilerKind::JavaCompiler,
    ];

    /// Short lowercase identifier, used in output paths and config keys
    pub fn id(&self) -> &'static str {
        match self {
            CompilerKind::Gcc => "gcc",
            CompilerKind::Clang => "clang",
            CompilerKind::MsvcLike => "msvc",
            CompilerKind::ManagedCompiler => "csc",
            CompilerKind::JavaCompiler => "javac",
        }
    }

    /// Inverse of `id()`
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// GCC and Clang share a command-line dialect
    pub fn is_gnu_like(&self) -> bool {
        matches!(self, CompilerKind::Gcc | CompilerKind::Clang)
    }
}

impl fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerKind::Gcc => write!(f, "GCC"),
            CompilerKind::Clang => write!(f, "Clang"),
            CompilerKind::MsvcLike => write!(f, "MSVC"),
            CompilerKind::ManagedCompiler => write!(f, "C# compiler"),
            CompilerKind::JavaCompiler => write!(f, "javac"),
        }
    }
}

/// Kind of artifact produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    Executable,
    SharedLibrary,
    StaticLibrary,
}

impl BuildType {
    /// True for shared and static libraries
    pub fn is_library(&self) -> bool {
        !matches!(self, BuildType::Executable)
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Executable => write!(f, "executable"),
            BuildType::SharedLibrary => write!(f, "shared library"),
            BuildType::StaticLibrary => write!(f, "static library"),
        }
    }
}

/// Third-party crypto library linked into a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Library {
    #[serde(rename = "cryptopp")]
    CryptoPP,
    #[serde(rename = "openssl")]
    OpenSsl,
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Library::CryptoPP => write!(f, "CryptoPP"),
            Library::OpenSsl => write!(f, "OpenSSL"),
        }
    }
}

/// One build as requested by a front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub language: Language,
    pub compiler: CompilerKind,
    pub build_type: BuildType,
    /// Empty means no library
    pub libraries: Vec<Library>,
    pub source_path: PathBuf,
    /// Derived from the source path when `None`
    pub output_path: Option<PathBuf>,
    pub debug: bool,
    pub optimize: bool,
    pub verbose: bool,
    pub position_independent: bool,
    pub auto_run: bool,
}

impl BuildRequest {
    /// Executable request with every switch off
    pub fn new(language: Language, compiler: CompilerKind, source_path: impl Into<PathBuf>) -> Self {
        Self {
            language,
            compiler,
            build_type: BuildType::Executable,
            libraries: Vec::new(),
            source_path: source_path.into(),
            output_path: None,
            debug: false,
            optimize: false,
            verbose: false,
            position_independent: false,
            auto_run: false,
        }
    }

    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    /// Add a library, keeping the selection free of duplicates
    pub fn with_library(mut self, library: Library) -> Self {
        if !self.libraries.contains(&library) {
            self.libraries.push(library);
        }
        self
    }

    pub fn with_output(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_position_independent(mut self, pic: bool) -> Self {
        self.position_independent = pic;
        self
    }

    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        self.auto_run = auto_run;
        self
    }
}
