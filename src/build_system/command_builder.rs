// Command builder
// Maps a build request and a configuration snapshot to the exact invocation(s) to execute

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::build_system::config::{CompilerConfig, ConfigModel, Platform, RuntimeKind};
use crate::build_system::invocation::{Invocation, StageKind};
use crate::build_system::request::{BuildRequest, BuildType, CompilerKind, Language, Library};

/// Reasons a request cannot be turned into an invocation. Raised before anything is spawned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("no source file selected")]
    MissingSourcePath,

    #[error("cannot derive an output path from source {0}")]
    MissingOutputPath(PathBuf),

    #[error("{0} path is not configured")]
    MissingCompilerPath(CompilerKind),

    #[error("{compiler} cannot compile {language} sources")]
    UnsupportedCompiler { language: Language, compiler: CompilerKind },

    #[error("{compiler} cannot produce a {build_type} from {language} sources")]
    UnsupportedBuildType {
        language: Language,
        compiler: CompilerKind,
        build_type: BuildType,
    },

    #[error("JNI builds need the JDK include directories to be configured")]
    MissingHostBridgeHeaders,

    #[error("{0} has no archiver configured for static libraries")]
    MissingArchiver(CompilerKind),

    #[error("{0} path is not configured")]
    MissingRuntimePath(RuntimeKind),

    #[error("{library} directory {path} does not exist")]
    MissingLibraryDirectory { library: Library, path: PathBuf },

    #[error("static library output {0} would overwrite its own object file")]
    OutputIsObjectFile(PathBuf),
}

/// What to do with configured library directories that are absent on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDirectoryPolicy {
    /// Drop the flag and log a warning
    #[default]
    Skip,
    /// Fail with `MissingLibraryDirectory`
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct BuilderOptions {
    pub missing_directory_policy: MissingDirectoryPolicy,
    pub platform: Platform,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            missing_directory_policy: MissingDirectoryPolicy::default(),
            platform: Platform::host(),
        }
    }
}

/// Directories and link names of one selected library, resolved for the compiler
#[derive(Debug, Default)]
struct LibraryGroup {
    include_dirs: Vec<PathBuf>,
    lib_dirs: Vec<PathBuf>,
    link_names: Vec<String>,
}

/// Library directories of every group, first occurrence wins
fn loader_dirs(groups: &[LibraryGroup]) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for dir in groups.iter().flat_map(|group| &group.lib_dirs) {
        push_unique(&mut dirs, dir.clone());
    }
    dirs
}

/// Deterministic request → invocation translation
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    options: BuilderOptions,
}

impl CommandBuilder {
    pub fn new(options: BuilderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Build the invocation for `request`
    pub fn build(&self, request: &BuildRequest, config: &ConfigModel) -> Result<Invocation, ConfigurationError> {
        if request.source_path.as_os_str().is_empty() {
            return Err(ConfigurationError::MissingSourcePath);
        }
        check_combination(request)?;

        let compiler = config
            .compiler(request.compiler)
            .filter(|c| c.executable().is_some())
            .ok_or(ConfigurationError::MissingCompilerPath(request.compiler))?;

        let output = self.output_path(request)?;

        let invocation = match request.language {
            Language::Native => self.native(request, config, compiler, &output)?,
            Language::NativeWithHostBridge => self.host_bridge(request, config, compiler, &output)?,
            Language::ManagedClr => managed(request, config, compiler, &output),
            Language::Jvm => jvm(request, config, compiler, &output)?,
        };

        debug!(
            compiler = %request.compiler,
            stages = invocation.stages().len(),
            command = %invocation.command_line(),
            "built invocation"
        );
        Ok(invocation)
    }

    /// Final artifact path for `request`, explicit or derived
    pub fn output_path(&self, request: &BuildRequest) -> Result<PathBuf, ConfigurationError> {
        match &request.output_path {
            Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
            _ => derive_output_path(
                &request.source_path,
                request.language,
                request.compiler,
                request.build_type,
                self.options.platform,
            ),
        }
    }

    fn native(
        &self,
        request: &BuildRequest,
        config: &ConfigModel,
        compiler: &CompilerConfig,
        output: &Path,
    ) -> Result<Invocation, ConfigurationError> {
        let libs = self.library_flags(request, config)?;
        let mut stages = match (request.compiler, request.build_type) {
            (CompilerKind::MsvcLike, BuildType::StaticLibrary) => msvc_static(request, compiler, &libs, output)?,
            (CompilerKind::MsvcLike, _) => vec![msvc_link(request, compiler, &libs, output)?],
            (_, BuildType::StaticLibrary) => gnu_static(request, compiler, &libs, output)?,
            _ => vec![gnu_link(request, compiler, &libs, output, &[])?],
        };

        if request.auto_run && request.build_type == BuildType::Executable {
            stages.push(self.native_run_stage(output, &loader_dirs(&libs)));
        }

        Invocation::sequence(stages).ok_or(ConfigurationError::MissingOutputPath(output.to_path_buf()))
    }

    fn host_bridge(
        &self,
        request: &BuildRequest,
        config: &ConfigModel,
        compiler: &CompilerConfig,
        output: &Path,
    ) -> Result<Invocation, ConfigurationError> {
        let headers = &config.host_bridge.include_dirs;
        if headers.is_empty() || headers.iter().any(|dir| dir.as_os_str().is_empty()) {
            return Err(ConfigurationError::MissingHostBridgeHeaders);
        }

        let libs = self.library_flags(request, config)?;
        gnu_link(request, compiler, &libs, output, headers)
    }

    fn native_run_stage(&self, artifact: &Path, lib_dirs: &[PathBuf]) -> Invocation {
        let stage = Invocation::stage(StageKind::Run, local_program(artifact), Vec::<String>::new(), parent_dir(artifact))
            .with_ensure_executable();
        with_loader_path(stage, self.options.platform, lib_dirs)
    }

    /// One flag group per selected library, in selection order
    fn library_flags(&self, request: &BuildRequest, config: &ConfigModel) -> Result<Vec<LibraryGroup>, ConfigurationError> {
        let mut groups = Vec::with_capacity(request.libraries.len());

        for &library in &request.libraries {
            let Some(entry) = config.library(library) else {
                warn!(%library, "library selected but not configured, skipping");
                continue;
            };
            let resolved = entry.resolve_for(request.compiler);
            let mut group = LibraryGroup::default();

            for dir in resolved.include_dirs {
                if self.keep_directory(library, &dir)? {
                    push_unique(&mut group.include_dirs, dir);
                }
            }
            for dir in resolved.lib_dirs {
                if self.keep_directory(library, &dir)? {
                    push_unique(&mut group.lib_dirs, dir);
                }
            }
            for name in resolved.link_names {
                push_unique(&mut group.link_names, name);
            }
            groups.push(group);
        }

        Ok(groups)
    }

    fn keep_directory(&self, library: Library, dir: &Path) -> Result<bool, ConfigurationError> {
        if dir.is_dir() {
            return Ok(true);
        }
        match self.options.missing_directory_policy {
            MissingDirectoryPolicy::Skip => {
                warn!(%library, path = %dir.display(), "library directory not found, skipping");
                Ok(false)
            }
            MissingDirectoryPolicy::Error => Err(ConfigurationError::MissingLibraryDirectory {
                library,
                path: dir.to_path_buf(),
            }),
        }
    }
}

/// Derive the artifact path the way the build tools lay out their output:
/// `<source dir>/<compiler id>/<stem>_<compiler id>[.ext]` for native code,
/// `<source dir>/csc/<stem>.exe|.dll` for C# and `<source dir>/javac/<Stem>.class` for Java.
pub fn derive_output_path(
    source: &Path,
    language: Language,
    compiler: CompilerKind,
    build_type: BuildType,
    platform: Platform,
) -> Result<PathBuf, ConfigurationError> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigurationError::MissingOutputPath(source.to_path_buf()))?;

    let dir = source.parent().unwrap_or(Path::new("")).join(compiler.id());

    let file_name = match language {
        Language::ManagedClr => {
            let ext = if build_type == BuildType::Executable { "exe" } else { "dll" };
            format!("{}.{}", stem, ext)
        }
        Language::Jvm => format!("{}.class", stem),
        Language::Native | Language::NativeWithHostBridge => {
            let ext = match build_type {
                BuildType::Executable => platform.executable_extension(),
                BuildType::SharedLibrary => platform.shared_library_extension(),
                BuildType::StaticLibrary if compiler == CompilerKind::MsvcLike => "lib",
                BuildType::StaticLibrary => "a",
            };
            if ext.is_empty() {
                format!("{}_{}", stem, compiler.id())
            } else {
                format!("{}_{}.{}", stem, compiler.id(), ext)
            }
        }
    };

    Ok(dir.join(file_name))
}

/// Intermediate object file of a static library build.
///
/// An output that already carries the object extension maps to itself; the
/// static builders reject that case.
pub fn object_path(output: &Path, compiler: CompilerKind) -> PathBuf {
    let ext = if compiler == CompilerKind::MsvcLike { "obj" } else { "o" };
    output.with_extension(ext)
}

fn check_combination(request: &BuildRequest) -> Result<(), ConfigurationError> {
    use BuildType::*;
    use CompilerKind::*;

    let compiler_ok = match request.language {
        Language::Native => matches!(request.compiler, Gcc | Clang | MsvcLike),
        Language::NativeWithHostBridge => matches!(request.compiler, Gcc | Clang),
        Language::ManagedClr => request.compiler == ManagedCompiler,
        Language::Jvm => request.compiler == JavaCompiler,
    };
    if !compiler_ok {
        return Err(ConfigurationError::UnsupportedCompiler {
            language: request.language,
            compiler: request.compiler,
        });
    }

    let build_type_ok = match request.language {
        Language::Native => true,
        Language::NativeWithHostBridge => request.build_type == SharedLibrary,
        Language::ManagedClr => matches!(request.build_type, Executable | SharedLibrary),
        Language::Jvm => request.build_type == Executable,
    };
    if !build_type_ok {
        return Err(ConfigurationError::UnsupportedBuildType {
            language: request.language,
            compiler: request.compiler,
            build_type: request.build_type,
        });
    }

    Ok(())
}

fn compiler_path(request: &BuildRequest, compiler: &CompilerConfig) -> Result<PathBuf, ConfigurationError> {
    compiler
        .executable()
        .map(Path::to_path_buf)
        .ok_or(ConfigurationError::MissingCompilerPath(request.compiler))
}

fn gnu_mode_flags(request: &BuildRequest, compiler: &CompilerConfig, args: &mut Vec<String>) {
    if request.debug {
        args.extend(compiler.debug_flags.iter().cloned());
    }
    if request.optimize {
        args.extend(["-O3".to_string(), "-DNDEBUG".to_string()]);
    } else {
        args.extend(["-O0".to_string(), "-DDEBUG".to_string()]);
    }
    if request.verbose {
        args.push("-v".to_string());
    }
}

/// Single-invocation GCC/Clang compile and link. `extra_includes` carries host bridge headers.
fn gnu_link(
    request: &BuildRequest,
    compiler: &CompilerConfig,
    libs: &[LibraryGroup],
    output: &Path,
    extra_includes: &[PathBuf],
) -> Result<Invocation, ConfigurationError> {
    let shared = request.build_type == BuildType::SharedLibrary;
    let mut args = Vec::new();

    gnu_mode_flags(request, compiler, &mut args);
    if request.position_independent || shared {
        args.push("-fPIC".to_string());
    }
    if shared {
        args.push("-shared".to_string());
    }
    args.extend(compiler.default_flags.iter().cloned());
    args.extend(extra_includes.iter().map(|dir| format!("-I{}", dir.display())));
    args.push(path_arg(&request.source_path));
    args.push("-o".to_string());
    args.push(path_arg(output));
    for group in libs {
        args.extend(group.include_dirs.iter().map(|dir| format!("-I{}", dir.display())));
        args.extend(group.lib_dirs.iter().map(|dir| format!("-L{}", dir.display())));
        args.extend(group.link_names.iter().map(|name| format!("-l{}", name)));
    }
    args.extend(compiler.linked_libs.iter().map(|name| format!("-l{}", name)));

    Ok(Invocation::stage(StageKind::Compile, compiler_path(request, compiler)?, args, "."))
}

/// Compile to a position-independent object, then archive it
fn gnu_static(
    request: &BuildRequest,
    compiler: &CompilerConfig,
    libs: &[LibraryGroup],
    output: &Path,
) -> Result<Vec<Invocation>, ConfigurationError> {
    let archiver = compiler
        .archiver_executable()
        .ok_or(ConfigurationError::MissingArchiver(request.compiler))?;
    let object = static_object_path(output, request.compiler)?;

    let mut args = vec!["-c".to_string()];
    gnu_mode_flags(request, compiler, &mut args);
    args.push("-fPIC".to_string());
    args.extend(compiler.default_flags.iter().cloned());
    args.push(path_arg(&request.source_path));
    args.push("-o".to_string());
    args.push(path_arg(&object));
    // Only the include part of each group applies before linking
    for group in libs {
        args.extend(group.include_dirs.iter().map(|dir| format!("-I{}", dir.display())));
    }

    let compile = Invocation::stage(StageKind::Compile, compiler_path(request, compiler)?, args, ".");
    let archive = Invocation::stage(
        StageKind::Archive,
        archiver,
        ["rcs".to_string(), path_arg(output), path_arg(&object)],
        ".",
    );
    Ok(vec![compile, archive])
}

fn msvc_mode_flags(request: &BuildRequest, compiler: &CompilerConfig, args: &mut Vec<String>) {
    if request.debug {
        args.extend(compiler.debug_flags.iter().cloned());
    }
    args.push(if request.optimize { "/O2" } else { "/Od" }.to_string());
    if request.verbose {
        args.push("/Bv".to_string());
    }
}

/// cl.exe compile and link. Compiler options must precede `/link`, so each
/// group's includes go before it and its library paths and names after it,
/// both in selection order.
fn msvc_link(
    request: &BuildRequest,
    compiler: &CompilerConfig,
    libs: &[LibraryGroup],
    output: &Path,
) -> Result<Invocation, ConfigurationError> {
    let mut args = Vec::new();
    msvc_mode_flags(request, compiler, &mut args);
    if request.build_type == BuildType::SharedLibrary {
        args.push("/LD".to_string());
    }
    args.extend(compiler.default_flags.iter().cloned());
    args.push(path_arg(&request.source_path));
    args.push(format!("/Fe:{}", output.display()));
    for group in libs {
        args.extend(group.include_dirs.iter().map(|dir| format!("/I{}", dir.display())));
    }

    let mut link_args = Vec::new();
    for group in libs {
        link_args.extend(group.lib_dirs.iter().map(|dir| format!("/LIBPATH:{}", dir.display())));
        link_args.extend(group.link_names.iter().map(|name| lib_file(name)));
    }
    link_args.extend(compiler.linked_libs.iter().map(|name| lib_file(name)));
    if !link_args.is_empty() {
        args.push("/link".to_string());
        args.extend(link_args);
    }

    Ok(Invocation::stage(StageKind::Compile, compiler_path(request, compiler)?, args, "."))
}

fn msvc_static(
    request: &BuildRequest,
    compiler: &CompilerConfig,
    libs: &[LibraryGroup],
    output: &Path,
) -> Result<Vec<Invocation>, ConfigurationError> {
    let archiver = compiler
        .archiver_executable()
        .ok_or(ConfigurationError::MissingArchiver(request.compiler))?;
    let object = static_object_path(output, request.compiler)?;

    let mut args = vec!["/c".to_string()];
    msvc_mode_flags(request, compiler, &mut args);
    args.extend(compiler.default_flags.iter().cloned());
    args.push(path_arg(&request.source_path));
    args.push(format!("/Fo:{}", object.display()));
    for group in libs {
        args.extend(group.include_dirs.iter().map(|dir| format!("/I{}", dir.display())));
    }

    let compile = Invocation::stage(StageKind::Compile, compiler_path(request, compiler)?, args, ".");
    let archive = Invocation::stage(
        StageKind::Archive,
        archiver,
        ["/nologo".to_string(), format!("/OUT:{}", output.display()), path_arg(&object)],
        ".",
    );
    Ok(vec![compile, archive])
}

fn managed(request: &BuildRequest, config: &ConfigModel, compiler: &CompilerConfig, output: &Path) -> Invocation {
    if !request.libraries.is_empty() {
        debug!(libraries = ?request.libraries, "libraries do not apply to C# builds, ignoring");
    }

    let mut args: Vec<String> = compiler.default_flags.clone();
    if request.debug {
        args.push("-debug".to_string());
        args.extend(compiler.debug_flags.iter().cloned());
    }
    if request.optimize {
        args.push("-optimize+".to_string());
    }
    let target = if request.build_type == BuildType::Executable { "exe" } else { "library" };
    args.push(format!("-target:{}", target));
    args.push(path_arg(&request.source_path));
    args.push(format!("-out:{}", output.display()));

    // Executable path presence was checked by the caller
    let executable = compiler.executable().map(Path::to_path_buf).unwrap_or_default();
    let mut stages = vec![Invocation::stage(StageKind::Compile, executable, args, ".")];

    if request.auto_run && request.build_type == BuildType::Executable {
        let run = match config.runtimes.path_for(RuntimeKind::ManagedRuntime) {
            Some(runtime) => Invocation::stage(StageKind::Run, runtime, [file_name_arg(output)], parent_dir(output)),
            None => Invocation::stage(StageKind::Run, local_program(output), Vec::<String>::new(), parent_dir(output)),
        };
        stages.push(run);
    }

    let first = stages[0].clone();
    Invocation::sequence(stages).unwrap_or(first)
}

fn jvm(
    request: &BuildRequest,
    config: &ConfigModel,
    compiler: &CompilerConfig,
    output: &Path,
) -> Result<Invocation, ConfigurationError> {
    let class_dir = parent_dir(output);
    let mut args: Vec<String> = compiler.default_flags.clone();
    if request.debug {
        args.extend(compiler.debug_flags.iter().cloned());
    }
    if request.verbose {
        args.push("-verbose".to_string());
    }
    args.push("-d".to_string());
    args.push(path_arg(&class_dir));
    args.push(path_arg(&request.source_path));

    let mut stages = vec![Invocation::stage(StageKind::Compile, compiler_path(request, compiler)?, args, ".")];

    if request.auto_run {
        let java = config
            .runtimes
            .path_for(RuntimeKind::Jvm)
            .ok_or(ConfigurationError::MissingRuntimePath(RuntimeKind::Jvm))?;
        let class_name = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| ConfigurationError::MissingOutputPath(output.to_path_buf()))?;
        stages.push(Invocation::stage(StageKind::Run, java, ["-cp".to_string(), ".".to_string(), class_name], class_dir));
    }

    Invocation::sequence(stages).ok_or(ConfigurationError::MissingOutputPath(output.to_path_buf()))
}

fn static_object_path(output: &Path, compiler: CompilerKind) -> Result<PathBuf, ConfigurationError> {
    let object = object_path(output, compiler);
    if object == output {
        return Err(ConfigurationError::OutputIsObjectFile(output.to_path_buf()));
    }
    Ok(object)
}

fn lib_file(name: &str) -> String {
    if name.ends_with(".lib") {
        name.to_string()
    } else {
        format!("{}.lib", name)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_name_arg(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_arg(path))
}

/// Point the dynamic loader at `lib_dirs` when the platform has such a variable
pub(crate) fn with_loader_path(stage: Invocation, platform: Platform, lib_dirs: &[PathBuf]) -> Invocation {
    match platform.loader_path_variable() {
        Some(var) if !lib_dirs.is_empty() => {
            let separator = platform.path_list_separator().to_string();
            let value = lib_dirs
                .iter()
                .map(|dir| dir.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(&separator);
            stage.with_env(var, value)
        }
        _ => stage,
    }
}

/// Directory containing `path`, `.` when it has none
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `./name`, to be resolved inside the artifact's own directory
pub(crate) fn local_program(path: &Path) -> PathBuf {
    Path::new(".").join(file_name_arg(path))
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
