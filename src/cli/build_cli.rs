// Command-line interface for the build engine
// Preview, build, run and debug sources with the configured toolchains

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use tracing_subscriber::EnvFilter;

use crate::build_system::{
    BuildEvent, BuildHandle, BuildRequest, BuildSystemManager, BuildType, BuilderOptions, CaptureMode, CompilerKind,
    ConfigModel, ErrorClassifier, ErrorSummary, Language, Library, MissingDirectoryPolicy, OutputStream, Platform,
    RunOutcome, RunnerOptions, Severity, ValidationStatus,
};

/// Default configuration document, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "compiler_config.json";

/// Crypto Compiler CLI
#[derive(Parser)]
#[command(name = "ccbuild")]
#[command(about = "Build, run and debug C/C++, C#, Java and JNI sources against CryptoPP and OpenSSL")]
#[command(version = "0.1.0")]
pub struct BuildCli {
    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: BuildCommand,
}

#[derive(Subcommand)]
pub enum BuildCommand {
    /// Print the command line a build would execute
    Preview {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Build a source file, streaming compiler output
    Build {
        #[command(flatten)]
        request: RequestArgs,

        /// Kill the build after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Capture stdout and stderr through one pipe
        #[arg(long)]
        combined: bool,

        /// Fail when a configured library directory is missing
        #[arg(long)]
        strict_dirs: bool,
    },

    /// Run a previously built artifact
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Artifact to run instead of the derived output path
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Kill the program after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Open a built executable in the configured debugger
    Debug {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(long)]
        artifact: Option<PathBuf>,
    },

    /// Classify compiler output read from a file or stdin
    Classify {
        /// File with captured output; stdin when omitted
        input: Option<PathBuf>,

        /// Maximum number of diagnostics to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Check configured compilers, runtimes and library directories
    Env {
        /// Show every tool and directory
        #[arg(long)]
        detailed: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the host default configuration
    Init {
        /// Output configuration file path
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,
}

/// Options describing one build request
#[derive(Args, Clone)]
pub struct RequestArgs {
    /// Source file
    pub source: PathBuf,

    /// Source language
    #[arg(long, value_enum, default_value = "native")]
    pub language: LanguageArg,

    /// Compiler to invoke
    #[arg(long = "compiler", value_enum, default_value = "gcc")]
    pub compiler: CompilerArg,

    /// Artifact kind to produce
    #[arg(long, short = 't', value_enum, default_value = "executable")]
    pub build_type: BuildTypeArg,

    /// Library to link (repeatable)
    #[arg(long = "library", short = 'l', value_enum)]
    pub libraries: Vec<LibraryArg>,

    /// Output path; derived from the source when omitted
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Emit debug symbols
    #[arg(short = 'g', long = "debug-symbols")]
    pub debug_symbols: bool,

    /// Optimize the build
    #[arg(short = 'O', long)]
    pub optimize: bool,

    /// Ask the compiler for verbose output
    #[arg(long)]
    pub compiler_verbose: bool,

    /// Position independent code
    #[arg(long)]
    pub pic: bool,

    /// Run the executable after a successful build
    #[arg(long)]
    pub run: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LanguageArg {
    Native,
    Csharp,
    Java,
    Jni,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CompilerArg {
    Gcc,
    Clang,
    Msvc,
    Csc,
    Javac,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BuildTypeArg {
    Executable,
    Shared,
    Static,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LibraryArg {
    Cryptopp,
    Openssl,
}

impl From<LanguageArg> for Language {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Native => Language::Native,
            LanguageArg::Csharp => Language::ManagedClr,
            LanguageArg::Java => Language::Jvm,
            LanguageArg::Jni => Language::NativeWithHostBridge,
        }
    }
}

impl From<CompilerArg> for CompilerKind {
    fn from(arg: CompilerArg) -> Self {
        match arg {
            CompilerArg::Gcc => CompilerKind::Gcc,
            CompilerArg::Clang => CompilerKind::Clang,
            CompilerArg::Msvc => CompilerKind::MsvcLike,
            CompilerArg::Csc => CompilerKind::ManagedCompiler,
            CompilerArg::Javac => CompilerKind::JavaCompiler,
        }
    }
}

impl From<BuildTypeArg> for BuildType {
    fn from(arg: BuildTypeArg) -> Self {
        match arg {
            BuildTypeArg::Executable => BuildType::Executable,
            BuildTypeArg::Shared => BuildType::SharedLibrary,
            BuildTypeArg::Static => BuildType::StaticLibrary,
        }
    }
}

impl From<LibraryArg> for Library {
    fn from(arg: LibraryArg) -> Self {
        match arg {
            LibraryArg::Cryptopp => Library::CryptoPP,
            LibraryArg::Openssl => Library::OpenSsl,
        }
    }
}

impl RequestArgs {
    /// Convert the parsed arguments into a build request
    pub fn to_request(&self) -> BuildRequest {
        let mut request = BuildRequest::new(self.language.into(), self.compiler.into(), self.source.clone())
            .with_build_type(self.build_type.into())
            .with_debug(self.debug_symbols)
            .with_optimize(self.optimize)
            .with_verbose(self.compiler_verbose)
            .with_position_independent(self.pic)
            .with_auto_run(self.run);
        for &library in &self.libraries {
            request = request.with_library(library.into());
        }
        if let Some(output) = &self.output {
            request = request.with_output(output.clone());
        }
        request
    }
}

impl BuildCli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<(), Box<dyn std::error::Error>> {
        self.setup_logging();

        match &self.command {
            BuildCommand::Preview { request } => self.execute_preview(request),
            BuildCommand::Build { request, timeout, combined, strict_dirs } => {
                self.execute_build(request, *timeout, *combined, *strict_dirs)
            }
            BuildCommand::Run { request, artifact, timeout } => self.execute_run(request, artifact.as_deref(), *timeout),
            BuildCommand::Debug { request, artifact } => self.execute_debug(request, artifact.as_deref()),
            BuildCommand::Classify { input, limit } => self.execute_classify(input.as_deref(), *limit),
            BuildCommand::Env { detailed } => self.execute_env(*detailed),
            BuildCommand::Config { action } => self.execute_config(action),
        }
    }

    /// Install the tracing subscriber; `RUST_LOG` applies when neither flag is given
    fn setup_logging(&self) {
        let filter = if self.debug {
            EnvFilter::new("debug")
        } else if self.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    }

    fn load_config(&self) -> Result<ConfigModel, Box<dyn std::error::Error>> {
        let path = self.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Ok(ConfigModel::load_or_default(&path, Platform::host())?)
    }

    fn manager(&self, runner: RunnerOptions, strict_dirs: bool) -> Result<BuildSystemManager, Box<dyn std::error::Error>> {
        let builder = BuilderOptions {
            missing_directory_policy: if strict_dirs {
                MissingDirectoryPolicy::Error
            } else {
                MissingDirectoryPolicy::Skip
            },
            platform: Platform::host(),
        };
        Ok(BuildSystemManager::with_options(self.load_config()?, builder, runner))
    }

    fn execute_preview(&self, args: &RequestArgs) -> Result<(), Box<dyn std::error::Error>> {
        let manager = self.manager(RunnerOptions::default(), false)?;
        let invocation = manager.preview(&args.to_request())?;
        println!("{}", invocation.command_line());

        if self.verbose {
            for (index, stage) in invocation.stages().iter().enumerate() {
                println!("{} stage {} ({}) in {}", "[VERBOSE]".blue(), index, stage.kind, stage.working_directory.display());
                for (key, value) in &stage.environment_overlay {
                    println!("  {}={}", key, value);
                }
            }
        }
        Ok(())
    }

    fn execute_build(
        &self,
        args: &RequestArgs,
        timeout: Option<u64>,
        combined: bool,
        strict_dirs: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let runner = RunnerOptions {
            capture: if combined { CaptureMode::Combined } else { CaptureMode::Split },
            deadline: timeout.map(Duration::from_secs),
        };
        let manager = self.manager(runner, strict_dirs)?;
        let request = args.to_request();
        let output = manager.output_path(&request).ok();

        println!("{} Building {}", "🔨".green(), request.source_path.display());
        let handle = manager.start_build(&request)?;
        let outcome = stream_events(handle)?;

        match outcome {
            Some((RunOutcome::Success, _)) => {
                if let Some(output) = output {
                    println!("{} Build succeeded: {}", "✅".green(), output.display());
                } else {
                    println!("{} Build succeeded", "✅".green());
                }
                Ok(())
            }
            Some((RunOutcome::Cancelled, _)) => Err("build cancelled".into()),
            Some((RunOutcome::TimedOut, _)) => Err(format!("build timed out after {}s", timeout.unwrap_or(0)).into()),
            Some((_, code)) => Err(format!("build failed with exit code {}", code).into()),
            None => Err("build worker ended without a result".into()),
        }
    }

    fn execute_run(&self, args: &RequestArgs, artifact: Option<&Path>, timeout: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
        let runner = RunnerOptions {
            capture: CaptureMode::Split,
            deadline: timeout.map(Duration::from_secs),
        };
        let manager = self.manager(runner, false)?;
        let request = args.to_request();
        let artifact = resolve_artifact(&manager, &request, artifact)?;

        println!("{} Running: {}", "🚀".green(), artifact.display());
        println!("{}", "=".repeat(50));
        let handle = manager.start_run(&artifact, &request)?;

        match stream_events(handle)? {
            Some((RunOutcome::Success, _)) => {
                println!("{} Program exited successfully", "✅".green());
                Ok(())
            }
            Some((_, code)) => Err(format!("program exited with code {}", code).into()),
            None => Err("run worker ended without a result".into()),
        }
    }

    fn execute_debug(&self, args: &RequestArgs, artifact: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
        let manager = self.manager(RunnerOptions::default(), false)?;
        let request = args.to_request();
        let artifact = resolve_artifact(&manager, &request, artifact)?;

        println!("{} Debugging: {}", "🐛".green(), artifact.display());
        let code = manager.supervisor().launch_debugger(&artifact, &request)?;
        if code != 0 {
            return Err(format!("debugger exited with code {}", code).into());
        }
        Ok(())
    }

    fn execute_classify(&self, input: Option<&Path>, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
        let text = match input {
            Some(path) => fs::read_to_string(path)?,
            None => {
                let mut buffer = String::new();
                io::stdin().read_to_string(&mut buffer)?;
                buffer
            }
        };

        let summary = ErrorClassifier::with_cap(limit).summarize(&text);
        print_summary(&summary);
        Ok(())
    }

    fn execute_env(&self, detailed: bool) -> Result<(), Box<dyn std::error::Error>> {
        println!("{} Validating build environment...", "🔍".green());
        let manager = self.manager(RunnerOptions::default(), false)?;
        let status = manager.validate_environment()?;

        for tool in status.compilers.iter().chain(status.runtimes.iter()) {
            if tool.available {
                println!(
                    "  {} {:<16} {}",
                    "✓".green(),
                    tool.name,
                    tool.version.as_deref().unwrap_or("(no version output)")
                );
            } else {
                println!("  {} {:<16} {} not found", "✗".red(), tool.name, tool.path.display());
            }
            if detailed {
                println!("      path: {}", tool.path.display());
            }
        }

        for library in &status.libraries {
            if library.missing_dirs.is_empty() {
                println!("  {} {:<16} directories present", "✓".green(), library.library);
            } else {
                for dir in &library.missing_dirs {
                    println!("  {} {:<16} missing {}", "⚠️".yellow(), library.library, dir.display());
                }
            }
        }

        match status.overall_status {
            ValidationStatus::Valid => println!("{} Environment validation passed!", "✅".green()),
            ValidationStatus::Warning => println!("{} Environment usable with warnings", "⚠️".yellow()),
            ValidationStatus::Invalid => return Err("no configured compiler could be started".into()),
        }
        Ok(())
    }

    fn execute_config(&self, action: &ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
        match action {
            ConfigAction::Init { output, force } => {
                if output.exists() && !force {
                    return Err(format!("{} already exists (use --force to overwrite)", output.display()).into());
                }
                ConfigModel::host_default(Platform::host()).save(output)?;
                println!("{} Configuration written to {}", "✅".green(), output.display());
                Ok(())
            }
            ConfigAction::Show => {
                let config = self.load_config()?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }
}

fn resolve_artifact(manager: &BuildSystemManager, request: &BuildRequest, artifact: Option<&Path>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match artifact {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(manager.output_path(request)?),
    }
}

/// Print events until the worker finishes; returns the final outcome and exit code
fn stream_events(handle: BuildHandle) -> Result<Option<(RunOutcome, i32)>, Box<dyn std::error::Error>> {
    let mut finished = None;

    for event in handle.events().iter() {
        match event {
            BuildEvent::Started { command, stages } => {
                println!("{} {}", "$".blue(), command);
                if stages > 1 {
                    println!("{} {} stages", "[VERBOSE]".blue(), stages);
                }
            }
            BuildEvent::BuildLog(line) => match line.stream {
                OutputStream::Stderr => eprintln!("{}", line.text),
                _ => println!("{}", line.text),
            },
            BuildEvent::RuntimeLog(line) => match line.stream {
                OutputStream::Stderr => eprintln!("{} {}", "│".cyan(), line.text),
                _ => println!("{} {}", "│".cyan(), line.text),
            },
            BuildEvent::ProcessFailed(message) => println!("{} {}", "❌".red(), message),
            BuildEvent::Diagnostics(summary) => {
                if !summary.is_empty() {
                    println!();
                    print_summary(&summary);
                }
            }
            BuildEvent::Finished(result) => {
                println!("{} finished in {} ms", "⏱".blue(), result.duration_ms);
                finished = Some((result.outcome, result.exit_code));
            }
        }
    }

    handle.wait()?;
    Ok(finished)
}

fn print_summary(summary: &ErrorSummary) {
    if summary.is_empty() {
        println!("{}", summary);
        return;
    }
    for error in &summary.shown {
        let rendered = error.to_string();
        match error.severity {
            Severity::Warning => println!("{} {}", "⚠️".yellow(), rendered),
            Severity::Fatal => println!("{} {}", "💀".red(), rendered.red()),
            Severity::Error => println!("{} {}", "❌".red(), rendered),
        }
    }
    if summary.remaining > 0 {
        println!("... and {} more errors", summary.remaining);
    }
}

/// Parse the process arguments and run the selected command
pub fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    let cli = BuildCli::parse();
    cli.execute()
}
