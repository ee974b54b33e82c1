// Crypto Compiler
// Build orchestration for sources linked against CryptoPP and OpenSSL

pub mod build_system;
pub mod cli;

// Re-export the build engine for convenience
pub use build_system::{
    BuildEvent, BuildHandle, BuildRequest, BuildResult, BuildSystemError, BuildSystemManager, BuildType,
    CancellationToken, CommandBuilder, CompilerKind, ConfigModel, ConfigurationError, ErrorClassifier, Invocation,
    Language, Library, Platform, ProcessRunner, RunOutcome, RunSupervisor,
};
