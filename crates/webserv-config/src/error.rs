use thiserror::Error;

/// Invalid or unreadable configuration.
///
/// Messages follow the nginx wording, pointing at the offending file and line.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("open() \"{path}\" failed ({source})")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected end of file, expecting \"}}\" in {file}:{line}")]
    UnexpectedEof { file: String, line: usize },
    #[error("unknown directive \"{directive}\" in {file}:{line}")]
    UnknownDirective {
        directive: String,
        file: String,
        line: usize,
    },
    #[error("\"{directive}\" directive is not allowed here in {file}:{line}")]
    NotAllowedHere {
        directive: String,
        file: String,
        line: usize,
    },
    #[error("invalid directive \"{directive}\" in {file}:{line}")]
    InvalidDirective {
        directive: String,
        file: String,
        line: usize,
    },
    #[error("invalid value \"{value}\" for directive \"{directive}\" in {file}:{line}")]
    InvalidValue {
        value: String,
        directive: String,
        file: String,
        line: usize,
    },
    #[error("directive \"{directive}\" is not terminated by \";\" in {file}:{line}")]
    NotTerminated {
        directive: String,
        file: String,
        line: usize,
    },
    #[error("no \"server\" is defined in configuration file: {file}")]
    NoServer { file: String },
    #[error("duplication listen options for {port} in {file}")]
    DuplicateListen { port: u16, file: String },
}
