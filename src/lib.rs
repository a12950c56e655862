pub mod ast;
pub mod builtins;
pub mod error;
pub mod eval;
pub mod exec;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod program;
pub mod record;
pub mod resolve;
pub mod value;

pub use builtins::{LogSink, MemorySink, StderrSink};
pub use error::{Error, EvalError, LoadError, RecordError};
pub use loader::Loader;
pub use parser::parse;
pub use pipeline::{ErrorPolicy, Output, Pipeline};
pub use program::{Config, LoadOptions, Program, Protocols, StringMatch};
pub use record::Record;
pub use resolve::{FsResolver, MemoryResolver, SourceResolver};
