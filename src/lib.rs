pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod parser;
pub mod pool;
pub mod rules;
pub mod scheduler;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod validate;
pub mod writer;

pub use cli::{Cli, Commands, Mode};
pub use config::{GenerationSettings, MissingReference};
pub use error::{GenError, Result};
pub use session::GenerationSession;
