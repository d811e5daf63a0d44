pub mod config;
pub mod error;
pub mod event;
pub mod materialize;
pub mod parse;
pub mod replicas;
pub mod script;
pub mod target;
pub mod types;
pub mod validation;

pub use config::*;
pub use error::*;
pub use event::*;
pub use materialize::*;
pub use parse::*;
pub use replicas::*;
pub use script::*;
pub use target::*;
pub use types::*;
pub use validation::*;
