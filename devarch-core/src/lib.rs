pub mod apply;
pub mod cache;
pub mod compose;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod lockfile;
pub mod manifest;
pub mod materialize;
pub mod plan;
pub mod resolver;
pub mod runtime;
pub mod secrets;
pub mod store;
pub mod types;
pub mod validation;

pub use apply::{ApplyEngine, ApplyReport};
pub use cache::InspectCache;
pub use config::Settings;
pub use error::{Error, ErrorKind, Result};
pub use events::{Event, EventBus};
pub use materialize::Materializer;
pub use plan::Plan;
pub use runtime::{ContainerRuntime, RuntimeKind};
pub use store::Store;
