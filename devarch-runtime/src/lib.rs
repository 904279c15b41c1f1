pub mod compose_cli;
mod convert;
pub mod detect;
pub mod docker;
mod ops;
pub mod podman;

pub use compose_cli::ComposeCli;
pub use detect::select_runtime;
pub use docker::DockerEngine;
pub use podman::PodmanEngine;
