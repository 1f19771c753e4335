//! Task sessions
//!
//! Provides the execution channels a task can own:
//! - `LocalSession` - persistent shell process on this machine
//! - `ContainerSession` - persistent shell inside a Docker/Podman container
//!
//! Both are built on `ShellSession`, which runs commands sequentially on one
//! shell and reports exit codes through a status marker.

pub mod container;
pub mod local;
pub mod shell;
pub mod r#trait;

pub use container::{ContainerRuntime, ContainerSession};
pub use local::{LocalSession, LocalSessionConfig};
pub use r#trait::{resolve_remote, Session};
pub use shell::{shell_quote, ShellSession};
