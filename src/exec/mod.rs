//! Command execution.
//!
//! - `template`: tera-rendered `{{ Name }}` templates and their context
//! - `command`: the command builder and the [`CommandRunner`] seam
//! - `shell`: the runner used in production

mod command;
mod shell;
mod template;

#[cfg(test)]
pub(crate) mod fake;

pub use command::{Command, CommandOutput, CommandRunner, Invocation};
pub use shell::ShellRunner;
pub use template::{RenderContext, check_all, render};
