pub(crate) mod check;
pub(crate) mod command;

pub(crate) use command::{Cli, Commands};
