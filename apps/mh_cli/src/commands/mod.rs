// apps/mh_cli/src/commands/mod.rs

//! 子命令实现

pub mod inspect;
pub mod run;
pub mod validate;
