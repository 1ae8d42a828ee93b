#![allow(dead_code)]

pub mod activities;
pub mod fixtures;

pub use activities::*;
pub use fixtures::*;
