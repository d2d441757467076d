#![allow(dead_code)]

pub mod handlers;
pub mod memory;
pub mod setup;
pub mod wait;
