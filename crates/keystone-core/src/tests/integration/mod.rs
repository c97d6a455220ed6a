#![cfg(test)]

pub mod common;
pub mod configuration_tests;
pub mod kernel_tests;
pub mod shutdown_tests;
