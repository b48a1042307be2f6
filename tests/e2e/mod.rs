#![allow(dead_code)]

mod harness;
pub use harness::*;

mod usage_flow_tests;
