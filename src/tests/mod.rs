// src/tests/mod.rs

//! tests for _websiftlib_

pub mod common;

mod datetime_tests;
mod fields_tests;
mod pipeline_tests;
