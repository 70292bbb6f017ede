//! Interpreter tests
//!
//! One file per statement family, plus shared helpers.

mod helpers;

mod expr_tests;
mod shrine_tests;
