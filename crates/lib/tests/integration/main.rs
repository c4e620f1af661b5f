mod common;
mod git_tests;
mod lock_tests;
mod resolution_tests;
