#![allow(dead_code)] // Not every test binary uses every helper

pub mod builders;
pub mod mock_worker;
pub mod strategies;

pub use builders::*;
pub use mock_worker::*;
