//! Host front-ends

pub mod console;
