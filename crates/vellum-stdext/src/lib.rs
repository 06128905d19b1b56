//! # Vellum standard library extensions
//!
//! This crate contains data structures and algorithms used in the Vellum
//! project that are independent of the typesetting domain.

pub mod algorithms {
    pub mod substringsearch;
}

pub mod collections {
    pub mod chainmap;
    pub mod interner;
}

pub mod color;
