pub mod aggregation;
pub mod assembly;
pub mod byproducts;
pub mod diagnostics;
pub mod electricity;
pub mod layout;
pub mod markets;
