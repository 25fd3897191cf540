//! Database access for nlm-fv

pub mod settings;
