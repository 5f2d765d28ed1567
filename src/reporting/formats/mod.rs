//! Report renderers

pub mod json;
pub mod text;
