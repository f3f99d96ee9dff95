pub mod apply;
pub mod cache;
pub mod compile;
