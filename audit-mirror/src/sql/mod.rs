pub mod builder;
pub mod dialect;

pub use builder::{build_create_table, build_insert, build_select_row, Statement};
pub use dialect::Dialect;
