//! Value types flowing from caller records to audit rows.

pub mod record;
pub mod task;
pub mod value;
