//! Lenient recovery of structured values from backend replies.

pub mod markdown;
mod repair;
pub mod scanner;

pub use markdown::render_bullet_lists;
pub use repair::{list_field_with_key, Parsed, ResponseRepairParser};
pub use scanner::{first_json_object, Fragment, JsonFragments};
