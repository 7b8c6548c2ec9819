mod hash;
mod text;

pub use hash::hash_to_i64;
pub use text::{strip_html, truncate_chars};
