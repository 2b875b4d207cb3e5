mod text;

pub use self::text::{contains_ignore_case, decode_text};
