pub mod decode;
pub mod fetch;
pub mod subject;

pub use decode::{decode_image, load_image};
pub use fetch::fetch_bytes;
pub use subject::{sanitize_name, SubjectResolver, SubjectSource};
