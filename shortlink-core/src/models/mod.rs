pub mod click;
pub mod code;
pub mod url;

pub use click::ClickEvent;
pub use code::{decode_base62, encode_base62, validate_custom_code, BASE62_ALPHABET};
pub use url::{CachedUrlPayload, Url};
