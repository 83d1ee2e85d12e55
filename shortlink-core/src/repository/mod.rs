pub mod url;

pub use url::UrlRepository;
