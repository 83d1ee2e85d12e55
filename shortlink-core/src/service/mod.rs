pub mod allocator;
pub mod allocator_client;
pub mod clicks;
pub mod minter;
pub mod traits;
pub mod url;
pub mod warmer;

pub use allocator::{validate_range_size, IdRange, RangeAllocator, MAX_BLOCK};
pub use allocator_client::HttpRangeSource;
pub use clicks::KafkaClickPublisher;
pub use minter::CodeMinter;
pub use traits::{ClickPublisher, Minter, RangeSource, UrlCache, UrlStore};
pub use url::UrlService;
pub use warmer::CacheWarmer;
