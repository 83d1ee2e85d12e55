pub mod keys;
pub mod singleflight;
pub mod url_cache;

pub use singleflight::{SingleFlight, SingleFlightError};
pub use url_cache::{jittered_ttl, CacheLookup, RedisUrlCache};
