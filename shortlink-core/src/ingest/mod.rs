pub mod aggregates;
pub mod olap;
pub mod worker;

pub use aggregates::ClickAggregates;
pub use olap::OlapSink;
pub use worker::IngestWorker;
