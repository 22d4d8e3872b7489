pub mod fetcher;
pub mod kafka;
pub mod parser;
pub mod proxy_source;

pub use fetcher::HttpFetcher;
pub use kafka::KafkaSink;
pub use parser::ChannelParser;
pub use proxy_source::HttpProxySource;
