pub mod channels;
pub mod history;

pub use channels::FileChannelSource;
pub use history::FileHistory;
