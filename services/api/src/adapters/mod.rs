pub mod db;
pub mod device_feed;
pub mod memory;
pub mod ws_map;

pub use db::DbAdapter;
pub use device_feed::DeviceFeed;
pub use memory::MemoryStore;
pub use ws_map::WsMapWidget;
