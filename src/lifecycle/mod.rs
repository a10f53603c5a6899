//! Process lifecycle: shutdown and reload signals

mod reload;
mod shutdown;

pub use reload::watch_reloads;
pub use shutdown::ShutdownSignal;
