//! Static configuration: app package table and timing delays.

mod apps;
mod timing;

pub use apps::{get_package, APP_PACKAGES};
pub use timing::TimingConfig;
