pub mod model;
pub mod time;

pub use model::{
    HISTORY_LIMIT_KEY, Monitor, MonitorStatus, RESERVED_SETTINGS_PREFIX, Setting, Site,
    StatusRecord,
};
pub use time::now_ms;
