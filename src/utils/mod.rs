pub mod stats;
pub mod time;

pub use stats::{mean, pearson, quantile, std_dev};
pub use time::{floor_hour, last_day_of_month, parse_local_datetime};
