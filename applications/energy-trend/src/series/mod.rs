pub mod downsample;
pub mod store;

pub use downsample::{lttb, lttb_indices, DEFAULT_THRESHOLD};
pub use store::{Series, TimeSeriesStore};
