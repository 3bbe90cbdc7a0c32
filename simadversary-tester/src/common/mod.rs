pub mod util;

pub use util::{expand_all, split_csv};
