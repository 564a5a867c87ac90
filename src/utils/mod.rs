pub mod namehash;
pub mod units;

pub use namehash::namehash;
pub use units::{format_units, parse_hex_quantity, parse_hex_u64, units_to_f64};
