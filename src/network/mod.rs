//! Network module - MAC helpers, vendor lookup, interface and subnet utilities

mod interface;
mod subnet;
mod vendor;

pub use interface::{find_valid_interface, interface_score};
pub use subnet::{interface_subnet, is_special_address, sweep_targets};
pub use vendor::{format_mac, is_randomized_mac, lookup_vendor, masked_mac_name, normalize_mac};
