pub mod constants;
pub mod memory;
pub mod url_utils;

pub use constants::*;
pub use memory::{MemorySampler, ProcessMemorySampler};
pub use url_utils::{
    hostname_of, is_valid_url, local_path_for_url, normalize_page_url, relative_link, screenshot_path,
    strip_fragment,
};
