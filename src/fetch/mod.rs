pub mod listings;
pub mod monthly;

pub use listings::{IsinClient, SecurityListing};
pub use monthly::{MonthlyPage, MonthlySource, TwseClient};
