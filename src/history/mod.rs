pub mod table;
pub mod window;

pub use table::HistoryTable;
pub use window::{resolve_window, DateWindow, YearMonth, EARLIEST_TRACEABLE};
