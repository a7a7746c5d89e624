pub mod calendar_page;

pub use calendar_page::{fetch_with_retry, CacheValidators, CalendarSource, HttpCalendarSource, RetryPolicy};
