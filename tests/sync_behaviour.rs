//! Behavioural coverage for fetching and publishing job data.

mod sync;
