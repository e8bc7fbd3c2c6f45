pub mod api;
pub mod channel_fetcher;
pub mod clock;
pub mod configuration;
pub mod poller;
pub mod repost_service;
pub mod selection;
pub mod storage;
pub mod types;
