pub mod account_service;
pub mod content_service;
pub mod scan_service;
pub mod scheduler;
pub mod send_service;
pub mod settings_service;
pub mod warmup_log_service;
