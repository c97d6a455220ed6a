mod engine_tests;
mod monitor_tests;
