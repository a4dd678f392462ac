//! Cross-module scenarios, one file per area under test.

mod recompiler_pipeline;
mod reservation_protocol;
mod threaded_dispatch;
