pub mod logging;
pub mod profiler;
