//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements         | Connects to                 |
//! |-------------|--------------------|-----------------------------|
//! | `log_sink`  | EventSink          | `log` facade                |
//! | `mem_store` | ConfigPort         | in-memory map               |
//! |             | StoragePort        |                             |
//! | `replay`    | GlucoseSourcePort  | JSON scenario file          |
//! |             | PumpStatusPort     |                             |
//! |             | ProfilePort        |                             |
//! |             | ClockPort          | simulated clock             |

pub mod log_sink;
pub mod mem_store;
pub mod replay;
