/*!
Test support for host2mqtt consumers.

- [`StubTransport`]: in-memory [`host2mqtt::transport::Transport`] that
  records every operation and lets tests inject incoming messages without a
  broker
- [`ConsumerHarness`]: drives a consumer through the same lifecycle wrappers
  the runtime uses
*/

pub mod harness;
pub mod mqtt_stub;

pub use harness::ConsumerHarness;
pub use mqtt_stub::{StubTransport, TransportOp};
