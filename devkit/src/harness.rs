/*!
Drives a consumer through the exact lifecycle sequences the runtime uses,
against a [`StubTransport`].
*/

use std::time::Duration;

use anyhow::Result;

use host2mqtt::commands::PAYLOAD_PRESS;
use host2mqtt::consumer::{lifecycle, Consumer, RuntimeRequest};

use crate::mqtt_stub::{StubTransport, TransportOp};

const ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConsumerHarness {
    pub transport: StubTransport,
}

impl ConsumerHarness {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            transport: StubTransport::new(),
        }
    }

    /// Connect hook plus availability, as on (re)connect.
    pub fn connect(&self, consumer: &mut dyn Consumer) -> Result<()> {
        lifecycle::connected(consumer, &self.transport)
    }

    /// Disconnect hook plus acknowledged offline, as on graceful shutdown.
    pub fn disconnect(&self, consumer: &mut dyn Consumer) -> Result<()> {
        lifecycle::disconnect(consumer, &self.transport, ACK_TIMEOUT)
    }

    /// Availability offline, as just before an OS suspend.
    pub fn suspend(&self, consumer: &dyn Consumer) -> Result<()> {
        lifecycle::suspending(consumer, &self.transport)
    }

    /// Availability back online, as after resume.
    pub fn resume(&self, consumer: &dyn Consumer) -> Result<()> {
        lifecycle::resuming(consumer, &self.transport)
    }

    /// One update interval elapsing.
    pub fn tick(&self, consumer: &mut dyn Consumer) -> Result<Vec<RuntimeRequest>> {
        consumer.update(&self.transport)
    }

    /// Send a button press to `command_topic`. Returns false when nothing is
    /// listening there.
    pub fn press(&self, command_topic: &str) -> bool {
        self.transport
            .simulate_message(command_topic, PAYLOAD_PRESS.as_bytes())
    }

    /// The availability payloads published to `topic`, in order, as strings.
    pub fn availability_states(&self, topic: &str) -> Vec<String> {
        self.transport
            .published(topic)
            .into_iter()
            .map(|payload| String::from_utf8_lossy(&payload).into_owned())
            .collect()
    }

    /// Index of the first flush after the last publish to `topic`, if any.
    /// Lets ordering tests check that offline states were awaited.
    pub fn flushed_after_publish(&self, topic: &str) -> bool {
        let ops = self.transport.ops();
        let last_publish = ops.iter().rposition(
            |op| matches!(op, TransportOp::Publish { topic: t, .. } if t == topic),
        );
        match last_publish {
            Some(i) => ops[i..].iter().any(|op| matches!(op, TransportOp::Flush)),
            None => false,
        }
    }
}

impl Default for ConsumerHarness {
    fn default() -> Self {
        Self::new()
    }
}
