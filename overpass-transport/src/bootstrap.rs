//! Resource bootstrap state machine.
//!
//! Before any virtual traffic can flow, the transport must provision its
//! broker resources in a strict order: list the topics, make sure both
//! topics exist, open the producer stream, open the consumer stream. Each
//! network-bound step is guarded so only one call is ever outstanding, and a
//! failed step simply stays unfinished and is retried on a later tick.
//!
//! The machine itself performs no I/O. It plans the next step as a
//! [`BootstrapAction`]; the driver issues the call and reports the outcome
//! back through the `on_*` handlers.

use crate::config::TransportConfig;

/// The next provisioning call the driver should issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapAction {
    /// Fetch the current topic list.
    ListTopics,
    /// Create a missing topic.
    CreateTopic(String),
    /// Open the producer stream on the outbound topic.
    OpenProducer(String),
    /// Open the consumer stream on the inbound topic.
    OpenConsumer {
        /// Topic to consume from.
        topic: String,
        /// Subscription name.
        subscription: String,
    },
}

/// Sequences provisioning of broker resources and the two physical streams.
#[derive(Debug)]
pub struct BootstrapStateMachine {
    inbound_topic: String,
    outbound_topic: String,
    subscription: String,

    topics_listed: bool,
    inbound_exists: bool,
    outbound_exists: bool,
    producer_open: bool,
    consumer_open: bool,
    setup_complete: bool,

    /// One-outstanding-call guard for the network-bound steps.
    waiting: bool,
}

impl BootstrapStateMachine {
    /// Create the machine for a transport configuration.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            inbound_topic: config.inbound_topic().to_string(),
            outbound_topic: config.outbound_topic().to_string(),
            subscription: config.subscription().to_string(),
            topics_listed: false,
            inbound_exists: false,
            outbound_exists: false,
            producer_open: false,
            consumer_open: false,
            setup_complete: false,
            waiting: false,
        }
    }

    /// Plan the next provisioning step, if one is eligible.
    ///
    /// Returns `None` while a call is outstanding or once setup is complete.
    pub fn next_action(&self) -> Option<BootstrapAction> {
        if self.waiting || self.setup_complete {
            return None;
        }
        if !self.topics_listed {
            return Some(BootstrapAction::ListTopics);
        }
        if !self.inbound_exists {
            return Some(BootstrapAction::CreateTopic(self.inbound_topic.clone()));
        }
        if !self.outbound_exists {
            return Some(BootstrapAction::CreateTopic(self.outbound_topic.clone()));
        }
        if !self.producer_open {
            return Some(BootstrapAction::OpenProducer(self.outbound_topic.clone()));
        }
        if !self.consumer_open {
            return Some(BootstrapAction::OpenConsumer {
                topic: self.inbound_topic.clone(),
                subscription: self.subscription.clone(),
            });
        }
        None
    }

    /// Mark the planned call as issued.
    pub fn mark_waiting(&mut self) {
        self.waiting = true;
    }

    /// Check whether a provisioning call is outstanding.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Handle a fresh topic list.
    ///
    /// Existence flags are recomputed from the list, so a re-fetch
    /// invalidates anything the previous list claimed existed.
    pub fn on_topics_listed(&mut self, topics: &[String]) {
        self.waiting = false;
        self.topics_listed = true;
        self.inbound_exists = topics.iter().any(|t| *t == self.inbound_topic);
        self.outbound_exists = topics.iter().any(|t| *t == self.outbound_topic);
        tracing::debug!(
            count = topics.len(),
            inbound = self.inbound_exists,
            outbound = self.outbound_exists,
            "Topics listed"
        );
    }

    /// Handle a successful topic creation.
    pub fn on_topic_created(&mut self, topic: &str) {
        self.waiting = false;
        if topic == self.inbound_topic {
            self.inbound_exists = true;
        }
        if topic == self.outbound_topic {
            self.outbound_exists = true;
        }
        tracing::debug!(topic, "Topic created");
    }

    /// Handle a successfully opened producer stream.
    pub fn on_producer_opened(&mut self) {
        self.waiting = false;
        self.producer_open = true;
        tracing::debug!(topic = %self.outbound_topic, "Producer stream open");
    }

    /// Handle a successfully opened consumer stream.
    pub fn on_consumer_opened(&mut self) {
        self.waiting = false;
        self.consumer_open = true;
        tracing::debug!(topic = %self.inbound_topic, "Consumer stream open");
    }

    /// Handle a failed provisioning call: the step's flag stays false so the
    /// step retries on the next eligible tick.
    pub fn on_step_failed(&mut self) {
        self.waiting = false;
    }

    /// Handle the producer physical stream dropping after setup.
    pub fn on_producer_closed(&mut self) {
        self.producer_open = false;
        self.setup_complete = false;
        tracing::warn!(topic = %self.outbound_topic, "Producer stream lost, will reopen");
    }

    /// Handle the consumer physical stream dropping after setup.
    pub fn on_consumer_closed(&mut self) {
        self.consumer_open = false;
        self.setup_complete = false;
        tracing::warn!(topic = %self.inbound_topic, "Consumer stream lost, will reopen");
    }

    /// Raise setup-complete once every step has finished, in order.
    ///
    /// Returns `true` only on the tick that completes setup, so the caller
    /// can run its once-per-bootstrap work (the client's initial Connect).
    pub fn try_complete(&mut self) -> bool {
        let ready = self.topics_listed
            && self.inbound_exists
            && self.outbound_exists
            && self.producer_open
            && self.consumer_open;

        if ready && !self.setup_complete {
            self.setup_complete = true;
            tracing::info!("Bootstrap complete");
            return true;
        }
        false
    }

    /// Check whether setup is complete.
    pub fn is_complete(&self) -> bool {
        self.setup_complete
    }
}
