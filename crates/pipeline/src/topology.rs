//! Stream and consumer topology: the five durable streams and the
//! per-worker consumer configuration.

use std::time::Duration;

use sentinel_broker::{Broker, BrokerError, ConsumerSpec, Retention, StreamSpec};

pub const DETECTIONS_STREAM: &str = "DETECTIONS";
pub const TRACKS_STREAM: &str = "TRACKS";
pub const PROPOSALS_STREAM: &str = "PROPOSALS";
pub const DECISIONS_STREAM: &str = "DECISIONS";
pub const EFFECTS_STREAM: &str = "EFFECTS";

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// All five stream definitions. PROPOSALS is a work queue: each proposal is
/// delivered to exactly one authorizer and removed on settle, so a human
/// decision is never re-offered.
#[must_use]
pub fn streams() -> Vec<StreamSpec> {
    vec![
        StreamSpec::new(DETECTIONS_STREAM, "detect.>").with_max_age(Duration::from_secs(DAY)),
        StreamSpec::new(TRACKS_STREAM, "track.>").with_max_age(Duration::from_secs(3 * DAY)),
        StreamSpec::new(PROPOSALS_STREAM, "proposal.>")
            .with_retention(Retention::WorkQueue)
            .with_max_age(Duration::from_secs(HOUR)),
        StreamSpec::new(DECISIONS_STREAM, "decision.>").with_max_age(Duration::from_secs(7 * DAY)),
        StreamSpec::new(EFFECTS_STREAM, "effect.>").with_max_age(Duration::from_secs(30 * DAY)),
    ]
}

/// (stream, consumer) pair for the classifier.
#[must_use]
pub fn classifier_consumer() -> (&'static str, ConsumerSpec) {
    (
        DETECTIONS_STREAM,
        ConsumerSpec::new("classifier", "detect.>")
            .with_ack_wait(Duration::from_secs(30))
            .with_max_deliver(3),
    )
}

/// (stream, consumer) pair for the correlator.
#[must_use]
pub fn correlator_consumer() -> (&'static str, ConsumerSpec) {
    (
        TRACKS_STREAM,
        ConsumerSpec::new("correlator", "track.classified.>")
            .with_ack_wait(Duration::from_secs(30))
            .with_max_deliver(3),
    )
}

/// (stream, consumer) pair for the planner.
#[must_use]
pub fn planner_consumer() -> (&'static str, ConsumerSpec) {
    (
        TRACKS_STREAM,
        ConsumerSpec::new("planner", "track.correlated.>")
            .with_ack_wait(Duration::from_secs(30))
            .with_max_deliver(3),
    )
}

/// (stream, consumer) pair for the authorizer. The long ack wait keeps a
/// proposal outstanding while a human deliberates; max-deliver is one because
/// human decisions are not retried.
#[must_use]
pub fn authorizer_consumer() -> (&'static str, ConsumerSpec) {
    (
        PROPOSALS_STREAM,
        ConsumerSpec::new("authorizer", "proposal.>")
            .with_ack_wait(Duration::from_secs(300))
            .with_max_deliver(1),
    )
}

/// (stream, consumer) pair for the effector. Only approved decisions flow.
#[must_use]
pub fn effector_consumer() -> (&'static str, ConsumerSpec) {
    (
        DECISIONS_STREAM,
        ConsumerSpec::new("effector", "decision.approved.>")
            .with_ack_wait(Duration::from_secs(60))
            .with_max_deliver(5),
    )
}

/// Every durable worker consumer, used by the sensor's `clear_streams`
/// action to force downstream recreation.
#[must_use]
pub fn worker_consumers() -> Vec<(&'static str, ConsumerSpec)> {
    vec![
        classifier_consumer(),
        correlator_consumer(),
        planner_consumer(),
        authorizer_consumer(),
        effector_consumer(),
    ]
}

/// Purge all five streams and delete every worker consumer so downstream
/// workers recreate them from their original configuration.
pub async fn clear_streams(broker: &dyn Broker) -> Result<(), BrokerError> {
    for spec in streams() {
        broker.purge_stream(&spec.name).await?;
    }
    for (stream, consumer) in worker_consumers() {
        broker.delete_consumer(stream, &consumer.name).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_streams_with_spec_policies() {
        let specs = streams();
        assert_eq!(specs.len(), 5);

        let proposals = specs
            .iter()
            .find(|s| s.name == PROPOSALS_STREAM)
            .expect("PROPOSALS stream");
        assert_eq!(proposals.retention, Retention::WorkQueue);
        assert_eq!(proposals.max_age, Duration::from_secs(HOUR));

        let effects = specs
            .iter()
            .find(|s| s.name == EFFECTS_STREAM)
            .expect("EFFECTS stream");
        assert_eq!(effects.max_age, Duration::from_secs(30 * DAY));
    }

    #[test]
    fn consumer_table_matches_policies() {
        let (stream, authorizer) = authorizer_consumer();
        assert_eq!(stream, PROPOSALS_STREAM);
        assert_eq!(authorizer.ack_wait, Duration::from_secs(300));
        assert_eq!(authorizer.max_deliver, 1);

        let (stream, effector) = effector_consumer();
        assert_eq!(stream, DECISIONS_STREAM);
        assert_eq!(effector.filter_subject, "decision.approved.>");
        assert_eq!(effector.max_deliver, 5);
    }
}
