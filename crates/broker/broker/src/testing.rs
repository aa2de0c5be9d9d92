//! Conformance suite run against every broker backend so their observable
//! semantics cannot drift apart. Panics on the first violated expectation.

use std::time::Duration;

use bytes::Bytes;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::spec::{ConsumerSpec, Retention, StreamSpec};

const WAIT: Duration = Duration::from_millis(250);

/// Exercise publish/fetch/ack, redelivery, termination, work-queue removal,
/// purge, and consumer deletion against `broker`.
///
/// Stream and consumer names are prefixed with `prefix` so parallel test
/// runs against a shared backend do not collide.
pub async fn run_broker_conformance(broker: &dyn Broker, prefix: &str) -> Result<(), BrokerError> {
    basic_publish_fetch_ack(broker, prefix).await?;
    nak_redelivers(broker, prefix).await?;
    term_stops_redelivery(broker, prefix).await?;
    ack_wait_redelivers_up_to_max(broker, prefix).await?;
    work_queue_removes_on_ack(broker, prefix).await?;
    purge_empties_stream(broker, prefix).await?;
    delete_consumer_reports_existence(broker, prefix).await?;
    Ok(())
}

async fn basic_publish_fetch_ack(broker: &dyn Broker, prefix: &str) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-BASIC");
    broker
        .ensure_stream(&StreamSpec::new(&stream, format!("{prefix}.basic.>")))
        .await?;

    broker
        .publish(&format!("{prefix}.basic.a"), Bytes::from_static(b"one"))
        .await?;
    broker
        .publish(&format!("{prefix}.basic.b"), Bytes::from_static(b"two"))
        .await?;

    let spec = ConsumerSpec::new("c-basic", format!("{prefix}.basic.>"));
    let mut consumer = broker.create_consumer(&stream, &spec).await?;

    let batch = consumer.fetch(10, WAIT).await?;
    assert_eq!(batch.len(), 2, "expected both published messages");
    assert_eq!(batch[0].payload.as_ref(), b"one");
    assert_eq!(batch[0].attempt, 1);
    for delivery in &batch {
        delivery.ack().await?;
    }

    let empty = consumer.fetch(10, WAIT).await?;
    assert!(empty.is_empty(), "acked messages must not redeliver");
    Ok(())
}

async fn nak_redelivers(broker: &dyn Broker, prefix: &str) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-NAK");
    broker
        .ensure_stream(&StreamSpec::new(&stream, format!("{prefix}.nak.>")))
        .await?;
    broker
        .publish(&format!("{prefix}.nak.x"), Bytes::from_static(b"retry-me"))
        .await?;

    let spec = ConsumerSpec::new("c-nak", format!("{prefix}.nak.>")).with_max_deliver(5);
    let mut consumer = broker.create_consumer(&stream, &spec).await?;

    let first = consumer.fetch(1, WAIT).await?;
    assert_eq!(first.len(), 1);
    first[0].nak().await?;

    let second = consumer.fetch(1, Duration::from_secs(2)).await?;
    assert_eq!(second.len(), 1, "nak must make the message redeliverable");
    assert!(second[0].attempt >= 2);
    second[0].ack().await?;
    Ok(())
}

async fn term_stops_redelivery(broker: &dyn Broker, prefix: &str) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-TERM");
    broker
        .ensure_stream(&StreamSpec::new(&stream, format!("{prefix}.term.>")))
        .await?;
    broker
        .publish(&format!("{prefix}.term.x"), Bytes::from_static(b"poison"))
        .await?;

    let spec = ConsumerSpec::new("c-term", format!("{prefix}.term.>"))
        .with_ack_wait(Duration::from_millis(100))
        .with_max_deliver(5);
    let mut consumer = broker.create_consumer(&stream, &spec).await?;

    let first = consumer.fetch(1, WAIT).await?;
    assert_eq!(first.len(), 1);
    first[0].term().await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = consumer.fetch(1, WAIT).await?;
    assert!(after.is_empty(), "terminated messages must never redeliver");
    Ok(())
}

async fn ack_wait_redelivers_up_to_max(
    broker: &dyn Broker,
    prefix: &str,
) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-AW");
    broker
        .ensure_stream(&StreamSpec::new(&stream, format!("{prefix}.aw.>")))
        .await?;
    broker
        .publish(&format!("{prefix}.aw.x"), Bytes::from_static(b"slow"))
        .await?;

    let spec = ConsumerSpec::new("c-aw", format!("{prefix}.aw.>"))
        .with_ack_wait(Duration::from_millis(150))
        .with_max_deliver(2);
    let mut consumer = broker.create_consumer(&stream, &spec).await?;

    // First delivery: never acked.
    let first = consumer.fetch(1, WAIT).await?;
    assert_eq!(first.len(), 1);
    drop(first);

    // Redelivered once the ack wait lapses.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let second = consumer.fetch(1, Duration::from_secs(2)).await?;
    assert_eq!(second.len(), 1, "unacked message must redeliver after ack wait");
    assert_eq!(second[0].attempt, 2);
    drop(second);

    // max_deliver reached: no further attempts.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let third = consumer.fetch(1, WAIT).await?;
    assert!(third.is_empty(), "max_deliver must cap redelivery");
    Ok(())
}

async fn work_queue_removes_on_ack(broker: &dyn Broker, prefix: &str) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-WQ");
    broker
        .ensure_stream(
            &StreamSpec::new(&stream, format!("{prefix}.wq.>")).with_retention(Retention::WorkQueue),
        )
        .await?;
    broker
        .publish(&format!("{prefix}.wq.x"), Bytes::from_static(b"job"))
        .await?;

    let spec = ConsumerSpec::new("c-wq", format!("{prefix}.wq.>"));
    let mut consumer = broker.create_consumer(&stream, &spec).await?;
    let batch = consumer.fetch(1, WAIT).await?;
    assert_eq!(batch.len(), 1);
    batch[0].ack().await?;

    // Once acked, the message is gone from the stream: a fresh consumer
    // starting from the beginning sees nothing.
    broker.delete_consumer(&stream, "c-wq").await?;
    let spec2 = ConsumerSpec::new("c-wq2", format!("{prefix}.wq.>"));
    let mut consumer2 = broker.create_consumer(&stream, &spec2).await?;
    let empty = consumer2.fetch(1, WAIT).await?;
    assert!(empty.is_empty(), "work-queue ack must remove the message");
    Ok(())
}

async fn purge_empties_stream(broker: &dyn Broker, prefix: &str) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-PURGE");
    broker
        .ensure_stream(&StreamSpec::new(&stream, format!("{prefix}.purge.>")))
        .await?;
    broker
        .publish(&format!("{prefix}.purge.x"), Bytes::from_static(b"gone"))
        .await?;
    broker.purge_stream(&stream).await?;

    let spec = ConsumerSpec::new("c-purge", format!("{prefix}.purge.>"));
    let mut consumer = broker.create_consumer(&stream, &spec).await?;
    let empty = consumer.fetch(1, WAIT).await?;
    assert!(empty.is_empty(), "purged stream must deliver nothing");
    Ok(())
}

async fn delete_consumer_reports_existence(
    broker: &dyn Broker,
    prefix: &str,
) -> Result<(), BrokerError> {
    let stream = format!("{prefix}-DEL");
    broker
        .ensure_stream(&StreamSpec::new(&stream, format!("{prefix}.del.>")))
        .await?;
    let spec = ConsumerSpec::new("c-del", format!("{prefix}.del.>"));
    let _consumer = broker.create_consumer(&stream, &spec).await?;

    assert!(broker.delete_consumer(&stream, "c-del").await?);
    assert!(!broker.delete_consumer(&stream, "c-del").await?);
    Ok(())
}
