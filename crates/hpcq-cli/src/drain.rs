//! `q clear`'s pull+ack drain loop (spec §6.3), also reused by `q stop --all`.

use hpcq_queue_client::QueueClient;

/// Drain up to `max_batches` batches of `batch_size` messages from `queue`,
/// acking everything pulled. Returns the total number of messages drained.
pub async fn drain_queue(
    queue_client: &QueueClient,
    queue: &str,
    batch_size: u32,
    max_batches: u32,
) -> anyhow::Result<u64> {
    let mut total = 0u64;
    for _ in 0..max_batches {
        let messages = queue_client.pull(queue, batch_size, 60).await?;
        if messages.is_empty() {
            break;
        }
        let lease_ids: Vec<String> = messages.iter().map(|m| m.lease_id.clone()).collect();
        total += lease_ids.len() as u64;
        queue_client.ack(queue, &lease_ids).await?;
    }
    Ok(total)
}
