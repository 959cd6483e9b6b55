//! Newline-delimited JSON job intake.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::lifecycle::shutdown::CancelToken;
use crate::queue::job::Delivery;

/// Forward every non-blank line of `reader` to the worker pool.
///
/// Stops at end of input, on cancellation, or when the pool's inbox closes.
/// Returns the number of lines forwarded.
pub async fn feed_lines<R>(
    reader: R,
    jobs: mpsc::Sender<Delivery>,
    cancel: CancelToken,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if jobs.send(Delivery::new(line)).await.is_err() {
            tracing::warn!("Worker pool inbox closed, stopping job feed");
            break;
        }
        forwarded += 1;
    }

    tracing::info!(jobs = forwarded, "Job feed finished");
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_skips_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n   \n{\"b\":2}\n";
        let (tx, mut rx) = mpsc::channel(8);

        let count = feed_lines(input, tx, CancelToken::new()).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(rx.recv().await.unwrap().body, "{\"a\":1}");
        assert_eq!(rx.recv().await.unwrap().body, "{\"b\":2}");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stops_when_inbox_closes() {
        let input: &[u8] = b"{}\n{}\n";
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        assert_eq!(feed_lines(input, tx, CancelToken::new()).await.unwrap(), 0);
    }
}
