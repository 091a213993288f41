//! Bandwidth limiting for blob streams

use crate::registry::BlobStream;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::Instant;

struct Throttle {
    inner: BlobStream,
    started: Instant,
    sent: u64,
    bytes_per_sec: u64,
}

/// Paces the stream so that its average rate stays at or below `kb_per_sec` KiB/s
pub fn throttle(stream: BlobStream, kb_per_sec: u32) -> BlobStream {
    if kb_per_sec == 0 {
        return stream;
    }
    let state = Throttle {
        inner: stream,
        started: Instant::now(),
        sent: 0,
        bytes_per_sec: u64::from(kb_per_sec) * 1024,
    };
    futures::stream::unfold(state, |mut state| async move {
        let chunk = state.inner.next().await?;
        if let Ok(bytes) = &chunk {
            state.sent += bytes.len() as u64;
            let due = Duration::from_secs_f64(state.sent as f64 / state.bytes_per_sec as f64);
            let elapsed = state.started.elapsed();
            if due > elapsed {
                tokio::time::sleep(due - elapsed).await;
            }
        }
        Some((chunk, state))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunks(count: usize, size: usize) -> BlobStream {
        futures::stream::iter((0..count).map(move |_| Ok(Bytes::from(vec![0u8; size])))).boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_capped() {
        let start = Instant::now();
        let mut stream = throttle(chunks(4, 1024), 1);
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 4096);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_means_unlimited() {
        let start = Instant::now();
        let mut stream = throttle(chunks(4, 1024 * 1024), 0);
        while stream.next().await.is_some() {}
        assert!(start.elapsed() < Duration::from_millis(1));
    }
}
