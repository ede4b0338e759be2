//! Reachability probe against the external status endpoint.
//!
//! One GET per probe, no retries, no caching. Every failure (transport,
//! timeout, non-2xx status, broken body) is reported as `Unreachable` and
//! never escalated to the caller.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::config::StatusConfig;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

impl From<bool> for Reachability {
    fn from(reachable: bool) -> Self {
        if reachable {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        }
    }
}

/// Source of the reachability signal that drives DYNAMIC policy.
pub trait StatusProbe: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = Reachability> + Send;
}

/// The line the status endpoint serves while the reference service is up.
const OK_TOKEN: &[u8] = b"OK";

/// Incremental line matcher for status bodies.
///
/// Lines end at `\n`, `\r\n` or a lone `\r`; a trailing line without a
/// terminator still counts once [`StatusScanner::finish`] is called. Only a
/// line that is exactly `OK` matches. Buffered state is bounded: anything
/// longer than the token can never match, so it is not kept.
#[derive(Debug, Default)]
pub struct StatusScanner {
    line: Vec<u8>,
    after_cr: bool,
}

impl StatusScanner {
    /// Feed the next chunk. Returns true as soon as an `OK` line completes.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\n' | b'\r' => {
                    self.after_cr = byte == b'\r';
                    if self.end_line() {
                        return true;
                    }
                }
                _ => {
                    self.after_cr = false;
                    if self.line.len() <= OK_TOKEN.len() {
                        self.line.push(byte);
                    }
                }
            }
        }
        false
    }

    /// Close the stream, matching an unterminated final line.
    pub fn finish(&mut self) -> bool {
        !self.line.is_empty() && self.end_line()
    }

    fn end_line(&mut self) -> bool {
        let matched = self.line == OK_TOKEN;
        self.line.clear();
        matched
    }
}

/// Scan a complete body in one go.
pub fn scan_body(body: &[u8]) -> Reachability {
    let mut scanner = StatusScanner::default();
    (scanner.feed(body) || scanner.finish()).into()
}

/// HTTP probe for the configured status URL.
#[derive(Clone)]
pub struct ReachabilityChecker {
    client: reqwest::Client,
    url: String,
}

impl ReachabilityChecker {
    pub fn new(config: &StatusConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Reachability {
        let start = Instant::now();
        let span = tracing::Span::current();

        let mut response = match self.client.get(&self.url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, url = %self.url, "Status probe failed, treating endpoint as unreachable");
                span.record("reachable", false);
                return Reachability::Unreachable;
            }
        };

        let status = response.status();
        span.record("status", status.as_u16());
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %self.url, "Status endpoint returned an error status");
            span.record("reachable", false);
            return Reachability::Unreachable;
        }

        let mut scanner = StatusScanner::default();
        let reachable = loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if scanner.feed(&chunk) {
                        break true;
                    }
                }
                Ok(None) => break scanner.finish(),
                Err(e) => {
                    tracing::warn!(error = %e, url = %self.url, "Failed to read status body");
                    break false;
                }
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        span.record("latency_ms", latency);
        span.record("reachable", reachable);
        tracing::debug!(reachable, latency_ms = latency, "Status probe complete");

        reachable.into()
    }
}

impl StatusProbe for ReachabilityChecker {
    fn probe(&self) -> impl Future<Output = Reachability> + Send {
        let span = toggle_tracing::probe_span!(&self.url);
        self.fetch().instrument(span)
    }
}

#[cfg(test)]
pub(crate) use fixed::FixedProbe;

#[cfg(test)]
mod fixed {
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Reachability, StatusProbe};

    /// Probe that answers from a switchable flag and counts its calls.
    ///
    /// The answer is sampled when the probe starts; `with_delay` makes it
    /// arrive that much later.
    #[derive(Debug, Clone)]
    pub(crate) struct FixedProbe {
        reachable: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl FixedProbe {
        pub(crate) fn new(reachability: Reachability) -> Self {
            Self {
                reachable: Arc::new(AtomicBool::new(reachability == Reachability::Reachable)),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: None,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn set(&self, reachability: Reachability) {
            self.reachable
                .store(reachability == Reachability::Reachable, Ordering::SeqCst);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StatusProbe for FixedProbe {
        fn probe(&self) -> impl Future<Output = Reachability> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reachable = self.reachable.load(Ordering::SeqCst);
            let delay = self.delay;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                reachable.into()
            }
        }
    }
}
