//! Scan ownership: start/stop commands and the smart-scan fallback.
//!
//! A smart scan issues a filtered scan immediately and arms a one-shot
//! timer. If the timer elapses with nothing discovered and the state
//! still `Scanning`, the coordinator stops the filtered scan and
//! restarts unfiltered. The timer task never touches shared state: it
//! posts a request back onto the coordination channel and the
//! coordinator decides, so the check and the fallback both run on the
//! single-writer task.
//!
//! Each scan start bumps an epoch and cancels the previous timer.
//! Cancellation can race a timer that already fired, so fallback
//! requests carry their epoch and stale ones are dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::eventlog::EventLog;
use crate::manager::Request;
use crate::radio::{RadioActionSink, RadioCommand};
use crate::resolver::issue;
use crate::types::TargetFilter;

pub struct ScanOrchestrator {
    requests: mpsc::UnboundedSender<Request>,
    fallback: Option<CancellationToken>,
    epoch: u64,
    allow_duplicates: bool,
}

impl ScanOrchestrator {
    pub fn new(requests: mpsc::UnboundedSender<Request>) -> Self {
        Self {
            requests,
            fallback: None,
            epoch: 0,
            allow_duplicates: false,
        }
    }

    /// Start a scan with the configured service filter.
    pub async fn start<S: RadioActionSink>(
        &mut self,
        sink: &S,
        log: &mut EventLog,
        filter: &TargetFilter,
        allow_duplicates: bool,
    ) {
        self.begin(allow_duplicates);
        log.append(format!("Start scan {}", describe_filter(filter)));
        issue(
            sink,
            log,
            RadioCommand::StartScan {
                services: filter.service_filter().map(|list| list.to_vec()),
                allow_duplicates,
            },
        )
        .await;
    }

    /// Start a filtered scan and arm the unfiltered fallback timer.
    pub async fn start_smart<S: RadioActionSink>(
        &mut self,
        sink: &S,
        log: &mut EventLog,
        filter: &TargetFilter,
        timeout: Duration,
        allow_duplicates: bool,
    ) {
        self.start(sink, log, filter, allow_duplicates).await;
        self.arm_fallback(timeout);
    }

    /// Stop scanning and cancel any pending fallback.
    pub async fn stop<S: RadioActionSink>(&mut self, sink: &S, log: &mut EventLog) {
        self.cancel_fallback();
        issue(sink, log, RadioCommand::StopScan).await;
    }

    /// Switch the current scan to unfiltered. Called by the coordinator
    /// once it has verified the fallback conditions still hold.
    pub async fn fall_back<S: RadioActionSink>(&mut self, sink: &S, log: &mut EventLog) {
        issue(sink, log, RadioCommand::StopScan).await;
        issue(
            sink,
            log,
            RadioCommand::StartScan {
                services: None,
                allow_duplicates: self.allow_duplicates,
            },
        )
        .await;
    }

    pub fn is_current_epoch(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub fn cancel_fallback(&mut self) {
        if let Some(token) = self.fallback.take() {
            token.cancel();
        }
    }

    fn begin(&mut self, allow_duplicates: bool) {
        self.cancel_fallback();
        self.epoch += 1;
        self.allow_duplicates = allow_duplicates;
    }

    fn arm_fallback(&mut self, timeout: Duration) {
        let token = CancellationToken::new();
        self.fallback = Some(token.clone());
        let requests = self.requests.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    let _ = requests.send(Request::FallbackElapsed { epoch });
                }
                () = token.cancelled() => {}
            }
        });
    }
}

fn describe_filter(filter: &TargetFilter) -> String {
    match filter.service_filter() {
        Some(list) => list
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
        None => "[All]".to_string(),
    }
}
