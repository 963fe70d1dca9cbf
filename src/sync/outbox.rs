//! Ordered background publishing.
//!
//! Each session owns one outbox. Records handed to it are written to the
//! remote store by a single background task, strictly in the order they were
//! sent, with bounded retry. The outcome of every publish comes back through
//! the manager's inbound queue, so publishing never blocks a turn decision.
//!
//! A failed subscription is retried the same way, on its own task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_std::channel::{Receiver, Sender};
use log::{debug, warn};

use super::board::BoardRecord;
use super::channel::{ChangeCallback, StoreError, SubscriptionHandle, SyncChannel};
use super::config::RetryPolicy;
use super::identity::SessionCode;

/// Everything the manager learns asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The remote record changed (possibly our own echo)
    Remote { epoch: u64, record: BoardRecord },

    /// A publish finished, after any retries
    Published {
        epoch: u64,
        seq: u64,
        result: Result<(), StoreError>,
    },

    /// A background subscribe finished, after any retries
    Subscribed {
        epoch: u64,
        result: Result<SubscriptionHandle, StoreError>,
    },
}

/// A record handed to the outbox and not yet reported back.
#[derive(Debug, Clone)]
pub struct PendingPublish {
    pub seq: u64,
    pub record: BoardRecord,
    pub queued_at: Instant,
}

pub struct Outbox {
    channel: Arc<dyn SyncChannel>,
    session_code: SessionCode,
    retry: RetryPolicy,

    /// Session epoch stamped on every report
    epoch: u64,

    tx: Sender<PendingPublish>,

    /// Where outcomes go; also used when the publisher is gone
    reports: Sender<Inbound>,

    cancelled: Arc<AtomicBool>,

    /// Sequence number of the last record sent
    send_seq: u64,

    /// Sent records awaiting an outcome
    pending: Vec<PendingPublish>,
}

impl Outbox {
    /// Start the background publisher for a session.
    pub fn open(
        channel: Arc<dyn SyncChannel>,
        session_code: SessionCode,
        epoch: u64,
        retry: RetryPolicy,
        reports: Sender<Inbound>,
    ) -> Self {
        let (tx, rx) = async_std::channel::unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        async_std::task::spawn(run_publisher(
            rx,
            Arc::clone(&channel),
            session_code.clone(),
            epoch,
            retry,
            reports.clone(),
            Arc::clone(&cancelled),
        ));
        Self {
            channel,
            session_code,
            retry,
            epoch,
            tx,
            reports,
            cancelled,
            send_seq: 0,
            pending: Vec::new(),
        }
    }

    /// Queue a record for publishing. Returns its sequence number.
    pub fn send(&mut self, record: BoardRecord) -> u64 {
        self.send_seq += 1;
        let item = PendingPublish {
            seq: self.send_seq,
            record,
            queued_at: Instant::now(),
        };
        self.pending.push(item.clone());
        if self.tx.try_send(item).is_err() {
            warn!(
                "Publisher for session {} is gone, dropping publish #{}",
                self.session_code, self.send_seq
            );
            let _ = self.reports.try_send(Inbound::Published {
                epoch: self.epoch,
                seq: self.send_seq,
                result: Err(StoreError::Unavailable("publisher stopped".to_string())),
            });
        }
        self.send_seq
    }

    /// Process an outcome. Returns false for an unknown sequence number.
    pub fn acknowledge(&mut self, seq: u64) -> bool {
        match self.pending.iter().position(|p| p.seq == seq) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of publishes without an outcome yet.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Keep subscribing in the background after a failed attempt, under the
    /// same retry policy as publishing. The failed attempt counts as the
    /// first. Returns false when the policy allows no further attempts.
    pub fn retry_subscribe(&self, on_change: ChangeCallback) -> bool {
        if self.retry.attempts() < 2 {
            return false;
        }
        async_std::task::spawn(resubscribe(
            Arc::clone(&self.channel),
            self.session_code.clone(),
            self.epoch,
            self.retry,
            on_change,
            self.reports.clone(),
            Arc::clone(&self.cancelled),
        ));
        true
    }

    /// Stop publishing. A write already under way may still land; queued
    /// records are dropped and no further retries happen.
    pub fn close(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.tx.close();
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_publisher(
    rx: Receiver<PendingPublish>,
    channel: Arc<dyn SyncChannel>,
    session_code: SessionCode,
    epoch: u64,
    retry: RetryPolicy,
    reports: Sender<Inbound>,
    cancelled: Arc<AtomicBool>,
) {
    while let Ok(item) = rx.recv().await {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let result =
            publish_with_retry(&*channel, &session_code, &item, retry, &cancelled).await;
        match &result {
            Ok(()) => debug!(
                "Published #{} to session {} after {:?}",
                item.seq,
                session_code,
                item.queued_at.elapsed()
            ),
            Err(err) => warn!(
                "Giving up on publish #{} to session {}: {}",
                item.seq, session_code, err
            ),
        }
        let report = Inbound::Published {
            epoch,
            seq: item.seq,
            result,
        };
        if reports.try_send(report).is_err() {
            // Manager is gone
            break;
        }
    }
    debug!("Publisher for session {} stopped", session_code);
}

async fn resubscribe(
    channel: Arc<dyn SyncChannel>,
    session_code: SessionCode,
    epoch: u64,
    retry: RetryPolicy,
    on_change: ChangeCallback,
    reports: Sender<Inbound>,
    cancelled: Arc<AtomicBool>,
) {
    let attempts = retry.attempts();
    let mut result = Err(StoreError::Unavailable("no subscribe attempt made".to_string()));
    for attempt in 2..=attempts {
        async_std::task::sleep(retry.delay(attempt - 1)).await;
        if cancelled.load(Ordering::SeqCst) {
            debug!("Stopped resubscribing to session {}", session_code);
            return;
        }
        result = channel.subscribe(&session_code, Arc::clone(&on_change));
        match &result {
            Ok(_) => {
                debug!("Subscribed to session {} on attempt {}", session_code, attempt);
                break;
            }
            Err(err) => warn!(
                "Subscribe to session {} failed (attempt {}/{}): {}",
                session_code, attempt, attempts, err
            ),
        }
    }
    if let Err(err) = reports.try_send(Inbound::Subscribed { epoch, result }) {
        // Manager is gone; nobody will cancel this subscription
        if let Inbound::Subscribed {
            result: Ok(handle), ..
        } = err.into_inner()
        {
            channel.unsubscribe(handle);
        }
    }
}

async fn publish_with_retry(
    channel: &dyn SyncChannel,
    session_code: &SessionCode,
    item: &PendingPublish,
    retry: RetryPolicy,
    cancelled: &AtomicBool,
) -> Result<(), StoreError> {
    let attempts = retry.attempts();
    let mut attempt = 1;
    loop {
        match channel.publish(session_code, item.record.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < attempts && !cancelled.load(Ordering::SeqCst) => {
                warn!(
                    "Publish #{} to session {} failed (attempt {}/{}): {}",
                    item.seq, session_code, attempt, attempts, err
                );
                async_std::task::sleep(retry.delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
