//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::transport::{AccessToken, MailTransport, OutgoingMail};

/// Records every accepted message. Send outcomes come from, in order:
/// a per-recipient rule, the next queued result, or success.
#[derive(Default)]
pub struct ScriptedTransport {
    auth_failure: Mutex<Option<TransportError>>,
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    by_recipient: Mutex<HashMap<String, TransportError>>,
    stalls: Mutex<HashMap<String, Duration>>,
    sent: Mutex<Vec<OutgoingMail>>,
    attempts: AtomicU32,
    auth_calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_auth(&self, error: TransportError) {
        *self.auth_failure.lock().unwrap() = Some(error);
    }

    pub fn restore_auth(&self) {
        *self.auth_failure.lock().unwrap() = None;
    }

    /// Queue the outcome of the next unscripted send.
    pub fn push_result(&self, result: Result<(), TransportError>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Every send to `recipient` fails with `error`.
    pub fn fail_recipient(&self, recipient: &str, error: TransportError) {
        self.by_recipient
            .lock()
            .unwrap()
            .insert(recipient.to_string(), error);
    }

    /// Sends to `recipient` sleep `delay` before answering.
    pub fn stall_recipient(&self, recipient: &str, delay: Duration) {
        self.stalls
            .lock()
            .unwrap()
            .insert(recipient.to_string(), delay);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Sends attempted, accepted or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn auth_calls(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(&self) -> Result<AccessToken, TransportError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.auth_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(AccessToken::new("scripted-token", 3600))
    }

    async fn send_mail(
        &self,
        _token: &AccessToken,
        mail: &OutgoingMail,
    ) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let stall = self.stalls.lock().unwrap().get(&mail.to).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.by_recipient.lock().unwrap().get(&mail.to).cloned() {
            return Err(err);
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Err(err)) => Err(err),
            Some(Ok(())) | None => {
                self.sent.lock().unwrap().push(mail.clone());
                Ok(())
            }
        }
    }
}
