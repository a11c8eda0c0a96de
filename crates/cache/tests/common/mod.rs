//! Shared fixtures for handle cache integration tests
#![allow(dead_code)]

use fspool_cache::{BackendConfig, BackendFactory, BackendResource};
use fspool_core::{BoxError, CredentialToken, CredentialTokenSet, Principal, Target};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Close counts per created session, shared with the factory
#[derive(Default)]
pub struct Ledger {
    created: AtomicU64,
    closes: Mutex<Vec<Arc<AtomicU64>>>,
}

impl Ledger {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Close calls seen by the `n`th created session
    pub fn closes_of(&self, n: usize) -> u64 {
        self.closes.lock()[n].load(Ordering::SeqCst)
    }

    pub fn total_closes(&self) -> u64 {
        self.closes
            .lock()
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }
}

pub struct MockSession {
    pub serial: usize,
    pub authority: String,
    closes: Arc<AtomicU64>,
}

impl BackendResource for MockSession {
    fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that records every session it opens
pub struct MockFactory {
    pub ledger: Arc<Ledger>,
    pub fail: Arc<AtomicBool>,
    pub create_delay: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Ledger::default()),
            fail: Arc::new(AtomicBool::new(false)),
            create_delay: Duration::ZERO,
        }
    }

    pub fn slow(create_delay: Duration) -> Self {
        Self {
            create_delay,
            ..Self::new()
        }
    }
}

impl BackendFactory for MockFactory {
    type Resource = MockSession;

    fn create(&self, target: &Target, _config: &BackendConfig) -> Result<MockSession, BoxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused by {}", target.authority()),
            )
            .into());
        }
        if !self.create_delay.is_zero() {
            std::thread::sleep(self.create_delay);
        }

        let closes = Arc::new(AtomicU64::new(0));
        let mut all = self.ledger.closes.lock();
        all.push(Arc::clone(&closes));
        self.ledger.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            serial: all.len() - 1,
            authority: target.authority().to_string(),
            closes,
        })
    }
}

pub fn target(uri: &str) -> Target {
    Target::parse(uri).expect("valid target")
}

pub fn kerberos(user: &str, ticket: &str) -> Principal {
    Principal::kerberos(
        user,
        CredentialTokenSet::new().with_token(CredentialToken::new("tgt", ticket.as_bytes())),
    )
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
