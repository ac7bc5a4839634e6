//! Scripted stand-ins for the portal and the storage backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use portal_scraper::category::{Category, Record, RecordSet};
use portal_scraper::portal::{CategoryExtractor, Page, PortalConnector, PortalError, PortalSession};
use portal_scraper::upload::{BackendError, ObjectKey, StorageBackend};

pub const VALID_PASSWORD: &str = "p1";

/// Time span during which one portal session was open.
#[derive(Debug, Clone)]
pub struct SessionSpan {
    pub username: String,
    pub opened: Instant,
    pub closed: Instant,
}

impl SessionSpan {
    pub fn overlaps(&self, other: &SessionSpan) -> bool {
        self.opened < other.closed && other.opened < self.closed
    }
}

/// Portal that accepts [`VALID_PASSWORD`] for every username.
pub struct FakePortal {
    login_delay: Duration,
    logins: Mutex<Vec<String>>,
    sessions: Arc<Mutex<Vec<SessionSpan>>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::with_login_delay(Duration::ZERO)
    }

    pub fn with_login_delay(login_delay: Duration) -> Self {
        Self {
            login_delay,
            logins: Mutex::new(Vec::new()),
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Usernames of every login attempt, in order.
    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<SessionSpan> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortalConnector for FakePortal {
    async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Box<dyn PortalSession>, PortalError> {
        self.logins.lock().unwrap().push(username.to_string());
        tokio::time::sleep(self.login_delay).await;

        if password.expose_secret() != VALID_PASSWORD {
            return Err(PortalError::Authentication(
                "portal rejected the credentials".to_string(),
            ));
        }
        Ok(Box::new(FakeSession {
            username: username.to_string(),
            opened: Instant::now(),
            sessions: Arc::clone(&self.sessions),
        }))
    }
}

struct FakeSession {
    username: String,
    opened: Instant,
    sessions: Arc<Mutex<Vec<SessionSpan>>>,
}

#[async_trait]
impl PortalSession for FakeSession {
    async fn fetch_page(
        &mut self,
        path: &str,
        _query: &[(&str, &str)],
    ) -> Result<Page, PortalError> {
        Ok(Page {
            url: format!("http://portal.test{}", path),
            body: String::new(),
        })
    }

    async fn close(&mut self) {
        self.sessions.lock().unwrap().push(SessionSpan {
            username: self.username.clone(),
            opened: self.opened,
            closed: Instant::now(),
        });
    }
}

/// What a [`FakeExtractor`] does when asked for its category.
#[derive(Debug, Clone)]
pub enum Behavior {
    Records(usize),
    Slow(Duration, usize),
    Fail(PortalError),
    Panic,
}

pub struct FakeExtractor {
    category: Category,
    behavior: Behavior,
}

impl FakeExtractor {
    pub fn new(category: Category, behavior: Behavior) -> Arc<dyn CategoryExtractor> {
        Arc::new(Self { category, behavior })
    }
}

#[async_trait]
impl CategoryExtractor for FakeExtractor {
    fn category(&self) -> Category {
        self.category
    }

    async fn extract(
        &self,
        session: &mut dyn PortalSession,
        academic_year: &str,
    ) -> Result<RecordSet, PortalError> {
        session
            .fetch_page(self.category.as_str(), &[("academicYear", academic_year)])
            .await?;

        let count = match &self.behavior {
            Behavior::Records(count) => *count,
            Behavior::Slow(delay, count) => {
                tokio::time::sleep(*delay).await;
                *count
            }
            Behavior::Fail(error) => return Err(error.clone()),
            Behavior::Panic => panic!("extractor for {} blew up", self.category),
        };
        Ok(RecordSet::new(self.category, sample_records(count)))
    }
}

pub fn sample_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let mut record = Record::new();
            record.insert("subject".to_string(), format!("Subject {}", i).into());
            record.insert("attendance_percentage".to_string(), serde_json::json!(75.0));
            record
        })
        .collect()
}

/// Extractors that all succeed quickly.
pub fn succeeding_extractors() -> Vec<Arc<dyn CategoryExtractor>> {
    Category::ALL
        .into_iter()
        .map(|category| FakeExtractor::new(category, Behavior::Records(3)))
        .collect()
}

/// In-memory object store with upsert semantics.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn upsert(&self, key: &ObjectKey, body: &[u8]) -> Result<(), BackendError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }
}

/// Backend that fails every call with a transient error.
#[derive(Default)]
pub struct FailingBackend {
    calls: Mutex<HashMap<String, u32>>,
}

impl FailingBackend {
    pub fn calls_for(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn upsert(&self, key: &ObjectKey, _body: &[u8]) -> Result<(), BackendError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;
        Err(BackendError::Transient("HTTP 503: storage unavailable".to_string()))
    }
}
