//! Shared pipeline fixture: SQLite store, scripted transport, recording CRM

#![allow(dead_code)]

use outreach_core::application::{
    DriverConfig, JobQueue, QualificationEngine, QueueConfig, RateLimitConfig, RateLimiter,
    SendStepConfig, SendStepProcessor, SequenceConfig, SequenceDriver, SequenceScheduler,
    WaveConfig, WaveDispatcher,
};
use outreach_core::domain::{Contact, SequenceState};
use outreach_core::port::crm_store::mocks::RecordingCrmStore;
use outreach_core::port::email_transport::mocks::MockEmailTransport;
use outreach_core::port::id_provider::mocks::SequentialIdProvider;
use outreach_core::port::time_provider::mocks::ManualTimeProvider;
use outreach_core::port::SequenceRepository;
use outreach_infra_sqlite::{create_pool, run_migrations, SqliteSequenceRepository};
use std::sync::Arc;
use std::time::Duration;

pub const HOUR_MS: i64 = 3_600_000;

pub struct Pipeline {
    pub clock: Arc<ManualTimeProvider>,
    pub repository: Arc<dyn SequenceRepository>,
    pub scheduler: Arc<SequenceScheduler>,
    pub driver: SequenceDriver,
    pub transport: Arc<MockEmailTransport>,
    pub crm: Arc<RecordingCrmStore>,
}

pub async fn sqlite_repository(url: &str) -> Arc<dyn SequenceRepository> {
    let pool = create_pool(url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteSequenceRepository::new(pool))
}

pub fn pipeline_with(
    repository: Arc<dyn SequenceRepository>,
    transport: MockEmailTransport,
    waves: WaveConfig,
) -> Pipeline {
    let clock = Arc::new(ManualTimeProvider::new(0));
    let transport = Arc::new(transport);
    let crm = Arc::new(RecordingCrmStore::new());

    let scheduler = Arc::new(
        SequenceScheduler::new(repository.clone(), clock.clone(), SequenceConfig::default())
            .with_crm(crm.clone()),
    );

    let queue = JobQueue::new(
        QueueConfig::default(),
        Arc::new(SequentialIdProvider::default()),
        clock.clone(),
    );
    queue.register_processor(Arc::new(SendStepProcessor::new(
        scheduler.clone(),
        transport.clone(),
        Arc::new(RateLimiter::new(
            RateLimitConfig {
                limit: 1_000,
                window: Duration::from_secs(100),
            },
            clock.clone(),
        )),
        SendStepConfig::default(),
    )));

    let driver = SequenceDriver::new(
        repository.clone(),
        queue,
        WaveDispatcher::new(waves),
        clock.clone(),
        DriverConfig::default(),
    );

    Pipeline {
        clock,
        repository,
        scheduler,
        driver,
        transport,
        crm,
    }
}

pub async fn pipeline(transport: MockEmailTransport) -> Pipeline {
    let repository = sqlite_repository("sqlite::memory:").await;
    pipeline_with(repository, transport, WaveConfig::default())
}

pub fn b2b_contact(id: &str) -> Contact {
    Contact {
        id: id.to_string(),
        company: "acme corp".to_string(),
        title: "ceo".to_string(),
        website: "acme.com".to_string(),
        email: format!("{}@acme.com", id),
    }
}

impl Pipeline {
    pub async fn enroll(&self, contact: &Contact) -> SequenceState {
        let result = QualificationEngine::default().qualify(contact);
        self.scheduler.enroll(contact, &result).await.unwrap()
    }

    /// One due-check, then wait for every job (and its hooks) to settle
    pub async fn tick(&self) -> usize {
        let enqueued = self.driver.due_check().await.unwrap().len();
        self.driver.queue().wait_idle().await;
        enqueued
    }

    pub async fn state(&self, contact_id: &str) -> SequenceState {
        self.repository
            .find_by_contact(contact_id)
            .await
            .unwrap()
            .unwrap()
    }
}
