use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db;
use crate::imap::conn::AsyncImapConnector;
use crate::imap::folders::MailboxLocks;
use crate::imap::ImapConnector;
use crate::secret_codec::SecretCodec;
use crate::services::content_service::{Composer, ContentGenerator, OpenAiContent, StaticContent};
use crate::services::scan_service::{ScanOptions, ScanService};
use crate::services::scheduler;
use crate::services::send_service::SendService;
use crate::services::settings_service::RuntimeSettings;
use crate::smtp::{LettreMailer, MailSender};

/// Everything a running instance holds: the pool, shared settings and both
/// services.
#[derive(Clone)]
pub struct Engine {
    pub pool: SqlitePool,
    pub codec: Arc<SecretCodec>,
    pub settings: Arc<RuntimeSettings>,
    pub send: Arc<SendService>,
    pub scan: Arc<ScanService>,
}

impl Engine {
    /// Open and migrate the database, then build the real network clients.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.database_url).await?;
        db::run_migrations(&pool).await?;

        let generator: Arc<dyn ContentGenerator> = match config.content_api_key.as_deref() {
            Some(key) => Arc::new(OpenAiContent::new(
                &config.content_api_url,
                key,
                &config.content_model,
                config.content_timeout,
            )),
            None => {
                tracing::info!("no content API key configured, using static content");
                Arc::new(StaticContent)
            }
        };
        let composer = Composer::new(generator, config.content_timeout);
        let mailer: Arc<dyn MailSender> = Arc::new(LettreMailer::new(config.smtp_timeout));
        let imap: Arc<dyn ImapConnector> = Arc::new(AsyncImapConnector::new(config.imap_timeout));

        Ok(Self::assemble(pool, config, composer, mailer, imap))
    }

    /// Build around caller-supplied collaborators.
    pub fn assemble(
        pool: SqlitePool,
        config: &Config,
        composer: Composer,
        mailer: Arc<dyn MailSender>,
        imap: Arc<dyn ImapConnector>,
    ) -> Self {
        let codec = Arc::new(SecretCodec::new(&config.secret_key));
        let settings = Arc::new(RuntimeSettings::new(config.engage_all, config.adopt_untracked));
        let composer = Arc::new(composer);
        let send = Arc::new(SendService::new(
            pool.clone(),
            codec.clone(),
            composer.clone(),
            mailer.clone(),
        ));
        let scan = Arc::new(ScanService::new(
            pool.clone(),
            codec.clone(),
            composer,
            mailer,
            imap,
            settings.clone(),
            ScanOptions {
                spam_folders: config.spam_folders.clone(),
                concurrency: config.scan_concurrency,
                account_timeout: config.account_timeout,
            },
            MailboxLocks::default(),
        ));
        Self {
            pool,
            codec,
            settings,
            send,
            scan,
        }
    }

    pub fn start(&self, config: &Config, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        scheduler::start(
            self.send.clone(),
            config.send_interval,
            self.scan.clone(),
            config.scan_interval,
            cancel,
        )
    }
}
