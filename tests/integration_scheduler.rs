mod common;

use common::*;
use mailora_warmup::imap::INBOX;
use mailora_warmup::services::warmup_log_service;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_jobs_run_and_stop_on_cancel() {
    let h = harness(&[
        ("WARMUP_SEND_INTERVAL_SECS", "1"),
        ("WARMUP_SCAN_INTERVAL_SECS", "1"),
    ])
    .await;
    insert_sender(&h.pool, "a@sender.test", "pw-a", 1, 0).await;
    insert_receiver(&h.pool, "b@receiver.test", "pw-b", "custom", false).await;
    h.imap.add_mailbox("b@receiver.test", "pw-b", &[INBOX]);

    let cancel = CancellationToken::new();
    let jobs = h.engine.start(&h.config, cancel.clone());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    cancel.cancel();
    for job in jobs {
        tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .expect("job did not stop")
            .unwrap();
    }

    // daily_limit=1: exactly one message no matter how many send ticks fired
    assert_eq!(h.mailer.sent().len(), 1);
    let counts = warmup_log_service::status_counts(&h.pool).await.unwrap();
    assert_eq!(counts.sent, 1);
    h.imap.with_state(|st| {
        assert!(st.logins >= 2, "scan ticks: {}", st.logins);
        assert_eq!(st.logins, st.logouts);
    });
}
