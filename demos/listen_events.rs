use std::error::Error;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracim_sdk::{Credentials, LiveEventListener, Session};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let base_url = "https://REPLACE_WITH_TRACIM_HOST/api".to_string();
    let credentials = Credentials::email(
        "REPLACE_WITH_EMAIL",
        SecretString::new("REPLACE_WITH_PASSWORD".to_string()),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session = Session::with_credentials(base_url, credentials)?;
        session.authenticate().await?;

        let listener = LiveEventListener::new(session);
        listener.on_stream_open(|_, _| println!("stream open"));
        listener.on_message(|_, message| {
            if let Some(event) = message.parsed.as_ref() {
                println!("event_id={} event_type={}", event.event_id, event.event_type);
            }
        });
        listener.on_event_type("content.created.comment", |session, message| {
            println!("new comment on {} via {}", message.data, session.base_url());
        });
        listener.on_error(|_, message| eprintln!("stream error: {}", message.data));

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
        }

        listener.listen(cancel).await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
