use std::error::Error;

use reqwest::Method;
use secrecy::SecretString;
use serde_json::Value;
use tracim_sdk::{Credentials, Session};

fn main() -> Result<(), Box<dyn Error>> {
    let base_url = "https://REPLACE_WITH_TRACIM_HOST/api".to_string();
    let credentials = Credentials::username(
        "REPLACE_WITH_USERNAME",
        SecretString::new("REPLACE_WITH_PASSWORD".to_string()),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session = Session::with_credentials(base_url, credentials)?;
        session.authenticate().await?;

        let user_id = session.user_id().await.unwrap_or_default();
        let response = session
            .request(Method::GET, &format!("/users/{user_id}/workspaces"), None)
            .await?;
        let workspaces: Value = response.json()?;
        println!("{workspaces:#}");

        Ok::<(), Box<dyn Error>>(())
    })
}
