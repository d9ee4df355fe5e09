//! End-to-end test of [`SimpleApp`] against a provisioned MySQL server.

use anyhow::{Context, Result};
use provisioner::{init_logging, ProvisioningContext};
use sample_app::SimpleApp;
use test_services::provision_mysql;

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn create_user_persists_row() -> Result<()> {
    init_logging();
    let context = ProvisioningContext::from_env().context("Failed to build context")?;
    let mysql = provision_mysql(&context)
        .await
        .context("Failed to provision MySQL")?;
    let container_id = mysql
        .container()
        .map(|container| container.id().to_string())
        .context("MySQL should record its container")?;

    mysql
        .run(|db| async move {
            let app = SimpleApp::new(db.clone());
            app.create_user("shuymn", "test@shuymn.me").await?;

            let (id, username, email): (i32, String, String) =
                sqlx::query_as("SELECT id, username, email FROM users WHERE username = ?")
                    .bind("shuymn")
                    .fetch_one(&db)
                    .await
                    .context("Failed to read user back")?;

            assert_eq!(id, 1);
            assert_eq!(username, "shuymn");
            assert_eq!(email, "test@shuymn.me");
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    let runtime = context.runtime().await?;
    assert!(!runtime.control_plane().exists(&container_id).await?);
    Ok(())
}
