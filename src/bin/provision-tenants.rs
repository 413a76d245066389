/// Re-run tenant schema provisioning for one trainer or every active trainer.
/// Safe to repeat: the migration only creates what is missing.
///
/// Usage: provision-tenants [--trainer ID] [--verify] [--email EMAIL]
///   --trainer ID   : Provision only this trainer (all active trainers otherwise)
///   --verify       : Report missing tables, RLS and policies afterwards
///   --email EMAIL  : Sign in as this superadmin first (password from PROVISION_PASSWORD)

use clap::Parser;

use sportiko_console::config::Config;
use sportiko_console::db::{self, tenant};
use sportiko_console::services::trainers::TrainerService;

#[derive(Parser)]
#[command(name = "provision-tenants", about = "Provision sportiko trainer tenant schemas")]
struct Args {
    /// Trainer identifier (optional, all active trainers if not specified)
    #[arg(long)]
    trainer: Option<String>,

    /// Verify each schema after provisioning
    #[arg(long)]
    verify: bool,

    /// Superadmin to sign in as before provisioning
    #[arg(long)]
    email: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let backend = db::create_client(&config)?;

    if let Some(email) = &args.email {
        let password = std::env::var("PROVISION_PASSWORD")
            .map_err(|_| anyhow::anyhow!("PROVISION_PASSWORD must be set with --email"))?;
        backend.sign_in(email, &password).await?;
        tracing::info!("Signed in as {email}");
    }

    let trainer_ids: Vec<String> = match &args.trainer {
        Some(id) => {
            tenant::provision_tenant_schema(backend.as_ref(), id).await?;
            vec![id.clone()]
        }
        None => {
            let count = db::reprovision_all_trainers(backend.as_ref()).await?;
            tracing::info!("Provisioned {count} trainer schemas");
            TrainerService::list(backend.as_ref())
                .await?
                .into_iter()
                .filter(|t| t.is_active)
                .map(|t| t.id)
                .collect()
        }
    };

    if args.verify {
        let mut incomplete = 0;
        for id in &trainer_ids {
            let report = tenant::verify_tenant_schema(backend.as_ref(), id).await?;
            if report.is_complete() {
                tracing::info!("{}: complete", report.schema_name);
            } else {
                incomplete += 1;
                tracing::warn!(
                    "{}: missing tables {:?}, without RLS {:?}, without policy {:?}",
                    report.schema_name,
                    report.missing_tables,
                    report.tables_without_rls,
                    report.tables_without_policy
                );
            }
        }
        if incomplete > 0 {
            anyhow::bail!("{incomplete} tenant schema(s) incomplete");
        }
    }

    if args.email.is_some() {
        if let Err(e) = backend.sign_out().await {
            tracing::warn!("Sign-out failed: {e}");
        }
    }
    Ok(())
}
