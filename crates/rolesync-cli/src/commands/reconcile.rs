//! `reconcile` and `plan` subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rolesync_core::authority::{
    AuthorityConfig, AuthoritySyncClient, HttpAuthoritySyncClient, MockAuthority, RateLimiter,
};
use rolesync_core::catalog::InMemoryRoleCatalog;
use rolesync_core::ledger::SqliteAssignmentLedger;
use rolesync_core::{DesiredAssignment, ReconciliationEngine};
use serde::Deserialize;

use crate::config::CliConfig;

/// One entry of the desired-assignments JSON file. Contact and company come
/// from the command line; the file lists only the per-slot fields.
#[derive(Debug, Deserialize)]
struct DesiredEntry {
    #[serde(default)]
    location_id: Option<String>,
    role_id: String,
}

pub struct ReconcileOpts {
    pub ledger_path: PathBuf,
    pub catalog_path: PathBuf,
    pub desired_path: PathBuf,
    pub contact_id: String,
    pub company_id: String,
    /// Membership handle the authority keys grants by; defaults to the
    /// contact id when the two namespaces coincide.
    pub company_contact_id: Option<String>,
    pub config_path: Option<PathBuf>,
    pub mock: bool,
}

/// Runs a full reconciliation pass and prints the summary as JSON.
pub async fn run(opts: ReconcileOpts) -> Result<()> {
    let config = load_config(opts.config_path.as_deref())?;
    let engine = build_engine(&opts, &config)?;
    let desired = load_desired(&opts.desired_path, &opts.contact_id, &opts.company_id)?;

    let company_contact_id = opts
        .company_contact_id
        .as_deref()
        .unwrap_or(&opts.contact_id);
    let summary = engine
        .reconcile(&opts.contact_id, &opts.company_id, company_contact_id, desired)
        .await
        .context("reconciliation pass failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.failed > 0 {
        tracing::warn!(
            failed = summary.failed,
            "some assignments failed; rerun to retry them"
        );
    }
    Ok(())
}

/// Computes and prints the work sets without executing anything.
pub async fn plan(opts: ReconcileOpts) -> Result<()> {
    let config = load_config(opts.config_path.as_deref())?;
    let engine = build_engine(&opts, &config)?;
    let desired = load_desired(&opts.desired_path, &opts.contact_id, &opts.company_id)?;

    let plan = engine
        .plan(&opts.contact_id, &opts.company_id, &desired)
        .context("planning failed")?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    match path {
        Some(path) => CliConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(CliConfig::default()),
    }
}

fn build_engine(opts: &ReconcileOpts, config: &CliConfig) -> Result<ReconciliationEngine> {
    let ledger = Arc::new(
        SqliteAssignmentLedger::open(&opts.ledger_path).with_context(|| {
            format!("opening ledger database {}", opts.ledger_path.display())
        })?,
    );

    let catalog_json = std::fs::read_to_string(&opts.catalog_path)
        .with_context(|| format!("reading role catalog {}", opts.catalog_path.display()))?;
    let catalog = Arc::new(
        InMemoryRoleCatalog::from_json(&catalog_json).context("parsing role catalog")?,
    );

    let authority: Arc<dyn AuthoritySyncClient> = if opts.mock {
        Arc::new(MockAuthority::new())
    } else {
        let Some(base_url) = &config.authority.base_url else {
            bail!("authority.base_url is required unless --mock is given");
        };

        // The TLS stack needs a process-wide crypto provider before any
        // connector is built.
        rustls::crypto::ring::default_provider().install_default().ok();

        let mut authority_config =
            AuthorityConfig::new(base_url.clone()).context("invalid authority base_url")?;
        if let Some(token) = &config.authority.api_token {
            authority_config = authority_config
                .with_api_token(token.clone())
                .context("invalid authority api_token")?;
        }

        let limiter = Arc::new(RateLimiter::new(config.authority.rate_limit()));
        Arc::new(HttpAuthoritySyncClient::new(authority_config, limiter))
    };

    Ok(ReconciliationEngine::new(
        ledger,
        catalog,
        authority,
        config.engine.engine_config(),
    ))
}

fn load_desired(
    path: &Path,
    contact_id: &str,
    company_id: &str,
) -> Result<Vec<DesiredAssignment>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading desired assignments {}", path.display()))?;
    let entries: Vec<DesiredEntry> =
        serde_json::from_str(&json).context("parsing desired assignments")?;

    Ok(entries
        .into_iter()
        .map(|entry| DesiredAssignment {
            contact_id: contact_id.to_string(),
            company_id: company_id.to_string(),
            location_id: entry.location_id,
            role_id: entry.role_id,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_file_supplies_slots_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("desired.json");
        std::fs::write(
            &path,
            r#"[
                {"location_id": "loc-1", "role_id": "role-buyer"},
                {"role_id": "role-admin"}
            ]"#,
        )
        .unwrap();

        let desired = load_desired(&path, "contact-1", "co-1").unwrap();
        assert_eq!(desired.len(), 2);
        assert_eq!(desired[0].contact_id, "contact-1");
        assert_eq!(desired[0].location_id.as_deref(), Some("loc-1"));
        assert_eq!(desired[1].location_id, None);
    }

    #[tokio::test]
    async fn mock_reconcile_end_to_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog_path = dir.path().join("roles.json");
        std::fs::write(
            &catalog_path,
            r#"[{"id": "role-buyer", "name": "Buyer", "is_admin_scope": false}]"#,
        )
        .unwrap();
        let desired_path = dir.path().join("desired.json");
        std::fs::write(
            &desired_path,
            r#"[{"location_id": "loc-1", "role_id": "role-buyer"}]"#,
        )
        .unwrap();

        let opts = ReconcileOpts {
            ledger_path: dir.path().join("ledger.db"),
            catalog_path,
            desired_path,
            contact_id: "contact-1".to_string(),
            company_id: "co-1".to_string(),
            company_contact_id: None,
            config_path: None,
            mock: true,
        };

        run(opts).await.unwrap();

        let ledger = SqliteAssignmentLedger::open(dir.path().join("ledger.db")).unwrap();
        use rolesync_core::AssignmentLedger;
        assert_eq!(ledger.find_all("contact-1", "co-1").unwrap().len(), 1);
    }
}
