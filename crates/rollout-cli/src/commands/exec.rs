//! Rollout execution command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use rollout_config::RolloutConfig;
use rollout_core::{GitCredential, ImageDefinition, ReleaseRequest};
use rollout_deployer::{ArgoCdClient, ArgoCdConfig};
use rollout_git::{GitCli, Signature};
use rollout_runner::{RolloutEvent, RolloutOrchestrator, RolloutRequest};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Release name
    pub release: String,

    /// Target environment
    #[arg(short, long)]
    pub environment: String,

    /// Target cluster (all clusters when omitted)
    #[arg(short, long)]
    pub cluster: Option<String>,

    /// Image to deploy, as name[:tag]
    #[arg(short, long)]
    pub image: String,

    /// Renderer profile
    #[arg(long, env = "ROLLOUT_PROFILE")]
    pub profile: Option<String>,

    /// Kustomization file, relative to the release path
    #[arg(long, env = "KUSTOMIZE_FILE_REF")]
    pub kustomize_file_ref: Option<String>,

    /// Name of the kustomize image entry to override
    #[arg(long, env = "KUSTOMIZE_IMAGE_REF")]
    pub kustomize_image_ref: Option<String>,

    /// Label key holding the release name
    #[arg(long, env = "ROLLOUT_SELECTOR_RELEASE")]
    pub selector_for_release: Option<String>,

    /// Label key holding the environment
    #[arg(long, env = "ROLLOUT_SELECTOR_ENVIRONMENT")]
    pub selector_for_environment: Option<String>,

    /// Label key holding the cluster
    #[arg(long, env = "ROLLOUT_SELECTOR_CLUSTER")]
    pub selector_for_cluster: Option<String>,

    /// Stamp a restart annotation so pods roll even if the image is unchanged
    #[arg(long)]
    pub restart: bool,

    /// Overall deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Argo CD server address
    #[arg(long, env = "ARGOCD_HOST")]
    pub argocd_host: String,

    /// Argo CD API token
    #[arg(long, env = "ARGOCD_AUTH_TOKEN", hide_env_values = true)]
    pub argocd_token: String,

    /// Skip TLS certificate verification
    #[arg(long, env = "ARGOCD_INSECURE")]
    pub argocd_insecure: bool,

    /// Talk plain HTTP to Argo CD
    #[arg(long, env = "ARGOCD_PLAINTEXT")]
    pub argocd_plaintext: bool,

    /// Manifest repository credential, as username:password
    #[arg(long, env = "GIT_SECRET", hide_env_values = true)]
    pub git_secret: Option<String>,
}

impl ExecArgs {
    /// Layer the command line over the configuration file.
    pub fn apply_to(&self, config: &mut RolloutConfig) {
        if let Some(profile) = &self.profile {
            config.profile = profile.clone();
        }
        if let Some(file_ref) = &self.kustomize_file_ref {
            config.kustomize.file_ref = file_ref.clone();
        }
        if let Some(image_ref) = &self.kustomize_image_ref {
            config.kustomize.image_ref = image_ref.clone();
        }
        if let Some(key) = &self.selector_for_release {
            config.selectors.release = key.clone();
        }
        if let Some(key) = &self.selector_for_environment {
            config.selectors.environment = key.clone();
        }
        if let Some(key) = &self.selector_for_cluster {
            config.selectors.cluster = key.clone();
        }
        if let Some(secs) = self.timeout {
            config.timeouts.invocation = Duration::from_secs(secs);
        }
    }

    /// Build the selector request using the configured label keys.
    pub fn release_request(&self, config: &RolloutConfig) -> ReleaseRequest {
        ReleaseRequest::builder()
            .release(&config.selectors.release, &self.release)
            .environment(&config.selectors.environment, &self.environment)
            .cluster(
                &config.selectors.cluster,
                self.cluster.as_deref().unwrap_or_default(),
            )
            .build()
    }
}

/// Run a rollout against Argo CD.
pub async fn run(config_path: Option<&Path>, args: ExecArgs) -> Result<()> {
    let mut config =
        rollout_config::load_or_default(config_path).context("Failed to load configuration")?;
    args.apply_to(&mut config);

    let image: ImageDefinition = args
        .image
        .parse()
        .with_context(|| format!("Invalid image: {}", args.image))?;

    let credential = match &args.git_secret {
        Some(secret) => secret
            .parse::<GitCredential>()
            .context("Invalid GIT_SECRET")?,
        None => GitCredential::default(),
    };

    let mut argocd = ArgoCdConfig::new(&args.argocd_host, &args.argocd_token);
    argocd.insecure = args.argocd_insecure;
    argocd.plaintext = args.argocd_plaintext;
    let platform = ArgoCdClient::new(argocd).context("Failed to create Argo CD client")?;

    let committer = Signature::new(&config.committer.name, &config.committer.email);
    let git = GitCli::new(credential.clone()).with_committer(committer);

    let renderer = rollout_renderer::renderer_for(&config.profile)?;

    let request = RolloutRequest {
        releases: args.release_request(&config),
        image,
        restart: args.restart,
    };

    let orchestrator =
        RolloutOrchestrator::new(Arc::new(platform), Arc::new(git), renderer, config)
            .with_credential(credential);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling rollout");
            on_interrupt.cancel();
        }
    });

    println!("Rolling out {} to {}", request.image, request.releases.selector());

    let (mut rx, result_handle) = orchestrator.execute(request, cancel);

    while let Some(event) = rx.recv().await {
        match event {
            RolloutEvent::Resolved { releases } => {
                println!("▶ Resolved {} release(s): {}", releases.len(), releases.join(", "));
            }
            RolloutEvent::Rendered { release } => {
                println!("  rendered {}", release);
            }
            RolloutEvent::Committed { created: true } => {
                println!("✓ Manifest changes committed");
            }
            RolloutEvent::Committed { created: false } => {
                println!("○ Manifests already up to date");
            }
            RolloutEvent::Pushed => {
                println!("✓ Pushed to remote");
            }
            RolloutEvent::SyncStarted { releases } => {
                println!("▶ Syncing {} release(s)", releases);
            }
            RolloutEvent::Completed { success } => {
                if success {
                    println!("--- Rollout completed successfully ---");
                } else {
                    println!("--- Rollout failed ---");
                }
            }
        }
    }

    let report = result_handle
        .await
        .context("Rollout task failed")?
        .context("Rollout failed")?;

    println!("\n--- Release Summary ({}) ---", report.request_id.short());
    for release in &report.releases {
        println!(
            "  {} - {} / {} / {}",
            release.id, release.name, release.environment, release.cluster
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ExecArgs,
    }

    fn parse(extra: &[&str]) -> ExecArgs {
        let mut argv = vec![
            "exec",
            "api",
            "-e",
            "prod",
            "-i",
            "ghcr.io/acme/api:v2",
            "--argocd-host",
            "argocd.example.com",
            "--argocd-token",
            "t0ken",
        ];
        argv.extend_from_slice(extra);
        Harness::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "--profile",
            "kustomize",
            "--kustomize-file-ref",
            "overlays/prod/kustomization.yaml",
            "--selector-for-release",
            "app",
            "--timeout",
            "120",
        ]);

        let mut config = RolloutConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.kustomize.file_ref, "overlays/prod/kustomization.yaml");
        assert_eq!(config.selectors.release, "app");
        assert_eq!(config.timeouts.invocation, Duration::from_secs(120));
        // Untouched settings keep their defaults
        assert_eq!(
            config.selectors.environment,
            RolloutConfig::default().selectors.environment
        );
    }

    #[test]
    fn test_release_request_skips_missing_cluster() {
        let args = parse(&["--selector-for-release", "app", "--selector-for-environment", "env"]);
        let mut config = RolloutConfig::default();
        args.apply_to(&mut config);

        let request = args.release_request(&config);
        assert_eq!(request.selector(), "app=api,env=prod");
    }

    #[test]
    fn test_release_request_with_cluster() {
        let args = parse(&[
            "-c",
            "eu-1",
            "--selector-for-release",
            "app",
            "--selector-for-environment",
            "env",
            "--selector-for-cluster",
            "cluster",
        ]);
        let mut config = RolloutConfig::default();
        args.apply_to(&mut config);

        assert_eq!(
            args.release_request(&config).selector(),
            "app=api,env=prod,cluster=eu-1"
        );
    }
}
