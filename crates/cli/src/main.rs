use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use keel_controller::{spawn_runner, Controller};
use keel_core::crd::AdvDeployment;
use keel_core::{EngineConfig, NamespacePolicy, ObjectStore, SharedStore};
use keel_kubehub::KubeStore;
use keel_patch::{diff_summary, Annotator, DiffSummary, PatchCalculator};
use keel_reconcile::kind::strategy_for;
use keel_reconcile::service::desired_service;
use keel_reconcile::workload::desired_workloads;
use serde_json::Value as Json;
use tokio::signal;
use tracing::{error, info, warn};

mod manifest;
mod telemetry;

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel workload reconciliation engine")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for manifests that do not name one
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch AdvDeployments and reconcile them until Ctrl-C
    Run {
        /// Comma separated namespace allow-list; empty admits all
        #[arg(long = "namespaces", env = "KEEL_NAMESPACES")]
        namespaces: Option<String>,
        /// Max concurrent reconciles
        #[arg(long = "workers", env = "KEEL_WORKERS")]
        workers: Option<usize>,
        /// Resync interval in seconds
        #[arg(long = "requeue-secs", env = "KEEL_REQUEUE_SECS")]
        requeue_secs: Option<u64>,
        /// Capacity of the key channel between watchers and the queue
        #[arg(long = "queue-cap", env = "KEEL_QUEUE_CAP", default_value_t = 2048)]
        queue_cap: usize,
    },
    /// Print the Service and Deployments an AdvDeployment manifest expands to
    Render {
        /// Path to an AdvDeployment YAML file ("-" for stdin)
        file: String,
    },
    /// Show the patch that would bring the live object in line with a manifest
    Diff {
        /// Path to a manifest YAML file ("-" for stdin)
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let mut cfg = EngineConfig::from_env();

    match cli.command {
        Commands::Run { namespaces, workers, requeue_secs, queue_cap } => {
            if let Some(ns) = namespaces {
                cfg.namespaces = NamespacePolicy::parse(&ns);
            }
            if let Some(w) = workers {
                cfg.workers = w.max(1);
            }
            if let Some(secs) = requeue_secs {
                cfg.requeue_after = Duration::from_secs(secs);
            }
            telemetry::init_metrics();
            run(cfg, queue_cap).await?;
        }
        Commands::Render { file } => {
            let yaml = manifest::read(&file)?;
            let json = manifest::to_json(&yaml, manifest::Limits::from_env())?;
            let mut owner: AdvDeployment = serde_json::from_value(json).context("decoding AdvDeployment")?;
            if owner.metadata.namespace.is_none() {
                owner.metadata.namespace = cli.namespace.clone();
            }
            let docs = render(&owner, &cfg)?;
            match cli.output {
                Output::Human => {
                    for doc in &docs {
                        print!("---\n{}", serde_yaml::to_string(doc)?);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&docs)?),
            }
        }
        Commands::Diff { file } => {
            let yaml = manifest::read(&file)?;
            let client = kube::Client::try_default().await.context("connecting to cluster")?;
            let ns = cli.namespace.clone().unwrap_or_else(|| client.default_namespace().to_string());
            let mut m = manifest::parse(&yaml, None, manifest::Limits::from_env())?;
            if m.key.namespace.is_none() {
                m = manifest::parse(&yaml, Some(&ns), manifest::Limits::from_env())?;
            }
            info!(kind = %m.gvk.kind, key = %m.key, "diff invoked");
            diff(KubeStore::new(client), m, &cfg, cli.output).await?;
        }
    }

    Ok(())
}

async fn run(cfg: EngineConfig, queue_cap: usize) -> Result<()> {
    let client = kube::Client::try_default().await.context("connecting to cluster")?;
    let store: SharedStore = Arc::new(KubeStore::new(client.clone()));
    let policy = cfg.namespaces.clone();
    let workers = cfg.workers;
    info!(workers, requeue_secs = cfg.requeue_after.as_secs(), namespaces = ?policy.allowed(), "controller starting");

    let controller = Arc::new(Controller::new(store, Arc::new(cfg)));
    let (tx, runner) = spawn_runner(controller, workers, queue_cap);
    let mut source = tokio::spawn(async move {
        if let Err(e) = keel_kubehub::run_event_source(client, policy, tx).await {
            error!(error = ?e, "event source failed");
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => info!("Ctrl-C received; shutting down"),
        _ = &mut source => warn!("event source exited"),
    }
    // Aborting the source drops the last key sender, which lets the runner drain and stop.
    source.abort();
    runner.await.context("runner task")?;
    info!("controller stopped");
    Ok(())
}

fn render(owner: &AdvDeployment, cfg: &EngineConfig) -> Result<Vec<Json>> {
    let mut docs = vec![serde_json::to_value(desired_service(owner, cfg))?];
    for workload in desired_workloads(owner, cfg)? {
        docs.push(serde_json::to_value(workload)?);
    }
    Ok(docs)
}

async fn diff(store: KubeStore, m: manifest::Manifest, cfg: &EngineConfig, output: Output) -> Result<()> {
    let live = match store.get(&m.gvk, &m.key).await {
        Ok(obj) => Some(serde_json::to_value(obj)?),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e).with_context(|| format!("fetching {} {}", m.gvk.kind, m.key)),
    };
    let Some(current) = live else {
        match output {
            Output::Human => println!("{} {} does not exist; it would be created", m.gvk.kind, m.key),
            Output::Json => println!("{}", serde_json::json!({ "kind": m.gvk.kind, "key": m.key.to_string(), "exists": false })),
        }
        return Ok(());
    };

    let calculator = PatchCalculator::new(Annotator::new(cfg.annotation_key.clone()));
    let result = calculator.calculate_json(&current, &m.json, strategy_for(&m.gvk))?;
    let patch: Json = serde_json::from_slice(&result.patch)?;
    let summary: DiffSummary = diff_summary(&serde_json::from_slice(&result.modified)?, &serde_json::from_slice(&result.current)?);

    match output {
        Output::Human => {
            if result.is_empty() {
                println!("{} {} is in sync", m.gvk.kind, m.key);
            } else {
                println!("{} {}: +{} ~{} -{}", m.gvk.kind, m.key, summary.adds, summary.updates, summary.removes);
                println!("{}", serde_json::to_string_pretty(&patch)?);
            }
        }
        Output::Json => {
            #[derive(serde::Serialize)]
            struct Report<'a> { kind: &'a str, key: String, in_sync: bool, patch: &'a Json, summary: DiffSummary }
            let report = Report { kind: &m.gvk.kind, key: m.key.to_string(), in_sync: result.is_empty(), patch: &patch, summary };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADV: &str = r#"
apiVersion: workload.dmall.com/v1beta1
kind: AdvDeployment
metadata:
  name: web
  namespace: default
spec:
  serviceName: web-svc
  template:
    spec:
      containers:
      - name: app
        image: nginx:1
  strategy:
    cellReplicas:
    - cellName: rz01a
      replicas: 2
    - cellName: rz02b
      replicas: 1
"#;

    #[test]
    fn render_expands_service_and_cells() {
        let json = manifest::to_json(ADV, manifest::Limits { bytes: 1 << 16, nodes: 1024 }).unwrap();
        let owner: AdvDeployment = serde_json::from_value(json).unwrap();
        let docs = render(&owner, &EngineConfig::default()).unwrap();
        let names: Vec<_> = docs.iter().map(|d| (d["kind"].as_str().unwrap(), d["metadata"]["name"].as_str().unwrap())).collect();
        assert_eq!(names, vec![("Service", "web-svc"), ("Deployment", "web-rz01a"), ("Deployment", "web-rz02b")]);
        assert_eq!(docs[1]["spec"]["replicas"], 2);
    }
}
