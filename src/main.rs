use clap::{Parser, ValueEnum};
use k8s_openapi::serde_json;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::discovery::{pinned_kind, Scope};
use navisync::cache::{CacheChange, IndexedCache};
use navisync::k8s::{client, kube_indexed_cache, KubeCollection, USER_AGENT};
use navisync::sync::{SyncConfig, SyncStats, SynchronizerBuilder};
use navisync::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    /// One line per cached object
    Summary,
    /// Cached objects and sync statistics as a JSON document
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror a Kubernetes resource kind into a local cache", long_about = None)]
struct Args {
    /// Kind to synchronize, e.g. Pod or Deployment
    #[arg(short, long)]
    kind: String,

    /// API group of the kind; empty for the core group
    #[arg(short, long, default_value = "")]
    group: String,

    /// API version of the kind
    #[arg(long = "api-version", default_value = "v1")]
    api_version: String,

    /// Namespace to watch; all namespaces when omitted
    #[arg(short, long, conflicts_with = "all")]
    namespace: Option<String>,

    /// Watch all namespaces
    #[arg(short = 'A', long)]
    all: bool,

    /// Label selector, e.g. app=web
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Field selector, e.g. status.phase=Running
    #[arg(long)]
    field_selector: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Output::Summary)]
    output: Output,

    /// Print the synced view and exit instead of following changes
    #[arg(long)]
    once: bool,

    /// Delay before the first restart of a failed watch, in milliseconds
    #[arg(long, default_value_t = navisync::sync::config::INITIAL_BACKOFF_MILLIS)]
    backoff_ms: u64,

    /// Server-side watch timeout in seconds
    #[arg(long, default_value_t = navisync::sync::config::WATCH_TIMEOUT_SECONDS)]
    watch_timeout: u32,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "navisync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn print_view(
    cache: &IndexedCache<DynamicObject>,
    kind: &str,
    stats: &SyncStats,
    output: Output,
) -> Result<()> {
    let prefix = format!("{kind}/");
    match output {
        Output::Summary => {
            let keys = cache.keys(&prefix).await;
            for key in &keys {
                println!("{key}");
            }
            println!("{} objects", keys.len());
        }
        Output::Json => {
            let items = cache.values(&prefix).await;
            let view = serde_json::json!({
                "kind": kind,
                "stats": stats,
                "items": items,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }
    Ok(())
}

fn describe(change: &CacheChange<DynamicObject>) -> String {
    match change {
        CacheChange::Added { key, .. } => format!("ADDED {key}"),
        CacheChange::Updated { key, .. } => format!("MODIFIED {key}"),
        CacheChange::Deleted { key, .. } => format!("DELETED {key}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let client = client::new(Some(USER_AGENT)).await?;

    let gvk = GroupVersionKind::gvk(&args.group, &args.api_version, &args.kind);
    let (resource, capabilities) = pinned_kind(&client, &gvk).await?;
    let namespaced = matches!(capabilities.scope, Scope::Namespaced);
    debug!("Resolved {:?} as {} (namespaced: {})", gvk, resource.plural, namespaced);

    let kind = resource.kind.clone();
    let cache = Arc::new(kube_indexed_cache::<DynamicObject>());

    let collection =
        KubeCollection::dynamic(client, resource, namespaced).watch_timeout(args.watch_timeout);
    let mut builder = SynchronizerBuilder::new(cache.clone(), kind.clone())
        .collection(collection)
        .config(SyncConfig {
            initial_backoff: Duration::from_millis(args.backoff_ms.max(1)),
            ..SyncConfig::default()
        });
    builder = match args.namespace {
        Some(namespace) if !args.all => builder.namespace(namespace),
        _ => builder.all_namespaces(),
    };
    if let Some(selector) = args.selector {
        builder = builder.label_selector(selector);
    }
    if let Some(selector) = args.field_selector {
        builder = builder.field_selector(selector);
    }

    let mut sync = builder.build()?;
    sync.start()?;
    let lifecycle = sync.lifecycle();

    tokio::select! {
        ready = lifecycle.wait_ready() => ready?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted before {} was synced", kind);
            return sync.shutdown().await;
        }
    }

    if args.once {
        print_view(&cache, &kind, &sync.stats(), args.output).await?;
        return sync.shutdown().await;
    }

    // Subscribed once synced so the initial population is only printed
    let (subscription_id, mut changes) = cache
        .subscription_manager
        .subscribe(format!("{kind}/*"))
        .await;
    print_view(&cache, &kind, &sync.stats(), args.output).await?;

    let followed = async {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(change) => info!("{}", describe(&change)),
                    None => break,
                },
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                () = lifecycle.wait_stopped() => {
                    return Err(Error::Custom(format!("{kind} synchronizer stopped")));
                }
            }
        }
        Ok::<_, Error>(())
    }
    .await;

    cache.subscription_manager.unsubscribe(&subscription_id).await;
    sync.shutdown().await?;
    followed?;

    let stats = sync.stats();
    debug!(
        "{} - {} cycles, {} restarts, {} events",
        kind,
        stats.cycles,
        stats.restarts,
        stats.events.total()
    );
    Ok(())
}
