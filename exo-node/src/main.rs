use {
  crate::cli::NodeConfig,
  anyhow::Context,
  clap::Parser,
  exo_downloader::{default_models_dir, exo_shard_downloader},
  exo_election::{Election, ElectionConfig, FORCED_MASTER_SENIORITY},
  exo_master::Master,
  exo_network::{topics, Identity, LocalTransport, Router, Transport},
  exo_primitives::ConnectionHello,
  exo_worker::{ChildProcessRunner, NodeProfiler, RunnerProcess, Worker},
  metrics_exporter_prometheus::PrometheusBuilder,
  std::{path::PathBuf, sync::Arc},
  tokio::task::JoinHandle,
  tracing::{info, warn},
  tracing_subscriber::filter::LevelFilter,
};

mod cli;

fn identity_path() -> PathBuf {
  let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
  home.join(".exo").join("identity.key")
}

fn init_tracing(config: &NodeConfig) {
  let level = match config.verbosity() {
    i8::MIN..=-1 => LevelFilter::WARN,
    0 => LevelFilter::INFO,
    1 => LevelFilter::DEBUG,
    _ => LevelFilter::TRACE,
  };
  tracing_subscriber::fmt().with_max_level(level).init();
}

fn spawn_worker(
  router: &Router,
  downloader: Arc<dyn exo_downloader::ShardDownloader>,
  runner_process: Arc<dyn RunnerProcess>,
) -> JoinHandle<()> {
  let worker = Worker::new(router, downloader, runner_process);
  let router = router.clone();
  tokio::spawn(async move { worker.run(router).await })
}

fn spawn_master(router: &Router, tb_only: bool, historic_messages: &[ConnectionHello]) -> JoinHandle<()> {
  let mut master = Master::new(router, tb_only);
  master.seed_from_hellos(historic_messages);
  let router = router.clone();
  tokio::spawn(async move { master.run(router).await })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = NodeConfig::parse();
  init_tracing(&config);
  info!("starting EXO node");

  PrometheusBuilder::new()
    .install()
    .expect("failed to install metrics exporter");

  let identity = Identity::load_or_generate(identity_path()).context("loading node identity")?;
  let node_id = identity.node_id();
  info!(%node_id, "node identity ready");

  if !config.peers.is_empty() {
    warn!(
      peers = config.peers.len(),
      "bootstrap peer addresses were supplied, but this build wires the in-process loopback \
       transport only; connecting across OS processes needs a real Transport implementation"
    );
  }
  if config.spawn_api {
    warn!("--spawn-api was requested; the HTTP API surface is an external collaborator and is not started here");
  }
  if config.with_ui {
    warn!("--with-ui was requested; the auxiliary UI process is an external collaborator and is not started here");
  }

  let transport: Arc<dyn Transport> = Arc::new(LocalTransport::standalone());
  let router = Router::new(identity, transport);
  for topic in [
    topics::GLOBAL_EVENTS,
    topics::LOCAL_EVENTS,
    topics::COMMANDS,
    topics::ELECTION_MESSAGES,
    topics::CONNECTION_MESSAGES,
  ] {
    router.register_topic(topic).context("registering well-known topic")?;
  }

  let downloader: Arc<dyn exo_downloader::ShardDownloader> =
    Arc::new(exo_shard_downloader(default_models_dir()));
  let runner_process: Arc<dyn RunnerProcess> = Arc::new(ChildProcessRunner::default());

  tokio::spawn(NodeProfiler::new(router.clone()).run());

  let election_seniority = if config.force_master { FORCED_MASTER_SENIORITY } else { 0 };
  let election_config = ElectionConfig::new(election_seniority);
  let (election, mut election_results) = Election::new(router.clone(), election_config);
  tokio::spawn(election.run());

  let mut worker_handle = spawn_worker(&router, downloader.clone(), runner_process.clone());
  // Every node starts with its own master; it is torn down on demotion
  // and re-created on promotion (spec.md §4.6).
  let mut master_handle = Some(spawn_master(&router, config.tb_only, &[]));

  while let Some(result) = election_results.recv().await {
    let is_self = result.node_id == node_id;
    match (is_self, master_handle.is_some()) {
      (true, true) => info!("confirmed as master"),
      (true, false) => {
        info!("promoted to master");
        master_handle = Some(spawn_master(&router, config.tb_only, &result.historic_messages));
      }
      (false, true) => {
        info!(new_master = %result.node_id, "demoted, tearing down local master");
        if let Some(handle) = master_handle.take() {
          handle.abort();
        }
      }
      (false, false) => info!(new_master = %result.node_id, "acknowledging new master"),
    }

    if result.is_new_master {
      worker_handle.abort();
      worker_handle = spawn_worker(&router, downloader.clone(), runner_process.clone());
    }
  }

  // The election loop only exits when its result channel closes, which
  // means the election task itself died — that's the bus, not us.
  tracing::error!("election result channel closed unexpectedly");
  std::process::exit(2);
}
