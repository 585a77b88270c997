use {clap::Parser, std::net::SocketAddr};

/// Flat CLI config mirroring the teacher's `CliOptions` shape; the HTTP
/// API and UI process themselves are external collaborators (not built
/// here) but their launch flags are still accepted and logged.
#[derive(Debug, Parser)]
#[command(name = "exo-node")]
pub struct NodeConfig {
  /// Repeat for more detail (-v, -vv); pass -q for quiet.
  #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
  pub verbose: u8,

  #[arg(short = 'q', long = "quiet")]
  pub quiet: bool,

  /// Start with maximal election seniority, guaranteeing this node wins.
  #[arg(short = 'm', long = "force-master")]
  pub force_master: bool,

  /// Out of scope: accepted for compatibility, has no effect yet.
  #[arg(long = "spawn-api", default_value_t = false)]
  pub spawn_api: bool,

  #[arg(long = "api-port", default_value_t = 8000)]
  pub api_port: u16,

  #[arg(long = "tb-only")]
  pub tb_only: bool,

  /// Out of scope: accepted for compatibility, has no effect yet.
  #[arg(long = "with-ui", default_value_t = false)]
  pub with_ui: bool,

  #[arg(long = "ui-port", default_value_t = 8001)]
  pub ui_port: u16,

  #[arg(long = "ui-host", default_value = "127.0.0.1")]
  pub ui_host: String,

  /// Known peer addresses to bootstrap mesh membership from.
  #[arg(long = "peer")]
  pub peers: Vec<SocketAddr>,
}

impl NodeConfig {
  pub fn verbosity(&self) -> i8 {
    if self.quiet {
      -1
    } else {
      self.verbose as i8
    }
  }
}
