#[macro_use]
extern crate diesel;

#[macro_use]
extern crate diesel_migrations;

#[macro_use]
extern crate log;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{middleware, App, HttpServer};
use std::sync::Arc;

mod api;
mod config;
mod constants;
mod db;
mod decode;
mod error;
mod indexer;
mod models;
mod pagination;
mod refresh;
mod responses;
mod rpc;
mod schema;
mod utils;
mod worker;

#[cfg(test)]
mod test_utils;

use crate::config::{Config, GatewayKind};
use crate::error::{ConfigError, IndexerError};
use crate::indexer::IndexerContext;
use crate::rpc::{CommandQueryGateway, ProxyClient, QueryGateway};

const POOL_SIZE: u32 = 8;

#[derive(Debug, PartialEq)]
enum Mode {
  Serve,
  Once,
  Reproject,
}

fn parse_mode<I: Iterator<Item = String>>(mut args: I) -> Result<Mode, ConfigError> {
  match args.next().as_deref() {
    None => Ok(Mode::Serve),
    Some("--once") => Ok(Mode::Once),
    Some("--reproject") => Ok(Mode::Reproject),
    Some(other) => Err(ConfigError::UnknownArgument(other.to_owned())),
  }
}

fn main() {
  let env_path = std::env::var("ENV_FILE").unwrap_or(String::from("./.env"));
  dotenv::from_path(env_path).ok();
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("claws_indexer=info,actix_web=info")).init();

  if let Err(err) = run() {
    error!("{}", err);
    std::process::exit(1);
  }
}

fn run() -> Result<(), IndexerError> {
  let mode = parse_mode(std::env::args().skip(1))?;
  let config = Config::from_env()?;

  // opening the store also runs pending migrations
  let pool = db::establish_pool(&config.db_path, POOL_SIZE)?;
  info!("Store ready at {}.", config.db_path);

  if mode == Mode::Reproject {
    let summary = db::reproject_all(&*pool.get()?)?;
    info!(
      "Reprojected {} jobs, {} agreements and {} reputations.",
      summary.jobs, summary.agreements, summary.reputations
    );
    return Ok(());
  }

  // reqwest's blocking client cannot be created from within the async runtime
  let proxy = ProxyClient::new(&config)?;
  let gateway: Arc<dyn QueryGateway> = match config.gateway {
    GatewayKind::Proxy => Arc::new(proxy.clone()),
    GatewayKind::Command => Arc::new(CommandQueryGateway::new(&config)),
  };
  info!(
    "Indexing chain {} via {} with the {:?} query gateway.",
    config.chain_id, config.proxy_url, config.gateway
  );
  let context = IndexerContext::new(pool, config, Arc::new(proxy), gateway);

  if mode == Mode::Once {
    let report = indexer::run_cycle(&context);
    info!("Cycle finished: {:?}", report);
    return Ok(());
  }

  let mut system = actix_web::rt::System::new("claws-indexer");
  system.block_on(serve(context))?;
  Ok(())
}

async fn serve(context: IndexerContext) -> std::io::Result<()> {
  let coordinator = if context.config.run_worker {
    Some(worker::Coordinator::new(context.clone()).start())
  } else {
    info!("RUN_WORKER is off, serving reads only.");
    None
  };

  let bind = context.config.bind.clone();
  info!("Starting server at: {}", &bind);
  let served = HttpServer::new(move || {
    App::new()
      .data(context.clone())
      .wrap(Cors::permissive())
      .wrap(middleware::Logger::default())
      .configure(api::configure)
  })
  .bind(bind)?
  .run()
  .await;

  if let Some(coordinator) = coordinator {
    worker::shutdown(coordinator).await;
  }
  served
}
