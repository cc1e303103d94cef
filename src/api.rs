//! Diesel does not support tokio, so every store access runs in `web::block`, which
//! offloads blocking code to a thread pool instead of stalling the server's threads.
//! The read-through refreshes call the query gateway from the same blocking closure.

use actix_web::{get, web, HttpResponse};
use diesel::SqliteConnection;
use serde::Deserialize;
use serde_json::json;

use crate::db;
use crate::error::{ApiError, IndexerError};
use crate::indexer::IndexerContext;
use crate::models::StatsView;
use crate::pagination::{Page, PaginatedResult};
use crate::refresh::Refresher;
use crate::utils;

#[derive(Deserialize)]
struct JobsQuery {
  status: Option<String>,
  limit: Option<i64>,
  offset: Option<i64>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("")
      .app_data(web::PathConfig::default().error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()))
      .app_data(web::QueryConfig::default().error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()))
      .service(health)
      .service(get_stats)
      .service(get_jobs)
      .service(get_job)
      .service(get_agreement)
      .service(get_reputation)
      .default_service(web::route().to(route_not_found)),
  );
}

/// Liveness check.
#[get("/health")]
async fn health() -> HttpResponse {
  HttpResponse::Ok().json(json!({ "ok": true, "ts": utils::now_ms() }))
}

/// Latest stats snapshot, zeroed until the first successful refresh.
#[get("/stats")]
async fn get_stats(ctx: web::Data<IndexerContext>) -> Result<HttpResponse, ApiError> {
  let stats = web::block(move || {
    let conn = ctx.pool.get()?;
    let view = match db::get_stats(&conn)? {
      Some(stats) => StatsView::from_stats(&stats)?,
      None => StatsView::placeholder(),
    };
    Ok::<StatsView, IndexerError>(view)
  })
  .await?;

  Ok(HttpResponse::Ok().json(stats))
}

/// Lists jobs, newest id first.
#[get("/jobs")]
async fn get_jobs(query: web::Query<JobsQuery>, ctx: web::Data<IndexerContext>) -> Result<HttpResponse, ApiError> {
  let query = query.into_inner();
  let page = Page::new(query.limit, query.offset);
  let status = query.status.filter(|s| !s.is_empty());

  let jobs = web::block(move || {
    let conn = ctx.pool.get()?;
    let items = db::list_jobs(&conn, status.as_deref(), page)?
      .into_iter()
      .map(|job| job.into_view())
      .collect::<Result<Vec<_>, _>>()?;
    Ok::<_, IndexerError>(PaginatedResult::new(items, page))
  })
  .await?;

  Ok(HttpResponse::Ok().json(jobs))
}

#[get("/jobs/{id}")]
async fn get_job(path: web::Path<i64>, ctx: web::Data<IndexerContext>) -> Result<HttpResponse, ApiError> {
  let job_id = path.into_inner();
  let job = web::block(move || {
    read_through(&ctx, |conn| db::find_job(conn, job_id), |refresher| refresher.job(job_id, ""))?
      .map(|job| job.into_view())
      .transpose()
      .map_err(IndexerError::from)
  })
  .await?;

  job.map(|view| HttpResponse::Ok().json(view)).ok_or(ApiError::NotFound)
}

#[get("/agreements/{id}")]
async fn get_agreement(path: web::Path<i64>, ctx: web::Data<IndexerContext>) -> Result<HttpResponse, ApiError> {
  let agreement_id = path.into_inner();
  let agreement = web::block(move || {
    read_through(
      &ctx,
      |conn| db::find_agreement(conn, agreement_id),
      |refresher| refresher.agreement(agreement_id, ""),
    )?
    .map(|agreement| agreement.into_view())
    .transpose()
    .map_err(IndexerError::from)
  })
  .await?;

  agreement.map(|view| HttpResponse::Ok().json(view)).ok_or(ApiError::NotFound)
}

#[get("/agents/{address}/reputation")]
async fn get_reputation(path: web::Path<String>, ctx: web::Data<IndexerContext>) -> Result<HttpResponse, ApiError> {
  let address = path.into_inner();
  let reputation = web::block(move || {
    read_through(
      &ctx,
      |conn| db::find_reputation(conn, &address),
      |refresher| refresher.reputation(&address, ""),
    )?
    .map(|reputation| reputation.into_view())
    .transpose()
    .map_err(IndexerError::from)
  })
  .await?;

  reputation.map(|view| HttpResponse::Ok().json(view)).ok_or(ApiError::NotFound)
}

async fn route_not_found() -> Result<HttpResponse, ApiError> {
  Err(ApiError::RouteNotFound)
}

/// Reads a row; on a miss refreshes it from the chain once and reads again.
/// No connection is held while the refresh queries the gateway.
fn read_through<T, F, R>(ctx: &IndexerContext, find: F, refresh: R) -> Result<Option<T>, IndexerError>
where
  F: Fn(&SqliteConnection) -> Result<Option<T>, IndexerError>,
  R: FnOnce(&Refresher) -> Result<bool, IndexerError>,
{
  let lookup = || -> Result<Option<T>, IndexerError> {
    let pooled = ctx.pool.get()?;
    let conn: &SqliteConnection = &pooled;
    find(conn)
  };
  if let Some(row) = lookup()? {
    return Ok(Some(row));
  }

  refresh(&ctx.refresher())?;
  lookup()
}
