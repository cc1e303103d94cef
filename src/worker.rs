use actix::prelude::*;
use futures::channel::oneshot;
use std::time::Duration;

use crate::indexer::{self, CycleReport, IndexerContext, StageOutcome};

/// Drives poll cycles on a fixed interval.
///
/// The cycle itself is blocking (diesel and the blocking HTTP client), so it runs on a
/// single sync actor; only one cycle is ever in flight. The next tick is scheduled when
/// the previous cycle reports back, so a slow cycle delays rather than overlaps the next.
pub struct Coordinator {
  context: IndexerContext,
  interval: Duration,
  poller: Option<Addr<PollActor>>,
  next_tick: Option<SpawnHandle>,
  in_flight: bool,
  stop_waiter: Option<oneshot::Sender<()>>,
  stopping: bool,
}

impl Coordinator {
  pub fn new(context: IndexerContext) -> Self {
    let interval = context.config.poll_interval;
    Coordinator {
      context,
      interval,
      poller: None,
      next_tick: None,
      in_flight: false,
      stop_waiter: None,
      stopping: false,
    }
  }

  fn dispatch(&mut self) {
    self.next_tick = None;
    if self.stopping {
      return;
    }
    if let Some(poller) = self.poller.as_ref() {
      self.in_flight = true;
      poller.do_send(RunCycle);
    }
  }
}

impl Actor for Coordinator {
  type Context = Context<Self>;

  fn started(&mut self, ctx: &mut Self::Context) {
    info!("Coordinator started, polling every {:?}.", self.interval);
    let context = self.context.clone();
    let address = ctx.address();
    let poller = SyncArbiter::start(1, move || PollActor::new(context.clone(), address.clone()));
    self.poller = Some(poller);
    self.dispatch();
  }

  fn stopped(&mut self, _: &mut Self::Context) {
    info!("Coordinator stopped.");
  }
}

impl Handler<CycleDone> for Coordinator {
  type Result = ();

  fn handle(&mut self, msg: CycleDone, ctx: &mut Context<Self>) -> Self::Result {
    self.in_flight = false;
    log_report(&msg.0);

    if self.stopping {
      if let Some(waiter) = self.stop_waiter.take() {
        let _ = waiter.send(());
      }
      ctx.stop();
      return;
    }

    let handle = ctx.run_later(self.interval, |coordinator, _| coordinator.dispatch());
    self.next_tick = Some(handle);
  }
}

impl Handler<Shutdown> for Coordinator {
  type Result = ();

  fn handle(&mut self, msg: Shutdown, ctx: &mut Context<Self>) -> Self::Result {
    self.stopping = true;
    if let Some(handle) = self.next_tick.take() {
      ctx.cancel_future(handle);
    }

    if self.in_flight {
      info!("Waiting for the running poll cycle to finish.");
      self.stop_waiter = Some(msg.done);
    } else {
      let _ = msg.done.send(());
      ctx.stop();
    }
  }
}

fn log_report(report: &CycleReport) {
  let stages = [("job-board", &report.job_board), ("work-escrow", &report.work_escrow), ("stats", &report.stats)];
  let failed: Vec<&str> = stages
    .iter()
    .filter(|(_, outcome)| matches!(outcome, StageOutcome::Failed(_)))
    .map(|(name, _)| *name)
    .collect();
  if !failed.is_empty() {
    warn!("Poll cycle finished with failed stages: {}", failed.join(", "));
  } else {
    debug!("Poll cycle finished: {:?}", report);
  }
}

/// Asks the coordinator to stop and resolves once it has.
pub async fn shutdown(coordinator: Addr<Coordinator>) {
  let (done, finished) = oneshot::channel();
  if coordinator.send(Shutdown { done }).await.is_err() {
    return;
  }
  let _ = finished.await;
}

// Messages for coordinator
#[derive(Message)]
#[rtype(result = "()")]
struct CycleDone(CycleReport);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown {
  pub done: oneshot::Sender<()>,
}

// Messages for the poll actor
#[derive(Message)]
#[rtype(result = "()")]
struct RunCycle;

/// Runs poll cycles on its own thread.
pub struct PollActor {
  context: IndexerContext,
  coordinator: Addr<Coordinator>,
}

impl PollActor {
  fn new(context: IndexerContext, coordinator: Addr<Coordinator>) -> Self {
    PollActor { context, coordinator }
  }
}

impl Actor for PollActor {
  type Context = SyncContext<Self>;

  fn started(&mut self, _: &mut SyncContext<Self>) {
    debug!("Poll actor started up.")
  }
}

impl Handler<RunCycle> for PollActor {
  type Result = ();

  fn handle(&mut self, _: RunCycle, _ctx: &mut SyncContext<Self>) -> () {
    let report = indexer::run_cycle(&self.context);
    self.coordinator.do_send(CycleDone(report));
  }
}
