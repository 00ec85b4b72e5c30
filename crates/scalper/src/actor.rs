//! One task per underlying owning its scalper
//!
//! Every input reaches the state machine through the actor's mailbox, so a
//! tick-driven exit and a context-driven re-arm can never interleave. The
//! actor also owns the theta watchdog: a deadline is scheduled when a trade
//! enters and cancelled on any exit.

use crate::engine::ConfluenceScalper;
use crate::error::{ScalperError, ScalperResult};
use crate::types::{LegMap, MarketContext, ScalperEvent, ScalperStatus};
use chrono::Utc;
use common::{Candle, TaskScheduler, Tick, TradeId};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) enum Command {
    Tick(Tick),
    Context(MarketContext),
    SetLegs(LegMap, oneshot::Sender<ScalperResult<()>>),
    SeedLegs(Vec<Candle>),
    ThetaDeadline(TradeId),
    Status(oneshot::Sender<ScalperStatus>),
    Stop(oneshot::Sender<ScalperResult<ScalperStatus>>),
}

/// Cloneable mailbox of a running scalper
#[derive(Clone)]
pub struct ScalperHandle {
    underlying: String,
    tx: mpsc::Sender<Command>,
}

impl ScalperHandle {
    /// Spawn the actor task; the caller owns its join handle
    pub fn spawn(
        scalper: ConfluenceScalper,
        theta_window: Duration,
        mailbox_capacity: usize,
        events: broadcast::Sender<ScalperEvent>,
        shutdown: &CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let underlying = scalper.underlying().to_string();
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let actor = ScalperActor {
            scalper,
            rx,
            mailbox: tx.downgrade(),
            watchdog: TaskScheduler::with_parent(shutdown),
            theta_window,
            events,
        };
        let task = tokio::spawn(actor.run());
        (Self { underlying, tx }, task)
    }

    pub fn underlying(&self) -> &str {
        &self.underlying
    }

    async fn send(&self, command: Command) -> ScalperResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ScalperError::ActorGone(self.underlying.clone()))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> ScalperResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ScalperError::ActorGone(self.underlying.clone()))
    }

    pub async fn tick(&self, tick: Tick) -> ScalperResult<()> {
        self.send(Command::Tick(tick)).await
    }

    /// Enqueue a tick without waiting for mailbox space
    pub fn try_tick(&self, tick: Tick) -> ScalperResult<()> {
        self.tx.try_send(Command::Tick(tick)).map_err(|e| match e {
            TrySendError::Full(_) => ScalperError::MailboxFull(self.underlying.clone()),
            TrySendError::Closed(_) => ScalperError::ActorGone(self.underlying.clone()),
        })
    }

    pub async fn context(&self, context: MarketContext) -> ScalperResult<()> {
        self.send(Command::Context(context)).await
    }

    pub async fn seed_legs(&self, candles: Vec<Candle>) -> ScalperResult<()> {
        self.send(Command::SeedLegs(candles)).await
    }

    pub async fn set_legs(&self, legs: LegMap) -> ScalperResult<()> {
        self.request(|reply| Command::SetLegs(legs, reply)).await?
    }

    pub async fn status(&self) -> ScalperResult<ScalperStatus> {
        self.request(Command::Status).await
    }

    /// Flush and stop. On a ledger failure the actor keeps running.
    pub async fn stop(&self) -> ScalperResult<ScalperStatus> {
        self.request(Command::Stop).await?
    }
}

struct ScalperActor {
    scalper: ConfluenceScalper,
    rx: mpsc::Receiver<Command>,
    mailbox: mpsc::WeakSender<Command>,
    watchdog: TaskScheduler<TradeId>,
    theta_window: Duration,
    events: broadcast::Sender<ScalperEvent>,
}

impl ScalperActor {
    async fn run(mut self) {
        info!(underlying = %self.scalper.underlying(), "Scalper started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Tick(tick) => {
                    let events = self.scalper.on_tick(&tick).await;
                    self.publish(events);
                }
                Command::Context(context) => {
                    let events = self.scalper.update_context(context, Utc::now()).await;
                    self.publish(events);
                }
                Command::SetLegs(legs, reply) => {
                    let _ = reply.send(self.scalper.set_legs(legs));
                }
                Command::SeedLegs(candles) => self.scalper.seed_leg_history(candles),
                Command::ThetaDeadline(trade_id) => {
                    let events = self.scalper.on_theta_deadline(trade_id, Utc::now()).await;
                    self.publish(events);
                }
                Command::Status(reply) => {
                    let _ = reply.send(self.scalper.status());
                }
                Command::Stop(reply) => match self.scalper.stop(Utc::now()).await {
                    Ok(events) => {
                        self.publish(events);
                        let drained = self.watchdog.cancel_all();
                        debug!(underlying = %self.scalper.underlying(), drained, "Timers drained");
                        let _ = reply.send(Ok(self.scalper.status()));
                        break;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
            }
        }
        self.watchdog.cancel_all();
        info!(underlying = %self.scalper.underlying(), "Scalper stopped");
    }

    fn publish(&self, events: Vec<ScalperEvent>) {
        for event in events {
            match &event {
                ScalperEvent::Entered(trade) => self.arm_watchdog(trade.id),
                ScalperEvent::Exited(record) => {
                    self.watchdog.cancel(&record.trade_id);
                }
                _ => {}
            }
            let _ = self.events.send(event);
        }
    }

    fn arm_watchdog(&self, trade_id: TradeId) {
        let mailbox = self.mailbox.clone();
        self.watchdog.schedule(trade_id, self.theta_window, async move {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Command::ThetaDeadline(trade_id)).await;
            }
        });
    }
}
