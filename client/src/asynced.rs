//! Runs a [`Session`] on a dedicated thread and exposes it to async code.
//!
//! Requests are queued and executed one by one, so polls of the same session
//! never overlap. Replies are delivered over a oneshot channel.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::protocol::{FullCycle, MeasureState, ServerState, Spectrum, TimingInfo};
use crate::{Error, Result, Session, Transport};

type Job<T> = Box<dyn FnOnce(&mut Session<T>) + Send>;

enum Msg<T: Transport> {
    Request(Job<T>),
    Drop,
}

pub struct AsyncSession<T: Transport> {
    tx: mpsc::Sender<Msg<T>>,
}

impl<T: Transport> Clone for AsyncSession<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Transport + 'static> AsyncSession<T> {
    pub fn spawn(mut session: Session<T>) -> Self {
        let (tx, rx) = mpsc::channel::<Msg<T>>();
        thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    Msg::Request(job) => job(&mut session),
                    Msg::Drop => break,
                }
            }
            log::debug!("Session thread for {} exits", session.address());
        });
        Self { tx }
    }

    /// Runs `f` on the session thread and awaits its result.
    pub async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session<T>) -> Result<R> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job<T> = Box::new(move |session| {
            let _ = reply.send(f(session));
        });
        self.tx
            .send(Msg::Request(job))
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn measure_state(&self) -> Result<MeasureState> {
        self.run(|s| s.measure_state()).await
    }

    pub async fn server_state(&self) -> Result<ServerState> {
        self.run(|s| s.server_state()).await
    }

    pub async fn next_timecycle(&self, timeout: Duration) -> Result<TimingInfo> {
        self.run(move |s| s.next_timecycle(timeout)).await
    }

    pub async fn next_spectrum(&self, timeout: Duration) -> Result<(TimingInfo, Spectrum)> {
        self.run(move |s| s.next_spectrum(timeout)).await
    }

    pub async fn next_full_cycle(&self, timeout: Duration) -> Result<FullCycle> {
        self.run(move |s| s.next_full_cycle(timeout)).await
    }

    /// Stops the session thread once all queued requests are served.
    pub fn disconnect(self) {
        let _ = self.tx.send(Msg::Drop);
    }
}
