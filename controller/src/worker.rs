use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use nalgebra::DVector;
use rotor_math::{
    coefficients::{check_coefficients, CoefficientSource, PredictionMode},
    CoefficientError, CoefficientResult,
};
use tracing::{debug, error, span, Level};

struct Request {
    id: u64,
    observation: DVector<f64>,
    mode: PredictionMode,
}

struct Response {
    id: u64,
    result: CoefficientResult<DVector<f64>>,
}

/// Runs a coefficient source on its own thread so a slow prediction can never stall
/// the control loop past its inference budget
pub struct CoefficientWorker {
    requests: Sender<Request>,
    responses: Receiver<Response>,
    handle: JoinHandle<()>,

    next_id: u64,
    /// Request that missed its deadline and has not been answered yet
    in_flight: Option<u64>,

    budget: Duration,
    observation_dim: usize,
    coefficient_dim: usize,
}

impl CoefficientWorker {
    pub fn spawn<S: CoefficientSource + 'static>(
        mut source: S,
        budget: Duration,
    ) -> anyhow::Result<Self> {
        let observation_dim = source.observation_dim();
        let coefficient_dim = source.coefficient_dim();

        let (tx_request, rx_request) = channel::bounded::<Request>(1);
        let (tx_response, rx_response) = channel::bounded::<Response>(1);

        let handle = thread::Builder::new()
            .name("Coefficient Worker".to_owned())
            .spawn(move || {
                let _span = span!(Level::INFO, "Coefficient worker").entered();

                for request in rx_request {
                    let span = span!(Level::TRACE, "Coefficient prediction", id = request.id).entered();

                    let result = source.predict(&request.observation, request.mode);
                    let res = tx_response.send(Response {
                        id: request.id,
                        result,
                    });

                    if res.is_err() {
                        // Control loop is gone
                        return;
                    }

                    span.exit();
                }
            })
            .context("Start coefficient worker")?;

        Ok(Self {
            requests: tx_request,
            responses: rx_response,
            handle,
            next_id: 0,
            in_flight: None,
            budget,
            observation_dim,
            coefficient_dim,
        })
    }

    pub fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    pub fn coefficient_dim(&self) -> usize {
        self.coefficient_dim
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Blocks for at most the inference budget. Errors are meant to be answered with a
    /// fallback by the caller, the worker stays usable afterwards.
    pub fn request(
        &mut self,
        observation: DVector<f64>,
        mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>> {
        self.collect_stale()?;

        if self.in_flight.is_some() {
            return Err(CoefficientError::Busy);
        }

        let id = self.next_id;
        self.next_id += 1;

        match self.requests.try_send(Request {
            id,
            observation,
            mode,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(CoefficientError::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(CoefficientError::Disconnected),
        }

        let deadline = Instant::now() + self.budget;
        loop {
            match self.responses.recv_deadline(deadline) {
                Ok(response) if response.id == id => {
                    let coefficients = response.result?;
                    check_coefficients(self.coefficient_dim, &coefficients)?;

                    return Ok(coefficients);
                }
                Ok(response) => {
                    debug!(id = response.id, "Discarding stale coefficients");
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.in_flight = Some(id);
                    return Err(CoefficientError::Timeout(self.budget));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CoefficientError::Disconnected),
            }
        }
    }

    /// Drops answers to requests that already fell back
    fn collect_stale(&mut self) -> CoefficientResult<()> {
        while let Some(id) = self.in_flight {
            match self.responses.try_recv() {
                Ok(response) => {
                    debug!(id = response.id, "Discarding stale coefficients");

                    if response.id == id {
                        self.in_flight = None;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(CoefficientError::Disconnected),
            }
        }

        Ok(())
    }

    pub fn shutdown(self) {
        let Self {
            requests, handle, ..
        } = self;

        drop(requests);
        if handle.join().is_err() {
            error!("Coefficient worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use nalgebra::dvector;

    use super::*;

    /// Sleeps for the next scripted delay, then answers with its call count
    struct ScriptedSource {
        delays: VecDeque<Duration>,
        calls: usize,
    }

    impl ScriptedSource {
        fn new(delays: impl IntoIterator<Item = u64>) -> Self {
            Self {
                delays: delays.into_iter().map(Duration::from_millis).collect(),
                calls: 0,
            }
        }
    }

    impl CoefficientSource for ScriptedSource {
        fn observation_dim(&self) -> usize {
            1
        }

        fn coefficient_dim(&self) -> usize {
            2
        }

        fn predict(
            &mut self,
            _observation: &DVector<f64>,
            _mode: PredictionMode,
        ) -> CoefficientResult<DVector<f64>> {
            if let Some(delay) = self.delays.pop_front() {
                thread::sleep(delay);
            }
            self.calls += 1;

            Ok(dvector![self.calls as f64, 0.0])
        }
    }

    struct BrokenSource;

    impl CoefficientSource for BrokenSource {
        fn observation_dim(&self) -> usize {
            1
        }

        fn coefficient_dim(&self) -> usize {
            2
        }

        fn predict(
            &mut self,
            _observation: &DVector<f64>,
            _mode: PredictionMode,
        ) -> CoefficientResult<DVector<f64>> {
            Ok(dvector![f64::NAN, 0.0])
        }
    }

    const MODE: PredictionMode = PredictionMode::Deterministic;

    #[test]
    fn answers_within_budget() {
        let mut worker =
            CoefficientWorker::spawn(ScriptedSource::new([]), Duration::from_millis(500)).unwrap();

        assert_eq!(worker.request(dvector![0.0], MODE).unwrap(), dvector![1.0, 0.0]);
        assert_eq!(worker.request(dvector![0.0], MODE).unwrap(), dvector![2.0, 0.0]);

        worker.shutdown();
    }

    #[test]
    fn slow_prediction_times_out_then_recovers() {
        let budget = Duration::from_millis(100);
        let mut worker = CoefficientWorker::spawn(ScriptedSource::new([400]), budget).unwrap();

        assert_eq!(
            worker.request(dvector![0.0], MODE),
            Err(CoefficientError::Timeout(budget))
        );
        // First prediction is still running
        assert_eq!(worker.request(dvector![0.0], MODE), Err(CoefficientError::Busy));

        thread::sleep(Duration::from_millis(600));

        // The late answer to the first request is dropped, not handed out
        assert_eq!(worker.request(dvector![0.0], MODE).unwrap(), dvector![2.0, 0.0]);

        worker.shutdown();
    }

    #[test]
    fn invalid_output_is_rejected() {
        let mut worker =
            CoefficientWorker::spawn(BrokenSource, Duration::from_millis(500)).unwrap();

        assert_eq!(
            worker.request(dvector![0.0], MODE),
            Err(CoefficientError::NonFinite)
        );

        worker.shutdown();
    }
}
