use log::trace;
use crate::error::Result;

/// Returned by [`RelaunchableJob::job_state`] to indicate what a job is
/// waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// The job is waiting for messages to arrive.
    CommunicationWait,
    /// The job has work it can do now, without any communication.
    NoncommunicationWait,
    /// The job is finished; it must not be continued again.
    Completed,
}

impl JobState {
    pub fn completed_if(condition: bool) -> Self {
        if condition {
            Self::Completed
        } else {
            Self::CommunicationWait
        }
    }
}

/// A task that runs in stages, yielding whenever it would otherwise block on
/// communication. The driver keeps calling `continue_job` until the job
/// reports `Completed`; each call makes whatever progress is possible
/// without blocking and then returns. This lets one thread interleave
/// several communicating tasks, for example two schedules whose messages
/// may arrive in either order.
///
pub trait RelaunchableJob {
    /// Make as much progress as possible without blocking.
    fn continue_job(&mut self) -> Result<()>;

    /// Report what the job is waiting on.
    fn job_state(&self) -> JobState;
}

/// Drives a group of jobs to completion by repeatedly continuing every job
/// that has not completed. The first error from any job stops the run.
///
pub struct JobRelauncher<'a> {
    jobs: Vec<&'a mut dyn RelaunchableJob>,
}

impl<'a> JobRelauncher<'a> {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn push(&mut self, job: &'a mut dyn RelaunchableJob) {
        self.jobs.push(job)
    }

    /// Continue the jobs, in the order they were pushed, until all have
    /// completed. Yields the thread between passes in which every remaining
    /// job was waiting on communication.
    ///
    pub fn run(mut self) -> Result<()> {
        let mut passes = 0;

        loop {
            let mut all_waiting = true;
            let mut remaining = 0;

            for job in self.jobs.iter_mut() {
                if job.job_state() == JobState::Completed {
                    continue
                }
                if job.job_state() == JobState::NoncommunicationWait {
                    all_waiting = false
                }
                job.continue_job()?;

                if job.job_state() != JobState::Completed {
                    remaining += 1
                }
            }
            passes += 1;

            if remaining == 0 {
                trace!("{} jobs completed in {} passes", self.jobs.len(), passes);
                return Ok(())
            }
            if all_waiting {
                std::thread::yield_now()
            }
        }
    }
}

impl<'a> Default for JobRelauncher<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {

    use crate::error::{Error, Result};
    use super::{JobRelauncher, JobState, RelaunchableJob};

    /// Completes after a fixed number of continuations.
    struct Countdown {
        remaining: usize,
        calls: usize,
    }

    impl RelaunchableJob for Countdown {
        fn continue_job(&mut self) -> Result<()> {
            self.calls += 1;
            self.remaining = self.remaining.saturating_sub(1);
            Ok(())
        }

        fn job_state(&self) -> JobState {
            JobState::completed_if(self.remaining == 0)
        }
    }

    struct Failing;

    impl RelaunchableJob for Failing {
        fn continue_job(&mut self) -> Result<()> {
            Err(Error::Protocol("bad message".to_string()))
        }

        fn job_state(&self) -> JobState {
            JobState::CommunicationWait
        }
    }

    #[test]
    fn relauncher_runs_every_job_to_completion() {
        let mut a = Countdown { remaining: 1, calls: 0 };
        let mut b = Countdown { remaining: 4, calls: 0 };
        let mut relauncher = JobRelauncher::new();
        relauncher.push(&mut a);
        relauncher.push(&mut b);
        relauncher.run().unwrap();
        assert_eq!((a.calls, b.calls), (1, 4));
    }

    #[test]
    fn relauncher_stops_on_error() {
        let mut a = Countdown { remaining: 10, calls: 0 };
        let mut b = Failing;
        let mut relauncher = JobRelauncher::new();
        relauncher.push(&mut a);
        relauncher.push(&mut b);
        assert!(relauncher.run().is_err());
        assert_eq!(a.calls, 1);
    }
}
