use std::time::Duration;

/// Provides an infinite stream of back off durations, where the duration
/// increases by an exponential factor up to some maximum delay. Upon
/// reaching the maximum delay, that value will be returned from then on.
/// Use `Iterator::take` to bound the number of attempts.
///
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(current)
    }
}

/// Retry a fallible operation, sleeping for each duration yielded by the
/// iterator between attempts. The `on_err` closure sees each failure along
/// with the delay before the next attempt, so that it can be logged. Returns
/// the first success, or the last error once the iterator is exhausted.
///
pub fn retry<I, F, S, T, E>(delays: I, mut f: F, on_err: S) -> Result<T, E>
where
    I: IntoIterator<Item = Duration>,
    F: FnMut() -> Result<T, E>,
    S: Fn(&E, Duration),
{
    let mut delays = delays.into_iter().peekable();
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => match delays.next() {
                Some(delay) if delays.peek().is_some() => {
                    on_err(&e, delay);
                    std::thread::sleep(delay)
                }
                _ => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod test {

    use std::cell::Cell;
    use std::time::Duration;
    use super::{ExponentialBackoff, retry};

    #[test]
    fn delays_grow_to_the_maximum() {
        let delays: Vec<_> = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2).take(5).collect();
        let millis: Vec<_> = delays.iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn retry_stops_at_first_success() {
        let attempts = Cell::new(0);
        let delays = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(1), 1).take(10);
        let result: Result<usize, &str> = retry(delays, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 { Err("not yet") } else { Ok(attempts.get()) }
        }, |_, _| ());
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn retry_gives_up() {
        let delays = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(1), 1).take(3);
        let result: Result<(), &str> = retry(delays, || Err("never"), |_, _| ());
        assert_eq!(result, Err("never"));
    }
}
