use std::collections::VecDeque;

/// Number of samples each console series keeps.
pub const HISTORY_CAPACITY: usize = 50;

/// Fixed-capacity FIFO series; pushing onto a full series evicts the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySeries<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> Default for TelemetrySeries<T> {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl<T> TelemetrySeries<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        TelemetrySeries {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Appends a sample and returns the entry it evicted, if any.
    pub fn push(&mut self, sample: T) -> Option<T> {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&T> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }
}

impl<T: Clone> TelemetrySeries<T> {
    /// Copy of the contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.samples.iter().cloned().collect()
    }
}

/// Temperature sample as shown on the console, with its receipt time.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperaturePoint {
    pub value: f64,
    /// Local receipt time, `%H:%M:%S`
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_first_sample_evicts_the_oldest() {
        let mut series = TelemetrySeries::default();
        for i in 0..50 {
            assert_eq!(series.push(i), None);
        }
        assert_eq!(series.len(), 50);

        assert_eq!(series.push(50), Some(0));
        assert_eq!(series.len(), 50);
        assert_eq!(series.iter().next(), Some(&1));
        assert_eq!(series.latest(), Some(&50));
    }

    #[test]
    fn long_runs_stay_bounded() {
        let mut series = TelemetrySeries::with_capacity(3);
        for i in 0..10 {
            series.push(i);
        }
        assert_eq!(series.snapshot(), vec![7, 8, 9]);
    }
}
