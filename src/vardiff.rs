use super::*;

/// Per-port variable-difficulty settings, from the `ports.{port}.varDiff`
/// config block.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VardiffOptions {
    pub min_diff: f64,
    pub max_diff: f64,
    /// Desired seconds between shares.
    pub target_time: f64,
    /// Minimum seconds between retargets.
    pub retarget_time: f64,
    /// Allowed drift around `target_time`, in percent.
    pub variance_percent: f64,
    #[serde(default)]
    pub x2mode: bool,
}

/// Fixed-capacity window of the most recent inter-share intervals.
#[derive(Debug, Clone)]
struct RingBuffer {
    max_size: usize,
    cursor: usize,
    contents: Vec<f64>,
}

impl RingBuffer {
    fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            cursor: 0,
            contents: Vec::new(),
        }
    }

    fn append(&mut self, sample: f64) {
        if self.contents.len() < self.max_size {
            self.contents.push(sample);
        } else {
            self.contents[self.cursor] = sample;
            self.cursor = (self.cursor + 1) % self.max_size;
        }
    }

    fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    fn avg(&self) -> f64 {
        self.contents.iter().sum::<f64>() / self.contents.len() as f64
    }

    fn clear(&mut self) {
        self.contents.clear();
        self.cursor = 0;
    }
}

/// Sliding-window retargeter: every connection gets one, aiming its share
/// interval at `target_time`. Timestamps are plain seconds so the controller
/// is driven identically by the clock and by tests.
#[derive(Debug, Clone)]
pub struct Vardiff {
    options: VardiffOptions,
    t_min: f64,
    t_max: f64,
    buffer: RingBuffer,
    last_timestamp: Option<f64>,
    last_retarget: f64,
}

impl Vardiff {
    pub fn new(options: VardiffOptions, now: f64) -> Self {
        let buffer_size = (options.retarget_time / options.target_time * 4.0) as usize;
        let variance = options.target_time * options.variance_percent / 100.0;

        Self {
            options,
            t_min: options.target_time - variance,
            t_max: options.target_time + variance,
            buffer: RingBuffer::new(buffer_size),
            last_timestamp: None,
            // first retarget comes after half a window, as miners warm up
            last_retarget: now - options.retarget_time / 2.0,
        }
    }

    pub fn options(&self) -> &VardiffOptions {
        &self.options
    }

    /// Records a submit at `now` and returns the new difficulty when a
    /// retarget fires. Retargets happen at most once per `retarget_time`.
    pub fn on_share(&mut self, now: f64, current_diff: f64) -> Option<f64> {
        if let Some(last) = self.last_timestamp {
            self.buffer.append(now - last);
        }
        self.last_timestamp = Some(now);

        if now - self.last_retarget < self.options.retarget_time && !self.buffer.is_empty() {
            return None;
        }

        if self.buffer.is_empty() {
            return None;
        }

        self.last_retarget = now;
        let avg = self.buffer.avg();
        let mut factor = self.options.target_time / avg;

        if avg > self.t_max && current_diff > self.options.min_diff {
            if self.options.x2mode {
                factor = 0.5;
            }
            if factor * current_diff < self.options.min_diff {
                factor = self.options.min_diff / current_diff;
            }
        } else if avg < self.t_min && current_diff < self.options.max_diff {
            if self.options.x2mode {
                factor = 2.0;
            }
            if factor * current_diff > self.options.max_diff {
                factor = self.options.max_diff / current_diff;
            }
        } else {
            return None;
        }

        self.buffer.clear();

        let new_diff = current_diff * factor;
        (new_diff != current_diff).then_some(new_diff)
    }
}
