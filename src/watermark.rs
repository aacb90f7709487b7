//! Moving viewer label drawn over playing media.
//!
//! This is a deterrent only. It makes casual screen recordings traceable
//! to a viewer; it does not restrict access to the media in any way.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Where the label sits, as percent offsets from the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub top: u32,
    pub left: u32,
}

#[derive(Debug, Clone)]
pub struct WatermarkSpec {
    pub label: String,
    pub interval: Duration,
    pub initial: Position,
    pub top_range: Range<u32>,
    pub left_range: Range<u32>,
}

impl WatermarkSpec {
    /// Catalog video overlay: asset tag plus a per-session node id
    pub fn catalog() -> Self {
        Self {
            label: format!("Obscura Security Asset NODE_ID: {}", node_id(&mut rand::thread_rng())),
            interval: Duration::from_secs(5),
            initial: Position { top: 10, left: 10 },
            top_range: 10..90,
            left_range: 5..75,
        }
    }

    /// Student lesson overlay showing the viewer's phone number
    pub fn student(phone: Option<&str>) -> Self {
        let label = match phone {
            Some(phone) if !phone.is_empty() => phone.to_string(),
            _ => "PRIVATE".to_string(),
        };
        Self {
            label,
            interval: Duration::from_secs(12),
            initial: Position { top: 20, left: 20 },
            top_range: 10..80,
            left_range: 10..80,
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Position {
        Position {
            top: rng.gen_range(self.top_range.clone()),
            left: rng.gen_range(self.left_range.clone()),
        }
    }
}

/// Nine lowercase base-36 characters
pub fn node_id<R: Rng>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A running overlay; the timer stops when this is dropped.
pub struct Watermark {
    label: String,
    position: watch::Receiver<Position>,
    task: Option<JoinHandle<()>>,
}

impl Watermark {
    /// Starts redrawing on the current tokio runtime. Outside a runtime the
    /// overlay stays at its initial position.
    pub fn start(spec: WatermarkSpec) -> Self {
        let (publish, position) = watch::channel(spec.initial);
        let label = spec.label.clone();
        let task = match Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move {
                let mut rng = StdRng::from_entropy();
                let mut ticker = tokio::time::interval(spec.interval);
                // first tick fires immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if publish.send(spec.sample(&mut rng)).is_err() {
                        break;
                    }
                }
            })),
            Err(_) => {
                log::debug!("no runtime, watermark '{}' stays put", label);
                None
            }
        };
        Self {
            label,
            position,
            task,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn position(&self) -> Position {
        *self.position.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Position> {
        self.position.clone()
    }

    pub fn stop(self) {}
}

impl Drop for Watermark {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_range() {
        let spec = WatermarkSpec::catalog();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let p = spec.sample(&mut rng);
            assert!((10..90).contains(&p.top));
            assert!((5..75).contains(&p.left));
        }
    }

    #[test]
    fn node_id_is_nine_base36_chars() {
        let id = node_id(&mut StdRng::seed_from_u64(1));
        assert_eq!(id.len(), 9);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn student_label_falls_back_to_private() {
        assert_eq!(WatermarkSpec::student(None).label, "PRIVATE");
        assert_eq!(WatermarkSpec::student(Some("")).label, "PRIVATE");
        assert_eq!(WatermarkSpec::student(Some("+15550100")).label, "+15550100");
    }

    #[test]
    fn starts_outside_a_runtime() {
        let watermark = Watermark::start(WatermarkSpec::student(Some("+15550100")));
        assert_eq!(watermark.label(), "+15550100");
        assert_eq!(watermark.position(), Position { top: 20, left: 20 });
        watermark.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn moves_on_each_interval() {
        let watermark = Watermark::start(WatermarkSpec::student(None));
        let mut rx = watermark.watch();
        tokio::task::yield_now().await;
        assert_eq!(watermark.position(), Position { top: 20, left: 20 });

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(!rx.has_changed().unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        rx.changed().await.unwrap();
        let p = watermark.position();
        assert!((10..80).contains(&p.top) && (10..80).contains(&p.left));
    }
}
