use indicatif::{ProgressBar, ProgressStyle};
use tvprobe_engine::{Category, ProbeEvent};

fn probe_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} channels")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Progress bar driven by orchestrator events.
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(probe_style());
        bar.enable_steady_tick(std::time::Duration::from_millis(200));
        Self { bar }
    }

    pub fn new_disabled() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn handle_event(&self, event: ProbeEvent) {
        match event {
            ProbeEvent::Started { index, name } => {
                self.bar.set_message(format!("#{index} {name}"));
            }
            ProbeEvent::Finished {
                index,
                name,
                category,
            } => {
                if category != Category::Playable {
                    self.bar.set_message(format!("#{index} {name}: {category}"));
                }
                self.bar.inc(1);
            }
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
